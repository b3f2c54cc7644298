//! Encoding and delimiter detection for one extract file.
//!
//! Cheap-before-expensive: a BOM/null-byte probe narrows the encoding, then
//! ordered (encoding, delimiter) candidates are tried against a small sample
//! until one yields a structural header parse with more than zero columns.
//! Exhausting every candidate is fatal for the file, never for the batch.

pub mod delimiter;
pub mod encoding;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use tracing::debug;

pub use delimiter::{sniff_delimiter, DELIMITER_CANDIDATES};
pub use encoding::{candidate_encodings, detect_encoding, TextEncoding};

/// How one file is to be decoded and split. Detected once per file during
/// discovery and cached on its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub encoding: TextEncoding,
    pub delimiter: u8,
}

/// Parse the first record of `text` as a header row. `None` when nothing
/// parses or every field is empty.
pub fn parse_header_row(text: &str, delimiter: u8) -> Option<Vec<String>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let record = rdr.records().next()?.ok()?;
    let headers: Vec<String> = record
        .iter()
        .map(|f| f.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return None;
    }
    Some(headers)
}

/// Determine the dialect of `path` and return it with the observed header
/// names. Reads only a bounded sample from disk.
pub fn sniff_dialect(
    path: &Path,
    sample_bytes: usize,
    null_threshold: usize,
) -> Result<(Dialect, Vec<String>)> {
    let mut sample = Vec::new();
    File::open(path)
        .and_then(|f| f.take(sample_bytes as u64).read_to_end(&mut sample))
        .with_context(|| format!("reading sample of {}", path.display()))?;

    let detected = detect_encoding(&sample, null_threshold);

    for enc in candidate_encodings(detected) {
        // samples may cut a multi-byte sequence short, so sniff on a lossy
        // decode; strictness is the loader's business
        let text = enc.decode_lossy(&sample);
        if text.trim().is_empty() {
            continue;
        }
        let preferred = sniff_delimiter(&text);
        let mut delims = vec![preferred];
        delims.extend(DELIMITER_CANDIDATES.iter().copied().filter(|d| *d != preferred));
        for delim in delims {
            if let Some(headers) = parse_header_row(&text, delim) {
                debug!(
                    file = %path.display(),
                    encoding = enc.name(),
                    delimiter = %(delim as char),
                    columns = headers.len(),
                    "dialect accepted"
                );
                return Ok((
                    Dialect {
                        encoding: enc,
                        delimiter: delim,
                    },
                    headers,
                ));
            }
        }
    }

    bail!(
        "no (encoding, delimiter) candidate produced a parsable header for {}",
        path.display()
    )
}
