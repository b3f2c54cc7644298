//! Robust full-file loading.
//!
//! A file is parsed into all-string columns through an ordered chain of
//! strategies, each a pure function of the raw bytes and the cached dialect:
//! strict parse, permissive parse, permissive parse under alternate
//! encodings, and finally a lossy byte decode. The first success wins; four
//! failures drop the file without touching its siblings. Deferring every
//! survey cell as an opaque string is what keeps per-file tables freely
//! recombinable.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow::array::{new_null_array, ArrayRef, Int64Array, StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use csv::ReaderBuilder;
use tracing::debug;

use crate::discover::RawFile;
use crate::meta::{self, PERIOD_FIELD};
use crate::schema::ModuleSchema;
use crate::sniff::{candidate_encodings, TextEncoding};

/// One fully parsed file, before conformance to the module schema.
#[derive(Debug)]
pub struct StringTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Load `raw` and conform it to the module schema as a record batch of
/// typed metadata plus opaque string columns.
pub fn load_table(raw: &RawFile, schema: &ModuleSchema) -> Result<RecordBatch> {
    let bytes =
        fs::read(&raw.path).with_context(|| format!("reading {}", raw.path.display()))?;
    let table = parse_with_fallbacks(&bytes, raw)?;
    conform(table, raw, schema)
}

/// Parse the full text. Strict mode fails on any ragged record; permissive
/// mode pads/truncates records to the header width and skips records the
/// reader cannot produce at all.
fn parse_text(text: &str, delimiter: u8, permissive: bool) -> Option<StringTable> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(permissive)
        .from_reader(text.as_bytes());
    let mut records = rdr.records();

    let headers: Vec<String> = match records.next() {
        Some(Ok(rec)) => rec
            .iter()
            .map(|f| f.trim_start_matches('\u{feff}').trim().to_string())
            .collect(),
        _ => return None,
    };
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return None;
    }

    let width = headers.len();
    let mut rows = Vec::new();
    for rec in records {
        match rec {
            Ok(record) => {
                let mut row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
                row.resize(width, String::new());
                rows.push(row);
            }
            Err(_) if permissive => continue,
            Err(_) => return None,
        }
    }
    Some(StringTable { headers, rows })
}

fn parse_with_fallbacks(bytes: &[u8], raw: &RawFile) -> Result<StringTable> {
    let enc = raw.dialect.encoding;
    let delim = raw.dialect.delimiter;

    type Strategy<'a> = (&'static str, Box<dyn Fn() -> Option<StringTable> + 'a>);
    let strategies: Vec<Strategy> = vec![
        (
            "strict",
            Box::new(move || enc.decode_strict(bytes).and_then(|t| parse_text(&t, delim, false))),
        ),
        (
            "permissive",
            Box::new(move || enc.decode_strict(bytes).and_then(|t| parse_text(&t, delim, true))),
        ),
        (
            "alternate-encodings",
            Box::new(move || {
                candidate_encodings(None)
                    .into_iter()
                    .filter(|e| *e != enc)
                    .find_map(|e| {
                        e.decode_strict(bytes)
                            .and_then(|t| parse_text(&t, delim, true))
                    })
            }),
        ),
        (
            "lossy",
            Box::new(move || {
                parse_text(&TextEncoding::Latin1.decode_lossy(bytes), delim, true)
            }),
        ),
    ];

    for (stage, attempt) in &strategies {
        if let Some(table) = attempt() {
            if *stage != "strict" {
                debug!(
                    file = %raw.path.display(),
                    stage = *stage,
                    rows = table.rows.len(),
                    "fallback parse stage succeeded"
                );
            }
            return Ok(table);
        }
    }
    Err(anyhow!(
        "all parse strategies exhausted for {}",
        raw.path.display()
    ))
}

/// Reshape a parsed table onto the canonical module schema: derive the
/// metadata columns, match survey columns case-insensitively, null-fill
/// canonical columns the file lacks, and store empty cells as nulls.
fn conform(table: StringTable, raw: &RawFile, schema: &ModuleSchema) -> Result<RecordBatch> {
    let nrows = table.rows.len();

    let mut index: HashMap<String, usize> = HashMap::with_capacity(table.headers.len());
    for (i, header) in table.headers.iter().enumerate() {
        index.entry(header.to_lowercase()).or_insert(i);
    }

    let periods: Vec<Option<(i64, i64)>> = match raw.name_period {
        Some(p) => vec![Some(p); nrows],
        None => {
            let per_idx = index.get(PERIOD_FIELD).copied();
            table
                .rows
                .iter()
                .map(|row| {
                    per_idx
                        .and_then(|i| row.get(i))
                        .and_then(|cell| meta::period_from_per(cell))
                })
                .collect()
        }
    };

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.columns.len());
    arrays.push(Arc::new(Int64Array::from(
        periods.iter().map(|p| p.map(|(y, _)| y)).collect::<Vec<_>>(),
    )));
    arrays.push(Arc::new(Int64Array::from(
        periods.iter().map(|p| p.map(|(_, q)| q)).collect::<Vec<_>>(),
    )));
    arrays.push(Arc::new(StringArray::from(
        periods
            .iter()
            .map(|p| p.map(|(y, q)| meta::period_label(y, q)))
            .collect::<Vec<_>>(),
    )));

    for col in schema.survey_columns() {
        match index.get(&col.to_lowercase()) {
            Some(&i) => {
                let values: Vec<Option<&str>> = table
                    .rows
                    .iter()
                    .map(|row| row.get(i).map(String::as_str).filter(|s| !s.is_empty()))
                    .collect();
                arrays.push(Arc::new(StringArray::from(values)));
            }
            None => arrays.push(new_null_array(&DataType::Utf8, nrows)),
        }
    }

    RecordBatch::try_new(schema.arrow_schema(), arrays)
        .context("assembling conformed record batch")
}
