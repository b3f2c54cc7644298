//! Candidate text encodings and their strict/lossy decoders.
//!
//! encoding_rs covers UTF-8, UTF-16 and Windows-1252; true ISO-8859-1 and
//! UTF-32 are decoded locally (the WHATWG "latin1" label aliases to
//! windows-1252, and UTF-32 is not in the encoding standard at all).

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

const BOM_UTF8: &[u8] = &[0xEF, 0xBB, 0xBF];
const BOM_UTF16_LE: &[u8] = &[0xFF, 0xFE];
const BOM_UTF16_BE: &[u8] = &[0xFE, 0xFF];
const BOM_UTF32_LE: &[u8] = &[0xFF, 0xFE, 0x00, 0x00];
const BOM_UTF32_BE: &[u8] = &[0x00, 0x00, 0xFE, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Windows1252,
    Latin1,
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf8Bom => "utf-8-bom",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Utf32Le => "utf-32le",
            TextEncoding::Utf32Be => "utf-32be",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Latin1 => "latin-1",
        }
    }

    fn strip_bom<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        let bom: &[u8] = match self {
            TextEncoding::Utf8Bom => BOM_UTF8,
            TextEncoding::Utf16Le => BOM_UTF16_LE,
            TextEncoding::Utf16Be => BOM_UTF16_BE,
            TextEncoding::Utf32Le => BOM_UTF32_LE,
            TextEncoding::Utf32Be => BOM_UTF32_BE,
            _ => return bytes,
        };
        bytes.strip_prefix(bom).unwrap_or(bytes)
    }

    fn encoding_rs_impl(&self) -> Option<&'static Encoding> {
        match self {
            TextEncoding::Utf8 | TextEncoding::Utf8Bom => Some(UTF_8),
            TextEncoding::Utf16Le => Some(UTF_16LE),
            TextEncoding::Utf16Be => Some(UTF_16BE),
            TextEncoding::Windows1252 => Some(WINDOWS_1252),
            _ => None,
        }
    }

    /// Decode refusing any malformed sequence. `None` means the bytes are
    /// not valid under this encoding.
    pub fn decode_strict(&self, bytes: &[u8]) -> Option<String> {
        let body = self.strip_bom(bytes);
        match self {
            TextEncoding::Latin1 => Some(latin1_to_string(body)),
            TextEncoding::Utf32Le => decode_utf32(body, false, false),
            TextEncoding::Utf32Be => decode_utf32(body, true, false),
            _ => self
                .encoding_rs_impl()
                .expect("non-local encodings are backed by encoding_rs")
                .decode_without_bom_handling_and_without_replacement(body)
                .map(|cow| cow.into_owned()),
        }
    }

    /// Decode substituting U+FFFD for anything malformed. Never fails; used
    /// for sniffing samples and as the last-resort load stage.
    pub fn decode_lossy(&self, bytes: &[u8]) -> String {
        let body = self.strip_bom(bytes);
        match self {
            TextEncoding::Latin1 => latin1_to_string(body),
            TextEncoding::Utf32Le => {
                decode_utf32(body, false, true).unwrap_or_default()
            }
            TextEncoding::Utf32Be => decode_utf32(body, true, true).unwrap_or_default(),
            _ => {
                let (cow, _had_errors) = self
                    .encoding_rs_impl()
                    .expect("non-local encodings are backed by encoding_rs")
                    .decode_without_bom_handling(body);
                cow.into_owned()
            }
        }
    }
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn decode_utf32(bytes: &[u8], big_endian: bool, lossy: bool) -> Option<String> {
    let mut out = String::with_capacity(bytes.len() / 4);
    let mut chunks = bytes.chunks_exact(4);
    for c in &mut chunks {
        let raw = [c[0], c[1], c[2], c[3]];
        let v = if big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        };
        match char::from_u32(v) {
            Some(ch) => out.push(ch),
            None if lossy => out.push(char::REPLACEMENT_CHARACTER),
            None => return None,
        }
    }
    if !chunks.remainder().is_empty() {
        if !lossy {
            return None;
        }
        out.push(char::REPLACEMENT_CHARACTER);
    }
    Some(out)
}

/// Probe the byte prefix for a BOM signature. UTF-32 LE shares its first two
/// bytes with UTF-16 LE, so the four-byte signatures are tested first.
pub fn detect_bom(head: &[u8]) -> Option<TextEncoding> {
    if head.starts_with(BOM_UTF32_LE) {
        Some(TextEncoding::Utf32Le)
    } else if head.starts_with(BOM_UTF32_BE) {
        Some(TextEncoding::Utf32Be)
    } else if head.starts_with(BOM_UTF8) {
        Some(TextEncoding::Utf8Bom)
    } else if head.starts_with(BOM_UTF16_LE) {
        Some(TextEncoding::Utf16Le)
    } else if head.starts_with(BOM_UTF16_BE) {
        Some(TextEncoding::Utf16Be)
    } else {
        None
    }
}

/// BOM probe plus the null-byte-density heuristic for BOM-less 16-bit files:
/// ASCII-heavy UTF-16 text has a null in every other byte, so a high count in
/// the first 2000 bytes suggests it. Misfires on tiny files are possible,
/// which is why the threshold is a tunable and the candidate chain keeps
/// trying other encodings afterwards.
pub fn detect_encoding(head: &[u8], null_threshold: usize) -> Option<TextEncoding> {
    detect_bom(head).or_else(|| {
        let probe = &head[..head.len().min(2000)];
        let nulls = probe.iter().filter(|&&b| b == 0).count();
        (nulls > null_threshold).then_some(TextEncoding::Utf16Le)
    })
}

/// Ordered candidates: the detected encoding first, then the fixed fallback
/// sequence, deduplicated. UTF-32 is only ever tried when its BOM was seen.
pub fn candidate_encodings(detected: Option<TextEncoding>) -> Vec<TextEncoding> {
    const FALLBACK: [TextEncoding; 6] = [
        TextEncoding::Utf8,
        TextEncoding::Utf8Bom,
        TextEncoding::Windows1252,
        TextEncoding::Latin1,
        TextEncoding::Utf16Le,
        TextEncoding::Utf16Be,
    ];
    let mut out = Vec::with_capacity(FALLBACK.len() + 1);
    if let Some(e) = detected {
        out.push(e);
    }
    for e in FALLBACK {
        if !out.contains(&e) {
            out.push(e);
        }
    }
    out
}
