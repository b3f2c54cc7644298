//! Per-file and per-record (year, quarter) derivation.
//!
//! A `_YYYY_trimN` filename marker wins for every row of that file; without
//! it the period comes from each record's `per` code, whose first digit is
//! the quarter and next two digits the year offset from 2000.

use once_cell::sync::Lazy;
use regex::Regex;

/// Fixed metadata columns prepended to every module schema.
pub const META_COLUMNS: [&str; 3] = ["anio", "trimestre", "anio_trimestre"];

/// Name of the record-level period-code field.
pub const PERIOD_FIELD: &str = "per";

static NAME_PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)_(20\d{2})_trim(\d)\b").expect("valid filename period regex"));

/// Extract `(year, quarter)` from a filename like `enoe_hogt_2024_trim3.csv`.
pub fn period_from_filename(name: &str) -> Option<(i64, i64)> {
    let caps = NAME_PERIOD_RE.captures(name)?;
    let year = caps[1].parse().ok()?;
    let quarter = caps[2].parse().ok()?;
    Some((year, quarter))
}

/// Derive `(year, quarter)` from a `per` cell. Non-digits are ignored and
/// the digit string is left-padded to three places; a cell with no digits
/// at all carries no period.
pub fn period_from_per(cell: &str) -> Option<(i64, i64)> {
    let digits: String = cell.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let padded = format!("{:0>3}", digits);
    let quarter: i64 = padded[..1].parse().ok()?;
    let yy: i64 = padded[1..3].parse().ok()?;
    Some((2000 + yy, quarter))
}

/// Composed display label, e.g. `2024T3`.
pub fn period_label(year: i64, quarter: i64) -> String {
    format!("{year}T{quarter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_period_is_detected() {
        assert_eq!(
            period_from_filename("enoe_hogt_2024_trim3.csv"),
            Some((2024, 3))
        );
        assert_eq!(
            period_from_filename("ENOE_SDEMT_2019_TRIM1__extract.csv"),
            Some((2019, 1))
        );
        assert_eq!(period_from_filename("sdemt_t124.csv"), None);
        // quarter digit must terminate at a word boundary
        assert_eq!(period_from_filename("hogt_2024_trim39.csv"), None);
    }

    #[test]
    fn per_code_derivation() {
        assert_eq!(period_from_per("324"), Some((2024, 3)));
        assert_eq!(period_from_per("105"), Some((2005, 1)));
        // stray non-digits are ignored
        assert_eq!(period_from_per(" 4-19 "), Some((2019, 4)));
        // short codes pad on the left
        assert_eq!(period_from_per("24"), Some((2024, 0)));
        assert_eq!(period_from_per(""), None);
        assert_eq!(period_from_per("T-"), None);
    }

    #[test]
    fn label_composition() {
        assert_eq!(period_label(2024, 3), "2024T3");
    }
}
