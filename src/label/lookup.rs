//! Per-variable label lookup.
//!
//! One `LabelLookup` is built per (table, variable) pair and reused across
//! every row, resolving a raw cell through the same normalized variants the
//! dictionary was indexed under.

use std::collections::HashMap;

use crate::dict::normalize_code_keys;

pub struct LabelLookup<'a> {
    mapping: &'a HashMap<String, String>,
}

impl<'a> LabelLookup<'a> {
    pub fn new(mapping: &'a HashMap<String, String>) -> LabelLookup<'a> {
        LabelLookup { mapping }
    }

    /// First label matching any normalized variant of `raw`, else `None`.
    pub fn lookup(&self, raw: &str) -> Option<&'a str> {
        normalize_code_keys(raw)
            .into_iter()
            .find_map(|key| self.mapping.get(&key).map(String::as_str))
    }

    /// A few mapping keys, sorted for stable diagnostics.
    pub fn sample_keys(&self, limit: usize) -> Vec<String> {
        let mut keys: Vec<String> = self.mapping.keys().cloned().collect();
        keys.sort_unstable();
        keys.truncate(limit);
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn padding_and_whitespace_variants_match() {
        let m = mapping(&[("1", "Primaria")]);
        let lk = LabelLookup::new(&m);
        assert_eq!(lk.lookup("1"), Some("Primaria"));
        assert_eq!(lk.lookup("01"), Some("Primaria"));
        assert_eq!(lk.lookup(" 1 "), Some("Primaria"));
        assert_eq!(lk.lookup("2"), None);
        assert_eq!(lk.lookup(""), None);
    }

    #[test]
    fn casing_variant_matches_non_numeric_codes() {
        let m = mapping(&[("NS", "No sabe")]);
        let lk = LabelLookup::new(&m);
        assert_eq!(lk.lookup("ns"), Some("No sabe"));
        assert_eq!(lk.lookup("NS"), Some("No sabe"));
    }

    #[test]
    fn verbatim_takes_precedence_over_variants() {
        let m = mapping(&[("01", "Cero uno"), ("1", "Uno")]);
        let lk = LabelLookup::new(&m);
        assert_eq!(lk.lookup("01"), Some("Cero uno"));
        assert_eq!(lk.lookup("1"), Some("Uno"));
    }

    #[test]
    fn sample_keys_are_sorted_and_bounded() {
        let m = mapping(&[("2", "b"), ("1", "a"), ("3", "c")]);
        let lk = LabelLookup::new(&m);
        assert_eq!(lk.sample_keys(2), vec!["1", "2"]);
    }
}
