//! enoemerge: consolidation of quarterly household-survey microdata.
//!
//! Heterogeneous delimiter-separated extracts (mixed encodings, delimiters
//! and column sets across releases) are merged into one analysis-ready
//! parquet table per survey module, then enriched with geographic names and
//! dictionary-sourced category labels.

pub mod config;
pub mod dict;
pub mod discover;
pub mod label;
pub mod meta;
pub mod process;
pub mod schema;
pub mod sniff;
pub mod summary;
