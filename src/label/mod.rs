//! Enrichment of consolidated tables: geographic names from the catalog
//! and human-readable category labels from the consolidated dictionaries.

pub mod apply;
pub mod geo;
pub mod lookup;

pub use apply::{apply_labels, DiagnosticReport, LabelOutcome};
pub use geo::{georeference_table, load_catalog, GeoCatalog};
pub use lookup::LabelLookup;
