//! Canonical per-module schemas.
//!
//! The schema of a module is the case-insensitive union of every column
//! observed across its files, alphabetically ordered, prefixed by the three
//! fixed metadata columns. Files missing a column are null-padded at load
//! time; no observed column is ever dropped, by construction of the union.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};

use crate::discover::{Module, RawFile};
use crate::meta::META_COLUMNS;

/// Ordered canonical columns for one module.
#[derive(Debug, Clone)]
pub struct ModuleSchema {
    pub module: Module,
    /// Metadata columns followed by the sorted union of survey columns.
    pub columns: Vec<String>,
}

impl ModuleSchema {
    /// Compute the unified schema from the pass-1 headers of a module's
    /// files. First-seen casing wins for presentation; ordering and
    /// deduplication are case-insensitive.
    pub fn unify(module: Module, files: &[&RawFile]) -> ModuleSchema {
        // lowercase key → first-seen original spelling; BTreeMap gives the
        // deterministic alphabetical order
        let mut union: BTreeMap<String, String> = BTreeMap::new();
        for file in files {
            for col in &file.columns {
                let key = col.to_lowercase();
                if META_COLUMNS.contains(&key.as_str()) {
                    continue; // metadata is always derived, never ingested
                }
                union.entry(key).or_insert_with(|| col.clone());
            }
        }

        let mut columns: Vec<String> = META_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(union.into_values());
        ModuleSchema { module, columns }
    }

    /// Survey columns, i.e. everything after the metadata prefix.
    pub fn survey_columns(&self) -> &[String] {
        &self.columns[META_COLUMNS.len()..]
    }

    /// Arrow rendering: integer year/quarter, everything else opaque Utf8.
    /// Survey cells stay strings until an explicit later casting stage;
    /// typing them here is what creates cross-file schema conflicts.
    pub fn arrow_schema(&self) -> Arc<ArrowSchema> {
        let mut fields = Vec::with_capacity(self.columns.len());
        fields.push(Field::new("anio", DataType::Int64, true));
        fields.push(Field::new("trimestre", DataType::Int64, true));
        fields.push(Field::new("anio_trimestre", DataType::Utf8, true));
        for col in self.survey_columns() {
            fields.push(Field::new(col, DataType::Utf8, true));
        }
        Arc::new(ArrowSchema::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::{Dialect, TextEncoding};
    use std::path::PathBuf;

    fn raw(columns: &[&str]) -> RawFile {
        RawFile {
            path: PathBuf::from("x.csv"),
            module: Module::Hogt,
            dialect: Dialect {
                encoding: TextEncoding::Utf8,
                delimiter: b',',
            },
            name_period: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn union_is_case_insensitive_and_ordered() {
        let a = raw(&["P1", "ent", "per"]);
        let b = raw(&["p1", "MUN", "per", "zona"]);
        let schema = ModuleSchema::unify(Module::Hogt, &[&a, &b]);
        assert_eq!(
            schema.columns,
            vec![
                "anio",
                "trimestre",
                "anio_trimestre",
                "ent",
                "MUN",
                "P1",
                "per",
                "zona"
            ]
        );
    }

    #[test]
    fn ingested_metadata_names_are_not_doubled() {
        let a = raw(&["ANIO", "per", "Trimestre"]);
        let schema = ModuleSchema::unify(Module::Hogt, &[&a]);
        assert_eq!(
            schema.columns,
            vec!["anio", "trimestre", "anio_trimestre", "per"]
        );
        assert_eq!(schema.survey_columns(), ["per"]);
    }

    #[test]
    fn arrow_schema_types() {
        let a = raw(&["per", "ent"]);
        let schema = ModuleSchema::unify(Module::Hogt, &[&a]).arrow_schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);
        assert_eq!(schema.field(2).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(3).name(), "ent");
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);
    }
}
