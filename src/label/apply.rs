//! Code-label application over a consolidated table.
//!
//! Streams a module's parquet batch-by-batch, appending one `<col>_label`
//! column per dictionary variable with a case-insensitively matching string
//! column. Source columns are never mutated. Alongside the labeled output
//! it writes a plain column listing and a diagnostic JSON that localizes
//! mapping mismatches without re-running the pipeline.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::dict::DictionaryIndex;
use crate::discover::Module;
use crate::label::lookup::LabelLookup;

/// Diagnostic report written next to each labeled table.
#[derive(Debug, Serialize)]
pub struct DiagnosticReport {
    /// Dictionary variables with no matching column in the table.
    pub missing_in_parquet: Vec<String>,
    /// Mapped variables whose label column came back entirely null over the
    /// diagnostic sample.
    pub label_all_null_detail: Vec<NullLabelDetail>,
    /// All table columns, case-insensitively sorted.
    pub parquet_columns: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NullLabelDetail {
    pub variable: String,
    pub column: String,
    pub sample_unmapped_codes: Vec<String>,
    pub sample_mapping_keys: Vec<String>,
}

#[derive(Debug)]
pub struct LabelOutcome {
    pub module: Module,
    pub out_path: PathBuf,
    pub rows: u64,
    pub labeled_columns: usize,
    pub missing_variables: usize,
    pub all_null_labels: usize,
}

const UNMAPPED_SAMPLE_LIMIT: usize = 10;
const MAPPING_KEY_SAMPLE_LIMIT: usize = 10;
const RAW_UNIQUE_SCAN_LIMIT: usize = 50;

struct MappedVar<'a> {
    variable: &'a str,
    col_idx: usize,
    col_name: String,
    lookup: LabelLookup<'a>,
    nonnull_in_sample: u64,
    raw_uniques: Vec<String>,
}

impl<'a> MappedVar<'a> {
    fn observe_sample(&mut self, raws: &StringArray, labels: &[Option<&str>], take: usize) {
        for i in 0..take.min(labels.len()) {
            if labels[i].is_some() {
                self.nonnull_in_sample += 1;
            }
            if self.raw_uniques.len() < RAW_UNIQUE_SCAN_LIMIT && !raws.is_null(i) {
                let v = raws.value(i);
                if !self.raw_uniques.iter().any(|u| u == v) {
                    self.raw_uniques.push(v.to_string());
                }
            }
        }
    }
}

fn sorted_ci(mut names: Vec<String>) -> Vec<String> {
    names.sort_by_key(|n| n.to_lowercase());
    names
}

fn write_columns_listing(dir: &Path, out_name: &str, columns: &[String]) -> Result<()> {
    let path = dir.join(format!("{out_name}__columns.txt"));
    let mut body = columns.join("\n");
    body.push('\n');
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))
}

fn write_diagnostic(dir: &Path, out_name: &str, report: &DiagnosticReport) -> Result<()> {
    let path = dir.join(format!("{out_name}__diagnostic.json"));
    let body = serde_json::to_string_pretty(report).context("serializing diagnostic report")?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))
}

fn parquet_writer(path: &Path, schema: SchemaRef) -> Result<ArrowWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("creating output file {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    ArrowWriter::try_new(file, schema, Some(props)).context("opening parquet writer")
}

/// Label one consolidated table. `in_path` is the consolidated (possibly
/// geo-enriched) parquet for `module`.
pub fn apply_labels(
    cfg: &PipelineConfig,
    module: Module,
    in_path: &Path,
    index: &DictionaryIndex,
) -> Result<LabelOutcome> {
    let out_name = format!("enoe_master_{}_labeled", module.key());
    let out_path = cfg.labels_dir.join(format!("{out_name}.parquet"));

    let file =
        File::open(in_path).with_context(|| format!("opening {}", in_path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet {}", in_path.display()))?
        .with_batch_size(cfg.batch_rows);
    let in_schema: SchemaRef = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;

    let column_names: Vec<String> = in_schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let columns_sorted = sorted_ci(column_names);
    write_columns_listing(&cfg.labels_dir, &out_name, &columns_sorted)?;

    // case-insensitive column index; first spelling wins on clashes
    let mut col_by_upper: HashMap<String, usize> = HashMap::new();
    for (i, field) in in_schema.fields().iter().enumerate() {
        col_by_upper.entry(field.name().to_uppercase()).or_insert(i);
    }

    let mut mapped: Vec<MappedVar<'_>> = Vec::new();
    let mut missing_in_parquet: Vec<String> = Vec::new();
    if let Some(var_maps) = index.variables(module.tag()) {
        for (variable, mapping) in var_maps {
            match col_by_upper.get(&variable.to_uppercase()) {
                Some(&idx) if in_schema.field(idx).data_type() == &DataType::Utf8 => {
                    mapped.push(MappedVar {
                        variable,
                        col_idx: idx,
                        col_name: in_schema.field(idx).name().clone(),
                        lookup: LabelLookup::new(mapping),
                        nonnull_in_sample: 0,
                        raw_uniques: Vec::new(),
                    });
                }
                Some(_) => {
                    warn!(
                        module = %module,
                        variable = %variable,
                        "dictionary variable matches a non-string column; skipped"
                    );
                }
                None => missing_in_parquet.push(variable.clone()),
            }
        }
    } else {
        info!(module = %module, "no consolidated dictionary for this module; copying table through");
    }

    let out_schema: SchemaRef = {
        let mut fields: Vec<Field> = in_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        for mv in &mapped {
            fields.push(Field::new(
                format!("{}_label", mv.col_name),
                DataType::Utf8,
                true,
            ));
        }
        Arc::new(ArrowSchema::new(fields))
    };

    let mut writer = parquet_writer(&out_path, out_schema.clone())?;
    let mut rows: u64 = 0;
    let mut sampled: u64 = 0;

    for batch in reader {
        let batch = batch.context("reading parquet batch")?;
        let take = (cfg.diag_sample_rows as u64)
            .saturating_sub(sampled)
            .min(batch.num_rows() as u64) as usize;

        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
        for mv in &mut mapped {
            let raws = batch
                .column(mv.col_idx)
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("mapped columns are checked to be Utf8");
            let labels: Vec<Option<&str>> = raws
                .iter()
                .map(|cell| cell.and_then(|v| mv.lookup.lookup(v)))
                .collect();
            if take > 0 {
                mv.observe_sample(raws, &labels, take);
            }
            columns.push(Arc::new(StringArray::from(labels)));
        }
        sampled += take as u64;
        rows += batch.num_rows() as u64;

        let out_batch = RecordBatch::try_new(out_schema.clone(), columns)
            .context("assembling labeled batch")?;
        writer.write(&out_batch).context("writing labeled batch")?;
    }
    writer.close().context("closing labeled parquet")?;

    let mut label_all_null_detail = Vec::new();
    if sampled > 0 {
        for mv in &mapped {
            if mv.nonnull_in_sample > 0 {
                continue;
            }
            let sample_unmapped_codes: Vec<String> = mv
                .raw_uniques
                .iter()
                .filter(|v| mv.lookup.lookup(v).is_none())
                .take(UNMAPPED_SAMPLE_LIMIT)
                .cloned()
                .collect();
            label_all_null_detail.push(NullLabelDetail {
                variable: mv.variable.to_string(),
                column: mv.col_name.clone(),
                sample_unmapped_codes,
                sample_mapping_keys: mv.lookup.sample_keys(MAPPING_KEY_SAMPLE_LIMIT),
            });
        }
    }

    let report = DiagnosticReport {
        missing_in_parquet,
        label_all_null_detail,
        parquet_columns: columns_sorted,
    };
    write_diagnostic(&cfg.labels_dir, &out_name, &report)?;

    info!(
        module = %module,
        rows,
        labeled = mapped.len(),
        missing = report.missing_in_parquet.len(),
        all_null = report.label_all_null_detail.len(),
        "table labeled"
    );

    Ok(LabelOutcome {
        module,
        out_path,
        rows,
        labeled_columns: mapped.len(),
        missing_variables: report.missing_in_parquet.len(),
        all_null_labels: report.label_all_null_detail.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StreamingTableWriter;
    use arrow::array::Int64Array;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn mapping(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn write_consolidated(path: &Path) {
        let schema = Arc::new(ArrowSchema::new(vec![
            Field::new("anio", DataType::Int64, true),
            Field::new("EMP_PPAL", DataType::Utf8, true),
            Field::new("zona", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![2024, 2024, 2024, 2024])),
                Arc::new(StringArray::from(vec![
                    Some("1"),
                    Some("02"),
                    None,
                    Some(" 3 "),
                ])),
                Arc::new(StringArray::from(vec![
                    Some("X"),
                    Some("X"),
                    Some("Y"),
                    Some("X"),
                ])),
            ],
        )
        .unwrap();
        StreamingTableWriter::create(path, &batch)
            .unwrap()
            .finish()
            .unwrap();
    }

    fn read_label_column(path: &Path, name: &str) -> Vec<Option<String>> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let mut out = Vec::new();
        for batch in reader {
            let batch = batch.unwrap();
            let col = batch
                .column_by_name(name)
                .unwrap()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap()
                .clone();
            out.extend(col.iter().map(|v| v.map(str::to_string)));
        }
        out
    }

    fn test_cfg(base: &Path) -> PipelineConfig {
        let cfg = PipelineConfig::new(base);
        fs::create_dir_all(&cfg.labels_dir).unwrap();
        cfg
    }

    #[test]
    fn labels_match_case_insensitively_and_null_when_unmapped() {
        let dir = tempdir().unwrap();
        let cfg = test_cfg(dir.path());
        let in_path = dir.path().join("enoe_master_sdemt.parquet");
        write_consolidated(&in_path);

        let mut index = DictionaryIndex::default();
        index.insert(
            "SDEMT",
            "emp_ppal",
            mapping(&[("1", "Formal"), ("2", "Informal")]),
        );
        index.insert("SDEMT", "no_such_var", mapping(&[("1", "x")]));

        let outcome = apply_labels(&cfg, Module::Sdemt, &in_path, &index).unwrap();
        assert_eq!(outcome.rows, 4);
        assert_eq!(outcome.labeled_columns, 1);
        assert_eq!(outcome.missing_variables, 1);

        let labels = read_label_column(&outcome.out_path, "EMP_PPAL_label");
        assert_eq!(
            labels,
            vec![
                Some("Formal".to_string()),
                Some("Informal".to_string()),
                None,
                None
            ]
        );

        // source column is untouched
        let raw = read_label_column(&outcome.out_path, "EMP_PPAL");
        assert_eq!(raw[1], Some("02".to_string()));

        let diag: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(cfg.labels_dir.join("enoe_master_sdemt_labeled__diagnostic.json"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(diag["missing_in_parquet"][0], "no_such_var");
        assert_eq!(diag["label_all_null_detail"].as_array().unwrap().len(), 0);

        let listing = fs::read_to_string(
            cfg.labels_dir.join("enoe_master_sdemt_labeled__columns.txt"),
        )
        .unwrap();
        assert_eq!(listing, "anio\nEMP_PPAL\nzona\n");
    }

    #[test]
    fn all_null_label_column_is_diagnosed_with_examples() {
        let dir = tempdir().unwrap();
        let cfg = test_cfg(dir.path());
        let in_path = dir.path().join("enoe_master_sdemt.parquet");
        write_consolidated(&in_path);

        let mut index = DictionaryIndex::default();
        // keys that can never match the data
        index.insert("SDEMT", "zona", mapping(&[("A1", "Norte"), ("B2", "Sur")]));

        let outcome = apply_labels(&cfg, Module::Sdemt, &in_path, &index).unwrap();
        assert_eq!(outcome.all_null_labels, 1);

        let diag: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(cfg.labels_dir.join("enoe_master_sdemt_labeled__diagnostic.json"))
                .unwrap(),
        )
        .unwrap();
        let detail = &diag["label_all_null_detail"][0];
        assert_eq!(detail["variable"], "zona");
        assert_eq!(detail["column"], "zona");
        let unmapped: Vec<&str> = detail["sample_unmapped_codes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(unmapped, vec!["X", "Y"]);
        let keys: Vec<&str> = detail["sample_mapping_keys"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["A1", "B2"]);
    }

    #[test]
    fn table_without_dictionary_copies_through() {
        let dir = tempdir().unwrap();
        let cfg = test_cfg(dir.path());
        let in_path = dir.path().join("enoe_master_vivt.parquet");
        write_consolidated(&in_path);

        let index = DictionaryIndex::default();
        let outcome = apply_labels(&cfg, Module::Vivt, &in_path, &index).unwrap();
        assert_eq!(outcome.labeled_columns, 0);
        assert_eq!(outcome.rows, 4);
        let raw = read_label_column(&outcome.out_path, "EMP_PPAL");
        assert_eq!(raw.len(), 4);
    }

    #[test]
    fn labeling_twice_is_byte_stable() {
        let dir = tempdir().unwrap();
        let cfg = test_cfg(dir.path());
        let in_path = dir.path().join("enoe_master_sdemt.parquet");
        write_consolidated(&in_path);

        let mut index = DictionaryIndex::default();
        index.insert("SDEMT", "emp_ppal", mapping(&[("1", "Formal")]));

        let first = apply_labels(&cfg, Module::Sdemt, &in_path, &index).unwrap();
        let first_labels = read_label_column(&first.out_path, "EMP_PPAL_label");
        let first_diag =
            fs::read_to_string(cfg.labels_dir.join("enoe_master_sdemt_labeled__diagnostic.json"))
                .unwrap();

        let second = apply_labels(&cfg, Module::Sdemt, &in_path, &index).unwrap();
        let second_labels = read_label_column(&second.out_path, "EMP_PPAL_label");
        let second_diag =
            fs::read_to_string(cfg.labels_dir.join("enoe_master_sdemt_labeled__diagnostic.json"))
                .unwrap();

        assert_eq!(first_labels, second_labels);
        assert_eq!(first_diag, second_diag);
    }
}
