//! State/municipality name enrichment from the geographic catalog.
//!
//! The catalog join is the one place where a structural problem escalates:
//! a catalog without the expected key columns aborts the labeling stage,
//! because a partial or garbled geographic join is worse than none.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::discover::Module;
use crate::sniff::{sniff_delimiter, TextEncoding};

const CATALOG_COLUMNS: [&str; 4] = ["CVE_ENT", "NOM_ENT", "CVE_MUN", "NOM_MUN"];

/// Region and sub-region code→name maps with fixed-width digit keys
/// (state 2, municipality 3).
#[derive(Debug, Default)]
pub struct GeoCatalog {
    ent: HashMap<String, String>,
    mun: HashMap<(String, String), String>,
}

impl GeoCatalog {
    pub fn ent_name(&self, raw: &str) -> Option<&str> {
        self.ent
            .get(&normalize_geo_code(raw, 2))
            .map(String::as_str)
    }

    pub fn mun_name(&self, raw_ent: &str, raw_mun: &str) -> Option<&str> {
        let key = (normalize_geo_code(raw_ent, 2), normalize_geo_code(raw_mun, 3));
        self.mun.get(&key).map(String::as_str)
    }

    pub fn ent_count(&self) -> usize {
        self.ent.len()
    }

    pub fn mun_count(&self) -> usize {
        self.mun.len()
    }
}

/// Digits only, left-padded to `width`, so "1", "01" and "1 " all key the
/// same catalog row.
pub fn normalize_geo_code(raw: &str, width: usize) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{digits:0>width$}")
}

/// Load the catalog with an optimistic decode chain. Missing key columns
/// are a hard error.
pub fn load_catalog(path: &Path) -> Result<GeoCatalog> {
    let bytes =
        fs::read(path).with_context(|| format!("reading catalog {}", path.display()))?;
    let text = [
        TextEncoding::Utf8,
        TextEncoding::Utf8Bom,
        TextEncoding::Windows1252,
    ]
    .iter()
    .find_map(|e| e.decode_strict(&bytes))
    .unwrap_or_else(|| TextEncoding::Latin1.decode_lossy(&bytes));

    let delimiter = sniff_delimiter(&text);
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .context("reading catalog header")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut idx = [0usize; 4];
    let mut missing: Vec<&str> = Vec::new();
    for (slot, wanted) in CATALOG_COLUMNS.iter().enumerate() {
        match headers.iter().position(|h| h.eq_ignore_ascii_case(wanted)) {
            Some(i) => idx[slot] = i,
            None => missing.push(wanted),
        }
    }
    if !missing.is_empty() {
        bail!(
            "geographic catalog {} is missing expected columns: {}",
            path.display(),
            missing.join(", ")
        );
    }
    let [ent_code_i, ent_name_i, mun_code_i, mun_name_i] = idx;

    let mut catalog = GeoCatalog::default();
    for record in rdr.records() {
        let record = record.context("reading catalog record")?;
        let ent_code = normalize_geo_code(record.get(ent_code_i).unwrap_or(""), 2);
        let ent_name = record.get(ent_name_i).unwrap_or("").trim();
        let mun_code = normalize_geo_code(record.get(mun_code_i).unwrap_or(""), 3);
        let mun_name = record.get(mun_name_i).unwrap_or("").trim();

        if !ent_name.is_empty() {
            catalog
                .ent
                .entry(ent_code.clone())
                .or_insert_with(|| ent_name.to_string());
        }
        if !mun_name.is_empty() {
            catalog
                .mun
                .entry((ent_code, mun_code))
                .or_insert_with(|| mun_name.to_string());
        }
    }

    info!(
        ent = catalog.ent_count(),
        mun = catalog.mun_count(),
        "geographic catalog loaded"
    );
    Ok(catalog)
}

fn find_utf8_column(schema: &SchemaRef, name: &str) -> Option<usize> {
    schema
        .fields()
        .iter()
        .position(|f| f.name().eq_ignore_ascii_case(name) && f.data_type() == &DataType::Utf8)
}

/// Stream `in_path`, appending `ent_nombre` and, where a municipality
/// column exists, `mun_nombre`. Original code columns are kept. Returns the
/// output path and row count.
pub fn georeference_table(
    cfg: &PipelineConfig,
    module: Module,
    in_path: &Path,
    catalog: &GeoCatalog,
) -> Result<(PathBuf, u64)> {
    let out_path = cfg
        .geo_dir
        .join(format!("enoe_master_{}_geo.parquet", module.key()));

    let file =
        File::open(in_path).with_context(|| format!("opening {}", in_path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet {}", in_path.display()))?
        .with_batch_size(cfg.batch_rows);
    let in_schema: SchemaRef = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;

    let ent_idx = find_utf8_column(&in_schema, "ent");
    let mun_idx = find_utf8_column(&in_schema, "mun");
    if ent_idx.is_none() {
        warn!(module = %module, "table has no state column; geographic names skipped");
    }

    let out_schema: SchemaRef = {
        let mut fields: Vec<Field> = in_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        if ent_idx.is_some() {
            fields.push(Field::new("ent_nombre", DataType::Utf8, true));
            if mun_idx.is_some() {
                fields.push(Field::new("mun_nombre", DataType::Utf8, true));
            }
        }
        Arc::new(ArrowSchema::new(fields))
    };

    let out_file = File::create(&out_path)
        .with_context(|| format!("creating output file {}", out_path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(out_file, out_schema.clone(), Some(props))
        .context("opening parquet writer")?;

    let mut rows: u64 = 0;
    for batch in reader {
        let batch = batch.context("reading parquet batch")?;
        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();

        if let Some(ei) = ent_idx {
            let ents = batch
                .column(ei)
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("state column is checked to be Utf8");
            let ent_names: Vec<Option<&str>> = ents
                .iter()
                .map(|cell| cell.and_then(|v| catalog.ent_name(v)))
                .collect();
            columns.push(Arc::new(StringArray::from(ent_names)));

            if let Some(mi) = mun_idx {
                let muns = batch
                    .column(mi)
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .expect("municipality column is checked to be Utf8");
                let mun_names: Vec<Option<&str>> = ents
                    .iter()
                    .zip(muns.iter())
                    .map(|(e, m)| match (e, m) {
                        (Some(e), Some(m)) => catalog.mun_name(e, m),
                        _ => None,
                    })
                    .collect();
                columns.push(Arc::new(StringArray::from(mun_names)));
            }
        }

        rows += batch.num_rows() as u64;
        let out_batch = RecordBatch::try_new(out_schema.clone(), columns)
            .context("assembling geo-labeled batch")?;
        writer.write(&out_batch).context("writing geo-labeled batch")?;
    }
    writer.close().context("closing geo-labeled parquet")?;

    info!(module = %module, rows, out = %out_path.display(), "geographic names applied");
    Ok((out_path, rows))
}
