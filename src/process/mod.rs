//! Pass 2: per-module consolidation.
//!
//! Files of a module are loaded in parallel on the rayon pool and handed
//! through a bounded channel to this thread, which appends them one at a
//! time to the module's single parquet output. Arrival order is whatever
//! the pool produces; output row order across files is unspecified. One
//! file failing to load never aborts its siblings.

pub mod coverage;
pub mod load;
pub mod write;

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::discover::{Module, RawFile};
use crate::schema::ModuleSchema;

pub use write::StreamingTableWriter;

/// What one module's consolidation produced, for the run summary and the
/// downstream labeling stages.
#[derive(Debug)]
pub struct ModuleOutcome {
    pub module: Module,
    pub files_in: usize,
    pub files_loaded: usize,
    pub load_failures: usize,
    pub rows: u64,
    /// `None` when every file of the module was dropped.
    pub out_path: Option<PathBuf>,
}

/// Consolidate one module's files into a single parquet file.
pub fn consolidate_module(
    cfg: &PipelineConfig,
    schema: &ModuleSchema,
    files: &[&RawFile],
) -> Result<ModuleOutcome> {
    let module = schema.module;
    let out_path = cfg
        .master_dir
        .join(format!("enoe_master_{}.parquet", module.key()));

    // the bounded channel keeps only a handful of tables in flight while
    // this thread appends them sequentially
    let (tx, rx) = mpsc::sync_channel(2);
    let mut writer: Option<StreamingTableWriter> = None;
    let mut loaded = 0usize;
    let mut failures = 0usize;
    let mut sink_error: Option<anyhow::Error> = None;

    rayon::scope(|scope| {
        // move the receiver into the scope closure; a borrowed Receiver is not
        // Send because Receiver is not Sync
        let rx = rx;
        for raw in files {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = load::load_table(raw, schema);
                // send only fails when the receiver stopped after a writer
                // error; the load result is moot at that point
                let _ = tx.send((raw.file_name(), result));
            });
        }
        drop(tx);

        for (name, result) in rx.iter() {
            match result {
                Ok(batch) => {
                    if sink_error.is_some() {
                        continue; // drain so workers are not left blocked
                    }
                    let appended = match writer.take() {
                        Some(mut w) => {
                            let res = w.append(&batch);
                            writer = Some(w);
                            res
                        }
                        None => StreamingTableWriter::create(&out_path, &batch).map(|w| {
                            writer = Some(w);
                        }),
                    };
                    match appended {
                        Ok(()) => loaded += 1,
                        Err(e) => sink_error = Some(e),
                    }
                }
                Err(e) => {
                    error!(module = %module, file = %name, "load failed; file dropped: {e:#}");
                    failures += 1;
                }
            }
        }
    });

    if let Some(e) = sink_error {
        return Err(e).with_context(|| format!("writing {}", out_path.display()));
    }

    let rows = match writer {
        Some(w) => w.finish()?,
        None => {
            warn!(module = %module, "no file of this module survived loading; no output written");
            0
        }
    };
    info!(
        module = %module,
        files = files.len(),
        loaded,
        failures,
        rows,
        "module consolidated"
    );

    Ok(ModuleOutcome {
        module,
        files_in: files.len(),
        files_loaded: loaded,
        load_failures: failures,
        rows,
        out_path: (loaded > 0).then_some(out_path),
    })
}

/// Unify, consolidate and report coverage for every module present in the
/// discovery set, in module order.
pub fn consolidate_all(
    cfg: &PipelineConfig,
    files: &[RawFile],
) -> Result<Vec<ModuleOutcome>> {
    let mut outcomes = Vec::new();
    for module in Module::ALL {
        let members: Vec<&RawFile> = files.iter().filter(|f| f.module == module).collect();
        if members.is_empty() {
            continue;
        }
        let schema = ModuleSchema::unify(module, &members);
        info!(
            module = %module,
            files = members.len(),
            columns = schema.columns.len(),
            "canonical schema unified"
        );

        let outcome = consolidate_module(cfg, &schema, &members)?;

        let report_path = cfg.reports_dir.join(format!("coverage_{}.csv", module.key()));
        coverage::write_coverage_report(&report_path, &schema, &members)?;

        outcomes.push(outcome);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::{Dialect, TextEncoding};
    use arrow::array::{Int64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::fs::{self, File};
    use std::path::Path;
    use tempfile::tempdir;

    fn raw_file(path: &Path, name_period: Option<(i64, i64)>, columns: &[&str]) -> RawFile {
        RawFile {
            path: path.to_path_buf(),
            module: Module::Hogt,
            dialect: Dialect {
                encoding: TextEncoding::Utf8,
                delimiter: b',',
            },
            name_period,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn rows_are_conserved_and_failures_isolated() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        fs::create_dir_all(base.join("parquet_master/reports")).unwrap();
        let cfg = crate::config::PipelineConfig::new(base);

        let a_path = base.join("hogt_a.csv");
        fs::write(&a_path, "per,ent\n124,01\n124,02\n").unwrap();
        let b_path = base.join("hogt_b.csv");
        fs::write(&b_path, "per,mun\n224,002\n224,003\n224,004\n").unwrap();
        let gone = base.join("hogt_missing.csv");

        let a = raw_file(&a_path, None, &["per", "ent"]);
        let b = raw_file(&b_path, Some((2024, 2)), &["per", "mun"]);
        let c = raw_file(&gone, None, &["per"]);
        let members = [&a, &b, &c];
        let schema = ModuleSchema::unify(Module::Hogt, &members);

        let outcome = consolidate_module(&cfg, &schema, &members).unwrap();
        assert_eq!(outcome.files_in, 3);
        assert_eq!(outcome.files_loaded, 2);
        assert_eq!(outcome.load_failures, 1);
        assert_eq!(outcome.rows, 5);

        let out_path = outcome.out_path.unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&out_path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<_> = reader.map(|b| b.unwrap()).collect();
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 5);

        // canonical layout regardless of which file arrived first
        let out_schema = batches[0].schema();
        assert_eq!(out_schema.field(0).name(), "anio");
        assert_eq!(out_schema.field(3).name(), "ent");
        assert_eq!(out_schema.field(4).name(), "mun");
        assert_eq!(out_schema.field(5).name(), "per");

        // every row carries derived metadata
        for batch in &batches {
            let anio = batch
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap();
            let label = batch
                .column(2)
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            for i in 0..batch.num_rows() {
                assert_eq!(anio.value(i), 2024);
                assert!(label.value(i).starts_with("2024T"));
            }
        }
    }

    #[test]
    fn all_files_failing_produces_no_output() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        fs::create_dir_all(base.join("parquet_master")).unwrap();
        let cfg = crate::config::PipelineConfig::new(base);

        let gone = raw_file(&base.join("hogt_gone.csv"), None, &["per"]);
        let members = [&gone];
        let schema = ModuleSchema::unify(Module::Hogt, &members);
        let outcome = consolidate_module(&cfg, &schema, &members).unwrap();
        assert_eq!(outcome.load_failures, 1);
        assert_eq!(outcome.rows, 0);
        assert!(outcome.out_path.is_none());
        assert!(!base.join("parquet_master/enoe_master_hogt.parquet").exists());
    }
}
