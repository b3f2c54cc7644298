use anyhow::{bail, Result};
use enoemerge::{
    config::PipelineConfig,
    dict, discover,
    discover::Module,
    label, process,
    summary::{ModuleTotals, RunSummary},
};
use std::{env, fs, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();
    info!("startup");

    // ─── 2) configuration ────────────────────────────────────────────
    let base_dir = env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let cfg = PipelineConfig::new(&base_dir);
    for dir in [
        &cfg.master_dir,
        &cfg.reports_dir,
        &cfg.geo_dir,
        &cfg.labels_dir,
    ] {
        fs::create_dir_all(dir)?;
    }

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()
        .ok();

    // ─── 3) pass 1: classify files, sniff dialects, read headers ────
    let discovery = discover::scan_files(&cfg)?;
    if discovery.files.is_empty() {
        bail!(
            "no usable extract files found in {}",
            cfg.files_dir.display()
        );
    }

    // ─── 4) pass 2: unify schemas, consolidate one parquet per module ─
    let outcomes = process::consolidate_all(&cfg, &discovery.files)?;

    // ─── 5) consolidate the dictionary corpus ────────────────────────
    let corpus = dict::consolidate_dictionaries(&cfg)?;

    // ─── 6) geographic names (catalog structure errors are fatal) ────
    let mut label_inputs: Vec<(Module, PathBuf)> = Vec::new();
    let consolidated: Vec<(Module, PathBuf)> = outcomes
        .iter()
        .filter_map(|o| o.out_path.clone().map(|p| (o.module, p)))
        .collect();

    if cfg.catalog_path.exists() {
        let catalog = label::load_catalog(&cfg.catalog_path)?;
        for (module, path) in &consolidated {
            let (geo_path, _rows) = label::georeference_table(&cfg, *module, path, &catalog)?;
            label_inputs.push((*module, geo_path));
        }
    } else {
        warn!(
            catalog = %cfg.catalog_path.display(),
            "geographic catalog not found; skipping name enrichment"
        );
        label_inputs = consolidated;
    }

    // ─── 7) category labels + diagnostics ────────────────────────────
    for (module, path) in &label_inputs {
        label::apply_labels(&cfg, *module, path, &corpus.index)?;
    }

    // ─── 8) run summary ──────────────────────────────────────────────
    let summary = RunSummary {
        files_discovered: discovery.files.len()
            + discovery.unclassified
            + discovery.sniff_failures,
        files_unclassified: discovery.unclassified,
        sniff_failures: discovery.sniff_failures,
        load_failures: outcomes.iter().map(|o| o.load_failures).sum(),
        dict_documents: corpus.documents,
        dict_documents_skipped: corpus.documents_skipped,
        modules: outcomes
            .iter()
            .map(|o| ModuleTotals {
                module: o.module,
                files: o.files_in,
                files_loaded: o.files_loaded,
                rows: o.rows,
            })
            .collect(),
    };
    summary.log();

    Ok(())
}
