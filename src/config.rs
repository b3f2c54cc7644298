use std::path::{Path, PathBuf};

/// All paths and tunables for one pipeline run, built once in `main` and
/// passed by reference into every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Flat directory of delimiter-separated extract files.
    pub files_dir: PathBuf,
    /// Root of the per-release JSON dictionary corpus (searched recursively).
    pub dict_dir: PathBuf,
    /// Geographic catalog (AGEEML) CSV.
    pub catalog_path: PathBuf,
    /// Consolidated per-module parquet output.
    pub master_dir: PathBuf,
    /// Column-coverage reports.
    pub reports_dir: PathBuf,
    /// Geo-labeled parquet output.
    pub geo_dir: PathBuf,
    /// Dictionary-labeled parquet output + diagnostics.
    pub labels_dir: PathBuf,

    /// Null bytes in the first 2000 bytes above which a BOM-less file is
    /// assumed to be a 16-bit encoding. Heuristic, not a detector.
    pub utf16_null_threshold: usize,
    /// Bytes of file prefix decoded while sniffing dialects.
    pub sniff_sample_bytes: usize,
    /// Rows per record batch when re-reading parquet for labeling.
    pub batch_rows: usize,
    /// Row bound for the all-null label diagnostic sample.
    pub diag_sample_rows: usize,
}

impl PipelineConfig {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        let base = base_dir.as_ref();
        let master_dir = base.join("parquet_master");
        Self {
            files_dir: base.join("files"),
            dict_dir: base.join("dictionaries"),
            catalog_path: base.join("catalogs").join("ageeml.csv"),
            reports_dir: master_dir.join("reports"),
            master_dir,
            geo_dir: base.join("parquet_master_geo"),
            labels_dir: base.join("parquet_master_labels"),
            utf16_null_threshold: 50,
            sniff_sample_bytes: 128 * 1024,
            batch_rows: 65_536,
            diag_sample_rows: 100_000,
        }
    }
}
