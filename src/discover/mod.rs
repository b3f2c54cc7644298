//! Pass 1: file classification and header-only scanning.
//!
//! Every extract file is assigned to a survey module by name, its dialect
//! sniffed and its header row read, producing the immutable [`RawFile`]
//! descriptors the rest of the pipeline works from. Unclassifiable and
//! undecodable files are counted and skipped, never aborting the run.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use glob::glob;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::meta;
use crate::sniff::{self, Dialect};

/// The closed set of survey modules a file can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Module {
    Vivt,
    Hogt,
    Sdemt,
    Coe1t,
    Coe2t,
}

impl Module {
    pub const ALL: [Module; 5] = [
        Module::Vivt,
        Module::Hogt,
        Module::Sdemt,
        Module::Coe1t,
        Module::Coe2t,
    ];

    /// Canonical upper-case tag as it appears in filenames and dictionary
    /// table names.
    pub fn tag(&self) -> &'static str {
        match self {
            Module::Vivt => "VIVT",
            Module::Hogt => "HOGT",
            Module::Sdemt => "SDEMT",
            Module::Coe1t => "COE1T",
            Module::Coe2t => "COE2T",
        }
    }

    /// Lower-case form used in output filenames.
    pub fn key(&self) -> &'static str {
        match self {
            Module::Vivt => "vivt",
            Module::Hogt => "hogt",
            Module::Sdemt => "sdemt",
            Module::Coe1t => "coe1t",
            Module::Coe2t => "coe2t",
        }
    }

    /// Classify a filename by upper-cased substring match against the tag
    /// set, with prefix fallbacks for the two occupation sections whose
    /// files sometimes drop the trailing T.
    pub fn from_file_name(name: &str) -> Option<Module> {
        let up = name.to_uppercase();
        for module in Module::ALL {
            if up.contains(module.tag()) {
                return Some(module);
            }
        }
        if up.contains("COE1") {
            return Some(Module::Coe1t);
        }
        if up.contains("COE2") {
            return Some(Module::Coe2t);
        }
        None
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One classified input file with everything pass 2 needs to load it.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: PathBuf,
    pub module: Module,
    pub dialect: Dialect,
    /// Filename-derived (year, quarter); takes precedence over any
    /// record-level period field.
    pub name_period: Option<(i64, i64)>,
    /// Header names as observed in pass 1.
    pub columns: Vec<String>,
}

impl RawFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Result of the discovery pass, including the loss counters surfaced in
/// the run summary.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<RawFile>,
    pub unclassified: usize,
    pub sniff_failures: usize,
}

/// Scan the input directory: classify by name, then sniff dialects and read
/// headers in parallel.
pub fn scan_files(cfg: &PipelineConfig) -> Result<Discovery> {
    let pattern = cfg.files_dir.join("*.csv");
    let pattern = pattern.to_string_lossy();
    let mut paths: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("globbing {pattern}"))?
        .filter_map(|entry| entry.ok())
        .collect();
    paths.sort();
    info!(count = paths.len(), dir = %cfg.files_dir.display(), "scanning extract files");

    let mut classified: Vec<(PathBuf, Module)> = Vec::with_capacity(paths.len());
    let mut unclassified = 0usize;
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match Module::from_file_name(&name) {
            Some(module) => classified.push((path, module)),
            None => {
                warn!(file = %name, "no module tag in filename; skipped");
                unclassified += 1;
            }
        }
    }

    let sniffed: Vec<Option<RawFile>> = classified
        .par_iter()
        .map(|(path, module)| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match sniff::sniff_dialect(path, cfg.sniff_sample_bytes, cfg.utf16_null_threshold) {
                Ok((dialect, columns)) => Some(RawFile {
                    path: path.clone(),
                    module: *module,
                    dialect,
                    name_period: meta::period_from_filename(&name),
                    columns,
                }),
                Err(err) => {
                    error!(file = %name, error = %err, "dialect detection failed; file dropped");
                    None
                }
            }
        })
        .collect();

    let sniff_failures = sniffed.iter().filter(|r| r.is_none()).count();
    let files: Vec<RawFile> = sniffed.into_iter().flatten().collect();
    info!(
        kept = files.len(),
        unclassified, sniff_failures, "discovery pass complete"
    );

    Ok(Discovery {
        files,
        unclassified,
        sniff_failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn classification_by_tag() {
        assert_eq!(
            Module::from_file_name("enoe_sdemt_2024_trim1.csv"),
            Some(Module::Sdemt)
        );
        assert_eq!(
            Module::from_file_name("VIVT424__extract.csv"),
            Some(Module::Vivt)
        );
        assert_eq!(
            Module::from_file_name("enoe_coe1_2019_trim4.csv"),
            Some(Module::Coe1t)
        );
        assert_eq!(Module::from_file_name("coe2_124.csv"), Some(Module::Coe2t));
        assert_eq!(Module::from_file_name("catalogo_municipios.csv"), None);
    }

    #[test]
    fn scan_classifies_sniffs_and_counts_skips() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        fs::create_dir_all(base.join("files")).unwrap();
        fs::write(
            base.join("files/enoe_hogt_2024_trim3.csv"),
            "per,ent,p1\n324,01,2\n",
        )
        .unwrap();
        fs::write(base.join("files/sdemt_124.csv"), "per;ent;eda\n124;09;35\n").unwrap();
        fs::write(base.join("files/readme.csv"), "whatever\n").unwrap();
        fs::write(base.join("files/vivt_bad.csv"), "").unwrap();

        let cfg = PipelineConfig::new(base);
        let discovery = scan_files(&cfg).unwrap();

        assert_eq!(discovery.files.len(), 2);
        assert_eq!(discovery.unclassified, 1);
        assert_eq!(discovery.sniff_failures, 1);

        let hogt = discovery
            .files
            .iter()
            .find(|f| f.module == Module::Hogt)
            .unwrap();
        assert_eq!(hogt.name_period, Some((2024, 3)));
        assert_eq!(hogt.columns, vec!["per", "ent", "p1"]);

        let sdemt = discovery
            .files
            .iter()
            .find(|f| f.module == Module::Sdemt)
            .unwrap();
        assert_eq!(sdemt.dialect.delimiter, b';');
        assert_eq!(sdemt.name_period, None);
    }
}
