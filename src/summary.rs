//! End-of-run accounting. Every skipped or dropped input is counted here
//! and logged, so silent data loss shows up in the run output.

use tracing::{info, warn};

use crate::discover::Module;

#[derive(Debug, Default)]
pub struct RunSummary {
    pub files_discovered: usize,
    pub files_unclassified: usize,
    pub sniff_failures: usize,
    pub load_failures: usize,
    pub dict_documents: usize,
    pub dict_documents_skipped: usize,
    pub modules: Vec<ModuleTotals>,
}

#[derive(Debug)]
pub struct ModuleTotals {
    pub module: Module,
    pub files: usize,
    pub files_loaded: usize,
    pub rows: u64,
}

impl RunSummary {
    pub fn dropped_files(&self) -> usize {
        self.files_unclassified + self.sniff_failures + self.load_failures
    }

    pub fn log(&self) {
        for totals in &self.modules {
            info!(
                module = %totals.module,
                files = totals.files,
                loaded = totals.files_loaded,
                rows = totals.rows,
                "module totals"
            );
        }
        info!(
            files = self.files_discovered,
            unclassified = self.files_unclassified,
            sniff_failures = self.sniff_failures,
            load_failures = self.load_failures,
            dictionaries = self.dict_documents,
            dictionaries_skipped = self.dict_documents_skipped,
            "run complete"
        );
        if self.dropped_files() > 0 {
            warn!(
                dropped = self.dropped_files(),
                "some input files did not make it into the consolidated output"
            );
        }
    }
}
