//! Per-module column coverage report: for each canonical column, how many
//! source files actually supplied it. A column covered by few files is the
//! first thing to check when a consolidated table looks sparse.

use std::path::Path;

use anyhow::{Context, Result};

use crate::discover::RawFile;
use crate::schema::ModuleSchema;

pub fn write_coverage_report(
    path: &Path,
    schema: &ModuleSchema,
    files: &[&RawFile],
) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating coverage report {}", path.display()))?;
    wtr.write_record(["columna", "archivos_con_col", "total_archivos"])?;
    let total = files.len().to_string();
    for col in &schema.columns {
        let count = files
            .iter()
            .filter(|f| f.columns.iter().any(|c| c.eq_ignore_ascii_case(col)))
            .count()
            .to_string();
        wtr.write_record([col.as_str(), count.as_str(), total.as_str()])?;
    }
    wtr.flush().context("flushing coverage report")?;
    Ok(())
}
