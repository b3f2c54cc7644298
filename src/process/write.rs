//! Streaming single-file parquet output.
//!
//! The first table appended fixes the physical schema; every later table is
//! defensively re-aligned to that column order, with null columns inserted
//! for anything absent, then written through. Only one table is resident at
//! a time regardless of how many partitions arrive.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{new_null_array, ArrayRef};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

pub struct StreamingTableWriter {
    writer: ArrowWriter<File>,
    schema: SchemaRef,
    rows: u64,
}

impl StreamingTableWriter {
    /// Open `path` and append `first`, whose layout becomes the output
    /// file's schema.
    pub fn create(path: &Path, first: &RecordBatch) -> Result<StreamingTableWriter> {
        let file = File::create(path)
            .with_context(|| format!("creating output file {}", path.display()))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let schema = first.schema();
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .context("opening parquet writer")?;
        writer.write(first).context("writing first partition")?;
        Ok(StreamingTableWriter {
            writer,
            schema,
            rows: first.num_rows() as u64,
        })
    }

    /// Append one more same-schema table, re-aligning its columns to the
    /// writer's fixed order first.
    pub fn append(&mut self, batch: &RecordBatch) -> Result<()> {
        let aligned = align_to_schema(batch, &self.schema)?;
        self.writer.write(&aligned).context("appending partition")?;
        self.rows += aligned.num_rows() as u64;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Close the file, returning the total row count.
    pub fn finish(self) -> Result<u64> {
        self.writer.close().context("closing parquet writer")?;
        Ok(self.rows)
    }
}

/// Reorder `batch` columns to `schema`'s order by name, inserting an
/// all-null column wherever the batch lacks one. A same-name column with a
/// different type is a real inconsistency and is reported, not coerced.
pub fn align_to_schema(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    if batch.schema() == *schema {
        return Ok(batch.clone());
    }
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        match batch.column_by_name(field.name()) {
            Some(col) if col.data_type() == field.data_type() => columns.push(col.clone()),
            Some(col) => bail!(
                "column {} arrived as {} but the output schema fixed it as {}",
                field.name(),
                col.data_type(),
                field.data_type()
            ),
            None => columns.push(new_null_array(field.data_type(), batch.num_rows())),
        }
    }
    RecordBatch::try_new(Arc::clone(schema), columns).context("re-aligning partition")
}
