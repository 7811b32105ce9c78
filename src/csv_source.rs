//! CSV-backed row source
//!
//! Reads a headed CSV file and parses each cell as the type its schema
//! column declares. Columns are matched by header name, so the file may
//! carry extra columns or list them in a different order than the schema.

use crate::row::{Row, RowSource, RowSourceError, Schema, Value};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Row source over CSV data.
///
/// Built with `from_path`, the source can be restarted by re-opening the
/// file. Built with `from_reader`, it is single-pass.
pub struct CsvRowSource {
    schema: Schema,
    path: Option<PathBuf>,
    reader: csv::Reader<Box<dyn Read>>,
    /// CSV field index for each schema column
    fields: Vec<usize>,
    record: csv::StringRecord,
    current: Option<Row>,
    rows_read: usize,
}

fn open_reader(path: &Path) -> Result<csv::Reader<Box<dyn Read>>, RowSourceError> {
    let file = File::open(path)
        .map_err(|e| RowSourceError::Read(format!("{}: {}", path.display(), e)))?;
    Ok(csv_reader(Box::new(BufReader::new(file))))
}

fn csv_reader(input: Box<dyn Read>) -> csv::Reader<Box<dyn Read>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input)
}

fn resolve_fields(
    reader: &mut csv::Reader<Box<dyn Read>>,
    schema: &Schema,
) -> Result<Vec<usize>, RowSourceError> {
    let headers = reader
        .headers()
        .map_err(|e| RowSourceError::Read(e.to_string()))?
        .clone();
    schema
        .columns()
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|header| header == column.name)
                .ok_or_else(|| RowSourceError::MissingColumn(column.name.clone()))
        })
        .collect()
}

impl CsvRowSource {
    /// Opens a CSV file. The source is restartable.
    ///
    /// # Errors
    /// Fails if the file cannot be opened or a schema column has no header.
    pub fn from_path<P: AsRef<Path>>(path: P, schema: Schema) -> Result<Self, RowSourceError> {
        let path = path.as_ref().to_path_buf();
        let reader = open_reader(&path)?;
        let source = Self::build(reader, schema, Some(path))?;
        if let Some(path) = &source.path {
            log::info!(
                "Opened CSV row source {} ({} columns)",
                path.display(),
                source.schema.len()
            );
        }
        Ok(source)
    }

    /// Wraps an arbitrary reader. The source cannot be restarted.
    pub fn from_reader<R: Read + 'static>(input: R, schema: Schema) -> Result<Self, RowSourceError> {
        Self::build(csv_reader(Box::new(input)), schema, None)
    }

    fn build(
        mut reader: csv::Reader<Box<dyn Read>>,
        schema: Schema,
        path: Option<PathBuf>,
    ) -> Result<Self, RowSourceError> {
        let fields = resolve_fields(&mut reader, &schema)?;
        Ok(CsvRowSource {
            schema,
            path,
            reader,
            fields,
            record: csv::StringRecord::new(),
            current: None,
            rows_read: 0,
        })
    }

    /// Rows read since the source was opened or last restarted.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    fn parse_record(&self) -> Result<Row, RowSourceError> {
        let line = self.record.position().map_or(0, |p| p.line());
        self.schema
            .columns()
            .iter()
            .zip(&self.fields)
            .map(|(column, &field)| {
                let text = self.record.get(field).unwrap_or("");
                Value::parse(column.column_type, text).map_err(|message| RowSourceError::Parse {
                    line,
                    column: column.name.clone(),
                    message,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Row::new)
    }
}

impl RowSource for CsvRowSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn current_row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<bool, RowSourceError> {
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| RowSourceError::Read(e.to_string()))?;
        let previous = self.current.take();
        if !more {
            if previous.is_some() {
                log::info!("CSV row source exhausted after {} rows", self.rows_read);
            }
            return Ok(false);
        }

        self.current = Some(self.parse_record()?);
        self.rows_read += 1;
        Ok(true)
    }

    fn restart(&mut self) -> Result<(), RowSourceError> {
        let path = self.path.as_ref().ok_or(RowSourceError::NotRestartable)?;
        let mut reader = open_reader(path)?;
        self.fields = resolve_fields(&mut reader, &self.schema)?;
        self.reader = reader;
        self.current = None;
        self.rows_read = 0;
        Ok(())
    }
}
