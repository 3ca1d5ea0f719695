//! CSV ingestion into an immutable log table

use crate::schema::{Column, ColumnNames, TableSchema};
use crate::timestamp::parse_run_start;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from parsing an uploaded CSV
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV has no header row")]
    Empty,

    #[error("Malformed CSV at line {line}: expected {expected} fields, saw {found}")]
    MalformedRow {
        line: u64,
        expected: usize,
        found: usize,
    },
}

/// One run of a pipeline, as exported
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Position in the file (0-based, header excluded)
    pub row: usize,
    pub pipeline_name: Option<String>,
    /// Run start exactly as written in the file
    pub run_start_raw: Option<String>,
    /// Parsed run start; `None` when absent or unparseable
    pub run_start: Option<NaiveDateTime>,
    pub status: Option<String>,
    pub error: Option<String>,
    /// Every cell of the row, in header order
    pub cells: Vec<String>,
}

impl LogRecord {
    /// Whether the status is "failed", ignoring case
    pub fn is_failed(&self) -> bool {
        self.status_lower().as_deref() == Some("failed")
    }

    pub fn status_lower(&self) -> Option<String> {
        self.status.as_ref().map(|s| s.to_lowercase())
    }
}

/// An uploaded table of pipeline runs, in file row order
#[derive(Debug, Clone, PartialEq)]
pub struct LogTable {
    headers: Vec<String>,
    schema: TableSchema,
    records: Vec<LogRecord>,
}

impl LogTable {
    /// Parse CSV from any reader; the first row is the header
    pub fn from_reader<R: Read>(reader: R, names: &ColumnNames) -> Result<Self, IngestError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                h.trim().to_string()
            })
            .collect();

        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(IngestError::Empty);
        }

        let schema = TableSchema::resolve(&headers, names);
        debug!(columns = headers.len(), "Resolved CSV header");

        let mut records = Vec::new();
        for (row, result) in csv_reader.records().enumerate() {
            let record = result?;
            if record.len() > headers.len() {
                return Err(IngestError::MalformedRow {
                    line: record.position().map(|p| p.line()).unwrap_or(row as u64 + 2),
                    expected: headers.len(),
                    found: record.len(),
                });
            }

            let mut cells: Vec<String> = record.iter().map(|c| c.to_string()).collect();
            cells.resize(headers.len(), String::new());
            records.push(build_record(row, cells, &schema));
        }

        info!(rows = records.len(), columns = headers.len(), "Parsed log table");

        Ok(Self {
            headers,
            schema,
            records,
        })
    }

    pub fn from_bytes(bytes: &[u8], names: &ColumnNames) -> Result<Self, IngestError> {
        Self::from_reader(bytes, names)
    }

    pub fn from_path(path: impl AsRef<Path>, names: &ColumnNames) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file), names)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn build_record(row: usize, cells: Vec<String>, schema: &TableSchema) -> LogRecord {
    let cell = |column: Column| -> Option<String> {
        schema
            .index_of(column)
            .and_then(|i| cells.get(i))
            .filter(|c| !c.is_empty())
            .cloned()
    };

    let run_start_raw = cell(Column::RunStart);
    let run_start = run_start_raw.as_deref().and_then(parse_run_start);

    LogRecord {
        row,
        pipeline_name: cell(Column::PipelineName),
        run_start,
        run_start_raw,
        status: cell(Column::Status),
        error: cell(Column::Error),
        cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Feature;
    use std::io::Write;

    const SAMPLE: &str = "\
Pipeline name,Run start,Run end,Duration,Triggered by,Status,Error,Run ID
pipeline1,\"6/10/2025, 5:03:19 PM\",\"6/10/2025, 5:04:01 PM\",00:00:42,Manual trigger,Succeeded,,a1
pipeline4,\"6/10/2025, 5:03:19 PM\",\"6/10/2025, 5:05:11 PM\",00:01:52,Manual trigger,Failed,\"Operation on target Copy failed: ErrorCode=UserErrorFileNotFound\",a2
";

    #[test]
    fn test_parse_sample_export() {
        let table = LogTable::from_bytes(SAMPLE.as_bytes(), &ColumnNames::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.headers().len(), 8);

        let first = &table.records()[0];
        assert_eq!(first.row, 0);
        assert_eq!(first.pipeline_name.as_deref(), Some("pipeline1"));
        assert_eq!(first.run_start_raw.as_deref(), Some("6/10/2025, 5:03:19 PM"));
        assert!(first.run_start.is_some());
        assert_eq!(first.error, None);
        assert!(!first.is_failed());

        let second = &table.records()[1];
        assert!(second.is_failed());
        assert!(second.error.as_deref().unwrap().contains("UserErrorFileNotFound"));
        assert_eq!(second.cells[7], "a2");
    }

    #[test]
    fn test_bom_and_header_whitespace() {
        let csv = "\u{feff}Pipeline name , Status\np,Failed\n";
        let table = LogTable::from_bytes(csv.as_bytes(), &ColumnNames::default()).unwrap();
        assert_eq!(table.headers(), &["Pipeline name", "Status"]);
        assert!(table.schema().require(Feature::Dashboard).is_ok());
    }

    #[test]
    fn test_short_rows_are_padded() {
        let csv = "Pipeline name,Status,Error\np1,Failed\n";
        let table = LogTable::from_bytes(csv.as_bytes(), &ColumnNames::default()).unwrap();
        let record = &table.records()[0];
        assert_eq!(record.cells.len(), 3);
        assert_eq!(record.error, None);
        assert!(record.is_failed());
    }

    #[test]
    fn test_long_rows_are_malformed() {
        let csv = "Pipeline name,Status\np1,Failed\np2,Failed,extra\n";
        let err = LogTable::from_bytes(csv.as_bytes(), &ColumnNames::default()).unwrap_err();
        match err {
            IngestError::MalformedRow {
                line,
                expected,
                found,
            } => {
                assert_eq!(line, 3);
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_input() {
        let err = LogTable::from_bytes(b"", &ColumnNames::default()).unwrap_err();
        assert!(matches!(err, IngestError::Empty));
    }

    #[test]
    fn test_header_only_is_empty_table() {
        let table =
            LogTable::from_bytes(b"Pipeline name,Status\n", &ColumnNames::default()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_unparseable_run_start_is_coerced() {
        let csv = "Pipeline name,Run start,Status\np1,not a date,Failed\n";
        let table = LogTable::from_bytes(csv.as_bytes(), &ColumnNames::default()).unwrap();
        let record = &table.records()[0];
        assert_eq!(record.run_start_raw.as_deref(), Some("not a date"));
        assert_eq!(record.run_start, None);
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let table = LogTable::from_path(file.path(), &ColumnNames::default()).unwrap();
        assert_eq!(table.len(), 2);

        let err = LogTable::from_path("/nonexistent/logs.csv", &ColumnNames::default())
            .unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }

    #[test]
    fn test_same_bytes_same_table() {
        let a = LogTable::from_bytes(SAMPLE.as_bytes(), &ColumnNames::default()).unwrap();
        let b = LogTable::from_bytes(SAMPLE.as_bytes(), &ColumnNames::default()).unwrap();
        assert_eq!(a, b);
    }
}
