//! Failed-run filtering

use crate::ingest::{LogRecord, LogTable};
use crate::schema::{Feature, MissingColumns};
use tracing::warn;

/// A view over a log table, possibly restricted to failed runs
#[derive(Debug, Clone)]
pub struct FilteredLogs<'a> {
    pub records: Vec<&'a LogRecord>,
    /// True only when the failed-only restriction was actually applied
    pub failures_only: bool,
    /// Set when failed-only was requested but could not be applied
    pub warning: Option<MissingColumns>,
}

impl FilteredLogs<'_> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Restrict `table` to failed runs when `failed_only` is set.
///
/// Without a status column the full table comes back with a warning, so the
/// caller can keep rendering instead of stopping.
pub fn filter_failures(table: &LogTable, failed_only: bool) -> FilteredLogs<'_> {
    let all = || table.records().iter().collect::<Vec<_>>();

    if !failed_only {
        return FilteredLogs {
            records: all(),
            failures_only: false,
            warning: None,
        };
    }

    match table.schema().require(Feature::FailureFilter) {
        Ok(()) => FilteredLogs {
            records: table.records().iter().filter(|r| r.is_failed()).collect(),
            failures_only: true,
            warning: None,
        },
        Err(missing) => {
            warn!(columns = ?missing.columns, "Failure filter unavailable, showing all rows");
            FilteredLogs {
                records: all(),
                failures_only: false,
                warning: Some(missing),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnNames;

    fn table(csv: &str) -> LogTable {
        LogTable::from_bytes(csv.as_bytes(), &ColumnNames::default()).unwrap()
    }

    #[test]
    fn test_failed_only_is_case_insensitive_and_stable() {
        let t = table(
            "Pipeline name,Status\n\
             a,Failed\n\
             b,Succeeded\n\
             c,FAILED\n\
             d,failed\n\
             e,Failed \n\
             f,\n",
        );
        let filtered = filter_failures(&t, true);
        let names: Vec<_> = filtered
            .records
            .iter()
            .map(|r| r.pipeline_name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "c", "d"]);
        assert!(filtered.failures_only);
        assert!(filtered.warning.is_none());
    }

    #[test]
    fn test_toggle_off_returns_everything() {
        let t = table("Pipeline name,Status\na,Failed\nb,Succeeded\n");
        let filtered = filter_failures(&t, false);
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.failures_only);
    }

    #[test]
    fn test_missing_status_degrades_with_warning() {
        let t = table("Pipeline name,Error\na,boom\nb,\n");
        let filtered = filter_failures(&t, true);
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.failures_only);
        assert_eq!(
            filtered.warning.unwrap().to_string(),
            "No 'Status' column found."
        );
    }

    #[test]
    fn test_no_failures_gives_empty_view() {
        let t = table("Pipeline name,Status\na,Succeeded\n");
        let filtered = filter_failures(&t, true);
        assert!(filtered.is_empty());
        assert!(filtered.failures_only);
    }

    #[test]
    fn test_deterministic() {
        let csv = "Pipeline name,Status\na,Failed\nb,Queued\nc,failed\n";
        let first: Vec<usize> = filter_failures(&table(csv), true)
            .records
            .iter()
            .map(|r| r.row)
            .collect();
        let second: Vec<usize> = filter_failures(&table(csv), true)
            .records
            .iter()
            .map(|r| r.row)
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![0, 2]);
    }
}
