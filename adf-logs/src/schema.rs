//! Column resolution for uploaded log tables
//!
//! Headers are resolved once, at ingestion. Each downstream feature asks the
//! schema whether its columns are present through [`TableSchema::require`]
//! and degrades to a warning when they are not.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Header names for the columns the analyzer interprets
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ColumnNames {
    pub pipeline_name: String,
    pub run_start: String,
    pub status: String,
    pub error: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            pipeline_name: "Pipeline name".to_string(),
            run_start: "Run start".to_string(),
            status: "Status".to_string(),
            error: "Error".to_string(),
        }
    }
}

/// A column the analyzer knows how to interpret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    PipelineName,
    RunStart,
    Status,
    Error,
}

/// A feature gated on column presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Restricting the table to failed runs
    FailureFilter,
    /// Picking one failed run by its pipeline key
    FailureSelection,
    /// Status counts, distribution and top failing pipelines
    Dashboard,
    /// Runs per calendar day
    RunsOverTime,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::FailureFilter,
        Feature::FailureSelection,
        Feature::Dashboard,
        Feature::RunsOverTime,
    ];

    /// Columns that must be present for the feature to run
    pub fn required_columns(self) -> &'static [Column] {
        match self {
            Feature::FailureFilter => &[Column::Status],
            Feature::FailureSelection => &[Column::PipelineName, Column::RunStart],
            Feature::Dashboard => &[Column::Status, Column::PipelineName],
            Feature::RunsOverTime => &[Column::RunStart],
        }
    }
}

/// The columns a feature needed but the table lacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingColumns {
    pub feature: Feature,
    pub columns: Vec<String>,
}

impl fmt::Display for MissingColumns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted: Vec<String> = self.columns.iter().map(|c| format!("'{}'", c)).collect();
        match self.feature {
            Feature::FailureFilter => write!(f, "No {} column found.", quoted.join(", ")),
            Feature::Dashboard => write!(
                f,
                "Required columns ({}) not found in the CSV.",
                quoted.join(", ")
            ),
            Feature::FailureSelection => write!(
                f,
                "Cannot select a failed run: missing column(s) {}.",
                quoted.join(", ")
            ),
            Feature::RunsOverTime => write!(
                f,
                "Runs over time unavailable: missing column(s) {}.",
                quoted.join(", ")
            ),
        }
    }
}

impl std::error::Error for MissingColumns {}

/// Resolved positions of the known columns within a table's headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    names: ColumnNames,
    pipeline_name: Option<usize>,
    run_start: Option<usize>,
    status: Option<usize>,
    error: Option<usize>,
}

impl TableSchema {
    /// Match `headers` against the configured column names (exact match)
    pub fn resolve(headers: &[String], names: &ColumnNames) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Self {
            pipeline_name: find(&names.pipeline_name),
            run_start: find(&names.run_start),
            status: find(&names.status),
            error: find(&names.error),
            names: names.clone(),
        }
    }

    pub fn index_of(&self, column: Column) -> Option<usize> {
        match column {
            Column::PipelineName => self.pipeline_name,
            Column::RunStart => self.run_start,
            Column::Status => self.status,
            Column::Error => self.error,
        }
    }

    pub fn has(&self, column: Column) -> bool {
        self.index_of(column).is_some()
    }

    /// Header name configured for `column`
    pub fn name_of(&self, column: Column) -> &str {
        match column {
            Column::PipelineName => &self.names.pipeline_name,
            Column::RunStart => &self.names.run_start,
            Column::Status => &self.names.status,
            Column::Error => &self.names.error,
        }
    }

    /// Check that every column `feature` needs is present
    pub fn require(&self, feature: Feature) -> Result<(), MissingColumns> {
        let columns: Vec<String> = feature
            .required_columns()
            .iter()
            .filter(|c| !self.has(**c))
            .map(|c| self.name_of(*c).to_string())
            .collect();

        if columns.is_empty() {
            Ok(())
        } else {
            Err(MissingColumns { feature, columns })
        }
    }

    /// One entry per feature the table cannot support
    pub fn warnings(&self) -> Vec<MissingColumns> {
        Feature::ALL
            .iter()
            .filter_map(|f| self.require(*f).err())
            .collect()
    }
}
