//! Pipeline keys for picking one failed run

use crate::filter::FilteredLogs;
use crate::ingest::LogRecord;
use crate::schema::{Feature, MissingColumns, TableSchema};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// `"<pipeline name> - <run start as written>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FailedPipelineKey(String);

impl FailedPipelineKey {
    pub fn for_record(record: &LogRecord) -> Self {
        Self(format!(
            "{} - {}",
            record.pipeline_name.as_deref().unwrap_or_default(),
            record.run_start_raw.as_deref().unwrap_or_default()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FailedPipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FailedPipelineKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Keys for the failed subset, resolvable back to rows
#[derive(Debug, Clone)]
pub struct FailureSelector<'a> {
    entries: Vec<(FailedPipelineKey, &'a LogRecord)>,
    occurrences: HashMap<FailedPipelineKey, usize>,
}

impl<'a> FailureSelector<'a> {
    /// Build a selector over a failed-only view.
    ///
    /// Returns `Ok(None)` when there is nothing to pick from: the view was not
    /// restricted to failures, or no run failed.
    pub fn new(
        view: &FilteredLogs<'a>,
        schema: &TableSchema,
    ) -> Result<Option<Self>, MissingColumns> {
        if !view.failures_only || view.is_empty() {
            return Ok(None);
        }
        schema.require(Feature::FailureSelection)?;

        let entries: Vec<_> = view
            .records
            .iter()
            .map(|r| (FailedPipelineKey::for_record(r), *r))
            .collect();

        let mut occurrences = HashMap::new();
        for (key, _) in &entries {
            *occurrences.entry(key.clone()).or_insert(0) += 1;
        }

        Ok(Some(Self {
            entries,
            occurrences,
        }))
    }

    /// Keys in row order, duplicates included
    pub fn keys(&self) -> Vec<&FailedPipelineKey> {
        self.entries.iter().map(|(k, _)| k).collect()
    }

    /// First row carrying `key`, in table order
    pub fn resolve(&self, key: &FailedPipelineKey) -> Option<&'a LogRecord> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, record)| *record)
    }

    /// Whether more than one failed run shares `key`
    pub fn is_ambiguous(&self, key: &FailedPipelineKey) -> bool {
        self.occurrences.get(key).copied().unwrap_or(0) > 1
    }

    /// Distinct keys shared by more than one failed run, in first-seen order
    pub fn ambiguous_keys(&self) -> Vec<&FailedPipelineKey> {
        let mut seen = Vec::new();
        for (key, _) in &self.entries {
            if self.is_ambiguous(key) && !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }
}
