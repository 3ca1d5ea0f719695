//! Dashboard aggregates over a log table
//!
//! Everything here is a pure function of the table; the dashboard is
//! recomputed in full on every request.

use crate::ingest::LogTable;
use crate::schema::{Feature, MissingColumns};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Runs per well-known status, matched case-insensitively
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub queued: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusShare {
    pub status: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineFailures {
    pub pipeline: String,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyRuns {
    pub date: NaiveDate,
    pub runs: usize,
}

/// Everything the dashboard view renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_runs: usize,
    pub counts: StatusCounts,
    /// One entry per distinct raw status, most frequent first
    pub distribution: Vec<StatusShare>,
    /// Pipelines with the most failures, most first
    pub top_failing: Vec<PipelineFailures>,
    /// `None` when the table has no run start column
    pub daily_runs: Option<Vec<DailyRuns>>,
}

impl DashboardSummary {
    pub fn compute(table: &LogTable, top_n: usize) -> Result<Self, MissingColumns> {
        table.schema().require(Feature::Dashboard)?;

        let per_day = table
            .schema()
            .require(Feature::RunsOverTime)
            .ok()
            .map(|_| daily_runs(table));

        Ok(Self {
            total_runs: table.len(),
            counts: status_counts(table),
            distribution: status_distribution(table),
            top_failing: top_failing(table, top_n),
            daily_runs: per_day,
        })
    }
}

pub fn status_counts(table: &LogTable) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for status in table.records().iter().filter_map(|r| r.status_lower()) {
        match status.as_str() {
            "succeeded" => counts.succeeded += 1,
            "failed" => counts.failed += 1,
            "inprogress" => counts.in_progress += 1,
            "queued" => counts.queued += 1,
            _ => {}
        }
    }
    counts
}

/// Count occurrences of each key, ordered by count descending.
/// Equal counts keep the order in which keys were first seen.
fn ranked<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut order: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();

    for key in keys {
        match index.get(key) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(key, order.len());
                order.push((key.to_string(), 1));
            }
        }
    }

    // sort_by is stable
    order.sort_by(|a, b| b.1.cmp(&a.1));
    order
}

pub fn status_distribution(table: &LogTable) -> Vec<StatusShare> {
    ranked(table.records().iter().filter_map(|r| r.status.as_deref()))
        .into_iter()
        .map(|(status, count)| StatusShare { status, count })
        .collect()
}

pub fn top_failing(table: &LogTable, n: usize) -> Vec<PipelineFailures> {
    let failing = table
        .records()
        .iter()
        .filter(|r| r.is_failed())
        .filter_map(|r| r.pipeline_name.as_deref());

    ranked(failing)
        .into_iter()
        .take(n)
        .map(|(pipeline, failures)| PipelineFailures { pipeline, failures })
        .collect()
}

/// Runs per calendar day; rows without a parseable run start are skipped
pub fn daily_runs(table: &LogTable) -> Vec<DailyRuns> {
    let mut days: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for start in table.records().iter().filter_map(|r| r.run_start) {
        *days.entry(start.date()).or_insert(0) += 1;
    }
    days.into_iter()
        .map(|(date, runs)| DailyRuns { date, runs })
        .collect()
}
