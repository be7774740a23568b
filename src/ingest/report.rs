// src/ingest/report.rs

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Trophies,
    Awards,
    Voxspheres,
    Users,
    Posts,
    MemberCounts,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Trophies => "trophies",
            Stage::Awards => "awards",
            Stage::Voxspheres => "voxspheres",
            Stage::Users => "users",
            Stage::Posts => "posts",
            Stage::MemberCounts => "member_counts",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub created: usize,
    /// Already present, or skipped by a checkpoint on resume.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub stage: Stage,
    pub key: String,
    pub error: String,
}

/// Outcome of one ingest run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: BTreeMap<Stage, StageStats>,
    pub failures: Vec<Failure>,
    /// Reference lookups that found nothing, keyed by what was looked up
    /// (`user`, `award`, `flair`, ...). These leave a null relation.
    pub unresolved: BTreeMap<&'static str, usize>,
    pub comments_written: usize,
    pub media_unavailable: usize,
    pub media_resized: usize,
}

impl IngestReport {
    pub fn stats(&self, stage: Stage) -> StageStats {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageStats {
        self.stages.entry(stage).or_default()
    }

    pub fn record_failure(&mut self, stage: Stage, key: impl Into<String>, error: &IngestError) {
        let key = key.into();
        tracing::error!(%stage, key = %key, "record failed: {error}");
        self.stage_mut(stage).failed += 1;
        self.failures.push(Failure {
            stage,
            key,
            error: error.to_string(),
        });
    }

    pub fn unresolved(&mut self, what: &'static str) {
        *self.unresolved.entry(what).or_default() += 1;
    }

    pub fn unresolved_count(&self, what: &str) -> usize {
        self.unresolved.get(what).copied().unwrap_or_default()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_counted_per_stage() {
        let mut report = IngestReport::default();
        report.record_failure(
            Stage::Posts,
            "p1",
            &IngestError::Persistence("boom".to_string()),
        );
        report.stage_mut(Stage::Posts).created += 2;

        assert_eq!(
            report.stats(Stage::Posts),
            StageStats {
                created: 2,
                skipped: 0,
                failed: 1
            }
        );
        assert_eq!(report.failures[0].key, "p1");
        assert!(!report.is_clean());
    }

    #[test]
    fn test_unresolved_counts() {
        let mut report = IngestReport::default();
        report.unresolved("user");
        report.unresolved("user");
        assert_eq!(report.unresolved_count("user"), 2);
        assert_eq!(report.unresolved_count("award"), 0);
    }

    #[test]
    fn test_serializes_stage_names() {
        let mut report = IngestReport::default();
        report.stage_mut(Stage::MemberCounts).created = 1;
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stages"]["member_counts"]["created"], 1);
    }
}
