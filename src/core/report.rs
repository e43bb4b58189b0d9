use super::duplicate::DuplicateCluster;
use super::planner::{ExecutedPlan, Mode, RemovalOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Pipeline stages, in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scan,
    Hash,
    Cluster,
    Verify,
    Plan,
    DryRunReport,
    Apply,
    Done,
    PartialFailure,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Scan => "scan",
            Stage::Hash => "hash",
            Stage::Cluster => "cluster",
            Stage::Verify => "verify",
            Stage::Plan => "plan",
            Stage::DryRunReport => "dry-run report",
            Stage::Apply => "apply",
            Stage::Done => "done",
            Stage::PartialFailure => "partial failure",
        };
        f.write_str(name)
    }
}

/// An error that affected one file without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub stage: Stage,
    pub message: String,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, stage: Stage, error: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            stage,
            message: error.to_string(),
        }
    }
}

/// Everything a `rmdup` run found and did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub directory: PathBuf,
    pub mode: Mode,
    pub threshold: u32,
    pub generated_at: DateTime<Utc>,
    pub scanned: usize,
    pub hashed: usize,
    pub clusters: Vec<DuplicateCluster>,
    pub plans: Vec<ExecutedPlan>,
    pub failures: Vec<FileFailure>,
    pub stage: Stage,
}

impl RunReport {
    pub fn duplicate_clusters(&self) -> impl Iterator<Item = &DuplicateCluster> {
        self.clusters.iter().filter(|c| c.is_duplicate())
    }

    pub fn unique_count(&self) -> usize {
        self.clusters.iter().filter(|c| !c.is_duplicate()).count()
    }

    pub fn removed(&self) -> impl Iterator<Item = &PathBuf> {
        self.plans.iter().flat_map(|p| {
            p.removals
                .iter()
                .filter(|r| r.outcome == RemovalOutcome::Removed)
                .map(|r| &r.path)
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Terminal stage for the failures recorded so far.
    pub fn settle(&mut self) {
        self.stage = if self.failures.is_empty() {
            Stage::Done
        } else {
            Stage::PartialFailure
        };
    }
}
