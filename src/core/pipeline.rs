use super::duplicate::{DuplicateClusterer, SsimVerifier};
use super::error::{DedupError, Result};
use super::hash::{HashEngine, ImageFingerprint};
use super::image::{Codec, ImageCodec};
use super::planner::{DeletionPlan, DeletionPlanner, Mode};
use super::report::{FileFailure, RunReport, Stage};
use super::scanner::Scanner;
use super::similarity::SimilarityComparator;
use crate::config::Settings;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Receives progress notifications while a run is underway.
pub trait Progress: Sync {
    fn begin(&self, _stage: Stage, _total: u64) {}

    fn advance(&self) {}

    fn finish(&self, _stage: Stage) {}
}

/// Progress sink that ignores everything.
pub struct Silent;

impl Progress for Silent {}

/// Full duplicate-removal run over one directory.
pub struct Pipeline {
    settings: Settings,
    codec: Box<dyn Codec>,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        Self::with_codec(settings, Box::new(ImageCodec))
    }

    pub fn with_codec(settings: Settings, codec: Box<dyn Codec>) -> Self {
        Self { settings, codec }
    }

    /// Scan, hash, cluster, verify, plan, then report or apply.
    ///
    /// Only configuration problems are returned as errors, and only before
    /// any hashing starts. Per-file problems end up in the report and turn
    /// the final stage into `PartialFailure`.
    pub fn run(&self, dir: &Path, progress: &dyn Progress) -> Result<RunReport> {
        self.settings.validate()?;
        let engine = HashEngine::new(self.settings.hash)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.jobs.unwrap_or(0))
            .build()
            .map_err(|e| DedupError::config(format!("cannot start worker pool: {}", e)))?;

        let mut report = RunReport {
            directory: dir.to_path_buf(),
            mode: self.settings.mode,
            threshold: self.settings.cluster.threshold,
            generated_at: Utc::now(),
            scanned: 0,
            hashed: 0,
            clusters: Vec::new(),
            plans: Vec::new(),
            failures: Vec::new(),
            stage: Stage::Scan,
        };

        enter(&mut report, Stage::Scan);
        let paths = Scanner::new(self.settings.scan.clone()).scan(dir)?;
        report.scanned = paths.len();

        enter(&mut report, Stage::Hash);
        let (prints, failures) = pool.install(|| self.hash_all(&engine, &paths, progress));
        report.hashed = prints.len();
        report.failures.extend(failures);

        enter(&mut report, Stage::Cluster);
        let clusterer = DuplicateClusterer::new(self.settings.cluster);
        let mut clusters = pool.install(|| clusterer.cluster(&prints));

        if self.settings.cluster.verify {
            enter(&mut report, Stage::Verify);
            progress.begin(Stage::Verify, 0);
            let verifier = SsimVerifier::new(
                self.codec.as_ref(),
                SimilarityComparator::new(self.settings.ssim),
            );
            let (verified, failures) =
                pool.install(|| clusterer.verify(clusters, &prints, &verifier));
            clusters = verified;
            report.failures.extend(failures);
            progress.finish(Stage::Verify);
        }

        enter(&mut report, Stage::Plan);
        let by_path: HashMap<&Path, &ImageFingerprint> =
            prints.iter().map(|p| (p.path.as_path(), p)).collect();
        let planner = DeletionPlanner::new(self.settings.mode);
        let plans: Vec<DeletionPlan> = clusters
            .iter_mut()
            .filter(|c| c.is_duplicate())
            .filter_map(|c| planner.plan(c, &by_path))
            .collect();
        report.clusters = clusters;

        self.execute(&mut report, &planner, &plans);
        Ok(report)
    }

    /// Turn the plans of a dry-run report into real removals.
    pub fn apply(&self, report: &mut RunReport) {
        let plans: Vec<DeletionPlan> = report
            .plans
            .iter()
            .filter(|p| p.dry_run)
            .map(|p| DeletionPlan {
                canonical: p.canonical.clone(),
                removals: p.removals.iter().map(|r| r.path.clone()).collect(),
                dry_run: false,
            })
            .collect();
        report.plans.retain(|p| !p.dry_run);
        report.mode = Mode::Apply;
        self.execute(report, &DeletionPlanner::new(Mode::Apply), &plans);
    }

    fn execute(&self, report: &mut RunReport, planner: &DeletionPlanner, plans: &[DeletionPlan]) {
        let stage = if report.mode == Mode::Apply {
            Stage::Apply
        } else {
            Stage::DryRunReport
        };
        enter(report, stage);

        // sequential on purpose: canonical checks must not race sibling removals
        for plan in plans {
            let executed = planner.execute(plan);
            report.failures.extend(executed.failures());
            report.plans.push(executed);
        }

        report.settle();
        log::debug!(
            "Finished in stage {} with {} failure(s)",
            report.stage,
            report.failures.len()
        );
    }

    fn hash_all(
        &self,
        engine: &HashEngine,
        paths: &[PathBuf],
        progress: &dyn Progress,
    ) -> (Vec<ImageFingerprint>, Vec<FileFailure>) {
        let codec = self.codec.as_ref();

        progress.begin(Stage::Hash, paths.len() as u64);
        // indexed collect: each worker fills the slot of its input position
        let results: Vec<Result<ImageFingerprint>> = paths
            .par_iter()
            .map(|path| {
                let result = engine.hash_file(codec, path);
                progress.advance();
                result
            })
            .collect();
        progress.finish(Stage::Hash);

        let mut prints = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (path, result) in paths.iter().zip(results) {
            match result {
                Ok(print) => prints.push(print),
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    failures.push(FileFailure::new(path, Stage::Hash, &e));
                }
            }
        }
        (prints, failures)
    }
}

fn enter(report: &mut RunReport, stage: Stage) {
    log::debug!("Entering stage {}", stage);
    report.stage = stage;
}
