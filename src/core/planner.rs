//! Picks the copy to keep in each duplicate cluster and removes the rest.

use super::duplicate::DuplicateCluster;
use super::hash::ImageFingerprint;
use super::report::{FileFailure, Stage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Report what would be removed.
    #[default]
    DryRun,
    /// Remove files.
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionPlan {
    pub canonical: PathBuf,
    pub removals: Vec<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RemovalOutcome {
    Planned,
    Removed,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub path: PathBuf,
    pub outcome: RemovalOutcome,
}

/// A plan together with what happened to each scheduled removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedPlan {
    pub canonical: PathBuf,
    pub removals: Vec<Removal>,
    pub dry_run: bool,
}

impl ExecutedPlan {
    pub fn failures(&self) -> Vec<FileFailure> {
        self.removals
            .iter()
            .filter_map(|r| match &r.outcome {
                RemovalOutcome::Failed(reason) | RemovalOutcome::Skipped(reason) => {
                    Some(FileFailure::new(&r.path, Stage::Apply, reason))
                }
                _ => None,
            })
            .collect()
    }
}

/// Orders candidates so the best copy to keep sorts first: larger file,
/// then more pixels, then the lexicographically smallest path.
pub fn keep_order(a: &ImageFingerprint, b: &ImageFingerprint) -> Ordering {
    b.file_size
        .cmp(&a.file_size)
        .then_with(|| b.pixel_count().cmp(&a.pixel_count()))
        .then_with(|| a.path.cmp(&b.path))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeletionPlanner {
    mode: Mode,
}

impl DeletionPlanner {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    /// Choose the canonical member of `cluster`, record it on the cluster,
    /// and schedule every other member for removal in path order.
    pub fn plan(
        &self,
        cluster: &mut DuplicateCluster,
        prints: &HashMap<&Path, &ImageFingerprint>,
    ) -> Option<DeletionPlan> {
        let canonical = cluster
            .members
            .iter()
            .filter_map(|path| prints.get(path.as_path()).copied())
            .min_by(|a, b| keep_order(a, b))
            .map(|print| print.path.clone())
            .or_else(|| cluster.members.first().cloned())?;

        let removals = cluster
            .members
            .iter()
            .filter(|path| **path != canonical)
            .cloned()
            .collect();
        cluster.canonical = Some(canonical.clone());

        Some(DeletionPlan {
            canonical,
            removals,
            dry_run: self.mode == Mode::DryRun,
        })
    }

    /// Carry out `plan`. Each removal stands alone: a failure is recorded
    /// against that file and the next one is attempted.
    pub fn execute(&self, plan: &DeletionPlan) -> ExecutedPlan {
        let removals = plan
            .removals
            .iter()
            .map(|path| Removal {
                path: path.clone(),
                outcome: if plan.dry_run {
                    RemovalOutcome::Planned
                } else {
                    remove_duplicate(&plan.canonical, path)
                },
            })
            .collect();

        ExecutedPlan {
            canonical: plan.canonical.clone(),
            removals,
            dry_run: plan.dry_run,
        }
    }
}

fn remove_duplicate(canonical: &Path, duplicate: &Path) -> RemovalOutcome {
    let kept = match fs::canonicalize(canonical) {
        Ok(kept) => kept,
        Err(e) => {
            return RemovalOutcome::Skipped(format!(
                "canonical copy {} is unavailable: {}",
                canonical.display(),
                e
            ));
        }
    };
    let target = match fs::canonicalize(duplicate) {
        Ok(target) => target,
        Err(e) => return RemovalOutcome::Failed(e.to_string()),
    };
    if kept == target {
        return RemovalOutcome::Skipped(format!(
            "resolves to the canonical copy {}",
            canonical.display()
        ));
    }

    match fs::remove_file(duplicate) {
        Ok(()) => {
            log::info!("Removed {} (kept {})", duplicate.display(), canonical.display());
            RemovalOutcome::Removed
        }
        Err(e) => {
            log::warn!("Failed to remove {}: {}", duplicate.display(), e);
            RemovalOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::Fingerprint;
    use tempfile::TempDir;

    fn print(path: PathBuf, file_size: u64, dimensions: (u32, u32)) -> ImageFingerprint {
        ImageFingerprint {
            path,
            fingerprint: Fingerprint::from_bools([true; 64]),
            dimensions,
            file_size,
            digest: blake3::hash(b""),
        }
    }

    fn plan_for(
        prints: &[ImageFingerprint],
        mode: Mode,
    ) -> (DuplicateCluster, DeletionPlan) {
        let by_path: HashMap<&Path, &ImageFingerprint> =
            prints.iter().map(|p| (p.path.as_path(), p)).collect();
        let mut cluster = DuplicateCluster::new(prints.iter().map(|p| p.path.clone()).collect());
        let plan = DeletionPlanner::new(mode).plan(&mut cluster, &by_path).unwrap();
        (cluster, plan)
    }

    fn write_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, name.as_bytes()).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_larger_file_is_kept() {
        let prints = vec![
            print("a.jpg".into(), 100, (10, 10)),
            print("b.jpg".into(), 300, (10, 10)),
            print("c.jpg".into(), 200, (50, 50)),
        ];
        let (cluster, plan) = plan_for(&prints, Mode::DryRun);
        assert_eq!(plan.canonical, PathBuf::from("b.jpg"));
        assert_eq!(cluster.canonical, Some(PathBuf::from("b.jpg")));
        assert_eq!(
            plan.removals,
            vec![PathBuf::from("a.jpg"), PathBuf::from("c.jpg")]
        );
        assert!(plan.dry_run);
    }

    #[test]
    fn test_ties_break_on_pixels_then_path() {
        let prints = vec![
            print("a.jpg".into(), 100, (10, 10)),
            print("b.jpg".into(), 100, (20, 10)),
        ];
        assert_eq!(plan_for(&prints, Mode::DryRun).1.canonical, PathBuf::from("b.jpg"));

        let prints = vec![
            print("z.jpg".into(), 100, (10, 10)),
            print("m.jpg".into(), 100, (10, 10)),
        ];
        assert_eq!(plan_for(&prints, Mode::DryRun).1.canonical, PathBuf::from("m.jpg"));
    }

    #[test]
    fn test_removal_count_is_one_less_than_members() {
        for n in 1..6 {
            let prints: Vec<_> = (0..n)
                .map(|i| print(format!("{}.png", i).into(), 10, (1, 1)))
                .collect();
            let (cluster, plan) = plan_for(&prints, Mode::Apply);
            assert_eq!(plan.removals.len(), cluster.members.len() - 1);
            assert!(!plan.removals.contains(&plan.canonical));
        }
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_files(temp_dir.path(), &["a", "b"]);
        let plan = DeletionPlan {
            canonical: paths[0].clone(),
            removals: vec![paths[1].clone()],
            dry_run: true,
        };

        let executed = DeletionPlanner::new(Mode::DryRun).execute(&plan);
        assert_eq!(executed.removals[0].outcome, RemovalOutcome::Planned);
        assert!(paths[1].exists());
        assert!(executed.failures().is_empty());
    }

    #[test]
    fn test_apply_continues_past_failures() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_files(temp_dir.path(), &["keep", "gone", "dup"]);
        fs::remove_file(&paths[1]).unwrap();
        let plan = DeletionPlan {
            canonical: paths[0].clone(),
            removals: vec![paths[1].clone(), paths[2].clone()],
            dry_run: false,
        };

        let executed = DeletionPlanner::new(Mode::Apply).execute(&plan);
        assert!(matches!(executed.removals[0].outcome, RemovalOutcome::Failed(_)));
        assert_eq!(executed.removals[1].outcome, RemovalOutcome::Removed);
        assert!(paths[0].exists());
        assert!(!paths[2].exists());

        let failures = executed.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, paths[1]);
        assert_eq!(failures[0].stage, Stage::Apply);
    }

    #[test]
    fn test_missing_canonical_blocks_removal() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_files(temp_dir.path(), &["keep", "dup"]);
        fs::remove_file(&paths[0]).unwrap();
        let plan = DeletionPlan {
            canonical: paths[0].clone(),
            removals: vec![paths[1].clone()],
            dry_run: false,
        };

        let executed = DeletionPlanner::new(Mode::Apply).execute(&plan);
        assert!(matches!(executed.removals[0].outcome, RemovalOutcome::Skipped(_)));
        assert!(paths[1].exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_link_to_canonical_is_not_removed() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_files(temp_dir.path(), &["keep"]);
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&paths[0], &link).unwrap();
        let plan = DeletionPlan {
            canonical: paths[0].clone(),
            removals: vec![link.clone()],
            dry_run: false,
        };

        let executed = DeletionPlanner::new(Mode::Apply).execute(&plan);
        assert!(matches!(executed.removals[0].outcome, RemovalOutcome::Skipped(_)));
        assert!(link.exists());
        assert!(paths[0].exists());
    }
}
