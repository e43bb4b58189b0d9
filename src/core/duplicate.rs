//! Duplicate detection: group fingerprints by Hamming distance, then
//! optionally confirm each group with a pixel-level similarity check.

use super::error::{DedupError, Result};
use super::hash::ImageFingerprint;
use super::image::{Codec, LoadedImage, load};
use super::report::{FileFailure, Stage};
use super::similarity::SimilarityComparator;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Largest Hamming distance still treated as a duplicate.
    pub threshold: u32,
    /// Confirm hash-based groups with SSIM.
    pub verify: bool,
    /// SSIM score a member needs against the group's first member to stay.
    pub confirm_threshold: f64,
    /// Below this many images every pair is compared directly.
    pub full_scan_cutoff: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            verify: true,
            confirm_threshold: 0.9,
            full_scan_cutoff: 64,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self, bit_width: usize) -> Result<()> {
        if self.threshold as usize > bit_width {
            return Err(DedupError::config(format!(
                "threshold {} exceeds the {}-bit hash width",
                self.threshold, bit_width
            )));
        }
        if !(-1.0..=1.0).contains(&self.confirm_threshold) {
            return Err(DedupError::config(format!(
                "SSIM confirmation threshold must lie in [-1, 1], got {}",
                self.confirm_threshold
            )));
        }
        Ok(())
    }
}

/// A set of images considered copies of each other. Members are kept sorted
/// by path; a single member means the image is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCluster {
    pub members: Vec<PathBuf>,
    pub canonical: Option<PathBuf>,
}

impl DuplicateCluster {
    pub fn new(mut members: Vec<PathBuf>) -> Self {
        members.sort();
        Self {
            members,
            canonical: None,
        }
    }

    pub fn singleton(path: PathBuf) -> Self {
        Self::new(vec![path])
    }

    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }
}

/// Disjoint-set forest over `0..n`, stored as flat parent/rank arrays.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets holding `a` and `b`; false if they were already one.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// Pairwise check used to confirm hash-based groups.
///
/// `Reference` is prepared once per group so the first member is decoded a
/// single time no matter how many members it is compared against.
pub trait Verifier: Sync {
    type Reference: Sync;

    fn reference(&self, image: &ImageFingerprint) -> Result<Self::Reference>;

    fn score(&self, reference: &Self::Reference, member: &ImageFingerprint) -> Result<f64>;
}

/// Verifier that re-decodes files and scores them with SSIM.
pub struct SsimVerifier<'a> {
    codec: &'a dyn Codec,
    comparator: SimilarityComparator,
}

impl<'a> SsimVerifier<'a> {
    pub fn new(codec: &'a dyn Codec, comparator: SimilarityComparator) -> Self {
        Self { codec, comparator }
    }
}

impl Verifier for SsimVerifier<'_> {
    type Reference = LoadedImage;

    fn reference(&self, image: &ImageFingerprint) -> Result<LoadedImage> {
        load(self.codec, &image.path)
    }

    fn score(&self, reference: &LoadedImage, member: &ImageFingerprint) -> Result<f64> {
        let other = load(self.codec, &member.path)?;
        self.comparator.compare(&reference.image, &other.image)
    }
}

pub struct DuplicateClusterer {
    config: ClusterConfig,
}

impl DuplicateClusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Partition `prints` into clusters of images within the distance
    /// threshold of each other (transitively).
    ///
    /// Output is deterministic: members sorted by path, clusters sorted by
    /// their first member.
    pub fn cluster(&self, prints: &[ImageFingerprint]) -> Vec<DuplicateCluster> {
        let mut sets = self.link(prints);

        let mut groups: HashMap<usize, Vec<PathBuf>> = HashMap::new();
        for (index, print) in prints.iter().enumerate() {
            groups
                .entry(sets.find(index))
                .or_default()
                .push(print.path.clone());
        }

        sort_clusters(groups.into_values().map(DuplicateCluster::new).collect())
    }

    fn link(&self, prints: &[ImageFingerprint]) -> DisjointSet {
        let n = prints.len();
        let mut sets = DisjointSet::new(n);
        let threshold = self.config.threshold;
        let segments = threshold as usize + 1;

        let width = prints.first().map_or(0, |p| p.fingerprint.bit_width());
        let uniform = prints.iter().all(|p| p.fingerprint.bit_width() == width);

        if n < self.config.full_scan_cutoff || !uniform || segments > width {
            log::debug!("Comparing all {} fingerprint pairs", n * n.saturating_sub(1) / 2);
            let pairs: Vec<(usize, usize)> = (0..n)
                .into_par_iter()
                .flat_map_iter(|i| {
                    (i + 1..n).filter_map(move |j| {
                        (prints[i].fingerprint.distance(&prints[j].fingerprint) <= threshold)
                            .then_some((i, j))
                    })
                })
                .collect();
            for (i, j) in pairs {
                sets.union(i, j);
            }
            return sets;
        }

        // Pigeonhole: two fingerprints within `threshold` bits of each other
        // agree exactly on at least one of `threshold + 1` disjoint segments.
        let mut buckets: HashMap<(usize, Vec<u8>), Vec<usize>> = HashMap::new();
        for (index, print) in prints.iter().enumerate() {
            for (segment, range) in segment_ranges(width, segments).enumerate() {
                let key = print.fingerprint.segment(range);
                buckets.entry((segment, key)).or_default().push(index);
            }
        }
        log::debug!(
            "Bucketed {} fingerprints into {} segment buckets",
            n,
            buckets.len()
        );

        for members in buckets.values() {
            for (a, &i) in members.iter().enumerate() {
                for &j in &members[a + 1..] {
                    if sets.find(i) != sets.find(j)
                        && prints[i].fingerprint.distance(&prints[j].fingerprint) <= threshold
                    {
                        sets.union(i, j);
                    }
                }
            }
        }
        sets
    }

    /// Confirm every multi-member cluster against its first member.
    ///
    /// Members scoring below `confirm_threshold` (or that cannot be compared)
    /// are split out as singletons; the rest of the cluster survives.
    /// Byte-identical members are confirmed without decoding.
    pub fn verify<V: Verifier>(
        &self,
        clusters: Vec<DuplicateCluster>,
        prints: &[ImageFingerprint],
        verifier: &V,
    ) -> (Vec<DuplicateCluster>, Vec<FileFailure>) {
        let by_path: HashMap<&PathBuf, &ImageFingerprint> =
            prints.iter().map(|p| (&p.path, p)).collect();

        let mut verified = Vec::with_capacity(clusters.len());
        let mut failures = Vec::new();

        for cluster in clusters {
            if !cluster.is_duplicate() {
                verified.push(cluster);
                continue;
            }

            let members: Vec<&ImageFingerprint> = cluster
                .members
                .iter()
                .filter_map(|path| by_path.get(path).copied())
                .collect();
            let (kept, split, mut errors) = self.verify_members(&members, verifier);

            verified.push(DuplicateCluster::new(kept));
            verified.extend(split.into_iter().map(DuplicateCluster::singleton));
            failures.append(&mut errors);
        }

        (sort_clusters(verified), failures)
    }

    fn verify_members<V: Verifier>(
        &self,
        members: &[&ImageFingerprint],
        verifier: &V,
    ) -> (Vec<PathBuf>, Vec<PathBuf>, Vec<FileFailure>) {
        let Some((first, rest)) = members.split_first() else {
            return (Vec::new(), Vec::new(), Vec::new());
        };
        let mut kept = vec![first.path.clone()];
        let mut split = Vec::new();
        let mut failures = Vec::new();

        let needs_pixels = rest.iter().any(|m| m.digest != first.digest);
        let reference = if needs_pixels {
            match verifier.reference(first) {
                Ok(reference) => Some(reference),
                Err(e) => {
                    // without a reference nothing in the group is confirmed
                    log::warn!("Cannot verify group led by {}: {}", first.path.display(), e);
                    failures.push(FileFailure::new(&first.path, Stage::Verify, &e));
                    split.extend(rest.iter().map(|m| m.path.clone()));
                    return (kept, split, failures);
                }
            }
        } else {
            None
        };

        let threshold = self.config.confirm_threshold;
        let verdicts: Vec<(PathBuf, Result<bool>)> = rest
            .par_iter()
            .map(|member| {
                let verdict = if member.digest == first.digest {
                    Ok(true)
                } else {
                    match &reference {
                        Some(reference) => verifier
                            .score(reference, member)
                            .map(|score| {
                                log::debug!(
                                    "SSIM {} vs {}: {:.4}",
                                    first.path.display(),
                                    member.path.display(),
                                    score
                                );
                                score >= threshold
                            }),
                        None => Ok(false),
                    }
                };
                (member.path.clone(), verdict)
            })
            .collect();

        for (path, verdict) in verdicts {
            match verdict {
                Ok(true) => kept.push(path),
                Ok(false) => split.push(path),
                Err(e) => {
                    log::warn!("Cannot verify {}: {}", path.display(), e);
                    failures.push(FileFailure::new(&path, Stage::Verify, &e));
                    split.push(path);
                }
            }
        }

        (kept, split, failures)
    }
}

fn segment_ranges(width: usize, segments: usize) -> impl Iterator<Item = Range<usize>> {
    (0..segments).map(move |s| s * width / segments..(s + 1) * width / segments)
}

fn sort_clusters(mut clusters: Vec<DuplicateCluster>) -> Vec<DuplicateCluster> {
    clusters.sort_by(|a, b| a.members.first().cmp(&b.members.first()));
    clusters
}
