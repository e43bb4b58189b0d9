use super::error::{DedupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub recursive: bool,
    /// Extensions without the dot, matched case-insensitively.
    pub extensions: Vec<String>,
    pub include_hidden: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            extensions: ["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"]
                .into_iter()
                .map(String::from)
                .collect(),
            include_hidden: false,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(DedupError::config("no image extensions configured"));
        }
        Ok(())
    }
}

pub struct Scanner {
    config: ScanConfig,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Image files under `dir`, sorted by path.
    ///
    /// A missing or non-directory `dir` is a configuration error; entries that
    /// cannot be read are logged and skipped.
    pub fn scan(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(DedupError::config(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let max_depth = if self.config.recursive { usize::MAX } else { 1 };
        let mut images = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false).max_depth(max_depth) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.wanted(entry.path()) {
                continue;
            }
            images.push(entry.into_path());
        }

        images.sort();
        log::debug!("Found {} images in {}", images.len(), dir.display());
        Ok(images)
    }

    fn wanted(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden && !self.config.include_hidden {
            return false;
        }

        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}
