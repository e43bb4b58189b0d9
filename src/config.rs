//! Run settings: built-in defaults, optionally overlaid by a JSON file, then
//! by command-line flags. Settings are handed to the pipeline by value.

use crate::core::duplicate::ClusterConfig;
use crate::core::error::{DedupError, Result};
use crate::core::hash::HashConfig;
use crate::core::planner::Mode;
use crate::core::scanner::ScanConfig;
use crate::core::similarity::SsimConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hash: HashConfig,
    pub ssim: SsimConfig,
    pub cluster: ClusterConfig,
    pub scan: ScanConfig,
    /// Worker threads for hashing and verification; `None` uses every core.
    pub jobs: Option<usize>,
    pub mode: Mode,
}

impl Settings {
    /// `<config dir>/imgtools/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("imgtools").join("config.json"))
    }

    /// Load from `path` if given (it must exist), otherwise from the default
    /// location when a file is present there, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DedupError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        log::debug!("Loaded settings from {}", path.display());
        Self::from_json(&text)
            .map_err(|e| DedupError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DedupError::config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.hash.validate()?;
        self.ssim.validate()?;
        self.cluster.validate(self.hash.bit_width())?;
        self.scan.validate()?;
        if self.jobs == Some(0) {
            return Err(DedupError::config("jobs must be at least 1"));
        }
        Ok(())
    }
}
