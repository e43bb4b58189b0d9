//! Find and remove duplicate images.
//!
//! Images are fingerprinted with a difference hash, grouped by Hamming
//! distance, optionally confirmed with SSIM, and reduced to one canonical
//! copy per group.

pub mod config;
pub mod core;

pub use crate::config::Settings;
pub use crate::core::{DedupError, Pipeline, Result, RunReport};
