pub mod duplicate;
pub mod error;
pub mod hash;
pub mod image;
pub mod pipeline;
pub mod planner;
pub mod report;
pub mod scanner;
pub mod similarity;

pub use self::duplicate::{ClusterConfig, DuplicateCluster, DuplicateClusterer};
pub use self::error::{DedupError, Result};
pub use self::hash::{Fingerprint, HashConfig, HashEngine, ImageFingerprint};
pub use self::image::{Codec, ImageCodec};
pub use self::pipeline::{Pipeline, Progress, Silent};
pub use self::planner::{DeletionPlan, DeletionPlanner, Mode, RemovalOutcome};
pub use self::report::{FileFailure, RunReport, Stage};
pub use self::scanner::{ScanConfig, Scanner};
pub use self::similarity::{SimilarityComparator, SsimConfig};
