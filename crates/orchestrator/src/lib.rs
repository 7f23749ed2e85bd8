//! Orchestrator - classification, stage worker pools and the assessment pipeline

mod classifier;
mod pipeline;
mod pool;
mod progress;
mod rate_limiter;

pub use classifier::{apply_port_cap, classify, route, Classification, Route};
pub use pipeline::{Pipeline, PipelineConfig};
pub use progress::{ProgressTracker, StageCounts};
pub use rate_limiter::RateLimiter;
