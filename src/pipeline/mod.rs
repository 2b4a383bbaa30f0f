// Pipeline execution: stage sequencing, output discovery and the worker pool
pub mod executor;
pub mod locator;
pub mod queue;

pub use executor::PipelineExecutor;
pub use locator::{find_artifact_candidates, publish_artifact, select_run_dir};
pub use queue::{JobQueue, PipelineRequest};
