// Job persistence and upload ingestion
pub mod ingest;
pub mod store;

pub use ingest::{ingest_archive, ImageSet};
pub use store::{JobClaim, JobStore};
