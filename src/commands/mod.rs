// HTTP handlers - one file per domain
pub mod error;
pub mod health;
pub mod jobs;

pub use error::ApiError;
