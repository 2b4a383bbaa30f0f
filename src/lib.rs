pub mod commands;
pub mod error;
pub mod file_manager;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod performance;
pub mod pipeline;
pub mod process_manager;
pub mod server;
pub mod utils;

use log::info;

pub use error::{JobError, Result};
pub use jobs::JobStore;
pub use models::{Job, JobStatus, Settings, Stage};
pub use server::{build_router, start_server, AppState};

/// Load settings, recover the job store and serve the API until shutdown
pub async fn run() -> Result<()> {
    logging::init_logging();

    let settings = Settings::load()?;
    info!(
        "Starting splatbox {} (data dir: {})",
        env!("CARGO_PKG_VERSION"),
        settings.data_dir.display()
    );

    let state = AppState::start(settings)?;
    start_server(state).await
}
