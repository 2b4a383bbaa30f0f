// Compute resource discovery
pub mod gpu;

pub use gpu::{detect_compute_slots, list_nvidia_gpus};
