// NVIDIA GPU discovery using NVML
use log::{debug, info};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;

/// Names of the visible NVIDIA GPUs.
/// Returns Err if NVIDIA drivers are not installed or NVML fails to initialize
pub fn list_nvidia_gpus() -> Result<Vec<String>, NvmlError> {
    let nvml = Nvml::init()?;
    let count = nvml.device_count()?;

    let mut names = Vec::with_capacity(count as usize);
    for index in 0..count {
        let device = nvml.device_by_index(index)?;
        names.push(device.name()?);
    }
    Ok(names)
}

/// How many pipelines may train at once: one per GPU, or one when none is visible
pub fn detect_compute_slots() -> usize {
    match list_nvidia_gpus() {
        Ok(gpus) if !gpus.is_empty() => {
            info!("Detected {} NVIDIA GPU(s): {}", gpus.len(), gpus.join(", "));
            gpus.len()
        }
        Ok(_) => {
            info!("NVML reports no GPUs, running one pipeline at a time");
            1
        }
        Err(e) => {
            debug!("NVML unavailable ({}), running one pipeline at a time", e);
            1
        }
    }
}
