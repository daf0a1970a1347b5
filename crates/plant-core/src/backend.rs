//! Backend selection for the burn framework.
//!
//! CUDA is used when the crate is built with the `cuda` feature, the
//! NdArray CPU backend otherwise.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn_ndarray::NdArray;

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}

/// Best-effort probe for an NVIDIA driver on this machine.
pub fn is_gpu_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || nvidia_smi_succeeds()
    }

    #[cfg(not(target_os = "linux"))]
    {
        nvidia_smi_succeeds()
    }
}

fn nvidia_smi_succeeds() -> bool {
    std::process::Command::new("nvidia-smi")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Startup line describing the accelerator situation.
pub fn describe_accelerator() -> String {
    match (is_gpu_available(), cfg!(feature = "cuda")) {
        (true, true) => "GPU detected: training will use CUDA acceleration".to_string(),
        (true, false) => {
            "GPU detected, but this build uses the CPU backend (rebuild with --features cuda)"
                .to_string()
        }
        (false, _) => "No GPU detected: training will use the CPU (slower)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name() {
        let name = backend_name();
        assert!(name == "CUDA (GPU)" || name == "NdArray (CPU)");
    }

    #[test]
    fn test_describe_accelerator_is_not_empty() {
        assert!(!describe_accelerator().is_empty());
    }
}
