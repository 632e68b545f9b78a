//! Device layer: exclusive owner of the GPU backend

use super::backend::{BackendError, GpuBackend, PixelFormat};
use super::error::{RenderError, RenderResult};

/// Owns the logical GPU device for the lifetime of the renderer
pub struct Device<B: GpuBackend> {
    backend: B,
}

impl<B: GpuBackend> Device<B> {
    /// Take ownership of an initialized backend
    pub fn new(backend: B, validation: bool) -> Self {
        log::info!(
            "GPU device: {} (validation {})",
            backend.adapter_name(),
            if validation { "on" } else { "off" }
        );
        Self { backend }
    }

    /// Shared access to the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Exclusive access to the backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Fail with [`RenderError::DeviceRemoved`] if the device is gone
    pub fn check_health(&self) -> RenderResult<()> {
        match self.backend.device_removed_reason() {
            Some(reason) => Err(RenderError::DeviceRemoved { reason }),
            None => Ok(()),
        }
    }

    /// Turn a failed queue operation into a renderer error
    ///
    /// Device health is queried first so removal is always reported as
    /// [`RenderError::DeviceRemoved`], never as a plain submission failure.
    pub fn submission_error(&self, operation: &str, err: BackendError) -> RenderError {
        if let Some(reason) = self.backend.device_removed_reason() {
            log::error!("{} failed, device removed: {}", operation, reason);
            return RenderError::DeviceRemoved { reason };
        }
        if err == BackendError::DeviceLost {
            log::error!("{} failed, device lost", operation);
            return RenderError::DeviceRemoved { reason: "device lost".to_string() };
        }
        RenderError::Submission(format!("{}: {}", operation, err))
    }

    /// Quality levels for a sample count; fails if multisampling is unusable
    pub fn multisample_quality(&self, format: PixelFormat, sample_count: u32) -> RenderResult<u32> {
        if sample_count <= 1 {
            return Ok(0);
        }
        let levels = self.backend.multisample_quality_levels(format, sample_count)?;
        if levels == 0 {
            return Err(RenderError::Initialization(format!(
                "{}x MSAA is not supported for {:?}",
                sample_count, format
            )));
        }
        log::debug!("{}x MSAA: {} quality levels", sample_count, levels);
        Ok(levels)
    }
}
