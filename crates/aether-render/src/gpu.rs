//! GPU device acquisition.
//!
//! Provides [`DeviceHandle`], the validated device/queue pair every effect is
//! initialised against, and [`RenderContextError`] for clear diagnostics when
//! no device can be obtained.

use std::sync::Arc;

/// Error type for device acquisition failures.
#[derive(Debug, thiserror::Error)]
pub enum RenderContextError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

/// Shared handle to a wgpu device and its queue.
///
/// Cloning is cheap: both halves are reference counted, so effects and the
/// renderer that owns them can hold the same device.
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl DeviceHandle {
    /// Wrap an already created device and queue.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        }
    }

    /// Wrap a device and queue that are already shared.
    pub fn from_shared(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Request a device without a surface, for offscreen rendering and tools.
    pub async fn request_headless() -> Result<Self, RenderContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderContextError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("aether-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self::new(device, queue))
    }

    /// Blocking variant of [`DeviceHandle::request_headless`] using `pollster`.
    pub fn request_headless_blocking() -> Result<Self, RenderContextError> {
        pollster::block_on(Self::request_headless())
    }

    /// The wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Whether two handles refer to the same device.
    pub fn same_device(&self, other: &DeviceHandle) -> bool {
        Arc::ptr_eq(&self.device, &other.device)
    }
}

/// Device for GPU-backed tests. Returns `None` on machines without an adapter.
#[cfg(test)]
pub(crate) fn create_test_device() -> Option<DeviceHandle> {
    DeviceHandle::request_headless_blocking().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_device() {
        let Some(handle) = create_test_device() else {
            return;
        };
        let clone = handle.clone();
        assert!(handle.same_device(&clone));
    }

    #[test]
    fn test_separate_requests_are_distinct_devices() {
        let (Some(a), Some(b)) = (create_test_device(), create_test_device()) else {
            return;
        };
        assert!(!a.same_device(&b));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RenderContextError::NoAdapter.to_string(),
            "no compatible GPU adapter found"
        );
    }
}
