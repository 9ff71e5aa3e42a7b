use ash::vk;

/// Errors that can occur on any device-level call.
///
/// Mirrors `wgpu-hal`'s `DeviceError`: out-of-memory and device-lost are the
/// only two outcomes a Vulkan call can report that the caller is expected to
/// recover from (or deliberately panic on, via the `oom_panic` /
/// `device_lost_panic` features); everything else indicates a programmer
/// error and is asserted on in debug builds at the call site.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device lost")]
    Lost,
    #[error("unknown vulkan error: {0:?}")]
    Unexpected(vk::Result),
}

impl From<vk::Result> for DeviceError {
    fn from(result: vk::Result) -> Self {
        #![allow(unreachable_code)]
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                #[cfg(feature = "oom_panic")]
                panic!("Out of memory ({result:?})");
                Self::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => {
                #[cfg(feature = "device_lost_panic")]
                panic!("Device lost");
                Self::Lost
            }
            other => {
                log::warn!("Unrecognized device error {other:?}");
                Self::Unexpected(other)
            }
        }
    }
}

impl From<gpu_alloc::AllocationError> for DeviceError {
    fn from(err: gpu_alloc::AllocationError) -> Self {
        log::error!("gpu-alloc allocation failed: {err}");
        Self::OutOfMemory
    }
}

impl From<gpu_alloc::MapError> for DeviceError {
    fn from(err: gpu_alloc::MapError) -> Self {
        log::error!("gpu-alloc map failed: {err}");
        Self::OutOfMemory
    }
}

/// Errors from surface acquire/present, recoverable by the caller via
/// `recreate_swapchain` .
#[derive(Clone, Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("surface lost")]
    Lost,
    #[error("surface is out of date and must be reconfigured")]
    Outdated,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// An adapter meeting the required extension/feature set could not be found.
#[derive(Clone, Debug, thiserror::Error)]
#[error("no physical device exposes the required extensions/features: {missing}")]
pub struct AdapterNotFoundError {
    pub missing: String,
}

/// Errors from system initialization .
#[derive(Clone, Debug, thiserror::Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error(transparent)]
    AdapterNotFound(#[from] AdapterNotFoundError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}
