use crate::bindless::BindlessCapacities;
use crate::error::{Error, Result};

/// The single, fully-enumerated configuration struct this system accepts at
/// construction (this crate's ambient-configuration decision: no
/// builder, no hidden defaults — every field is named and validated once,
/// up front).
#[derive(Clone, Debug)]
pub struct GpuSystemConfig {
    pub app_name: String,
    pub validation: bool,
    pub ray_tracing: bool,
    pub frames_in_flight: u32,
    pub bindless: BindlessCapacities,
    pub preferred_swapchain_image_count: u32,
}

impl Default for GpuSystemConfig {
    fn default() -> Self {
        Self {
            app_name: "gpu-system".to_string(),
            validation: cfg!(debug_assertions),
            ray_tracing: false,
            frames_in_flight: 2,
            bindless: BindlessCapacities {
                storage_buffers: 512 * 1024,
                samplers: 4 * 1024,
                sampled_images: 512 * 1024,
                storage_images: 512 * 1024,
                acceleration_structures: 4 * 1024,
            },
            preferred_swapchain_image_count: 3,
        }
    }
}

impl GpuSystemConfig {
    /// Validate the configuration eagerly, the way `wgpu-hal`'s instance and
    /// device creation reject a malformed descriptor immediately rather than
    /// failing partway through setup.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::InvalidConfiguration(
                "frames_in_flight must be at least 1",
            ));
        }
        if self.preferred_swapchain_image_count < 2 {
            return Err(Error::InvalidConfiguration(
                "preferred_swapchain_image_count must be at least 2",
            ));
        }
        if self.bindless.storage_buffers == 0
            || self.bindless.sampled_images == 0
            || self.bindless.storage_images == 0
            || self.bindless.samplers == 0
        {
            return Err(Error::InvalidConfiguration(
                "bindless descriptor set capacities must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        GpuSystemConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let mut config = GpuSystemConfig::default();
        config.frames_in_flight = 0;
        assert!(config.validate().is_err());
    }
}
