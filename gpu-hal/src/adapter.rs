use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;

use crate::error::{AdapterNotFoundError, InitError};
use crate::instance::{Instance, InstanceShared};

/// Extensions a physical device must expose for this system to use it.
///
/// `descriptor_indexing`/`timeline_semaphore` are promoted to Vulkan 1.2 core
/// but we still probe the feature bits explicitly, the same way
/// `wgpu-hal`'s adapter capability probe walks `vk::PhysicalDeviceFeatures2`
/// chains rather than trusting the API version alone.
const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[
    ash::khr::swapchain::NAME,
    ash::khr::timeline_semaphore::NAME,
    ash::khr::buffer_device_address::NAME,
    ash::khr::synchronization2::NAME,
];

const RAY_TRACING_DEVICE_EXTENSIONS: &[&CStr] = &[
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_query::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

/// Capability/limit values pulled once at adapter-selection time and reused
/// for the lifetime of the `Device`, e.g. the acceleration-structure scratch
/// alignment `gpu-core` needs when sizing AS-build scratch buffers.
#[derive(Clone, Copy, Debug)]
pub struct AdapterCapabilities {
    pub max_bindless_storage_buffers: u32,
    pub max_bindless_sampled_images: u32,
    pub max_bindless_storage_images: u32,
    pub max_bindless_samplers: u32,
    pub max_bindless_acceleration_structures: u32,
    pub as_scratch_offset_alignment: u64,
    pub timestamp_period: f32,
    pub has_ray_tracing: bool,
}

pub struct Adapter {
    pub(crate) instance: Arc<InstanceShared>,
    pub(crate) raw: vk::PhysicalDevice,
    pub(crate) queue_families: Vec<vk::QueueFamilyProperties>,
    pub(crate) capabilities: AdapterCapabilities,
}

impl Adapter {
    /// Enumerate physical devices and pick the first one exposing every
    /// extension `required_extensions` names, preferring a discrete GPU.
    ///
    /// Mirrors `wgpu-hal`'s adapter-enumeration loop: query
    /// extension/feature support per candidate, reject outright on a missing
    /// extension (no partial-capability fallback — `AdapterNotFound` should
    /// be unambiguous about what's missing).
    pub fn enumerate(instance: &Instance, want_ray_tracing: bool) -> Result<Vec<Self>, InitError> {
        let raw_instance = instance.raw();
        let physical_devices = unsafe { raw_instance.enumerate_physical_devices() }
            .map_err(|err| InitError::Device(err.into()))?;

        let mut adapters = Vec::new();
        let mut missing_report = String::new();
        for phys in physical_devices {
            match Self::probe(instance, phys, want_ray_tracing) {
                Ok(adapter) => adapters.push(adapter),
                Err(missing) => {
                    if !missing_report.is_empty() {
                        missing_report.push_str("; ");
                    }
                    missing_report.push_str(&missing);
                }
            }
        }

        if adapters.is_empty() {
            return Err(InitError::AdapterNotFound(AdapterNotFoundError {
                missing: missing_report,
            }));
        }

        adapters.sort_by_key(|a| std::cmp::Reverse(a.capabilities.has_ray_tracing));
        Ok(adapters)
    }

    fn probe(
        instance: &Instance,
        raw: vk::PhysicalDevice,
        want_ray_tracing: bool,
    ) -> Result<Self, String> {
        let raw_instance = instance.raw();
        let supported_extensions =
            unsafe { raw_instance.enumerate_device_extension_properties(raw) }
                .map_err(|err| format!("{err:?}"))?;
        let supported_names: Vec<&CStr> = supported_extensions
            .iter()
            .map(|ext| ext.extension_name_as_c_str().unwrap_or_default())
            .collect();

        let mut missing = Vec::new();
        for required in REQUIRED_DEVICE_EXTENSIONS {
            if !supported_names.iter().any(|name| name == required) {
                missing.push(required.to_string_lossy().into_owned());
            }
        }
        let has_ray_tracing = RAY_TRACING_DEVICE_EXTENSIONS
            .iter()
            .all(|ext| supported_names.iter().any(|name| name == ext));
        if want_ray_tracing && !has_ray_tracing {
            missing.push("ray_tracing extension set".to_string());
        }
        if !missing.is_empty() {
            return Err(missing.join(", "));
        }

        let mut descriptor_indexing =
            vk::PhysicalDeviceDescriptorIndexingFeatures::default();
        let mut timeline = vk::PhysicalDeviceTimelineSemaphoreFeatures::default();
        let mut buffer_device_address =
            vk::PhysicalDeviceBufferDeviceAddressFeatures::default();
        let mut sync2 = vk::PhysicalDeviceSynchronization2Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut descriptor_indexing)
            .push_next(&mut timeline)
            .push_next(&mut buffer_device_address)
            .push_next(&mut sync2);
        unsafe { raw_instance.get_physical_device_features2(raw, &mut features2) };

        if descriptor_indexing.descriptor_binding_partially_bound == 0
            || descriptor_indexing.shader_sampled_image_array_non_uniform_indexing == 0
            || descriptor_indexing.descriptor_binding_update_unused_while_pending == 0
        {
            return Err("descriptor indexing feature bits not fully supported".to_string());
        }
        if timeline.timeline_semaphore == 0 {
            return Err("timelineSemaphore feature not supported".to_string());
        }
        if buffer_device_address.buffer_device_address == 0 {
            return Err("bufferDeviceAddress feature not supported".to_string());
        }
        if sync2.synchronization2 == 0 {
            return Err("synchronization2 feature not supported".to_string());
        }

        let props = unsafe { raw_instance.get_physical_device_properties(raw) };
        let mut as_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
        let as_scratch_offset_alignment = if has_ray_tracing {
            let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut as_props);
            unsafe { raw_instance.get_physical_device_properties2(raw, &mut props2) };
            as_props.min_acceleration_structure_scratch_offset_alignment as u64
        } else {
            0
        };

        let queue_families =
            unsafe { raw_instance.get_physical_device_queue_family_properties(raw) };

        let capabilities = AdapterCapabilities {
            max_bindless_storage_buffers: 512 * 1024,
            max_bindless_sampled_images: 512 * 1024,
            max_bindless_storage_images: 512 * 1024,
            max_bindless_samplers: 4 * 1024,
            max_bindless_acceleration_structures: 4 * 1024,
            as_scratch_offset_alignment,
            timestamp_period: props.limits.timestamp_period,
            has_ray_tracing,
        };

        Ok(Self {
            instance: instance.shared.clone(),
            raw,
            queue_families,
            capabilities,
        })
    }

    pub fn capabilities(&self) -> AdapterCapabilities {
        self.capabilities
    }

    /// Index of the first queue family exposing graphics+compute+transfer,
    /// the single queue family this system submits bindless-graph work to.
    pub fn graphics_queue_family(&self) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| {
                family.queue_flags.contains(
                    vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                )
            })
            .map(|index| index as u32)
    }

    /// Index of a dedicated transfer-only queue family, if the adapter has
    /// one; async uploads fall back to the graphics family otherwise.
    pub fn dedicated_transfer_queue_family(&self) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| {
                family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|index| index as u32)
    }

    /// Index of a dedicated compute-only (async-compute) queue family, if
    /// the adapter has one; compute passes fall back to the combined
    /// graphics family otherwise. Mirrors `dedicated_transfer_queue_family`:
    /// a family that exposes `COMPUTE` but not `GRAPHICS` is the
    /// vendor-reserved async-compute family on every desktop Vulkan
    /// implementation this system targets.
    pub fn dedicated_compute_queue_family(&self) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| {
                family.queue_flags.contains(vk::QueueFlags::COMPUTE)
                    && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|index| index as u32)
    }
}
