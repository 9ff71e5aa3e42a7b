use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::adapter::{Adapter, AdapterCapabilities};
use crate::conv::{map_buffer_usage, map_texture_usage};
use crate::error::DeviceError;
use crate::instance::InstanceShared;
use crate::types::{Buffer, BufferUsage, ImageDimension, MemoryPreference, SamplerDesc, Texture, TextureDesc};

/// Key for the render-pass cache, grounded verbatim in
/// `wgpu-hal/src/vulkan/mod.rs`'s `RenderPassKey`/`FramebufferKey`: cache a
/// `vk::RenderPass` by its attachment shape, generalized here to this
/// system's `AttachmentFlags`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColorAttachmentKey {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub layout: vk::ImageLayout,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilAttachmentKey {
    pub format: vk::Format,
    pub depth_load_op: vk::AttachmentLoadOp,
    pub depth_store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub layout: vk::ImageLayout,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct RenderPassKey {
    pub colors: arrayvec::ArrayVec<ColorAttachmentKey, 8>,
    pub depth_stencil: Option<DepthStencilAttachmentKey>,
    pub sample_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub render_pass: vk::RenderPass,
    pub attachments: arrayvec::ArrayVec<vk::ImageView, 9>,
    pub extent: (u32, u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineStateKey {
    pub program: u64,
    pub render_pass: vk::RenderPass,
    pub vertex_layout_hash: u64,
    pub topology: vk::PrimitiveTopology,
}

/// State shared between a `Device` handle and everything it hands out
/// (buffers, textures, command pools): one `Arc<DeviceShared>` per logical
/// device, following `wgpu-hal`'s `DeviceShared` split exactly.
pub struct DeviceShared {
    pub(crate) instance: Arc<InstanceShared>,
    pub(crate) raw: ash::Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) capabilities: AdapterCapabilities,
    pub(crate) acceleration_structure_fn: Option<ash::khr::acceleration_structure::Device>,
    pub(crate) ray_tracing_pipeline_fn: Option<ash::khr::ray_tracing_pipeline::Device>,
    pub(crate) render_passes: Mutex<FxHashMap<RenderPassKey, vk::RenderPass>>,
    pub(crate) framebuffers: Mutex<FxHashMap<FramebufferKey, vk::Framebuffer>>,
    pub(crate) pipelines: Mutex<FxHashMap<PipelineStateKey, vk::Pipeline>>,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            for (_, pass) in self.render_passes.lock().drain() {
                self.raw.destroy_render_pass(pass, None);
            }
            for (_, fb) in self.framebuffers.lock().drain() {
                self.raw.destroy_framebuffer(fb, None);
            }
            for (_, pipeline) in self.pipelines.lock().drain() {
                self.raw.destroy_pipeline(pipeline, None);
            }
            self.raw.destroy_device(None);
        }
    }
}

pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
    pub(crate) mem_allocator: Mutex<gpu_alloc::GpuAllocator<vk::DeviceMemory>>,
}

impl Device {
    pub fn new(
        adapter: &Adapter,
        queue_family_indices: &[u32],
        want_ray_tracing: bool,
    ) -> Result<Self, DeviceError> {
        let raw_instance = &adapter.instance.raw;

        let mut extension_names: Vec<&'static CStr> = vec![
            ash::khr::swapchain::NAME,
            ash::khr::timeline_semaphore::NAME,
            ash::khr::buffer_device_address::NAME,
            ash::khr::synchronization2::NAME,
        ];
        if want_ray_tracing && adapter.capabilities.has_ray_tracing {
            extension_names.extend_from_slice(&[
                ash::khr::acceleration_structure::NAME,
                ash::khr::ray_query::NAME,
                ash::khr::ray_tracing_pipeline::NAME,
                ash::khr::deferred_host_operations::NAME,
            ]);
        }
        let extension_ptrs: Vec<*const i8> =
            extension_names.iter().map(|e| e.as_ptr()).collect();

        let priorities = [1.0_f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_family_indices
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let mut descriptor_indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::default()
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .shader_storage_image_array_non_uniform_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_variable_descriptor_count(true)
            .runtime_descriptor_array(true);
        let mut timeline = vk::PhysicalDeviceTimelineSemaphoreFeatures::default()
            .timeline_semaphore(true);
        let mut buffer_device_address =
            vk::PhysicalDeviceBufferDeviceAddressFeatures::default().buffer_device_address(true);
        let mut sync2 =
            vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true);
        let mut accel_struct = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
            .acceleration_structure(true);
        let mut ray_query = vk::PhysicalDeviceRayQueryFeaturesKHR::default().ray_query(true);
        let mut ray_tracing_pipeline =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
                .ray_tracing_pipeline(true);

        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut descriptor_indexing)
            .push_next(&mut timeline)
            .push_next(&mut buffer_device_address)
            .push_next(&mut sync2);
        if want_ray_tracing && adapter.capabilities.has_ray_tracing {
            features2 = features2
                .push_next(&mut accel_struct)
                .push_next(&mut ray_query)
                .push_next(&mut ray_tracing_pipeline);
        }

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .push_next(&mut features2);

        let raw = unsafe { raw_instance.create_device(adapter.raw, &create_info, None) }?;

        let (acceleration_structure_fn, ray_tracing_pipeline_fn) =
            if want_ray_tracing && adapter.capabilities.has_ray_tracing {
                (
                    Some(ash::khr::acceleration_structure::Device::new(
                        raw_instance,
                        &raw,
                    )),
                    Some(ash::khr::ray_tracing_pipeline::Device::new(
                        raw_instance,
                        &raw,
                    )),
                )
            } else {
                (None, None)
            };

        let alloc_config = gpu_alloc::Config::i_am_prototyping();
        let props = unsafe {
            gpu_alloc_ash::device_properties(raw_instance, vk::API_VERSION_1_3, adapter.raw)
        }?;
        let mem_allocator = gpu_alloc::GpuAllocator::new(alloc_config, props);

        Ok(Self {
            shared: Arc::new(DeviceShared {
                instance: adapter.instance.clone(),
                raw,
                physical_device: adapter.raw,
                capabilities: adapter.capabilities,
                acceleration_structure_fn,
                ray_tracing_pipeline_fn,
                render_passes: Mutex::new(FxHashMap::default()),
                framebuffers: Mutex::new(FxHashMap::default()),
                pipelines: Mutex::new(FxHashMap::default()),
            }),
            mem_allocator: Mutex::new(mem_allocator),
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.shared.raw
    }

    /// The ref-counted shared state backing this handle, needed by
    /// collaborators constructed alongside a `Device` (`CommandQueue`,
    /// `CommandPoolSet`, `Surface`) rather than owned by it.
    pub fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    pub fn capabilities(&self) -> AdapterCapabilities {
        self.shared.capabilities
    }

    /// Minimum alignment AS-build scratch buffers must be offset by,
    /// resolved at init time from `VkPhysicalDeviceAccelerationStructurePropertiesKHR`
    /// per this crate's concretization of the scratch-alignment open question.
    pub fn as_scratch_alignment(&self) -> u64 {
        self.shared.capabilities.as_scratch_offset_alignment
    }

    /// Look up or build-and-insert a render pass for `key`. The same
    /// `render_passes` cache pattern as `wgpu-hal/src/vulkan/mod.rs`.
    pub fn render_pass_for(
        &self,
        key: RenderPassKey,
        build: impl FnOnce() -> Result<vk::RenderPass, DeviceError>,
    ) -> Result<vk::RenderPass, DeviceError> {
        if let Some(pass) = self.shared.render_passes.lock().get(&key) {
            return Ok(*pass);
        }
        let pass = build()?;
        self.shared.render_passes.lock().insert(key, pass);
        Ok(pass)
    }

    pub fn framebuffer_for(
        &self,
        key: FramebufferKey,
        build: impl FnOnce() -> Result<vk::Framebuffer, DeviceError>,
    ) -> Result<vk::Framebuffer, DeviceError> {
        if let Some(fb) = self.shared.framebuffers.lock().get(&key) {
            return Ok(*fb);
        }
        let fb = build()?;
        self.shared.framebuffers.lock().insert(key, fb);
        Ok(fb)
    }

    /// Build a `vk::ShaderModule` from already-compiled SPIR-V words. The
    /// module is a thin wrapper vkCreateShaderModule returns — it's consumed
    /// at pipeline-creation time and can be destroyed right after, same as
    /// `wgpu-hal` drops shader modules once they're baked into a pipeline.
    pub fn create_shader_module(&self, spirv: &[u32]) -> Result<vk::ShaderModule, DeviceError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        unsafe { self.shared.raw.create_shader_module(&create_info, None) }.map_err(Into::into)
    }

    pub unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.shared.raw.destroy_shader_module(module, None) };
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler, DeviceError> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode_u)
            .address_mode_v(desc.address_mode_v)
            .address_mode_w(desc.address_mode_w)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare_op.is_some())
            .compare_op(desc.compare_op.unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);
        unsafe { self.shared.raw.create_sampler(&create_info, None) }.map_err(Into::into)
    }

    pub unsafe fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.shared.raw.destroy_sampler(sampler, None) };
    }

    /// Look up or build-and-insert a graphics/compute pipeline for `key`,
    /// the same cache-or-build pattern as [`Device::render_pass_for`].
    pub fn pipeline_for(
        &self,
        key: PipelineStateKey,
        build: impl FnOnce() -> Result<vk::Pipeline, DeviceError>,
    ) -> Result<vk::Pipeline, DeviceError> {
        if let Some(pipeline) = self.shared.pipelines.lock().get(&key) {
            return Ok(*pipeline);
        }
        let pipeline = build()?;
        self.shared.pipelines.lock().insert(key, pipeline);
        Ok(pipeline)
    }

    fn usage_flags_for(memory: MemoryPreference) -> gpu_alloc::UsageFlags {
        match memory {
            MemoryPreference::GpuOnly => gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
            MemoryPreference::CpuToGpu => {
                gpu_alloc::UsageFlags::HOST_ACCESS | gpu_alloc::UsageFlags::UPLOAD
            }
            MemoryPreference::GpuToCpu => {
                gpu_alloc::UsageFlags::HOST_ACCESS | gpu_alloc::UsageFlags::DOWNLOAD
            }
        }
    }

    /// Create a buffer and bind it to a fresh `gpu-alloc` suballocation in
    /// one call, same division of labor as `wgpu-hal`'s Vulkan backend:
    /// `ash` owns the raw object, `gpu-alloc` owns picking and suballocating
    /// the `VkDeviceMemory` behind it.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryPreference,
    ) -> Result<Buffer, DeviceError> {
        let mut vk_usage = map_buffer_usage(usage);
        if usage.contains(BufferUsage::SHADER_DEVICE_ADDRESS) || usage.contains(BufferUsage::AS_STORAGE) {
            vk_usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk_usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { self.shared.raw.create_buffer(&create_info, None) }?;
        let requirements = unsafe { self.shared.raw.get_buffer_memory_requirements(raw) };

        let request = gpu_alloc::Request {
            size: requirements.size,
            align_mask: requirements.alignment - 1,
            usage: Self::usage_flags_for(memory),
            memory_types: requirements.memory_type_bits,
        };
        let allocation = unsafe {
            self.mem_allocator
                .lock()
                .alloc(gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw), request)
        }
        .map_err(|err| {
            unsafe { self.shared.raw.destroy_buffer(raw, None) };
            DeviceError::from(err)
        })?;
        unsafe {
            self.shared
                .raw
                .bind_buffer_memory(raw, *allocation.memory(), allocation.offset())?
        };

        let device_address = if usage.contains(BufferUsage::SHADER_DEVICE_ADDRESS)
            || usage.contains(BufferUsage::AS_STORAGE)
        {
            let info = vk::BufferDeviceAddressInfo::default().buffer(raw);
            Some(unsafe { self.shared.raw.get_buffer_device_address(&info) })
        } else {
            None
        };

        Ok(Buffer {
            raw,
            allocation,
            size,
            usage,
            device_address,
        })
    }

    pub unsafe fn destroy_buffer(&self, buffer: Buffer) {
        unsafe {
            self.shared.raw.destroy_buffer(buffer.raw, None);
            self.mem_allocator
                .lock()
                .dealloc(gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw), buffer.allocation);
        }
    }

    /// Map `buffer`'s allocation and copy `data` into it at `offset`, for a
    /// host-visible buffer (one created with `MemoryPreference::CpuToGpu` or
    /// `GpuToCpu`). `gpu-alloc`'s `MemoryBlock::write_bytes` maps, copies,
    /// and unmaps in one call rather than leaving the mapping open.
    pub unsafe fn write_to_buffer(&self, buffer: &mut Buffer, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        unsafe {
            buffer
                .allocation
                .write_bytes(gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw), offset, data)
        }
        .map_err(DeviceError::from)
    }

    /// Create an image and bind it to a fresh `gpu-alloc` suballocation.
    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Texture, DeviceError> {
        let (image_type, view_flags) = match desc.dimension {
            ImageDimension::D1 => (vk::ImageType::TYPE_1D, vk::ImageCreateFlags::empty()),
            ImageDimension::D2 | ImageDimension::D2Array => {
                (vk::ImageType::TYPE_2D, vk::ImageCreateFlags::empty())
            }
            ImageDimension::D3 => (vk::ImageType::TYPE_3D, vk::ImageCreateFlags::empty()),
            ImageDimension::Cube => (
                vk::ImageType::TYPE_2D,
                vk::ImageCreateFlags::CUBE_COMPATIBLE,
            ),
        };
        let samples = match desc.sample_count {
            1 => vk::SampleCountFlags::TYPE_1,
            2 => vk::SampleCountFlags::TYPE_2,
            4 => vk::SampleCountFlags::TYPE_4,
            8 => vk::SampleCountFlags::TYPE_8,
            other => {
                log::warn!("unsupported sample count {other}, falling back to 1");
                vk::SampleCountFlags::TYPE_1
            }
        };
        let create_info = vk::ImageCreateInfo::default()
            .flags(view_flags)
            .image_type(image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_level_count)
            .array_layers(desc.array_layer_count)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(map_texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { self.shared.raw.create_image(&create_info, None) }?;
        let requirements = unsafe { self.shared.raw.get_image_memory_requirements(raw) };

        let request = gpu_alloc::Request {
            size: requirements.size,
            align_mask: requirements.alignment - 1,
            usage: gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
            memory_types: requirements.memory_type_bits,
        };
        let allocation = unsafe {
            self.mem_allocator
                .lock()
                .alloc(gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw), request)
        }
        .map_err(|err| {
            unsafe { self.shared.raw.destroy_image(raw, None) };
            DeviceError::from(err)
        })?;
        unsafe {
            self.shared
                .raw
                .bind_image_memory(raw, *allocation.memory(), allocation.offset())?
        };

        Ok(Texture {
            raw,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            mip_level_count: desc.mip_level_count,
            array_layer_count: desc.array_layer_count,
            usage: desc.usage,
            is_swapchain_owned: false,
        })
    }

    pub unsafe fn destroy_texture(&self, texture: Texture) {
        unsafe {
            self.shared.raw.destroy_image(texture.raw, None);
            if let Some(allocation) = texture.allocation {
                self.mem_allocator
                    .lock()
                    .dealloc(gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw), allocation);
            }
        }
    }

    fn acceleration_structure_fn(&self) -> &ash::khr::acceleration_structure::Device {
        self.shared
            .acceleration_structure_fn
            .as_ref()
            .expect("acceleration-structure call made on a device created without ray tracing")
    }

    /// Query the buffer/scratch sizes a bottom-level acceleration structure
    /// needs for `geometry`, via `vkGetAccelerationStructureBuildSizesKHR`.
    pub fn blas_build_sizes(&self, geometry: &BlasGeometryDesc) -> Result<AccelerationStructureSizes, DeviceError> {
        let (geometry_info, primitive_count) = geometry.to_vk();
        self.build_sizes(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL, std::slice::from_ref(&geometry_info), primitive_count)
    }

    /// Query the buffer/scratch sizes a top-level acceleration structure
    /// holding `instance_count` instances needs.
    pub fn tlas_build_sizes(&self, instance_count: u32) -> Result<AccelerationStructureSizes, DeviceError> {
        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default();
        let geometry_info = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances: instances_data });
        self.build_sizes(vk::AccelerationStructureTypeKHR::TOP_LEVEL, std::slice::from_ref(&geometry_info), instance_count)
    }

    fn build_sizes(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        geometries: &[vk::AccelerationStructureGeometryKHR],
        primitive_count: u32,
    ) -> Result<AccelerationStructureSizes, DeviceError> {
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(geometries);
        let size_info = unsafe {
            self.acceleration_structure_fn().get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                std::slice::from_ref(&primitive_count),
            )
        };
        Ok(AccelerationStructureSizes {
            acceleration_structure_size: size_info.acceleration_structure_size,
            build_scratch_size: size_info.build_scratch_size,
            update_scratch_size: size_info.update_scratch_size,
        })
    }

    /// Bind an acceleration structure object to an already-allocated
    /// `AS_STORAGE` buffer range. The caller builds it afterward via
    /// [`Self::cmd_build_blas`]/[`Self::cmd_build_tlas`].
    pub fn create_acceleration_structure(
        &self,
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        ty: vk::AccelerationStructureTypeKHR,
    ) -> Result<vk::AccelerationStructureKHR, DeviceError> {
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer)
            .offset(offset)
            .size(size)
            .ty(ty);
        unsafe { self.acceleration_structure_fn().create_acceleration_structure(&create_info, None) }
            .map_err(Into::into)
    }

    pub unsafe fn destroy_acceleration_structure(&self, accel: vk::AccelerationStructureKHR) {
        unsafe { self.acceleration_structure_fn().destroy_acceleration_structure(accel, None) };
    }

    pub fn acceleration_structure_device_address(&self, accel: vk::AccelerationStructureKHR) -> vk::DeviceAddress {
        let info = vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(accel);
        unsafe { self.acceleration_structure_fn().get_acceleration_structure_device_address(&info) }
    }

    /// Record a BLAS build for `geometry` into `cmd`, writing into `accel`
    /// (already bound to its storage buffer) using `scratch_address` as
    /// scratch space. Caller is responsible for the scratch buffer being at
    /// least `build_scratch_size` bytes and for ordering this after any
    /// barrier the vertex/index buffers need.
    pub unsafe fn cmd_build_blas(
        &self,
        cmd: vk::CommandBuffer,
        accel: vk::AccelerationStructureKHR,
        scratch_address: vk::DeviceAddress,
        geometry: &BlasGeometryDesc,
    ) {
        let (geometry_info, primitive_count) = geometry.to_vk();
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(accel)
            .geometries(std::slice::from_ref(&geometry_info))
            .scratch_data(vk::DeviceOrHostAddressKHR { device_address: scratch_address });
        let range_info = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count);
        let range_infos: &[vk::AccelerationStructureBuildRangeInfoKHR] = std::slice::from_ref(&range_info);
        unsafe {
            self.acceleration_structure_fn().cmd_build_acceleration_structures(
                cmd,
                std::slice::from_ref(&build_info),
                std::slice::from_ref(&range_infos),
            )
        };
    }

    /// Record a TLAS build from a device-resident array of
    /// `VkAccelerationStructureInstanceKHR` at `instance_buffer_address`.
    pub unsafe fn cmd_build_tlas(
        &self,
        cmd: vk::CommandBuffer,
        accel: vk::AccelerationStructureKHR,
        scratch_address: vk::DeviceAddress,
        instance_buffer_address: vk::DeviceAddress,
        instance_count: u32,
    ) {
        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
            .data(vk::DeviceOrHostAddressConstKHR { device_address: instance_buffer_address });
        let geometry_info = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances: instances_data });
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(accel)
            .geometries(std::slice::from_ref(&geometry_info))
            .scratch_data(vk::DeviceOrHostAddressKHR { device_address: scratch_address });
        let range_info = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(instance_count);
        let range_infos: &[vk::AccelerationStructureBuildRangeInfoKHR] = std::slice::from_ref(&range_info);
        unsafe {
            self.acceleration_structure_fn().cmd_build_acceleration_structures(
                cmd,
                std::slice::from_ref(&build_info),
                std::slice::from_ref(&range_infos),
            )
        };
    }
}

#[derive(Clone, Debug)]
pub struct AccelerationStructureSizes {
    pub acceleration_structure_size: u64,
    pub build_scratch_size: u64,
    pub update_scratch_size: u64,
}

/// A single triangle-geometry input to a BLAS build: vertex buffer (with
/// stride/format/max index) and an optional index buffer. Grounded in
/// `original_source`'s BLAS build-input descriptor, narrowed to the one
/// triangle-geometry-per-BLAS shape this system builds (a multi-geometry
/// BLAS is possible in Vulkan but not something this system's BlasGroup
/// model needs: each mesh gets its own BLAS and groups are a render-time
/// batching concept, not a build-time one).
#[derive(Clone, Copy, Debug)]
pub struct BlasGeometryDesc {
    pub vertex_buffer_address: vk::DeviceAddress,
    pub vertex_stride: u64,
    pub vertex_format: vk::Format,
    pub max_vertex: u32,
    pub index_buffer_address: Option<vk::DeviceAddress>,
    pub index_type: vk::IndexType,
    pub primitive_count: u32,
    pub transform_buffer_address: Option<vk::DeviceAddress>,
}

impl BlasGeometryDesc {
    fn to_vk(&self) -> (vk::AccelerationStructureGeometryKHR<'static>, u32) {
        let mut triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(self.vertex_format)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.vertex_buffer_address,
            })
            .vertex_stride(self.vertex_stride)
            .max_vertex(self.max_vertex)
            .index_type(self.index_type);
        if let Some(index_address) = self.index_buffer_address {
            triangles = triangles.index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: index_address,
            });
        }
        if let Some(transform_address) = self.transform_buffer_address {
            triangles = triangles.transform_data(vk::DeviceOrHostAddressConstKHR {
                device_address: transform_address,
            });
        }
        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles });
        (geometry, self.primitive_count)
    }
}
