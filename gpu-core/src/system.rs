//! The top-level facade: owns every piece a caller needs to compile and run
//! render graphs against a real device, wiring the instance/adapter/device,
//! queues, bindless allocator, frame ring, and resource pools into one
//! [`GraphResources`] implementor.
//!
//! Grounded on `wgpu-core`'s top-level `Global`/`Device` split — one struct
//! that owns every resource registry and hands out ids to callers — adapted
//! here to a single-device, single-backend system with no multi-adapter
//! registry indirection.

use ash::vk;
use rustc_hash::FxHashMap;

use hal::types::{Buffer, BufferUsage, ImageDimension, MemoryPreference, Texture, TextureDesc};
use hal::{
    Adapter, CommandPoolSet, CommandQueue, Device, Instance, SubmitBatch, SurfaceConfig, TimelineSemaphoreHandle,
    TimelineWait, Wsi,
};

#[cfg(feature = "ray_tracing")]
use crate::accel::AccelerationStructureRegistry;
use crate::bindless::BindlessDescriptorAllocator;
use crate::config::GpuSystemConfig;
use crate::error::{Error, Result};
use crate::frame::{FrameRing, FrameSlot};
use crate::graph::pass::QueueKind;
use crate::graph::resource::{BufferDesc, RGTextureDesc, TextureDimension};
use crate::graph::{compile, execute, GraphResources, JobSystem, RenderGraphBuilder, ThreadScopeJobSystem};
use crate::id::{BufferId, PipelineStateId, ProgramId, SamplerId, ShaderId, TextureId};
use crate::pool::ChunkedSparsePool;
use crate::program::{ComputePipelineDesc, GraphicsPipelineDesc, ProgramRegistry};
use crate::sampler::SamplerCache;
use crate::swapchain::{AcquiredSwapchainImage, SwapchainManager};
use crate::track::{CacheState, PipelineStage};
use crate::upload::{ClearValue, Initializer};

fn convert_dimension(dimension: TextureDimension) -> ImageDimension {
    match dimension {
        TextureDimension::D1 => ImageDimension::D1,
        TextureDimension::D2 => ImageDimension::D2,
        TextureDimension::D2Array => ImageDimension::D2Array,
        TextureDimension::D3 => ImageDimension::D3,
        TextureDimension::Cube => ImageDimension::Cube,
    }
}

fn mip_extent(base: vk::Extent3D, mip_level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (base.width >> mip_level).max(1),
        height: (base.height >> mip_level).max(1),
        depth: (base.depth >> mip_level).max(1),
    }
}

/// How to seed a texture's contents at creation time, before any render
/// graph pass has a chance to touch it.
pub enum TextureInitialContent<'a> {
    /// Upload `data` into mip level 0, array layer 0, and optionally blit
    /// down a full mip chain from it afterward.
    Data { data: &'a [u8], generate_mipmaps: bool },
    /// Clear every mip level and array layer to `clear`.
    Clear(ClearValue),
}

fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Owns the whole Vulkan context plus everything a render graph needs to
/// resolve against: resource pools keyed by generational ids, the bindless
/// descriptor allocator, a frame ring, and (optionally) a swapchain.
pub struct GpuSystem {
    #[allow(dead_code)]
    instance: Instance,
    #[allow(dead_code)]
    adapter: Adapter,
    device: Device,
    graphics_queue: CommandQueue,
    transfer_queue: Option<CommandQueue>,
    compute_queue: Option<CommandQueue>,
    bindless: BindlessDescriptorAllocator,
    frames: FrameRing,
    buffers: ChunkedSparsePool<Buffer>,
    textures: ChunkedSparsePool<Texture>,
    buffer_states: FxHashMap<BufferId, CacheState>,
    texture_states: FxHashMap<TextureId, CacheState>,
    samplers: SamplerCache,
    programs: ProgramRegistry,
    #[cfg(feature = "ray_tracing")]
    accel: AccelerationStructureRegistry,
    swapchain: Option<SwapchainManager>,
    current_swapchain_image: Option<TextureId>,
    frame_transient_buffers: Vec<BufferId>,
    frame_transient_textures: Vec<TextureId>,
    frame_staging_buffers: Vec<Buffer>,
    pending_buffer_destroys: Vec<Vec<Buffer>>,
    pending_texture_destroys: Vec<Vec<Texture>>,
    job_system: Box<dyn JobSystem>,
    /// Transient pool backing one-off [`Initializer`] recordings (buffer/
    /// texture uploads, clears, mipmap generation) issued outside the
    /// per-frame render graph. Reset per-call rather than per-frame, since
    /// these run synchronously ahead of whatever frame next uses the
    /// resource.
    init_pool: vk::CommandPool,
}

impl GpuSystem {
    /// Stand up the instance, pick an adapter, create the device and its
    /// queues, build the bindless allocator, and allocate `frames_in_flight`
    /// frame slots. `window` is `None` for a headless (compute-only) system.
    ///
    /// # Safety
    ///
    /// The Vulkan loader must be present, and `window` (if given) must
    /// outlive the returned `GpuSystem`.
    pub unsafe fn new(config: &GpuSystemConfig, window: Option<&dyn Wsi>) -> Result<Self> {
        config.validate()?;

        let instance = unsafe { Instance::new(&config.app_name, config.validation) }?;
        let mut adapters = Adapter::enumerate(&instance, config.ray_tracing)?;
        let adapter = adapters.remove(0);

        let graphics_family = adapter.graphics_queue_family().ok_or(Error::InvalidConfiguration(
            "adapter exposes no combined graphics/compute/transfer queue family",
        ))?;
        let dedicated_transfer_family = adapter
            .dedicated_transfer_queue_family()
            .filter(|&family| family != graphics_family);
        let dedicated_compute_family = adapter
            .dedicated_compute_queue_family()
            .filter(|&family| family != graphics_family && Some(family) != dedicated_transfer_family);

        let mut queue_family_indices = vec![graphics_family];
        if let Some(family) = dedicated_transfer_family {
            queue_family_indices.push(family);
        }
        if let Some(family) = dedicated_compute_family {
            queue_family_indices.push(family);
        }

        let device = Device::new(&adapter, &queue_family_indices, config.ray_tracing)?;
        let device_shared = device.shared().clone();

        let graphics_queue = CommandQueue::new(&device_shared, graphics_family)?;
        let transfer_queue = dedicated_transfer_family
            .map(|family| CommandQueue::new(&device_shared, family))
            .transpose()?;
        let compute_queue = dedicated_compute_family
            .map(|family| CommandQueue::new(&device_shared, family))
            .transpose()?;
        let transfer_family_for_pools = dedicated_transfer_family.unwrap_or(graphics_family);
        let compute_family_for_pools = dedicated_compute_family.unwrap_or(graphics_family);

        let with_ray_tracing = config.ray_tracing && adapter.capabilities().has_ray_tracing;
        let bindless = BindlessDescriptorAllocator::new(device.raw(), config.bindless, with_ray_tracing)?;

        let mut slots = Vec::with_capacity(config.frames_in_flight as usize);
        for _ in 0..config.frames_in_flight {
            let pools = CommandPoolSet::new(
                &device_shared,
                graphics_family,
                compute_family_for_pools,
                transfer_family_for_pools,
            )?;
            slots.push(FrameSlot::new(pools));
        }
        let frame_count = slots.len();
        let frames = FrameRing::new(slots);

        let swapchain = match window {
            Some(window) => {
                let surface_raw = unsafe { hal::wsi::create_surface(&instance, window) }?;
                let surface = hal::Surface::new(&instance, surface_raw);
                Some(SwapchainManager::new(surface))
            }
            None => None,
        };

        let init_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let init_pool = unsafe { device.raw().create_command_pool(&init_pool_info, None) }?;

        Ok(Self {
            instance,
            adapter,
            device,
            graphics_queue,
            transfer_queue,
            compute_queue,
            bindless,
            frames,
            buffers: ChunkedSparsePool::new(),
            textures: ChunkedSparsePool::new(),
            buffer_states: FxHashMap::default(),
            texture_states: FxHashMap::default(),
            samplers: SamplerCache::new(),
            programs: ProgramRegistry::new(),
            #[cfg(feature = "ray_tracing")]
            accel: AccelerationStructureRegistry::new(),
            swapchain,
            current_swapchain_image: None,
            frame_transient_buffers: Vec::new(),
            frame_transient_textures: Vec::new(),
            frame_staging_buffers: Vec::new(),
            pending_buffer_destroys: (0..frame_count).map(|_| Vec::new()).collect(),
            pending_texture_destroys: (0..frame_count).map(|_| Vec::new()).collect(),
            job_system: Box::new(ThreadScopeJobSystem::default()),
            init_pool,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn graphics_queue(&self) -> &CommandQueue {
        &self.graphics_queue
    }

    fn queue_for(&self, kind: QueueKind) -> &CommandQueue {
        match kind {
            QueueKind::Graphics => &self.graphics_queue,
            QueueKind::Compute => self.compute_queue.as_ref().unwrap_or(&self.graphics_queue),
            QueueKind::Transfer => self.transfer_queue.as_ref().unwrap_or(&self.graphics_queue),
        }
    }

    /// Create a persistent (not render-graph-transient) buffer, tracked in
    /// this system's resource pool with its own [`CacheState`]. When
    /// `initial_data` is given, it is staged and uploaded synchronously
    /// before this call returns (scenario 1 of seeding a resource before any
    /// render graph touches it).
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryPreference,
        initial_data: Option<&[u8]>,
    ) -> Result<BufferId> {
        let buffer = self.device.create_buffer(size, usage, memory)?;
        let id = self.buffers.insert(buffer);
        self.buffer_states.insert(id, CacheState::new());
        if let Some(data) = initial_data {
            self.upload_buffer_data(id, 0, data)?;
        }
        Ok(id)
    }

    pub fn destroy_buffer(&mut self, id: BufferId) -> Result<()> {
        let buffer = self.buffers.remove(id)?;
        self.buffer_states.remove(&id);
        unsafe { self.device.destroy_buffer(buffer) };
        Ok(())
    }

    /// Create a persistent texture and optionally seed its contents before
    /// any render graph runs (scenarios 2 and 4: a cleared-and-sampled
    /// texture, or an uploaded base level with a generated mip chain).
    pub fn create_texture(&mut self, desc: &TextureDesc, initial: Option<TextureInitialContent>) -> Result<TextureId> {
        let texture = self.device.create_texture(desc)?;
        let id = self.textures.insert(texture);
        self.texture_states.insert(id, CacheState::new());
        match initial {
            Some(TextureInitialContent::Data { data, generate_mipmaps }) => {
                self.upload_texture_data(id, 0, 0, data)?;
                if generate_mipmaps {
                    self.generate_mipmaps(id)?;
                }
            }
            Some(TextureInitialContent::Clear(clear)) => {
                self.clear_texture(id, clear)?;
            }
            None => {}
        }
        Ok(id)
    }

    pub fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        let texture = self.textures.remove(id)?;
        self.texture_states.remove(&id);
        unsafe { self.device.destroy_texture(texture) };
        Ok(())
    }

    /// Stage `data` into a host-visible scratch buffer and copy it into
    /// `id` at `offset`, blocking until the copy completes. Grounded on
    /// `GPUResourceInitializer::load(Buffer&, ...)`: outside the render
    /// graph there is no frame ring to hand the staging buffer's destruction
    /// off to, so it is freed immediately after the wait.
    pub fn upload_buffer_data(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let mut staging = self
            .device
            .create_buffer(data.len().max(1) as u64, BufferUsage::TRANSFER_SRC, MemoryPreference::CpuToGpu)?;
        unsafe { self.device.write_to_buffer(&mut staging, 0, data)? };

        let dst = self.raw_buffer(id);
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size: data.len() as u64,
        };
        self.run_initializer(|initializer, device| {
            initializer.record_buffer_upload(device, staging.raw, dst, region);
        })?;
        unsafe { self.device.destroy_buffer(staging) };

        self.buffer_cache_state(id).commit_access(
            self.graphics_queue.family_index(),
            PipelineStage::Transfer,
            vk::AccessFlags2::TRANSFER_WRITE,
            true,
            vk::ImageLayout::UNDEFINED,
        );
        Ok(())
    }

    /// Stage `data` into `id`'s `mip_level`/`array_layer`, blocking until the
    /// copy completes. Grounded on `GPUResourceInitializer::load(Texture&,
    /// ...)`.
    pub fn upload_texture_data(&mut self, id: TextureId, mip_level: u32, array_layer: u32, data: &[u8]) -> Result<()> {
        let mut staging = self
            .device
            .create_buffer(data.len().max(1) as u64, BufferUsage::TRANSFER_SRC, MemoryPreference::CpuToGpu)?;
        unsafe { self.device.write_to_buffer(&mut staging, 0, data)? };

        let dst = self.raw_image(id);
        let aspect_mask = self.image_aspect(id);
        let extent = self.texture_extent(id, mip_level);
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask,
                mip_level,
                base_array_layer: array_layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: extent,
        };
        self.run_initializer(|initializer, device| {
            initializer.record_texture_upload(device, staging.raw, dst, region);
        })?;
        unsafe { self.device.destroy_buffer(staging) };

        self.texture_cache_state(id).commit_access(
            self.graphics_queue.family_index(),
            PipelineStage::Transfer,
            vk::AccessFlags2::TRANSFER_WRITE,
            true,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        Ok(())
    }

    /// Transition `id` to `TRANSFER_DST_OPTIMAL` and clear every mip level
    /// and array layer to `clear`, blocking until it completes. Grounded on
    /// `GPUResourceInitializer::clear(Texture&, ClearValue)`.
    pub fn clear_texture(&mut self, id: TextureId, clear: ClearValue) -> Result<()> {
        let image = self.raw_image(id);
        let aspect_mask = self.image_aspect(id);
        let (mip_level_count, array_layer_count) = self
            .textures
            .with(id, |texture| (texture.mip_level_count, texture.array_layer_count))
            .expect("clear_texture called with an id this system never issued");

        self.run_initializer(|initializer, device| {
            initializer.record_clear(device, image, aspect_mask, mip_level_count, array_layer_count, clear);
        })?;

        self.texture_cache_state(id).commit_access(
            self.graphics_queue.family_index(),
            PipelineStage::Transfer,
            vk::AccessFlags2::TRANSFER_WRITE,
            true,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        Ok(())
    }

    /// Blit a full mip chain from level 0, blocking until it completes.
    /// Grounded on `GPUResourceInitializer::generate_mipmap(Texture&)`.
    pub fn generate_mipmaps(&mut self, id: TextureId) -> Result<()> {
        let image = self.raw_image(id);
        let aspect_mask = self.image_aspect(id);
        let (extent, mip_level_count, array_layer_count) = self
            .textures
            .with(id, |texture| (texture.extent, texture.mip_level_count, texture.array_layer_count))
            .expect("generate_mipmaps called with an id this system never issued");

        self.run_initializer(|initializer, device| {
            initializer.record_generate_mipmaps(device, image, aspect_mask, extent, mip_level_count, array_layer_count);
        })?;

        self.texture_cache_state(id).commit_access(
            self.graphics_queue.family_index(),
            PipelineStage::FragmentShader,
            vk::AccessFlags2::SHADER_READ,
            false,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        Ok(())
    }

    /// Record one [`Initializer`] via `record`, submit every one of its four
    /// streams on the graphics queue (which always carries TRANSFER and
    /// COMPUTE, so this is valid regardless of which stream(s) `record`
    /// used), and block until the submission retires. Used for one-off
    /// resource seeding outside the per-frame render graph; a real frame's
    /// uploads go through `TransferCommand` in the graph instead.
    fn run_initializer(&mut self, record: impl FnOnce(&Initializer, &ash::Device)) -> Result<()> {
        let initializer = Initializer::new(self.device.raw(), self.init_pool)?;
        initializer.begin(self.device.raw())?;
        record(&initializer, self.device.raw());
        let command_buffers = initializer.end(self.device.raw())?;

        let batch = SubmitBatch {
            command_buffers: command_buffers.to_vec(),
            ..SubmitBatch::default()
        };
        let value = self.graphics_queue.submit(batch)?;
        self.graphics_queue.wait_for_timeline_value(value, u64::MAX)?;
        unsafe { self.device.raw().free_command_buffers(self.init_pool, &command_buffers) };
        Ok(())
    }

    /// Look up or create a sampler for `desc`, content-addressed: repeated
    /// calls with an equal config return the same `SamplerId`.
    pub fn create_sampler(&mut self, desc: hal::types::SamplerDesc) -> Result<SamplerId> {
        Ok(self.samplers.get_or_create(&self.device, &self.bindless, desc)?)
    }

    pub fn sampler_descriptor(&self, id: SamplerId) -> crate::id::DescriptorId {
        self.samplers.descriptor(id)
    }

    pub fn raw_sampler(&self, id: SamplerId) -> vk::Sampler {
        self.samplers.raw(id)
    }

    pub fn create_shader(
        &mut self,
        spirv: &[u32],
        stage: vk::ShaderStageFlags,
        entry_point: impl Into<String>,
    ) -> Result<ShaderId> {
        Ok(self.programs.create_shader(&self.device, spirv, stage, entry_point)?)
    }

    pub unsafe fn destroy_shader(&mut self, id: ShaderId) -> Result<()> {
        Ok(unsafe { self.programs.destroy_shader(&self.device, id) }?)
    }

    /// Bundle shaders under the one pipeline layout every pipeline in this
    /// system shares (the bindless layout).
    pub fn create_program(&mut self, shaders: &[ShaderId]) -> ProgramId {
        self.programs.create_program(shaders)
    }

    pub fn destroy_program(&mut self, id: ProgramId) -> Result<()> {
        Ok(self.programs.destroy_program(id)?)
    }

    pub fn graphics_pipeline_for(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineStateId> {
        self.programs.graphics_pipeline_for(&self.device, &self.bindless, desc)
    }

    pub fn compute_pipeline_for(&self, desc: &ComputePipelineDesc) -> Result<PipelineStateId> {
        self.programs.compute_pipeline_for(&self.device, &self.bindless, desc)
    }

    #[cfg(feature = "ray_tracing")]
    pub fn create_blas_group(&mut self, name: impl Into<String>) -> crate::id::BlasGroupId {
        self.accel.create_blas_group(name)
    }

    #[cfg(feature = "ray_tracing")]
    pub fn destroy_blas_group(&mut self, id: crate::id::BlasGroupId) -> Result<()> {
        Ok(self.accel.destroy_blas_group(id)?)
    }

    /// Build a BLAS for `geometry`, recording the build into `cmd`. The
    /// caller submits and waits on `cmd` before reading the BLAS (as an
    /// instance in a TLAS, or directly).
    #[cfg(feature = "ray_tracing")]
    pub fn create_blas(
        &mut self,
        cmd: vk::CommandBuffer,
        geometry: &hal::device::BlasGeometryDesc,
        group: Option<crate::id::BlasGroupId>,
    ) -> Result<crate::id::BlasId> {
        Ok(self.accel.create_blas(&self.device, cmd, geometry, group)?)
    }

    #[cfg(feature = "ray_tracing")]
    pub unsafe fn destroy_blas(&mut self, id: crate::id::BlasId) -> Result<()> {
        Ok(unsafe { self.accel.destroy_blas(&self.device, id) }?)
    }

    /// Build a TLAS over `instance_count` instances at `instance_buffer_address`,
    /// recording the build into `cmd` and allocating the bindless
    /// acceleration-structure descriptor shaders reference it by.
    #[cfg(feature = "ray_tracing")]
    pub fn create_tlas(
        &mut self,
        cmd: vk::CommandBuffer,
        instance_buffer_address: vk::DeviceAddress,
        instance_count: u32,
    ) -> Result<crate::id::TlasId> {
        Ok(self
            .accel
            .create_tlas(&self.device, &self.bindless, cmd, instance_buffer_address, instance_count)?)
    }

    #[cfg(feature = "ray_tracing")]
    pub unsafe fn destroy_tlas(&mut self, id: crate::id::TlasId) -> Result<()> {
        Ok(unsafe { self.accel.destroy_tlas(&self.device, &self.bindless, id) }?)
    }

    pub fn configure_swapchain(
        &mut self,
        extent: (u32, u32),
        format: vk::Format,
        present_mode: vk::PresentModeKHR,
        image_count: u32,
    ) -> Result<()> {
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or(Error::InvalidConfiguration("configure_swapchain called on a headless system"))?;
        let config = SurfaceConfig {
            extent: vk::Extent2D {
                width: extent.0,
                height: extent.1,
            },
            format,
            present_mode,
            image_count,
        };
        swapchain.configure(self.device.shared(), config)
    }

    /// Acquire the next presentable swapchain image, registering it as a
    /// live [`TextureId`] so the render graph can treat it as any other
    /// color attachment for the duration of this frame.
    pub fn acquire_swapchain_image(
        &mut self,
        timeout_ns: u64,
    ) -> std::result::Result<AcquiredSwapchainImage, hal::SurfaceError> {
        let swapchain = self
            .swapchain
            .as_mut()
            .expect("acquire_swapchain_image called on a headless system");
        let acquired = swapchain.acquire(timeout_ns)?;

        let mut state = CacheState::new();
        state.commit_acquire_swapchain(self.graphics_queue.family_index());
        self.texture_states.insert(acquired.texture, state);
        self.current_swapchain_image = Some(acquired.texture);
        Ok(acquired)
    }

    /// Present the currently acquired swapchain image, waiting on `wait`
    /// (the binary semaphore this frame's final submission signalled).
    pub fn present_swapchain_image(
        &mut self,
        wait: vk::Semaphore,
    ) -> std::result::Result<bool, hal::SurfaceError> {
        if let Some(id) = self.current_swapchain_image.take() {
            self.texture_states.remove(&id);
        }
        let swapchain = self
            .swapchain
            .as_mut()
            .expect("present_swapchain_image called on an unacquired/headless system");
        swapchain.present(&self.graphics_queue, wait)
    }

    /// Block the CPU on the oldest frame slot's prior submission, retire
    /// its garbage and transient-resource destroys, and reset its command
    /// pools for fresh recording. Returns the slot index to record into.
    pub fn begin_frame(&mut self) -> Result<usize> {
        let slot_index = self.frames.current();
        if let Some(wait_value) = self.frames.wait_value(slot_index) {
            self.graphics_queue.wait_for_timeline_value(wait_value, u64::MAX)?;
        }

        for buffer in self.pending_buffer_destroys[slot_index].drain(..) {
            unsafe { self.device.destroy_buffer(buffer) };
        }
        for texture in self.pending_texture_destroys[slot_index].drain(..) {
            unsafe { self.device.destroy_texture(texture) };
        }

        let slot = self.frames.slot_mut(slot_index);
        slot.command_pools.reset_all()?;
        slot.garbage.retire(self.device.raw(), &self.bindless);

        self.frame_transient_buffers.clear();
        self.frame_transient_textures.clear();
        Ok(slot_index)
    }

    /// Compile `builder` against this system's resources and record it into
    /// fresh primary command buffers on `slot_index`'s pools, one per queue
    /// the graph touches. Transient resources the graph allocated are queued
    /// for destruction once this frame's submission retires, not freed here.
    pub fn run_graph(
        &mut self,
        slot_index: usize,
        builder: RenderGraphBuilder,
    ) -> Result<(FxHashMap<QueueKind, vk::CommandBuffer>, Vec<(QueueKind, QueueKind)>)> {
        let graph = compile(builder, self)?;
        let cross_queue_waits = graph.cross_queue_waits.clone();

        let mut command_buffers = FxHashMap::default();
        {
            let slot = self.frames.slot_mut(slot_index);
            for kind in [QueueKind::Transfer, QueueKind::Compute, QueueKind::Graphics] {
                let pool = match kind {
                    QueueKind::Graphics => &mut slot.command_pools.graphics,
                    QueueKind::Compute => &mut slot.command_pools.compute,
                    QueueKind::Transfer => &mut slot.command_pools.transfer,
                };
                let cmd = pool.request(self.device.shared())?;
                let begin_info =
                    vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                unsafe { self.device.raw().begin_command_buffer(cmd, &begin_info)? };
                command_buffers.insert(kind, cmd);
            }
        }

        execute(
            graph,
            self.device.raw(),
            &command_buffers,
            self.job_system.as_ref(),
            slot_index,
        );

        for &cmd in command_buffers.values() {
            unsafe { self.device.raw().end_command_buffer(cmd)? };
        }

        let slot = self.frames.slot_mut(slot_index);
        for id in self.frame_transient_buffers.drain(..) {
            if let Ok(buffer) = self.buffers.remove(id) {
                self.pending_buffer_destroys[slot_index].push(buffer);
            }
            self.buffer_states.remove(&id);
        }
        for id in self.frame_transient_textures.drain(..) {
            if let Ok(texture) = self.textures.remove(id) {
                self.pending_texture_destroys[slot_index].push(texture);
            }
            self.texture_states.remove(&id);
        }
        for buffer in self.frame_staging_buffers.drain(..) {
            self.pending_buffer_destroys[slot_index].push(buffer);
        }
        let _ = slot;

        Ok((command_buffers, cross_queue_waits))
    }

    /// Submit the command buffers `run_graph` recorded, one batch per queue
    /// the graph touched, in an order that respects `cross_queue_waits`
    /// (each `(producer, consumer)` pair from `compile`'s barrier synthesis):
    /// a consumer's batch waits on the producer's just-reserved timeline
    /// value, so the wait only exists when a resource actually crossed
    /// queues rather than structurally serializing transfer before
    /// graphics/compute every frame.
    pub fn submit_frame(
        &mut self,
        slot_index: usize,
        mut command_buffers: FxHashMap<QueueKind, vk::CommandBuffer>,
        cross_queue_waits: &[(QueueKind, QueueKind)],
        present_wait: Option<vk::Semaphore>,
        present_signal: Option<vk::Semaphore>,
    ) -> Result<u64> {
        let mut pending: Vec<QueueKind> = command_buffers.keys().copied().collect();
        let mut submitted: FxHashMap<QueueKind, TimelineSemaphoreHandle> = FxHashMap::default();
        let mut graphics_value = None;

        while !pending.is_empty() {
            let ready_index = pending
                .iter()
                .position(|&kind| {
                    cross_queue_waits
                        .iter()
                        .filter(|&&(_, dst)| dst == kind)
                        .all(|&(src, _)| submitted.contains_key(&src))
                })
                .expect("cross_queue_waits has a cycle across the 3 fixed queue kinds");
            let kind = pending.remove(ready_index);
            let cmd = command_buffers
                .remove(&kind)
                .expect("kind was just read out of command_buffers' own keys");

            let mut batch = SubmitBatch {
                command_buffers: vec![cmd],
                ..SubmitBatch::default()
            };
            for &(src, _) in cross_queue_waits.iter().filter(|&&(_, dst)| dst == kind) {
                if let Some(&handle) = submitted.get(&src) {
                    batch.timeline_waits.push(TimelineWait {
                        semaphore: handle,
                        stage: vk::PipelineStageFlags2::ALL_COMMANDS,
                    });
                }
            }
            if kind == QueueKind::Graphics {
                if let Some(wait) = present_wait {
                    batch
                        .binary_waits
                        .push((wait, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT));
                }
                if let Some(signal) = present_signal {
                    batch.binary_signals.push(signal);
                }
            }

            let queue = self.queue_for(kind);
            let value = queue.submit(batch)?;
            if kind == QueueKind::Graphics {
                graphics_value = Some(value);
            }
            submitted.insert(kind, queue.timeline_handle());
        }

        // `begin_frame` only ever waits on `graphics_queue`'s timeline, so the
        // slot's recycling value must track that queue specifically; a graph
        // with no graphics-queue work still retires once the graphics
        // queue's already-reached value is hit.
        let value = graphics_value.unwrap_or_else(|| self.graphics_queue.current_timeline_value());
        self.frames.set_wait_value(slot_index, value);
        Ok(value)
    }

    /// Tear down every piece this system owns, in dependency order. Every
    /// buffer/texture this system handed out must already have been
    /// destroyed (via `destroy_buffer`/`destroy_texture`, or retired as a
    /// render-graph transient) before calling this.
    ///
    /// # Safety
    ///
    /// No command buffer this system submitted may still be executing.
    pub unsafe fn destroy(mut self) {
        unsafe {
            let _ = self.graphics_queue.wait_idle();
            if let Some(transfer) = &self.transfer_queue {
                let _ = transfer.wait_idle();
            }
            if let Some(compute) = &self.compute_queue {
                let _ = compute.wait_idle();
            }

            for slot_destroys in &mut self.pending_buffer_destroys {
                for buffer in slot_destroys.drain(..) {
                    self.device.destroy_buffer(buffer);
                }
            }
            for slot_destroys in &mut self.pending_texture_destroys {
                for texture in slot_destroys.drain(..) {
                    self.device.destroy_texture(texture);
                }
            }
            debug_assert!(self.buffers.is_empty(), "live BufferId leaked past GpuSystem::destroy");
            debug_assert!(self.textures.is_empty(), "live TextureId leaked past GpuSystem::destroy");
            #[cfg(feature = "ray_tracing")]
            debug_assert!(self.accel.is_empty(), "live BlasId/TlasId leaked past GpuSystem::destroy");

            if let Some(swapchain) = self.swapchain.take() {
                swapchain.unconfigure(self.device.shared());
                swapchain.destroy(self.device.shared());
            }

            self.samplers.destroy(&self.device, &self.bindless);
            self.bindless.destroy(self.device.raw());
            self.device.raw().destroy_command_pool(self.init_pool, None);
        }
    }
}

impl GraphResources for GpuSystem {
    fn queue_family(&self, queue: QueueKind) -> u32 {
        self.queue_for(queue).family_index()
    }

    fn buffer_cache_state(&mut self, id: BufferId) -> &mut CacheState {
        self.buffer_states.entry(id).or_insert_with(CacheState::new)
    }

    fn texture_cache_state(&mut self, id: TextureId) -> &mut CacheState {
        self.texture_states.entry(id).or_insert_with(CacheState::new)
    }

    fn create_transient_buffer(&mut self, desc: &BufferDesc) -> std::result::Result<BufferId, Error> {
        let buffer = self.device.create_buffer(desc.size, desc.usage, desc.memory)?;
        let id = self.buffers.insert(buffer);
        self.buffer_states.insert(id, CacheState::new());
        self.frame_transient_buffers.push(id);
        Ok(id)
    }

    fn create_transient_texture(&mut self, desc: &RGTextureDesc) -> std::result::Result<TextureId, Error> {
        let hal_desc = TextureDesc {
            dimension: convert_dimension(desc.dimension),
            format: desc.format,
            extent: desc.extent,
            mip_level_count: desc.mip_level_count,
            array_layer_count: desc.array_layer_count,
            sample_count: desc.sample_count,
            usage: desc.usage,
        };
        let texture = self.device.create_texture(&hal_desc)?;
        let id = self.textures.insert(texture);
        self.texture_states.insert(id, CacheState::new());
        self.frame_transient_textures.push(id);
        Ok(id)
    }

    fn raw_buffer(&self, id: BufferId) -> vk::Buffer {
        self.buffers
            .with(id, |buffer| buffer.raw)
            .expect("raw_buffer called with an id this system never issued")
    }

    fn raw_image(&self, id: TextureId) -> vk::Image {
        if self.current_swapchain_image == Some(id) {
            return self
                .swapchain
                .as_ref()
                .expect("swapchain TextureId resolved on a headless system")
                .raw_image(id);
        }
        self.textures
            .with(id, |texture| texture.raw)
            .expect("raw_image called with an id this system never issued")
    }

    fn image_aspect(&self, id: TextureId) -> vk::ImageAspectFlags {
        if self.current_swapchain_image == Some(id) {
            return self
                .swapchain
                .as_ref()
                .expect("swapchain TextureId resolved on a headless system")
                .image_aspect();
        }
        self.textures
            .with(id, |texture| aspect_for_format(texture.format))
            .expect("image_aspect called with an id this system never issued")
    }

    fn texture_extent(&self, id: TextureId, mip_level: u32) -> vk::Extent3D {
        self.textures
            .with(id, |texture| mip_extent(texture.extent, mip_level))
            .expect("texture_extent called with an id this system never issued")
    }

    /// Stash the buffer in `frame_staging_buffers` rather than the tracked
    /// resource pools: it's not a render-graph node and needs no
    /// `CacheState`, just to survive until `run_graph` retires this frame's
    /// transients and hands it to `pending_buffer_destroys`.
    fn create_staging_buffer(&mut self, data: &[u8]) -> std::result::Result<vk::Buffer, Error> {
        let mut staging =
            self.device
                .create_buffer(data.len().max(1) as u64, BufferUsage::TRANSFER_SRC, MemoryPreference::CpuToGpu)?;
        unsafe { self.device.write_to_buffer(&mut staging, 0, data)? };
        let raw = staging.raw;
        self.frame_staging_buffers.push(staging);
        Ok(raw)
    }
}
