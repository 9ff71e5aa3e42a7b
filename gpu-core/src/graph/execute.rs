use ash::vk;
use rustc_hash::FxHashMap;

use crate::id::{BufferId, TextureId};

use super::compile::{CompiledGraph, CompiledPassBody, ResolvedTransferCommand};
use super::pass::QueueKind;
use super::resource::NodeId;

/// The optional parallelism hook an execute closure may lean on without this
/// crate dictating a thread-pool implementation: it may call
/// `ctx.job_system.parallel_for` to record secondary command buffers across
/// worker threads before `vkCmdExecuteCommands`-ing them into the pass's
/// primary buffer. Kept as a narrow `dyn`-safe trait, exactly the shape of
/// an external collaborator boundary rather than a concrete thread pool.
pub trait JobSystem: Send + Sync {
    fn parallel_for(&self, count: usize, f: &(dyn Fn(usize) + Send + Sync));
}

/// Default job system: one `std::thread::scope` per call, splitting `count`
/// items evenly across the available parallelism. Adequate for the
/// secondary-command-buffer recording this hook exists for; a caller with a
/// persistent worker pool can supply its own `JobSystem` instead.
pub struct ThreadScopeJobSystem {
    thread_count: usize,
}

impl ThreadScopeJobSystem {
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count: thread_count.max(1),
        }
    }
}

impl Default for ThreadScopeJobSystem {
    fn default() -> Self {
        Self::new(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

impl JobSystem for ThreadScopeJobSystem {
    fn parallel_for(&self, count: usize, f: &(dyn Fn(usize) + Send + Sync)) {
        if count == 0 {
            return;
        }
        let workers = self.thread_count.min(count);
        std::thread::scope(|scope| {
            for worker in 0..workers {
                let f = &f;
                scope.spawn(move || {
                    let mut i = worker;
                    while i < count {
                        f(i);
                        i += workers;
                    }
                });
            }
        });
    }
}

/// Resolves a pass's declared [`NodeId`]s to the physical handles `compile`
/// bound them to, so an execute closure never has to see a `BufferDesc` or
/// transient-allocation decision: it receives its captured parameters plus
/// this `Registry`, which resolves node ids to physical ids.
pub struct Registry<'a> {
    buffers: &'a [(NodeId, BufferId)],
    textures: &'a [(NodeId, TextureId)],
}

impl<'a> Registry<'a> {
    pub fn buffer(&self, node: NodeId) -> BufferId {
        self.buffers
            .iter()
            .find(|(n, _)| *n == node)
            .map(|(_, id)| *id)
            .expect("node was not declared as a buffer access of this pass")
    }

    pub fn texture(&self, node: NodeId) -> TextureId {
        self.textures
            .iter()
            .find(|(n, _)| *n == node)
            .map(|(_, id)| *id)
            .expect("node was not declared as a texture access of this pass")
    }
}

pub struct ExecuteContext<'a> {
    pub device: &'a ash::Device,
    pub command_buffer: vk::CommandBuffer,
    pub queue: QueueKind,
    pub frame_index: usize,
    pub job_system: &'a dyn JobSystem,
}

/// Record every compiled pass's barriers and commands into the command
/// buffer its queue has open, in compiled order: per-pass barrier then
/// body, one primary segment per pass appended to its queue's buffer;
/// submission itself is the caller's job once every buffer is ended.
pub fn execute(
    graph: CompiledGraph,
    device: &ash::Device,
    command_buffers: &FxHashMap<QueueKind, vk::CommandBuffer>,
    job_system: &dyn JobSystem,
    frame_index: usize,
) {
    for pass in graph.passes {
        let command_buffer = *command_buffers
            .get(&pass.queue)
            .expect("execute() must be given a command buffer for every queue a pass targets");

        record_barriers(device, command_buffer, &pass.barriers);

        let ctx = ExecuteContext {
            device,
            command_buffer,
            queue: pass.queue,
            frame_index,
            job_system,
        };
        let registry = Registry {
            buffers: &pass.buffer_ids,
            textures: &pass.texture_ids,
        };

        match pass.body {
            CompiledPassBody::Raster { execute } => execute(&ctx, &registry),
            CompiledPassBody::Compute { execute } => execute(&ctx, &registry),
            CompiledPassBody::RayTrace { execute } => execute(&ctx, &registry),
            CompiledPassBody::Transfer { commands } => record_transfer_commands(&ctx, &commands),
        }
    }
}

fn record_barriers(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    barriers: &[super::compile::ResourceBarrier],
) {
    if barriers.is_empty() {
        return;
    }
    let mut image_barriers = Vec::new();
    let mut buffer_barriers = Vec::new();
    for barrier in barriers {
        match &barrier.image {
            Some(image) => {
                let mut b = vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(barrier.src_stages)
                    .src_access_mask(barrier.src_accesses)
                    .dst_stage_mask(barrier.dst_stages)
                    .dst_access_mask(barrier.dst_accesses)
                    .old_layout(image.old_layout)
                    .new_layout(image.new_layout)
                    .image(image.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: image.aspect_mask,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    });
                if barrier.needs_ownership_transfer {
                    b = b
                        .src_queue_family_index(barrier.src_queue_family)
                        .dst_queue_family_index(barrier.dst_queue_family);
                } else {
                    b = b
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
                }
                image_barriers.push(b);
            }
            None => {
                let mut b = vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(barrier.src_stages)
                    .src_access_mask(barrier.src_accesses)
                    .dst_stage_mask(barrier.dst_stages)
                    .dst_access_mask(barrier.dst_accesses)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                if let Some(buffer) = &barrier.buffer {
                    b = b.buffer(buffer.buffer);
                }
                b = if barrier.needs_ownership_transfer {
                    b.src_queue_family_index(barrier.src_queue_family)
                        .dst_queue_family_index(barrier.dst_queue_family)
                } else {
                    b.src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                };
                buffer_barriers.push(b);
            }
        }
    }
    let dependency_info = vk::DependencyInfo::default()
        .image_memory_barriers(&image_barriers)
        .buffer_memory_barriers(&buffer_barriers);
    unsafe { device.cmd_pipeline_barrier2(command_buffer, &dependency_info) };
}

fn record_transfer_commands(ctx: &ExecuteContext, commands: &[ResolvedTransferCommand]) {
    for command in commands {
        match command {
            ResolvedTransferCommand::UpdateBuffer { dst, offset, data } => {
                if data.len() <= 65536 {
                    // vkCmdUpdateBuffer's data-size limit; larger payloads go
                    // through a staged copy instead (the `Initializer`'s
                    // transfer command buffer), which is the caller's
                    // responsibility to route through `CopyBuffer` for.
                    unsafe {
                        ctx.device.cmd_update_buffer(ctx.command_buffer, *dst, *offset, data);
                    }
                } else {
                    log::warn!("update_buffer payload exceeds vkCmdUpdateBuffer's 64KiB limit; route through a staging copy instead");
                }
            }
            ResolvedTransferCommand::CopyBuffer { src, dst, src_offset, dst_offset, size } => {
                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *size,
                };
                unsafe {
                    ctx.device.cmd_copy_buffer(ctx.command_buffer, *src, *dst, std::slice::from_ref(&region));
                }
            }
            ResolvedTransferCommand::UpdateTexture { dst, aspect, mip_level, array_layer, src, extent } => {
                // Image contents go through a staging buffer copy
                // (`vkCmdCopyBufferToImage`), not `vkCmdUpdateBuffer`; `src`
                // was allocated and written by `GraphResources::create_staging_buffer`
                // at compile time and stays alive until this frame retires.
                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: *aspect,
                        mip_level: *mip_level,
                        base_array_layer: *array_layer,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: *extent,
                };
                unsafe {
                    ctx.device.cmd_copy_buffer_to_image(
                        ctx.command_buffer,
                        *src,
                        *dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        std::slice::from_ref(&region),
                    );
                }
            }
            ResolvedTransferCommand::CopyTexture { src, dst } => {
                let region = vk::ImageCopy {
                    src_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    dst_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                unsafe {
                    ctx.device.cmd_copy_image(
                        ctx.command_buffer,
                        *src,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        *dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        std::slice::from_ref(&region),
                    );
                }
            }
        }
    }
}
