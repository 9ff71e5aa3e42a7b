use ash::vk;
use thiserror::Error;

use crate::id::{BufferId, TextureId};
use crate::track::CacheState;

use super::builder::RenderGraphBuilder;
use super::pass::{Pass, PassBody, QueueKind, TransferCommand};
use super::resource::{AccessRecord, BufferDesc, BufferNode, NodeHistory, NodeId, RGTextureDesc, TextureNode};

#[derive(Debug, Error)]
pub enum RenderGraphError {
    #[error("pass {pass} reads node {node:?} before it has been written or imported")]
    DanglingRead { pass: usize, node: NodeId },
    #[error("out of memory allocating transient resources for the render graph")]
    TransientAllocationFailed,
    #[error(transparent)]
    Resource(#[from] crate::error::Error),
}

pub type Result<T> = std::result::Result<T, RenderGraphError>;

/// Collaborator the compiler allocates transient resources through and
/// looks up persistent [`CacheState`] in, kept as a trait so `compile`
/// doesn't need to know the concrete resource-pool/descriptor-allocator
/// wiring of the embedding system.
pub trait GraphResources {
    fn queue_family(&self, queue: QueueKind) -> u32;
    fn buffer_cache_state(&mut self, id: BufferId) -> &mut CacheState;
    fn texture_cache_state(&mut self, id: TextureId) -> &mut CacheState;
    fn create_transient_buffer(&mut self, desc: &BufferDesc) -> std::result::Result<BufferId, crate::error::Error>;
    fn create_transient_texture(&mut self, desc: &RGTextureDesc) -> std::result::Result<TextureId, crate::error::Error>;
    /// Raw handles, needed to fill in the barriers `compile` synthesizes —
    /// a `VkImageMemoryBarrier2`/`VkBufferMemoryBarrier2` names the object
    /// directly, it can't go through a `BufferId`/`TextureId` indirection.
    fn raw_buffer(&self, id: BufferId) -> vk::Buffer;
    fn raw_image(&self, id: TextureId) -> vk::Image;
    fn image_aspect(&self, id: TextureId) -> vk::ImageAspectFlags;
    /// The extent of `id`'s mip level `mip_level`, needed to fill in a real
    /// `VkBufferImageCopy::imageExtent` for `TransferCommand::UpdateTexture`.
    fn texture_extent(&self, id: TextureId, mip_level: u32) -> vk::Extent3D;
    /// Allocate a host-visible buffer sized to `data.len()`, copy `data`
    /// into it, and keep it alive until this frame's submission retires.
    /// Backs `TransferCommand::UpdateTexture`'s staging upload: the data a
    /// pass declares at graph-build time has to live somewhere the GPU can
    /// read it from by the time the recorded `vkCmdCopyBufferToImage` runs.
    fn create_staging_buffer(&mut self, data: &[u8]) -> std::result::Result<vk::Buffer, crate::error::Error>;
}

#[derive(Clone, Copy, Debug)]
pub struct ResourceBarrier {
    pub src_stages: vk::PipelineStageFlags2,
    pub src_accesses: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_accesses: vk::AccessFlags2,
    pub needs_ownership_transfer: bool,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
    pub image: Option<ImageBarrierDetail>,
    pub buffer: Option<BufferBarrierDetail>,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageBarrierDetail {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect_mask: vk::ImageAspectFlags,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferBarrierDetail {
    pub buffer: vk::Buffer,
}

/// Like [`super::pass::TransferCommand`] but with every [`NodeId`] resolved
/// to the raw handle `compile` bound it to, so `execute` never needs a
/// `GraphResources` reference just to record a transfer pass.
pub(crate) enum ResolvedTransferCommand {
    UpdateBuffer { dst: vk::Buffer, offset: u64, data: Vec<u8> },
    CopyBuffer { src: vk::Buffer, dst: vk::Buffer, src_offset: u64, dst_offset: u64, size: u64 },
    UpdateTexture {
        dst: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_level: u32,
        array_layer: u32,
        src: vk::Buffer,
        extent: vk::Extent3D,
    },
    CopyTexture { src: vk::Image, dst: vk::Image },
}

pub(crate) enum CompiledPassBody {
    Raster {
        execute: Box<dyn FnOnce(&super::execute::ExecuteContext, &super::execute::Registry) + Send>,
    },
    Compute {
        execute: Box<dyn FnOnce(&super::execute::ExecuteContext, &super::execute::Registry) + Send>,
    },
    Transfer {
        commands: Vec<ResolvedTransferCommand>,
    },
    RayTrace {
        execute: Box<dyn FnOnce(&super::execute::ExecuteContext, &super::execute::Registry) + Send>,
    },
}

pub(crate) struct CompiledPass {
    pub(crate) name: String,
    pub(crate) queue: QueueKind,
    pub(crate) barriers: Vec<ResourceBarrier>,
    pub(crate) body: CompiledPassBody,
    pub(crate) buffer_ids: Vec<(NodeId, BufferId)>,
    pub(crate) texture_ids: Vec<(NodeId, TextureId)>,
}

pub struct CompiledGraph {
    pub(crate) passes: Vec<CompiledPass>,
    /// Distinct `(producer, consumer)` queue-kind pairs this graph requires
    /// a cross-queue timeline wait for, derived from which accesses
    /// actually triggered `BarrierRequirement::needs_ownership_transfer` —
    /// not a structural "transfer always precedes graphics" assumption.
    /// `GpuSystem::submit_frame` turns each pair into a real
    /// `TimelineWait` sourced from the producer queue's post-submit
    /// timeline handle.
    pub(crate) cross_queue_waits: Vec<(QueueKind, QueueKind)>,
}

impl CompiledGraph {
    /// Number of passes the graph compiled down to, after validation (no
    /// folding is performed yet, so this matches the builder's pass count).
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Distinct `(producer, consumer)` queue-kind pairs requiring a
    /// cross-queue timeline wait, in the order `compile` discovered them.
    pub fn cross_queue_waits(&self) -> &[(QueueKind, QueueKind)] {
        &self.cross_queue_waits
    }

    /// How many barriers `compile` synthesized ahead of the pass at
    /// `pass_index`.
    pub fn barrier_count(&self, pass_index: usize) -> usize {
        self.passes[pass_index].barriers.len()
    }
}

/// Turn a recorded [`RenderGraphBuilder`] into a [`CompiledGraph`]: validate
/// the DAG, compute transient lifetimes, allocate transient resources,
/// synthesize per-pass barriers from each node's [`CacheState`], and hand
/// back a plan [`super::execute::execute`] can record and submit.
///
/// Covers DAG validation, transient resolution, and barrier synthesis.
/// Render-pass folding (merging adjacent compatible raster passes into one
/// `VkRenderPass` with multiple subpasses) is intentionally not implemented
/// beyond the single-subpass baseline, and transient aliasing is deferred —
/// every transient is independently allocated for now, which is correct but
/// leaves memory on the table for a future pooled allocator.
pub fn compile(
    builder: RenderGraphBuilder,
    resources: &mut dyn GraphResources,
) -> Result<CompiledGraph> {
    let RenderGraphBuilder {
        buffer_nodes,
        texture_nodes,
        passes,
        ..
    } = builder;

    let mut buffer_histories: Vec<NodeHistory> =
        (0..buffer_nodes.len()).map(|_| NodeHistory::default()).collect();
    let mut texture_histories: Vec<NodeHistory> =
        (0..texture_nodes.len()).map(|_| NodeHistory::default()).collect();

    validate_and_record_histories(&passes, &buffer_nodes, &texture_nodes, &mut buffer_histories, &mut texture_histories)?;

    let buffer_ids = resolve_buffer_nodes(&buffer_nodes, resources)?;
    let texture_ids = resolve_texture_nodes(&texture_nodes, resources)?;

    // Built once so a barrier's raw `queue_family` (as recorded in a
    // resource's `CacheState`) can be mapped back to the `QueueKind` a
    // cross-queue wait needs to name.
    let kind_families = [
        (QueueKind::Graphics, resources.queue_family(QueueKind::Graphics)),
        (QueueKind::Compute, resources.queue_family(QueueKind::Compute)),
        (QueueKind::Transfer, resources.queue_family(QueueKind::Transfer)),
    ];
    let kind_of_family = |family: u32| kind_families.iter().find(|(_, f)| *f == family).map(|(k, _)| *k);
    let mut cross_queue_waits: Vec<(QueueKind, QueueKind)> = Vec::new();

    let mut compiled_passes = Vec::with_capacity(passes.len());
    for pass in passes.into_iter() {
        let mut barriers = Vec::new();
        let mut touched_buffers = Vec::new();
        let mut touched_textures = Vec::new();

        for &(node, stage, access, is_write) in &pass.buffer_accesses {
            let id = buffer_ids[node.0 as usize];
            touched_buffers.push((node, id));
            let queue_family = resources.queue_family(pass.queue);
            let state = resources.buffer_cache_state(id);
            let old_queue_owner = state.queue_owner;
            let requirement = state.commit_access(queue_family, stage, access, is_write, vk::ImageLayout::UNDEFINED);
            if requirement.needs_ownership_transfer {
                if let Some(src_kind) = old_queue_owner.and_then(kind_of_family) {
                    let pair = (src_kind, pass.queue);
                    if src_kind != pass.queue && !cross_queue_waits.contains(&pair) {
                        cross_queue_waits.push(pair);
                    }
                }
            }
            if requirement.needs_barrier {
                barriers.push(ResourceBarrier {
                    src_stages: requirement.src_stages,
                    src_accesses: requirement.src_accesses,
                    dst_stages: stage_mask(stage),
                    dst_accesses: access,
                    needs_ownership_transfer: requirement.needs_ownership_transfer,
                    src_queue_family: old_queue_owner.unwrap_or(queue_family),
                    dst_queue_family: queue_family,
                    image: None,
                    buffer: Some(BufferBarrierDetail {
                        buffer: resources.raw_buffer(id),
                    }),
                });
            }
        }

        for &(node, stage, access, is_write, layout) in &pass.texture_accesses {
            let id = texture_ids[node.0 as usize];
            touched_textures.push((node, id));
            let queue_family = resources.queue_family(pass.queue);
            let state = resources.texture_cache_state(id);
            let old_layout = state.layout;
            let old_queue_owner = state.queue_owner;
            let requirement = state.commit_access(queue_family, stage, access, is_write, layout);
            if requirement.needs_ownership_transfer {
                if let Some(src_kind) = old_queue_owner.and_then(kind_of_family) {
                    let pair = (src_kind, pass.queue);
                    if src_kind != pass.queue && !cross_queue_waits.contains(&pair) {
                        cross_queue_waits.push(pair);
                    }
                }
            }
            if requirement.needs_barrier {
                barriers.push(ResourceBarrier {
                    src_stages: requirement.src_stages,
                    src_accesses: requirement.src_accesses,
                    dst_stages: stage_mask(stage),
                    dst_accesses: access,
                    needs_ownership_transfer: requirement.needs_ownership_transfer,
                    src_queue_family: old_queue_owner.unwrap_or(queue_family),
                    dst_queue_family: queue_family,
                    image: Some(ImageBarrierDetail {
                        image: resources.raw_image(id),
                        old_layout,
                        new_layout: layout,
                        aspect_mask: resources.image_aspect(id),
                    }),
                    buffer: None,
                });
            }
        }

        let body = match pass.body {
            PassBody::Raster { execute, .. } => CompiledPassBody::Raster { execute },
            PassBody::Compute { execute } => CompiledPassBody::Compute { execute },
            PassBody::RayTrace { execute } => CompiledPassBody::RayTrace { execute },
            PassBody::Transfer { commands } => CompiledPassBody::Transfer {
                commands: resolve_transfer_commands(commands, &touched_buffers, &touched_textures, resources)?,
            },
        };

        compiled_passes.push(CompiledPass {
            name: pass.name,
            queue: pass.queue,
            barriers,
            body,
            buffer_ids: touched_buffers,
            texture_ids: touched_textures,
        });
    }

    Ok(CompiledGraph {
        passes: compiled_passes,
        cross_queue_waits,
    })
}

fn stage_mask(stage: crate::track::PipelineStage) -> vk::PipelineStageFlags2 {
    stage.vk_mask()
}

fn validate_and_record_histories(
    passes: &[Pass],
    buffer_nodes: &[BufferNode],
    texture_nodes: &[TextureNode],
    buffer_histories: &mut [NodeHistory],
    texture_histories: &mut [NodeHistory],
) -> Result<()> {
    for (pass_index, pass) in passes.iter().enumerate() {
        for &(node, stage, access, is_write) in &pass.buffer_accesses {
            let history = &mut buffer_histories[node.0 as usize];
            let imported = matches!(buffer_nodes[node.0 as usize], BufferNode::Imported(_));
            if !is_write && !imported && history.accesses.is_empty() {
                return Err(RenderGraphError::DanglingRead { pass: pass_index, node });
            }
            history.accesses.push(AccessRecord {
                pass_index,
                stage,
                access,
                is_write,
                queue: pass.queue,
                layout: vk::ImageLayout::UNDEFINED,
            });
        }
        for &(node, stage, access, is_write, layout) in &pass.texture_accesses {
            let history = &mut texture_histories[node.0 as usize];
            let imported = matches!(texture_nodes[node.0 as usize], TextureNode::Imported(_));
            if !is_write && !imported && history.accesses.is_empty() {
                return Err(RenderGraphError::DanglingRead { pass: pass_index, node });
            }
            history.accesses.push(AccessRecord {
                pass_index,
                stage,
                access,
                is_write,
                queue: pass.queue,
                layout,
            });
        }
    }
    Ok(())
}

fn resolve_transfer_commands(
    commands: Vec<TransferCommand>,
    buffer_ids: &[(NodeId, BufferId)],
    texture_ids: &[(NodeId, TextureId)],
    resources: &mut dyn GraphResources,
) -> Result<Vec<ResolvedTransferCommand>> {
    let buffer_of = |node: NodeId| {
        buffer_ids
            .iter()
            .find(|(n, _)| *n == node)
            .map(|(_, id)| *id)
            .expect("transfer command references a node the pass never declared")
    };
    let texture_of = |node: NodeId| {
        texture_ids
            .iter()
            .find(|(n, _)| *n == node)
            .map(|(_, id)| *id)
            .expect("transfer command references a node the pass never declared")
    };
    commands
        .into_iter()
        .map(|command| match command {
            TransferCommand::UpdateBuffer { dst, offset, data } => Ok(ResolvedTransferCommand::UpdateBuffer {
                dst: resources.raw_buffer(buffer_of(dst)),
                offset,
                data,
            }),
            TransferCommand::CopyBuffer { src, dst, src_offset, dst_offset, size } => Ok(ResolvedTransferCommand::CopyBuffer {
                src: resources.raw_buffer(buffer_of(src)),
                dst: resources.raw_buffer(buffer_of(dst)),
                src_offset,
                dst_offset,
                size,
            }),
            TransferCommand::UpdateTexture { dst, mip_level, array_layer, data } => {
                let id = texture_of(dst);
                let src = resources.create_staging_buffer(&data)?;
                Ok(ResolvedTransferCommand::UpdateTexture {
                    dst: resources.raw_image(id),
                    aspect: resources.image_aspect(id),
                    mip_level,
                    array_layer,
                    src,
                    extent: resources.texture_extent(id, mip_level),
                })
            }
            TransferCommand::CopyTexture { src, dst } => Ok(ResolvedTransferCommand::CopyTexture {
                src: resources.raw_image(texture_of(src)),
                dst: resources.raw_image(texture_of(dst)),
            }),
        })
        .collect()
}

fn resolve_buffer_nodes(
    nodes: &[BufferNode],
    resources: &mut dyn GraphResources,
) -> Result<Vec<BufferId>> {
    nodes
        .iter()
        .map(|node| match node {
            BufferNode::Imported(id) => Ok(*id),
            BufferNode::Transient(desc) => resources
                .create_transient_buffer(desc)
                .map_err(RenderGraphError::Resource),
        })
        .collect()
}

fn resolve_texture_nodes(
    nodes: &[TextureNode],
    resources: &mut dyn GraphResources,
) -> Result<Vec<TextureId>> {
    nodes
        .iter()
        .map(|node| match node {
            TextureNode::Imported(id) => Ok(*id),
            TextureNode::Transient(desc) => resources
                .create_transient_texture(desc)
                .map_err(RenderGraphError::Resource),
        })
        .collect()
}
