use ash::vk;

use crate::id::{BufferId, TextureId};
use crate::track::PipelineStage;

use super::execute::{ExecuteContext, Registry};
use super::pass::{ColorAttachment, DepthStencilAttachment, Pass, PassBody, QueueKind, TransferCommand};
use super::resource::{BufferDesc, BufferNode, NodeId, RGTextureDesc, TextureNode};

/// The node importing the current frame's acquired swapchain texture. A
/// raster pass that writes `SWAPCHAIN_NODE` as a color
/// attachment implicitly waits on the frame's `image_available` binary
/// semaphore at its first use, and the swapchain texture is left in
/// `PRESENT_SRC_KHR` by the end-of-frame submission.
pub const SWAPCHAIN_NODE_NAME: &str = "__swapchain__";

/// Records a DAG of passes declaring reads/writes of virtual resource
/// nodes. Nothing here touches the device — `compile` turns the recorded
/// graph into a [`super::compile::CompiledGraph`] against live
/// [`crate::track::CacheState`].
#[derive(Default)]
pub struct RenderGraphBuilder {
    pub(crate) buffer_nodes: Vec<BufferNode>,
    pub(crate) texture_nodes: Vec<TextureNode>,
    pub(crate) passes: Vec<Pass>,
    pub(crate) swapchain_node: Option<NodeId>,
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import_buffer(&mut self, id: BufferId) -> NodeId {
        self.buffer_nodes.push(BufferNode::Imported(id));
        NodeId((self.buffer_nodes.len() - 1) as u32)
    }

    pub fn create_buffer(&mut self, desc: BufferDesc) -> NodeId {
        self.buffer_nodes.push(BufferNode::Transient(desc));
        NodeId((self.buffer_nodes.len() - 1) as u32)
    }

    pub fn import_texture(&mut self, id: TextureId) -> NodeId {
        self.texture_nodes.push(TextureNode::Imported(id));
        NodeId((self.texture_nodes.len() - 1) as u32)
    }

    pub fn create_texture(&mut self, desc: RGTextureDesc) -> NodeId {
        self.texture_nodes.push(TextureNode::Transient(desc));
        NodeId((self.texture_nodes.len() - 1) as u32)
    }

    /// Import the frame's acquired swapchain texture. Idempotent per
    /// builder: the same node is returned on repeated calls within one
    /// frame's graph.
    pub fn import_swapchain(&mut self, acquired: TextureId) -> NodeId {
        if let Some(node) = self.swapchain_node {
            return node;
        }
        let node = self.import_texture(acquired);
        self.swapchain_node = Some(node);
        node
    }

    fn push_pass(&mut self, pass: Pass) {
        self.passes.push(pass);
    }

    /// Declare a raster pass. `declare` receives a [`RasterPassBuilder`] to
    /// record color/depth attachments and shader-resource accesses; its
    /// return value is the boxed execute closure invoked during
    /// [`super::execute::execute`].
    pub fn add_raster_pass<F>(&mut self, name: impl Into<String>, declare: F)
    where
        F: FnOnce(&mut RasterPassBuilder) -> Box<dyn FnOnce(&ExecuteContext, &Registry) + Send>,
    {
        let mut inner = RasterPassBuilder {
            colors: Vec::new(),
            depth_stencil: None,
            buffer_accesses: Vec::new(),
            texture_accesses: Vec::new(),
        };
        let execute = declare(&mut inner);
        self.push_pass(Pass {
            name: name.into(),
            queue: QueueKind::Graphics,
            buffer_accesses: inner.buffer_accesses,
            texture_accesses: inner.texture_accesses,
            body: PassBody::Raster {
                colors: inner.colors,
                depth_stencil: inner.depth_stencil,
                execute,
            },
        });
    }

    pub fn add_compute_pass<F>(&mut self, name: impl Into<String>, queue: QueueKind, declare: F)
    where
        F: FnOnce(&mut ComputePassBuilder) -> Box<dyn FnOnce(&ExecuteContext, &Registry) + Send>,
    {
        assert!(
            matches!(queue, QueueKind::Compute | QueueKind::Graphics),
            "compute passes run on the compute or graphics queue"
        );
        let mut inner = ComputePassBuilder {
            buffer_accesses: Vec::new(),
            texture_accesses: Vec::new(),
        };
        let execute = declare(&mut inner);
        self.push_pass(Pass {
            name: name.into(),
            queue,
            buffer_accesses: inner.buffer_accesses,
            texture_accesses: inner.texture_accesses,
            body: PassBody::Compute { execute },
        });
    }

    pub fn add_transfer_pass(
        &mut self,
        name: impl Into<String>,
        queue: QueueKind,
        commands: Vec<TransferCommand>,
    ) {
        let mut buffer_accesses = Vec::new();
        let mut texture_accesses = Vec::new();
        for command in &commands {
            match command {
                TransferCommand::UpdateBuffer { dst, .. } => {
                    buffer_accesses.push((*dst, PipelineStage::Transfer, vk::AccessFlags2::TRANSFER_WRITE, true));
                }
                TransferCommand::CopyBuffer { src, dst, .. } => {
                    buffer_accesses.push((*src, PipelineStage::Transfer, vk::AccessFlags2::TRANSFER_READ, false));
                    buffer_accesses.push((*dst, PipelineStage::Transfer, vk::AccessFlags2::TRANSFER_WRITE, true));
                }
                TransferCommand::UpdateTexture { dst, .. } => {
                    texture_accesses.push((
                        *dst,
                        PipelineStage::Transfer,
                        vk::AccessFlags2::TRANSFER_WRITE,
                        true,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    ));
                }
                TransferCommand::CopyTexture { src, dst } => {
                    texture_accesses.push((
                        *src,
                        PipelineStage::Transfer,
                        vk::AccessFlags2::TRANSFER_READ,
                        false,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    ));
                    texture_accesses.push((
                        *dst,
                        PipelineStage::Transfer,
                        vk::AccessFlags2::TRANSFER_WRITE,
                        true,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    ));
                }
            }
        }
        self.push_pass(Pass {
            name: name.into(),
            queue,
            buffer_accesses,
            texture_accesses,
            body: PassBody::Transfer { commands },
        });
    }

    #[cfg(feature = "ray_tracing")]
    pub fn add_ray_trace_pass<F>(&mut self, name: impl Into<String>, declare: F)
    where
        F: FnOnce(&mut RayTracePassBuilder) -> Box<dyn FnOnce(&ExecuteContext, &Registry) + Send>,
    {
        let mut inner = RayTracePassBuilder {
            buffer_accesses: Vec::new(),
            texture_accesses: Vec::new(),
        };
        let execute = declare(&mut inner);
        self.push_pass(Pass {
            name: name.into(),
            queue: QueueKind::Compute,
            buffer_accesses: inner.buffer_accesses,
            texture_accesses: inner.texture_accesses,
            body: PassBody::RayTrace { execute },
        });
    }
}

pub struct RasterPassBuilder {
    colors: Vec<ColorAttachment>,
    depth_stencil: Option<DepthStencilAttachment>,
    buffer_accesses: Vec<(NodeId, PipelineStage, vk::AccessFlags2, bool)>,
    texture_accesses: Vec<(NodeId, PipelineStage, vk::AccessFlags2, bool, vk::ImageLayout)>,
}

impl RasterPassBuilder {
    pub fn color_attachment(&mut self, attachment: ColorAttachment) -> &mut Self {
        self.texture_accesses.push((
            attachment.node,
            PipelineStage::ColorAttachmentOutput,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            true,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ));
        self.colors.push(attachment);
        self
    }

    pub fn depth_stencil_attachment(&mut self, attachment: DepthStencilAttachment) -> &mut Self {
        self.texture_accesses.push((
            attachment.node,
            PipelineStage::LateFragmentTests,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            true,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ));
        self.depth_stencil = Some(attachment);
        self
    }

    pub fn read_storage_buffer(&mut self, node: NodeId) -> &mut Self {
        self.buffer_accesses.push((node, PipelineStage::FragmentShader, vk::AccessFlags2::SHADER_STORAGE_READ, false));
        self
    }

    pub fn write_storage_buffer(&mut self, node: NodeId) -> &mut Self {
        self.buffer_accesses.push((node, PipelineStage::FragmentShader, vk::AccessFlags2::SHADER_STORAGE_WRITE, true));
        self
    }

    pub fn sample_texture(&mut self, node: NodeId) -> &mut Self {
        self.texture_accesses.push((
            node,
            PipelineStage::FragmentShader,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
            false,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ));
        self
    }

    pub fn read_write_storage_texture(&mut self, node: NodeId) -> &mut Self {
        self.texture_accesses.push((
            node,
            PipelineStage::FragmentShader,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            true,
            vk::ImageLayout::GENERAL,
        ));
        self
    }
}

pub struct ComputePassBuilder {
    buffer_accesses: Vec<(NodeId, PipelineStage, vk::AccessFlags2, bool)>,
    texture_accesses: Vec<(NodeId, PipelineStage, vk::AccessFlags2, bool, vk::ImageLayout)>,
}

impl ComputePassBuilder {
    pub fn read_storage_buffer(&mut self, node: NodeId) -> &mut Self {
        self.buffer_accesses.push((node, PipelineStage::ComputeShader, vk::AccessFlags2::SHADER_STORAGE_READ, false));
        self
    }

    pub fn write_storage_buffer(&mut self, node: NodeId) -> &mut Self {
        self.buffer_accesses.push((node, PipelineStage::ComputeShader, vk::AccessFlags2::SHADER_STORAGE_WRITE, true));
        self
    }

    pub fn sample_texture(&mut self, node: NodeId) -> &mut Self {
        self.texture_accesses.push((
            node,
            PipelineStage::ComputeShader,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
            false,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ));
        self
    }

    pub fn read_write_storage_texture(&mut self, node: NodeId) -> &mut Self {
        self.texture_accesses.push((
            node,
            PipelineStage::ComputeShader,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            true,
            vk::ImageLayout::GENERAL,
        ));
        self
    }

    pub fn read_acceleration_structure(&mut self, node: NodeId) -> &mut Self {
        self.buffer_accesses.push((node, PipelineStage::ComputeShader, vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR, false));
        self
    }
}

#[cfg(feature = "ray_tracing")]
pub struct RayTracePassBuilder {
    buffer_accesses: Vec<(NodeId, PipelineStage, vk::AccessFlags2, bool)>,
    texture_accesses: Vec<(NodeId, PipelineStage, vk::AccessFlags2, bool, vk::ImageLayout)>,
}

#[cfg(feature = "ray_tracing")]
impl RayTracePassBuilder {
    pub fn read_storage_buffer(&mut self, node: NodeId) -> &mut Self {
        self.buffer_accesses.push((node, PipelineStage::RayTracingShader, vk::AccessFlags2::SHADER_STORAGE_READ, false));
        self
    }

    pub fn write_storage_buffer(&mut self, node: NodeId) -> &mut Self {
        self.buffer_accesses.push((node, PipelineStage::RayTracingShader, vk::AccessFlags2::SHADER_STORAGE_WRITE, true));
        self
    }

    pub fn sample_texture(&mut self, node: NodeId) -> &mut Self {
        self.texture_accesses.push((
            node,
            PipelineStage::RayTracingShader,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
            false,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ));
        self
    }

    pub fn write_storage_texture(&mut self, node: NodeId) -> &mut Self {
        self.texture_accesses.push((
            node,
            PipelineStage::RayTracingShader,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
            true,
            vk::ImageLayout::GENERAL,
        ));
        self
    }

    pub fn read_acceleration_structure(&mut self, node: NodeId) -> &mut Self {
        self.buffer_accesses.push((node, PipelineStage::RayTracingShader, vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR, false));
        self
    }
}
