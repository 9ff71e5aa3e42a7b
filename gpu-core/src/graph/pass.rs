use ash::vk;

use crate::graph::resource::NodeId;
use crate::track::PipelineStage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

#[derive(Clone, Copy, Debug)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Clone, Copy, Debug)]
pub struct ColorAttachment {
    pub node: NodeId,
    pub clear: Option<ClearValue>,
}

#[derive(Clone, Copy, Debug)]
pub struct DepthStencilAttachment {
    pub node: NodeId,
    pub clear: Option<ClearValue>,
}

/// One raw, declarative transfer-pass operation. Unlike raster/compute
/// passes — whose GPU work is an arbitrary user callback closed over its
/// parameter struct — a transfer pass's commands are fully known at setup
/// time, so they're recorded as plain data rather than through a callback;
/// this is the same tagged-union shape the original engine's render
/// compiler dispatches on for its buffer/texture update and copy commands,
/// translated into a Rust enum instead of a C++ visitor.
pub enum TransferCommand {
    UpdateBuffer {
        dst: NodeId,
        offset: u64,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: NodeId,
        dst: NodeId,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    UpdateTexture {
        dst: NodeId,
        mip_level: u32,
        array_layer: u32,
        data: Vec<u8>,
    },
    CopyTexture {
        src: NodeId,
        dst: NodeId,
    },
}

/// What a pass actually does, once setup has finished declaring its
/// resource accesses. Raster/compute/ray-trace passes carry a boxed
/// `FnOnce` closed over the pass's own parameter struct, assembled during
/// setup and handed to the execute phase along with a `Registry` — a
/// closure already carries its captured parameters without needing a
/// separate `Any`-downcast step, the way the original engine's opaque
/// parameter blob does.
pub enum PassBody {
    Raster {
        colors: Vec<ColorAttachment>,
        depth_stencil: Option<DepthStencilAttachment>,
        execute: Box<dyn FnOnce(&super::execute::ExecuteContext, &super::execute::Registry) + Send>,
    },
    Compute {
        execute: Box<dyn FnOnce(&super::execute::ExecuteContext, &super::execute::Registry) + Send>,
    },
    Transfer {
        commands: Vec<TransferCommand>,
    },
    RayTrace {
        execute: Box<dyn FnOnce(&super::execute::ExecuteContext, &super::execute::Registry) + Send>,
    },
}

pub(crate) struct Pass {
    pub(crate) name: String,
    pub(crate) queue: QueueKind,
    pub(crate) buffer_accesses: Vec<(NodeId, PipelineStage, vk::AccessFlags2, bool)>,
    pub(crate) texture_accesses: Vec<(NodeId, PipelineStage, vk::AccessFlags2, bool, vk::ImageLayout)>,
    pub(crate) body: PassBody,
}
