use ash::vk;

use hal::types::{BufferUsage, MemoryPreference, QueueFlags, TextureUsage};

use crate::id::{BufferId, TextureId};
use crate::track::PipelineStage;

/// Handle to a node inside one [`super::builder::RenderGraphBuilder`]. Only
/// valid for the builder (and the graph compiled from it) that produced it —
/// unlike [`crate::id::Id`], there's no generation to check, since a
/// render graph is rebuilt from scratch every frame and a node index from
/// last frame's graph is a programmer error, not a legitimate stale handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub queue_flags: QueueFlags,
    pub memory: MemoryPreference,
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureDimension {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
}

#[derive(Clone, Debug)]
pub struct RGTextureDesc {
    pub dimension: TextureDimension,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
    pub queue_flags: QueueFlags,
    pub name: Option<String>,
}

impl RGTextureDesc {
    /// Convenience constructor for the common case : a
    /// single-sample, single-mip 2D color target sized to `extent`.
    pub fn create_d2(
        format: vk::Format,
        extent: (u32, u32),
        usage: TextureUsage,
        queue_flags: QueueFlags,
    ) -> Self {
        Self {
            dimension: TextureDimension::D2,
            format,
            extent: vk::Extent3D {
                width: extent.0,
                height: extent.1,
                depth: 1,
            },
            mip_level_count: 1,
            array_layer_count: 1,
            sample_count: 1,
            usage,
            queue_flags,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }
}

pub(crate) enum BufferNode {
    Imported(BufferId),
    Transient(BufferDesc),
}

pub(crate) enum TextureNode {
    Imported(TextureId),
    Transient(RGTextureDesc),
}

/// One declared touch of a resource node by a pass: where in the declared
/// pass order it happened, what queue it ran on, which pipeline stage and
/// access mask it used, and whether it wrote.
#[derive(Clone, Copy, Debug)]
pub struct AccessRecord {
    pub pass_index: usize,
    pub stage: PipelineStage,
    pub access: vk::AccessFlags2,
    pub is_write: bool,
    pub queue: super::pass::QueueKind,
    pub layout: vk::ImageLayout,
}

#[derive(Default)]
pub(crate) struct NodeHistory {
    pub(crate) accesses: Vec<AccessRecord>,
}

impl NodeHistory {
    pub(crate) fn first_use(&self) -> Option<usize> {
        self.accesses.first().map(|a| a.pass_index)
    }

    pub(crate) fn last_use(&self) -> Option<usize> {
        self.accesses.last().map(|a| a.pass_index)
    }

    pub(crate) fn has_write_before(&self, pass_index: usize) -> bool {
        self.accesses
            .iter()
            .any(|a| a.pass_index < pass_index && a.is_write)
    }
}
