//! Integration tests for the render-graph compiler, driven entirely through
//! `gpu_core`'s public API against a device-free `GraphResources` stand-in —
//! the same role `FakeResources` plays in `graph::tests`, but exercised here
//! as a black box rather than against compiler internals.

use std::collections::HashMap;

use ash::vk;

use gpu_core::error::Error;
use gpu_core::graph::{
    compile, BufferDesc, ClearValue, ColorAttachment, ExecuteContext, GraphResources, QueueKind, Registry,
    RenderGraphBuilder, RenderGraphError, RGTextureDesc, TransferCommand,
};
use gpu_core::id::{BufferId, TextureId};
use gpu_core::pool::ChunkedSparsePool;
use gpu_core::track::CacheState;
use hal::types::{BufferUsage, MemoryPreference, QueueFlags, TextureUsage};

struct FakeResources {
    buffer_pool: ChunkedSparsePool<()>,
    texture_pool: ChunkedSparsePool<()>,
    buffer_states: HashMap<BufferId, CacheState>,
    texture_states: HashMap<TextureId, CacheState>,
}

impl FakeResources {
    fn new() -> Self {
        Self {
            buffer_pool: ChunkedSparsePool::new(),
            texture_pool: ChunkedSparsePool::new(),
            buffer_states: HashMap::new(),
            texture_states: HashMap::new(),
        }
    }
}

impl GraphResources for FakeResources {
    fn queue_family(&self, queue: QueueKind) -> u32 {
        match queue {
            QueueKind::Graphics => 0,
            QueueKind::Compute => 1,
            QueueKind::Transfer => 2,
        }
    }

    fn buffer_cache_state(&mut self, id: BufferId) -> &mut CacheState {
        self.buffer_states.entry(id).or_insert_with(CacheState::new)
    }

    fn texture_cache_state(&mut self, id: TextureId) -> &mut CacheState {
        self.texture_states.entry(id).or_insert_with(CacheState::new)
    }

    fn create_transient_buffer(&mut self, _desc: &BufferDesc) -> Result<BufferId, Error> {
        Ok(self.buffer_pool.insert(()))
    }

    fn create_transient_texture(&mut self, _desc: &RGTextureDesc) -> Result<TextureId, Error> {
        Ok(self.texture_pool.insert(()))
    }

    fn raw_buffer(&self, _id: BufferId) -> vk::Buffer {
        vk::Buffer::null()
    }

    fn raw_image(&self, _id: TextureId) -> vk::Image {
        vk::Image::null()
    }

    fn image_aspect(&self, _id: TextureId) -> vk::ImageAspectFlags {
        vk::ImageAspectFlags::COLOR
    }

    fn texture_extent(&self, _id: TextureId, _mip_level: u32) -> vk::Extent3D {
        vk::Extent3D { width: 64, height: 64, depth: 1 }
    }

    fn create_staging_buffer(&mut self, _data: &[u8]) -> Result<vk::Buffer, Error> {
        Ok(vk::Buffer::null())
    }
}

fn noop_execute() -> Box<dyn FnOnce(&ExecuteContext, &Registry) + Send> {
    Box::new(|_, _| {})
}

#[test]
fn two_pass_compute_graph_with_a_shared_storage_buffer_compiles() {
    let mut builder = RenderGraphBuilder::new();
    let buffer = builder.create_buffer(BufferDesc {
        size: 4096,
        usage: BufferUsage::STORAGE,
        queue_flags: QueueFlags::COMPUTE,
        memory: MemoryPreference::GpuOnly,
        name: Some("particles".into()),
    });
    builder.add_compute_pass("simulate", QueueKind::Compute, |pass| {
        pass.write_storage_buffer(buffer);
        noop_execute()
    });
    builder.add_compute_pass("integrate", QueueKind::Compute, |pass| {
        pass.read_storage_buffer(buffer);
        noop_execute()
    });

    let mut resources = FakeResources::new();
    let graph = compile(builder, &mut resources).expect("two same-queue compute passes over one buffer should compile");
    assert_eq!(graph.pass_count(), 2);
    assert!(graph.cross_queue_waits().is_empty(), "both passes run on the same queue, no cross-queue wait is needed");
}

#[test]
fn transfer_to_compute_handoff_records_a_cross_queue_wait() {
    let mut builder = RenderGraphBuilder::new();
    let buffer = builder.create_buffer(BufferDesc {
        size: 256,
        usage: BufferUsage::STORAGE,
        queue_flags: QueueFlags::COMPUTE | QueueFlags::TRANSFER,
        memory: MemoryPreference::GpuOnly,
        name: None,
    });
    builder.add_transfer_pass(
        "seed",
        QueueKind::Transfer,
        vec![TransferCommand::UpdateBuffer { dst: buffer, offset: 0, data: vec![1u8; 16] }],
    );
    builder.add_compute_pass("consume", QueueKind::Compute, |pass| {
        pass.read_storage_buffer(buffer);
        noop_execute()
    });

    let mut resources = FakeResources::new();
    let graph = compile(builder, &mut resources).expect("transfer-then-compute over one buffer should compile");
    assert_eq!(
        graph.cross_queue_waits(),
        &[(QueueKind::Transfer, QueueKind::Compute)],
        "the consuming pass's queue should show up as needing a wait on the producing pass's queue"
    );
}

#[test]
fn update_texture_resolves_through_a_staging_buffer() {
    let mut builder = RenderGraphBuilder::new();
    let texture = builder.create_texture(RGTextureDesc::create_d2(
        vk::Format::R8G8B8A8_UNORM,
        (64, 64),
        TextureUsage::SAMPLED,
        QueueFlags::TRANSFER,
    ));
    builder.add_transfer_pass(
        "upload",
        QueueKind::Transfer,
        vec![TransferCommand::UpdateTexture {
            dst: texture,
            mip_level: 0,
            array_layer: 0,
            data: vec![0xffu8; 64 * 64 * 4],
        }],
    );

    let mut resources = FakeResources::new();
    let graph = compile(builder, &mut resources).expect("an UpdateTexture pass should compile against a fresh transient texture");
    assert_eq!(graph.pass_count(), 1);
}

#[test]
fn dangling_read_of_unwritten_transient_buffer_is_rejected() {
    let mut builder = RenderGraphBuilder::new();
    let buffer = builder.create_buffer(BufferDesc {
        size: 64,
        usage: BufferUsage::STORAGE,
        queue_flags: QueueFlags::COMPUTE,
        memory: MemoryPreference::GpuOnly,
        name: None,
    });
    builder.add_compute_pass("read-before-write", QueueKind::Compute, |pass| {
        pass.read_storage_buffer(buffer);
        noop_execute()
    });

    let mut resources = FakeResources::new();
    let err = compile(builder, &mut resources).unwrap_err();
    assert!(matches!(err, RenderGraphError::DanglingRead { .. }));
}

#[test]
fn raster_pass_clearing_its_own_transient_color_target_needs_a_layout_barrier() {
    let mut builder = RenderGraphBuilder::new();
    let color = builder.create_texture(RGTextureDesc::create_d2(
        vk::Format::R8G8B8A8_UNORM,
        (640, 480),
        TextureUsage::COLOR_ATTACHMENT,
        QueueFlags::GRAPHICS,
    ));
    builder.add_raster_pass("clear", |pass| {
        pass.color_attachment(ColorAttachment { node: color, clear: Some(ClearValue::Color([0.0; 4])) });
        noop_execute()
    });

    let mut resources = FakeResources::new();
    let graph = compile(builder, &mut resources).expect("a raster pass clearing its own transient target should compile");
    assert_eq!(
        graph.barrier_count(0),
        1,
        "UNDEFINED -> COLOR_ATTACHMENT_OPTIMAL on first use still needs one barrier"
    );
}
