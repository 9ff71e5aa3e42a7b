use thiserror::Error;

use crate::pool::PoolError;

/// Top-level error type for every fallible `gpu-core` operation.
///
/// One `thiserror`-derived enum per crate, in the idiom of `wgpu-hal`'s
/// `DeviceError`/`SurfaceError`, rather than a grab-bag `anyhow::Error`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error(transparent)]
    Device(#[from] hal::DeviceError),
    #[error(transparent)]
    Surface(#[from] hal::SurfaceError),
    #[error(transparent)]
    Init(#[from] hal::InitError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("the render graph references a resource that was never declared: {0}")]
    UndeclaredResource(&'static str),
    #[error(transparent)]
    Graph(#[from] crate::graph::RenderGraphError),
    #[error("bindless descriptor set of kind {kind} is exhausted (capacity {capacity})")]
    DescriptorSetExhausted { kind: &'static str, capacity: u32 },
    #[error(transparent)]
    Vulkan(#[from] ash::vk::Result),
}

pub type Result<T> = std::result::Result<T, Error>;
