//! Safe resource-pool, cache-state, bindless-descriptor, and render-graph
//! layer on top of `gpu-hal`'s unsafe Vulkan device wrapper.
//!
//! Split from `gpu-hal` the way `wgpu-core` is split from `wgpu-hal`: this
//! crate owns generational ids, chunked resource pools, the barrier/layout
//! cache-state tracker, the bindless descriptor allocator, the per-frame
//! garbage/command-pool ring, and the render graph. It never calls `ash`
//! directly except through `gpu-hal`'s safe-ish wrapper types and the raw
//! handles those wrappers expose.

#![allow(
    // Matches this system's explicit-bool-assert style in test modules.
    clippy::bool_assert_comparison,
    clippy::too_many_arguments,
)]
#![warn(trivial_casts, trivial_numeric_casts, unused_extern_crates, unused_qualifications)]

#[cfg(feature = "ray_tracing")]
pub mod accel;
pub mod bindless;
pub mod cache;
pub mod config;
pub mod error;
pub mod frame;
pub mod graph;
pub mod id;
pub mod pool;
pub mod program;
pub mod sampler;
pub mod swapchain;
pub mod system;
pub mod track;
pub mod upload;

pub use config::GpuSystemConfig;
pub use error::{Error, Result};
pub use system::{GpuSystem, TextureInitialContent};
