//! Unsafe, Vulkan-specific device wrapper.
//!
//! This crate owns every raw `ash` handle in the system: instance, adapter
//! selection, logical device, queues with their timeline semaphores, command
//! pools, and the window-system swapchain. It has no notion of a resource
//! pool, a render graph, or a descriptor allocator — those live one layer up
//! in `gpu-core`, the same split `wgpu-core` draws against `wgpu-hal`.

pub mod adapter;
pub mod command;
pub mod conv;
pub mod device;
pub mod error;
pub mod instance;
pub mod queue;
pub mod shader;
pub mod surface;
pub mod sync;
pub mod types;
pub mod wsi;

pub use adapter::{Adapter, AdapterCapabilities};
pub use command::{CommandPool, CommandPoolSet};
pub use device::{Device, DeviceShared, FramebufferKey, PipelineStateKey, RenderPassKey};
pub use error::{AdapterNotFoundError, DeviceError, InitError, SurfaceError};
pub use instance::Instance;
pub use queue::{CommandQueue, SubmitBatch, TimelineWait};
pub use shader::ShaderCompiler;
pub use surface::{Surface, SurfaceConfig, SwapchainImage};
pub use sync::{BinarySemaphore, TimelineSemaphore, TimelineSemaphoreHandle};
pub use wsi::Wsi;
