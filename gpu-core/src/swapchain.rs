//! Bridges `hal::Surface`'s swapchain acquire/present cycle into this
//! crate's id/pool world, so the render graph's `import_swapchain` can take
//! a plain [`TextureId`] instead of a raw `vk::Image`.
//!
//! Grounded on `wgpu-core`'s `present.rs` (the thin layer that turns a
//! `hal::SwapchainTexture` into a tracked `TextureId` before handing it to
//! the rest of the resource-tracking machinery), adapted to this system's
//! single-swapchain-per-surface model.

use std::sync::Arc;

use ash::vk;

use hal::{CommandQueue, DeviceShared, SurfaceConfig, SurfaceError, SwapchainImage};

use crate::error::{Error, Result};
use crate::id::TextureId;
use crate::pool::ChunkedSparsePool;

/// The swapchain texture handed back by [`SwapchainManager::acquire`], with
/// just enough metadata for a raster pass to use it as a color attachment.
#[derive(Clone, Copy, Debug)]
pub struct AcquiredSwapchainImage {
    pub texture: TextureId,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub acquire_semaphore: vk::Semaphore,
    pub suboptimal: bool,
}

/// Owns a `hal::Surface` plus the tiny pool that gives each acquired image a
/// [`TextureId`] for the render graph's lifetime of that frame. Only one
/// image may be outstanding at a time, matching the acquire-then-present
/// discipline every frame in the ring follows.
pub struct SwapchainManager {
    surface: hal::Surface,
    // Swapchain images are never transient-allocated or destroyed by this
    // pool (the swapchain itself owns them); this is purely an id -> raw
    // handle mapping so the render graph and `GraphResources` can treat a
    // swapchain image like any other `TextureId`.
    textures: ChunkedSparsePool<vk::Image>,
    pending: Option<PendingPresent>,
}

struct PendingPresent {
    texture: TextureId,
    image: SwapchainImage,
}

impl SwapchainManager {
    pub fn new(surface: hal::Surface) -> Self {
        Self {
            surface,
            textures: ChunkedSparsePool::new(),
            pending: None,
        }
    }

    pub fn configure(&mut self, device: &Arc<DeviceShared>, config: SurfaceConfig) -> Result<()> {
        self.surface.configure(device, config).map_err(Error::from)
    }

    pub fn unconfigure(&mut self, device: &Arc<DeviceShared>) {
        self.surface.unconfigure(device);
    }

    /// Acquire the next presentable image. Returns [`SurfaceError::Outdated`]
    /// / [`SurfaceError::Lost`] unmodified so the caller can reconfigure
    /// (resize) or recreate the surface — this layer adds no retry policy of
    /// its own.
    pub fn acquire(&mut self, timeout_ns: u64) -> std::result::Result<AcquiredSwapchainImage, SurfaceError> {
        assert!(
            self.pending.is_none(),
            "acquire called again before the previous image was presented"
        );
        let image = self.surface.acquire_texture(timeout_ns)?;
        let texture = self.textures.insert(image.texture.raw);
        let acquired = AcquiredSwapchainImage {
            texture,
            format: image.texture.format,
            extent: image.texture.extent,
            acquire_semaphore: image.acquire_semaphore,
            suboptimal: image.suboptimal,
        };
        self.pending = Some(PendingPresent { texture, image });
        Ok(acquired)
    }

    /// Present the currently acquired image, waiting on `wait` (the binary
    /// semaphore the frame's final submission signals once rendering into
    /// the swapchain texture has finished). Frees the image's `TextureId`
    /// once the present call has been recorded — the underlying
    /// `vk::Image`'s lifetime remains the swapchain's, not this pool's.
    pub fn present(&mut self, queue: &CommandQueue, wait: vk::Semaphore) -> std::result::Result<bool, SurfaceError> {
        let pending = self
            .pending
            .take()
            .expect("present called without a matching acquire");

        let swapchain_fn = self
            .surface
            .swapchain_device_fn()
            .expect("present called on an unconfigured surface")
            .clone();
        let raw_swapchain = self
            .surface
            .raw_swapchain()
            .expect("present called on an unconfigured surface");

        let result = queue.present(&swapchain_fn, raw_swapchain, pending.image.index, wait);

        let _ = self.textures.remove(pending.texture);
        self.surface.discard_texture(pending.image);
        result
    }

    pub fn raw_image(&self, id: TextureId) -> vk::Image {
        self.textures
            .get(id)
            .expect("swapchain TextureId resolved after its image was presented/discarded")
    }

    pub fn image_aspect(&self) -> vk::ImageAspectFlags {
        vk::ImageAspectFlags::COLOR
    }

    pub unsafe fn destroy(self, device: &Arc<DeviceShared>) {
        unsafe { self.surface.destroy(device) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_image_carries_its_own_texture_id() {
        // Pure bookkeeping check: inserting a raw handle directly into the
        // id pool (bypassing `acquire`, which needs a live surface) still
        // produces a resolvable TextureId, exercising the same path
        // `acquire`/`raw_image` take.
        let textures: ChunkedSparsePool<vk::Image> = ChunkedSparsePool::new();
        let id: TextureId = textures.insert(vk::Image::null());
        assert_eq!(textures.get(id).unwrap(), vk::Image::null());
    }
}
