use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::DeviceError;
use crate::instance::Instance;

/// The window-system collaborator this crate needs from its host application:
/// enough to create a `VkSurfaceKHR` and to know the current framebuffer size
/// for swapchain (re)configuration.
///
/// `raw-window-handle`'s `HasWindowHandle`/`HasDisplayHandle` already cover
/// surface creation; the framebuffer-size query is the one thing this system
/// adds on top, since `configure`'s `SurfaceConfig::extent` has to come from
/// somewhere other than the handles themselves.
pub trait Wsi: HasWindowHandle + HasDisplayHandle {
    fn framebuffer_size(&self) -> (u32, u32);
}

/// Create a `VkSurfaceKHR` for `window` via `ash-window`, the same helper
/// crate `wgpu-hal`'s Vulkan backend uses to dispatch over every
/// platform-specific `vkCreate*SurfaceKHR` entry point.
///
/// # Safety
///
/// `window` must outlive the returned surface handle.
pub unsafe fn create_surface(
    instance: &Instance,
    window: &dyn Wsi,
) -> Result<vk::SurfaceKHR, DeviceError> {
    let display_handle = window
        .display_handle()
        .map_err(|_| DeviceError::Unexpected(vk::Result::ERROR_INITIALIZATION_FAILED))?
        .as_raw();
    let window_handle = window
        .window_handle()
        .map_err(|_| DeviceError::Unexpected(vk::Result::ERROR_INITIALIZATION_FAILED))?
        .as_raw();
    unsafe {
        ash_window::create_surface(
            instance.entry(),
            instance.raw(),
            display_handle,
            window_handle,
            None,
        )
    }
    .map_err(DeviceError::from)
}
