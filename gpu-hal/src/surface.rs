use std::sync::Arc;

use ash::vk;

use crate::adapter::Adapter;
use crate::device::DeviceShared;
use crate::error::SurfaceError;
use crate::instance::{Instance, InstanceShared};
use crate::sync::BinarySemaphore;
use crate::types::Texture;

/// A window-system surface plus the swapchain currently backing it.
///
/// Grounded in `wgpu-hal/src/vulkan/surface.rs`'s `Surface`/`Swapchain`
/// split: `Surface` is long-lived (tied to the `Wsi` window), `Swapchain` is
/// torn down and rebuilt on `configure`/resize/`ERROR_OUT_OF_DATE_KHR`.
pub struct Surface {
    instance: Arc<InstanceShared>,
    surface_fn: ash::khr::surface::Instance,
    pub(crate) raw: vk::SurfaceKHR,
    swapchain: Option<Swapchain>,
}

pub struct SwapchainImage {
    pub index: u32,
    pub texture: Texture,
    /// Slot into `Swapchain::acquire_semaphores` the caller must pass back
    /// to `discard_texture` once the submission that waits on it has reset
    /// the semaphore to `Init` (tracked by the frame ring in `gpu-core`).
    pub(crate) semaphore_slot: usize,
    pub acquire_semaphore: vk::Semaphore,
    pub suboptimal: bool,
}

struct Swapchain {
    swapchain_fn: ash::khr::swapchain::Device,
    raw: vk::SwapchainKHR,
    extent: vk::Extent2D,
    format: vk::Format,
    images: Vec<vk::Image>,
    // Sized to `images.len()`, same as `wgpu-hal`: one acquire semaphore per
    // swapchain image slot, rotated by `next_semaphore` rather than keyed by
    // the index `vkAcquireNextImageKHR` happens to return, since that index
    // can repeat before the previous user of its semaphore has reset it.
    acquire_semaphores: Vec<BinarySemaphore>,
    next_semaphore: usize,
}

impl Swapchain {
    fn release_resources(self, device: &ash::Device) -> vk::SwapchainKHR {
        for semaphore in &self.acquire_semaphores {
            unsafe { semaphore.destroy(device) };
        }
        unsafe { self.swapchain_fn.destroy_swapchain(self.raw, None) };
        self.raw
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SurfaceConfig {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
}

impl Surface {
    pub fn new(instance: &Instance, raw: vk::SurfaceKHR) -> Self {
        let surface_fn = ash::khr::surface::Instance::new(instance.entry(), instance.raw());
        Self {
            instance: instance.shared.clone(),
            surface_fn,
            raw,
            swapchain: None,
        }
    }

    pub fn supports_present(&self, adapter: &Adapter, queue_family_index: u32) -> bool {
        unsafe {
            self.surface_fn
                .get_physical_device_surface_support(adapter.raw, queue_family_index, self.raw)
        }
        .unwrap_or(false)
    }

    /// (Re)create the swapchain, destroying the previous one only after the
    /// new one is created (`old_swapchain` chaining), as `wgpu-hal` does to
    /// avoid a glitch frame on resize.
    pub fn configure(
        &mut self,
        device: &Arc<DeviceShared>,
        config: SurfaceConfig,
    ) -> Result<(), SurfaceError> {
        let swapchain_fn = ash::khr::swapchain::Device::new(self.instance.raw(), &device.raw);
        let old_raw = self
            .swapchain
            .take()
            .map(|sc| sc.release_resources(&device.raw));

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.raw)
            .min_image_count(config.image_count)
            .image_format(config.format)
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true);
        if let Some(old) = old_raw {
            create_info = create_info.old_swapchain(old);
        }

        let raw = unsafe { swapchain_fn.create_swapchain(&create_info, None) }
            .map_err(|err| SurfaceError::Device(err.into()))?;
        let images = unsafe { swapchain_fn.get_swapchain_images(raw) }
            .map_err(|err| SurfaceError::Device(err.into()))?;

        let mut acquire_semaphores = Vec::with_capacity(images.len());
        for _ in &images {
            acquire_semaphores
                .push(BinarySemaphore::new(&device.raw).map_err(|e| SurfaceError::Device(e.into()))?);
        }

        self.swapchain = Some(Swapchain {
            swapchain_fn,
            raw,
            extent: config.extent,
            format: config.format,
            images,
            acquire_semaphores,
            next_semaphore: 0,
        });
        Ok(())
    }

    pub fn unconfigure(&mut self, device: &Arc<DeviceShared>) {
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.release_resources(&device.raw);
        }
    }

    /// Acquire the next swapchain image. On `ERROR_OUT_OF_DATE_KHR` or
    /// `ERROR_SURFACE_LOST_KHR`, returns the corresponding `SurfaceError`
    /// so the caller reconfigures or recreates the surface ,
    /// matching `wgpu-hal/src/vulkan/surface.rs`'s `acquire_texture`.
    pub fn acquire_texture(&mut self, timeout_ns: u64) -> Result<SwapchainImage, SurfaceError> {
        let swapchain = self.swapchain.as_mut().ok_or(SurfaceError::Outdated)?;
        let slot = swapchain.next_semaphore;
        let acquire_semaphore = &mut swapchain.acquire_semaphores[slot];

        let result = unsafe {
            swapchain.swapchain_fn.acquire_next_image(
                swapchain.raw,
                timeout_ns,
                acquire_semaphore.raw(),
                vk::Fence::null(),
            )
        };

        let (index, suboptimal) = match result {
            Ok(pair) => pair,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(SurfaceError::Outdated),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => return Err(SurfaceError::Lost),
            Err(err) => return Err(SurfaceError::Device(err.into())),
        };

        acquire_semaphore.mark_signalled();
        let raw_semaphore = acquire_semaphore.raw();
        swapchain.next_semaphore = (slot + 1) % swapchain.acquire_semaphores.len();

        let raw_image = swapchain.images[index as usize];
        let texture = Texture {
            raw: raw_image,
            allocation: None,
            format: swapchain.format,
            extent: vk::Extent3D {
                width: swapchain.extent.width,
                height: swapchain.extent.height,
                depth: 1,
            },
            mip_level_count: 1,
            array_layer_count: 1,
            usage: crate::types::TextureUsage::COLOR_ATTACHMENT,
            is_swapchain_owned: true,
        };

        Ok(SwapchainImage {
            index,
            texture,
            semaphore_slot: slot,
            acquire_semaphore: raw_semaphore,
            suboptimal,
        })
    }

    /// Reset the acquire semaphore for `image`'s slot back to `Init` once
    /// the submission that waited on it has retired. Must be called before
    /// that slot is acquired into again.
    pub fn discard_texture(&mut self, image: SwapchainImage) {
        if let Some(swapchain) = self.swapchain.as_mut() {
            let semaphore = &mut swapchain.acquire_semaphores[image.semaphore_slot];
            semaphore.mark_waited();
            semaphore.reset();
        }
    }

    pub fn raw_swapchain(&self) -> Option<vk::SwapchainKHR> {
        self.swapchain.as_ref().map(|sc| sc.raw)
    }

    pub fn swapchain_device_fn(&self) -> Option<&ash::khr::swapchain::Device> {
        self.swapchain.as_ref().map(|sc| &sc.swapchain_fn)
    }

    pub unsafe fn destroy(mut self, device: &Arc<DeviceShared>) {
        self.unconfigure(device);
        unsafe { self.surface_fn.destroy_surface(self.raw, None) };
    }
}
