use ash::vk;
use parking_lot::Mutex;

use crate::id::DescriptorId;

/// A free-list allocator over one `VkDescriptorSet`'s binding slots.
///
/// Ported directly from `BindlessDescriptorSet` in
/// `original_source/soul/src/gpu/intern/bindless_descriptor_allocator.{h,cpp}`:
/// an implicit linked list threaded through an array (`list[i] = i + 1`),
/// `free_head` pointing at the first free slot, `u32::MAX` meaning "list
/// exhausted". `create_descriptor` pops `free_head`, `destroy_descriptor`
/// pushes back onto it — O(1) both ways, no generation tracking (see
/// `crate::id::DescriptorId`'s doc comment for why).
struct FreeList {
    next: Vec<u32>,
    head: u32,
    capacity: u32,
}

const LIST_END: u32 = u32::MAX;

impl FreeList {
    fn new(capacity: u32) -> Self {
        let next = (1..=capacity).collect();
        Self {
            next,
            head: 0,
            capacity,
        }
    }

    fn alloc(&mut self) -> Option<u32> {
        if self.head >= self.capacity {
            return None;
        }
        let index = self.head;
        self.head = self.next[index as usize];
        Some(index)
    }

    fn free(&mut self, index: u32) {
        debug_assert!(index < self.capacity, "descriptor index out of range");
        self.next[index as usize] = self.head;
        self.head = index;
    }
}

/// One of the five bindless descriptor sets : storage
/// buffers, samplers, sampled images, storage images, acceleration
/// structures. Each wraps its own free list behind a `parking_lot::Mutex` —
/// a short critical section (pop/push one index plus one `vkUpdateDescriptorSets`
/// call), the same primitive `wgpu-hal`/`wgpu-core` reach for throughout
/// rather than a spinlock.
pub struct BindlessDescriptorSet {
    pub(crate) raw: vk::DescriptorSet,
    pub(crate) layout: vk::DescriptorSetLayout,
    pub(crate) binding: u32,
    free_list: Mutex<FreeList>,
}

impl BindlessDescriptorSet {
    /// Construct a set over an already-allocated `VkDescriptorSet`/layout.
    /// Exposed (not `pub(crate)`) so the free-list allocation behavior can
    /// be exercised from an integration test without standing up a device.
    pub fn new(
        raw: vk::DescriptorSet,
        layout: vk::DescriptorSetLayout,
        binding: u32,
        capacity: u32,
    ) -> Self {
        Self {
            raw,
            layout,
            binding,
            free_list: Mutex::new(FreeList::new(capacity)),
        }
    }

    pub fn allocate(&self) -> Option<DescriptorId> {
        self.free_list.lock().alloc()
    }

    pub fn free(&self, id: DescriptorId) {
        self.free_list.lock().free(id);
    }

    /// Write one descriptor slot via `vkUpdateDescriptorSets`, update-after-bind.
    /// Callers build the `vk::DescriptorImageInfo`/`vk::DescriptorBufferInfo`/
    /// acceleration-structure `push_next` payload; this just pins it to `id`'s
    /// slot in this set's binding.
    fn write(&self, device: &ash::Device, id: DescriptorId, descriptor_type: vk::DescriptorType, write: vk::WriteDescriptorSet) {
        let write = write
            .dst_set(self.raw)
            .dst_binding(self.binding)
            .dst_array_element(id)
            .descriptor_type(descriptor_type);
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BindlessCapacities {
    pub storage_buffers: u32,
    pub samplers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
    pub acceleration_structures: u32,
}

/// The five-set bindless allocator plus the one shared pipeline layout every
/// pipeline in the system uses.
pub struct BindlessDescriptorAllocator {
    pub storage_buffers: BindlessDescriptorSet,
    pub samplers: BindlessDescriptorSet,
    pub sampled_images: BindlessDescriptorSet,
    pub storage_images: BindlessDescriptorSet,
    pub acceleration_structures: Option<BindlessDescriptorSet>,
    pub(crate) pool: vk::DescriptorPool,
    pub pipeline_layout: vk::PipelineLayout,
}

pub const STORAGE_BUFFER_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;
pub const SAMPLED_IMAGE_BINDING: u32 = 2;
pub const STORAGE_IMAGE_BINDING: u32 = 3;
pub const ACCELERATION_STRUCTURE_BINDING: u32 = 4;

/// Push-constant budget shared by every pipeline : 128 bytes,
/// visible to every shader stage, matching
/// `original_source`'s `VK_SHADER_STAGE_ALL` push-constant range.
pub const PUSH_CONSTANT_SIZE: u32 = 128;

impl BindlessDescriptorAllocator {
    /// Build the descriptor pool (`UPDATE_AFTER_BIND_BIT`, one pool size per
    /// kind sized to `capacities`), the five set layouts + sets, and the
    /// shared pipeline layout. Ray-tracing is only included when the
    /// `ray_tracing` feature is enabled and the device exposes the
    /// acceleration-structure extension.
    pub fn new(
        device: &ash::Device,
        capacities: BindlessCapacities,
        with_ray_tracing: bool,
    ) -> Result<Self, vk::Result> {
        let mut pool_sizes = vec![
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: capacities.storage_buffers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: capacities.samplers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: capacities.sampled_images,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: capacities.storage_images,
            },
        ];
        if with_ray_tracing {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: capacities.acceleration_structures,
            });
        }

        let pool_create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(pool_sizes.len() as u32)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_create_info, None)? };

        let storage_buffers = Self::make_set(
            device,
            pool,
            STORAGE_BUFFER_BINDING,
            vk::DescriptorType::STORAGE_BUFFER,
            capacities.storage_buffers,
        )?;
        let samplers = Self::make_set(
            device,
            pool,
            SAMPLER_BINDING,
            vk::DescriptorType::SAMPLER,
            capacities.samplers,
        )?;
        let sampled_images = Self::make_set(
            device,
            pool,
            SAMPLED_IMAGE_BINDING,
            vk::DescriptorType::SAMPLED_IMAGE,
            capacities.sampled_images,
        )?;
        let storage_images = Self::make_set(
            device,
            pool,
            STORAGE_IMAGE_BINDING,
            vk::DescriptorType::STORAGE_IMAGE,
            capacities.storage_images,
        )?;
        let acceleration_structures = if with_ray_tracing {
            Some(Self::make_set(
                device,
                pool,
                ACCELERATION_STRUCTURE_BINDING,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                capacities.acceleration_structures,
            )?)
        } else {
            None
        };

        let mut set_layouts = vec![
            storage_buffers.layout,
            samplers.layout,
            sampled_images.layout,
            storage_images.layout,
        ];
        if let Some(accel) = &acceleration_structures {
            set_layouts.push(accel.layout);
        }

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE);
        let layout_create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        let pipeline_layout =
            unsafe { device.create_pipeline_layout(&layout_create_info, None)? };

        Ok(Self {
            storage_buffers,
            samplers,
            sampled_images,
            storage_images,
            acceleration_structures,
            pool,
            pipeline_layout,
        })
    }

    fn make_set(
        device: &ash::Device,
        pool: vk::DescriptorPool,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        capacity: u32,
    ) -> Result<BindlessDescriptorSet, vk::Result> {
        let binding_flags = vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING
            | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT;
        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(std::slice::from_ref(&binding_flags));
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(capacity)
            .stage_flags(vk::ShaderStageFlags::ALL)];
        let layout_create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags_info);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_create_info, None)? };

        let variable_count = capacity;
        let mut variable_count_info = vk::DescriptorSetVariableDescriptorCountAllocateInfo::default()
            .descriptor_counts(std::slice::from_ref(&variable_count));
        let set_layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts)
            .push_next(&mut variable_count_info);
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info)? };

        Ok(BindlessDescriptorSet::new(sets[0], layout, binding, capacity))
    }

    pub fn write_storage_buffer(&self, device: &ash::Device, id: DescriptorId, buffer: vk::Buffer, offset: u64, range: u64) {
        let info = vk::DescriptorBufferInfo {
            buffer,
            offset,
            range,
        };
        let write = vk::WriteDescriptorSet::default().buffer_info(std::slice::from_ref(&info));
        self.storage_buffers.write(device, id, vk::DescriptorType::STORAGE_BUFFER, write);
    }

    pub fn write_sampler(&self, device: &ash::Device, id: DescriptorId, sampler: vk::Sampler) {
        let info = vk::DescriptorImageInfo {
            sampler,
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
        };
        let write = vk::WriteDescriptorSet::default().image_info(std::slice::from_ref(&info));
        self.samplers.write(device, id, vk::DescriptorType::SAMPLER, write);
    }

    pub fn write_sampled_image(&self, device: &ash::Device, id: DescriptorId, view: vk::ImageView, layout: vk::ImageLayout) {
        let info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: layout,
        };
        let write = vk::WriteDescriptorSet::default().image_info(std::slice::from_ref(&info));
        self.sampled_images.write(device, id, vk::DescriptorType::SAMPLED_IMAGE, write);
    }

    pub fn write_storage_image(&self, device: &ash::Device, id: DescriptorId, view: vk::ImageView, layout: vk::ImageLayout) {
        let info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: layout,
        };
        let write = vk::WriteDescriptorSet::default().image_info(std::slice::from_ref(&info));
        self.storage_images.write(device, id, vk::DescriptorType::STORAGE_IMAGE, write);
    }

    /// Write an acceleration-structure descriptor. No-op if the device
    /// (or this allocator) was built without ray tracing.
    pub fn write_acceleration_structure(&self, device: &ash::Device, id: DescriptorId, accel: vk::AccelerationStructureKHR) {
        let Some(set) = &self.acceleration_structures else {
            return;
        };
        let mut as_info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
            .acceleration_structures(std::slice::from_ref(&accel));
        let write = vk::WriteDescriptorSet::default()
            .descriptor_count(1)
            .push_next(&mut as_info);
        set.write(device, id, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, write);
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_set_layout(self.storage_buffers.layout, None);
            device.destroy_descriptor_set_layout(self.samplers.layout, None);
            device.destroy_descriptor_set_layout(self.sampled_images.layout, None);
            device.destroy_descriptor_set_layout(self.storage_images.layout, None);
            if let Some(accel) = &self.acceleration_structures {
                device.destroy_descriptor_set_layout(accel.layout, None);
            }
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_list_allocates_in_order_then_exhausts() {
        let mut list = FreeList::new(3);
        assert_eq!(list.alloc(), Some(0));
        assert_eq!(list.alloc(), Some(1));
        assert_eq!(list.alloc(), Some(2));
        assert_eq!(list.alloc(), None);
    }

    #[test]
    fn free_list_recycles_freed_slot_first() {
        let mut list = FreeList::new(3);
        let a = list.alloc().unwrap();
        let _b = list.alloc().unwrap();
        list.free(a);
        assert_eq!(list.alloc(), Some(a));
    }

    #[test]
    fn free_list_lifo_recycling_order() {
        let mut list = FreeList::new(4);
        let a = list.alloc().unwrap();
        let b = list.alloc().unwrap();
        let c = list.alloc().unwrap();
        list.free(b);
        list.free(a);
        // freed in order b, a -> head chain serves a first (last freed).
        assert_eq!(list.alloc(), Some(a));
        assert_eq!(list.alloc(), Some(b));
        let _ = c;
    }
}
