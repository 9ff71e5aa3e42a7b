use std::sync::Arc;

use ash::vk;

use crate::device::DeviceShared;
use crate::error::DeviceError;

/// One transient command pool plus the buffers allocated from (and freed
/// back to) it this frame.
///
/// Grounded in `gpu-hal`'s `CommandEncoder`, which tracks `active`/`discarded`
/// buffers per pool so a whole frame's worth of recording can be reset in one
/// `vkResetCommandPool` call rather than freeing buffers individually.
pub struct CommandPool {
    raw: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
}

impl CommandPool {
    pub fn new(device: &DeviceShared, queue_family_index: u32) -> Result<Self, DeviceError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let raw = unsafe { device.raw.create_command_pool(&create_info, None)? };
        Ok(Self {
            raw,
            free: Vec::new(),
        })
    }

    /// Hand back a primary command buffer, allocating a fresh one only if
    /// the free-list (populated by `reset`) is empty.
    pub fn request(&mut self, device: &DeviceShared) -> Result<vk::CommandBuffer, DeviceError> {
        if let Some(cmd) = self.free.pop() {
            return Ok(cmd);
        }
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { device.raw.allocate_command_buffers(&alloc_info)? };
        Ok(buffers[0])
    }

    pub fn request_secondary(
        &self,
        device: &DeviceShared,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, DeviceError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.raw)
            .level(vk::CommandBufferLevel::SECONDARY)
            .command_buffer_count(count);
        Ok(unsafe { device.raw.allocate_command_buffers(&alloc_info)? })
    }

    /// Reset the whole pool, reclaiming every buffer ever allocated from it
    /// as the implicit free-list for next frame's `request` calls.
    pub fn reset(&mut self, device: &DeviceShared) -> Result<(), DeviceError> {
        unsafe {
            device
                .raw
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::empty())?
        };
        Ok(())
    }

    pub unsafe fn destroy(&self, device: &DeviceShared) {
        unsafe { device.raw.destroy_command_pool(self.raw, None) };
    }
}

/// Per-thread set of pools, one per queue role.
pub struct CommandPoolSet {
    pub graphics: CommandPool,
    pub compute: CommandPool,
    pub transfer: CommandPool,
    device: Arc<DeviceShared>,
}

impl CommandPoolSet {
    pub fn new(
        device: &Arc<DeviceShared>,
        graphics_family: u32,
        compute_family: u32,
        transfer_family: u32,
    ) -> Result<Self, DeviceError> {
        Ok(Self {
            graphics: CommandPool::new(device, graphics_family)?,
            compute: CommandPool::new(device, compute_family)?,
            transfer: CommandPool::new(device, transfer_family)?,
            device: device.clone(),
        })
    }

    /// Reset all three pools; called once per frame as soon as the frame
    /// slot's timeline value has retired .
    pub fn reset_all(&mut self) -> Result<(), DeviceError> {
        self.graphics.reset(&self.device)?;
        self.compute.reset(&self.device)?;
        self.transfer.reset(&self.device)?;
        Ok(())
    }
}
