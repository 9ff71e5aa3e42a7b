use ash::vk;

/// Per-thread resource-initialization recorder: buffer/texture uploads,
/// image clears, and mip-chain generation each get their own
/// command buffer so their barriers don't serialize against each other
/// inside one `vkCmdPipelineBarrier` call, giving each logically distinct
/// recording stream its own `vk::CommandBuffer` rather than interleaving
/// unrelated work on one.
pub struct Initializer {
    pub transfer: vk::CommandBuffer,
    pub clear: vk::CommandBuffer,
    pub mipmap_gen: vk::CommandBuffer,
    pub as_build: vk::CommandBuffer,
}

impl Initializer {
    pub fn new(
        device: &ash::Device,
        pool: vk::CommandPool,
    ) -> Result<Self, vk::Result> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(4);
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };
        Ok(Self {
            transfer: buffers[0],
            clear: buffers[1],
            mipmap_gen: buffers[2],
            as_build: buffers[3],
        })
    }

    pub fn begin(&self, device: &ash::Device) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        for cmd in [self.transfer, self.clear, self.mipmap_gen, self.as_build] {
            unsafe { device.begin_command_buffer(cmd, &begin_info)? };
        }
        Ok(())
    }

    pub fn end(&self, device: &ash::Device) -> Result<[vk::CommandBuffer; 4], vk::Result> {
        let buffers = [self.transfer, self.clear, self.mipmap_gen, self.as_build];
        for cmd in buffers {
            unsafe { device.end_command_buffer(cmd)? };
        }
        Ok(buffers)
    }

    /// Record a staged buffer-to-buffer upload into the `transfer` stream.
    /// Grounded on `GPUResourceInitializer::load(Buffer&, ...)`
    /// (`gpu_system.cpp`): the caller has already written `src` (a
    /// host-visible staging buffer) via `Device::write_to_buffer`; this only
    /// records the device-side copy.
    pub fn record_buffer_upload(&self, device: &ash::Device, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) {
        unsafe { device.cmd_copy_buffer(self.transfer, src, dst, std::slice::from_ref(&region)) };
    }

    /// Record a staged buffer-to-image upload into the `transfer` stream.
    /// Mirrors `GPUResourceInitializer::load(Texture&, ...)`: the
    /// destination must already be (or is about to be, via a barrier
    /// recorded by the caller) in `TRANSFER_DST_OPTIMAL`.
    pub fn record_texture_upload(&self, device: &ash::Device, src: vk::Buffer, dst: vk::Image, region: vk::BufferImageCopy) {
        unsafe {
            device.cmd_copy_buffer_to_image(
                self.transfer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };
    }

    /// Transition `image` to `TRANSFER_DST_OPTIMAL` and clear it, recorded
    /// into the `clear` stream. Grounded on
    /// `GPUResourceInitializer::clear(Texture&, ClearValue)`, which records
    /// the UNDEFINED->TRANSFER_DST_OPTIMAL barrier and the clear call on the
    /// same command buffer so no cross-stream ordering is needed between
    /// them.
    pub fn record_clear(
        &self,
        device: &ash::Device,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        mip_level_count: u32,
        array_layer_count: u32,
        clear: ClearValue,
    ) {
        let range = vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: mip_level_count,
            base_array_layer: 0,
            layer_count: array_layer_count,
        };
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags2::CLEAR)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image(image)
            .subresource_range(range);
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe {
            device.cmd_pipeline_barrier2(self.clear, &dependency_info);
            match clear {
                ClearValue::Color(color) => device.cmd_clear_color_image(
                    self.clear,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &color,
                    std::slice::from_ref(&range),
                ),
                ClearValue::DepthStencil(depth_stencil) => device.cmd_clear_depth_stencil_image(
                    self.clear,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &depth_stencil,
                    std::slice::from_ref(&range),
                ),
            }
        };
    }

    /// Blit a full mip chain from level 0 down to `mip_level_count - 1`,
    /// ending with every level in `SHADER_READ_ONLY_OPTIMAL`. Grounded on
    /// `GPUResourceInitializer::generate_mipmap(Texture&)`: each level is
    /// blitted from the previous one (linear filter), with a barrier
    /// transitioning the source level to `TRANSFER_SRC_OPTIMAL` before its
    /// blit and every level transitioned to `SHADER_READ_ONLY_OPTIMAL`
    /// after the whole chain is built, recorded into the `mipmap_gen`
    /// stream so it never interleaves with unrelated clear/upload barriers.
    pub fn record_generate_mipmaps(
        &self,
        device: &ash::Device,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        extent: vk::Extent3D,
        mip_level_count: u32,
        array_layer_count: u32,
    ) {
        if mip_level_count <= 1 {
            let range = full_range(aspect_mask, mip_level_count, array_layer_count);
            transition(device, self.mipmap_gen, image, range, vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            return;
        }

        let mut mip_extent = extent;
        for level in 1..mip_level_count {
            let src_range = vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: level - 1,
                level_count: 1,
                base_array_layer: 0,
                layer_count: array_layer_count,
            };
            let src_layout = if level == 1 {
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            };
            transition(device, self.mipmap_gen, image, src_range, src_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);

            let dst_extent = mip_extent_at(extent, level);
            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: array_layer_count,
                },
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: mip_extent.width as i32,
                        y: mip_extent.height as i32,
                        z: mip_extent.depth as i32,
                    },
                ],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: array_layer_count,
                },
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: dst_extent.width as i32,
                        y: dst_extent.height as i32,
                        z: dst_extent.depth as i32,
                    },
                ],
            };
            unsafe {
                device.cmd_blit_image(
                    self.mipmap_gen,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                )
            };

            transition(device, self.mipmap_gen, image, src_range, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            mip_extent = dst_extent;
        }

        let last_range = vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: mip_level_count - 1,
            level_count: 1,
            base_array_layer: 0,
            layer_count: array_layer_count,
        };
        transition(device, self.mipmap_gen, image, last_range, vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}

/// One color or depth/stencil clear value, since `vkCmdClearColorImage` and
/// `vkCmdClearDepthStencilImage` are separate entry points.
#[derive(Clone, Copy)]
pub enum ClearValue {
    Color(vk::ClearColorValue),
    DepthStencil(vk::ClearDepthStencilValue),
}

fn full_range(aspect_mask: vk::ImageAspectFlags, mip_level_count: u32, array_layer_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: mip_level_count,
        base_array_layer: 0,
        layer_count: array_layer_count,
    }
}

fn mip_extent_at(base: vk::Extent3D, level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (base.width >> level).max(1),
        height: (base.height >> level).max(1),
        depth: (base.depth >> level).max(1),
    }
}

fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
        .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER | vk::PipelineStageFlags2::FRAGMENT_SHADER)
        .dst_access_mask(vk::AccessFlags2::TRANSFER_READ | vk::AccessFlags2::SHADER_READ)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .image(image)
        .subresource_range(range);
    let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };
}

/// The barrier-only counterpart recorded once uploads for the frame are
/// done: transitions every just-initialized resource from its upload-time
/// layout/access to the layout its first real use in the render graph
/// needs, batched into one pipeline barrier per queue family rather than
/// one per resource.
pub struct Finalizer {
    pub command_buffer: vk::CommandBuffer,
    pending_image_barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
    pending_buffer_barriers: Vec<vk::BufferMemoryBarrier2<'static>>,
}

impl Finalizer {
    pub fn new(device: &ash::Device, pool: vk::CommandPool) -> Result<Self, vk::Result> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };
        Ok(Self {
            command_buffer: buffers[0],
            pending_image_barriers: Vec::new(),
            pending_buffer_barriers: Vec::new(),
        })
    }

    pub fn push_image_barrier(&mut self, barrier: vk::ImageMemoryBarrier2<'static>) {
        self.pending_image_barriers.push(barrier);
    }

    pub fn push_buffer_barrier(&mut self, barrier: vk::BufferMemoryBarrier2<'static>) {
        self.pending_buffer_barriers.push(barrier);
    }

    pub fn flush(&mut self, device: &ash::Device) -> Result<(), vk::Result> {
        if self.pending_image_barriers.is_empty() && self.pending_buffer_barriers.is_empty() {
            return Ok(());
        }
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&self.pending_image_barriers)
            .buffer_memory_barriers(&self.pending_buffer_barriers);
        unsafe { device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info) };
        self.pending_image_barriers.clear();
        self.pending_buffer_barriers.clear();
        Ok(())
    }
}

/// Maps a texture's declared usage to the layout it should sit in once
/// initialization finishes.
pub fn initial_layout_for_usage(usage: hal::types::TextureUsage) -> vk::ImageLayout {
    use hal::types::TextureUsage;
    if usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else if usage.contains(TextureUsage::STORAGE) {
        vk::ImageLayout::GENERAL
    } else if usage.contains(TextureUsage::SAMPLED) {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::GENERAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::types::TextureUsage;

    #[test]
    fn sampled_only_maps_to_shader_read_only() {
        assert_eq!(
            initial_layout_for_usage(TextureUsage::SAMPLED),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn depth_stencil_takes_priority_over_sampled() {
        let usage = TextureUsage::DEPTH_STENCIL_ATTACHMENT | TextureUsage::SAMPLED;
        assert_eq!(
            initial_layout_for_usage(usage),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }
}
