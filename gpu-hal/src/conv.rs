use ash::vk;

use crate::types::{BufferUsage, TextureUsage};

pub fn map_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::SHADER_DEVICE_ADDRESS) {
        flags |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    if usage.contains(BufferUsage::AS_BUILD_INPUT) {
        flags |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
    }
    if usage.contains(BufferUsage::AS_STORAGE) {
        flags |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
    }
    if usage.contains(BufferUsage::AS_SCRATCH) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::SHADER_BINDING_TABLE) {
        flags |= vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR;
    }
    flags
}

pub fn map_texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(TextureUsage::INPUT_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
    }
    flags
}

/// Attachment-flags → load/store-op table, shared by the render-pass cache
/// key builder and by tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentFlags {
    pub clear: bool,
    pub load: bool,
    pub store: bool,
}

pub fn attachment_load_op(flags: AttachmentFlags) -> vk::AttachmentLoadOp {
    if flags.clear {
        vk::AttachmentLoadOp::CLEAR
    } else if flags.load {
        vk::AttachmentLoadOp::LOAD
    } else {
        vk::AttachmentLoadOp::DONT_CARE
    }
}

pub fn attachment_store_op(flags: AttachmentFlags) -> vk::AttachmentStoreOp {
    if flags.store {
        vk::AttachmentStoreOp::STORE
    } else {
        vk::AttachmentStoreOp::DONT_CARE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_store_op_table_matches_flags() {
        let cases = [
            (
                AttachmentFlags { clear: true, load: false, store: true },
                vk::AttachmentLoadOp::CLEAR,
                vk::AttachmentStoreOp::STORE,
            ),
            (
                AttachmentFlags { clear: false, load: true, store: true },
                vk::AttachmentLoadOp::LOAD,
                vk::AttachmentStoreOp::STORE,
            ),
            (
                AttachmentFlags { clear: false, load: false, store: false },
                vk::AttachmentLoadOp::DONT_CARE,
                vk::AttachmentStoreOp::DONT_CARE,
            ),
            (
                AttachmentFlags { clear: true, load: true, store: false },
                vk::AttachmentLoadOp::CLEAR,
                vk::AttachmentStoreOp::DONT_CARE,
            ),
        ];
        for (flags, expected_load, expected_store) in cases {
            assert_eq!(attachment_load_op(flags), expected_load);
            assert_eq!(attachment_store_op(flags), expected_store);
        }
    }

    #[test]
    fn buffer_usage_maps_shader_device_address() {
        let usage = BufferUsage::STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS;
        let flags = map_buffer_usage(usage);
        assert!(flags.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
    }
}
