use ash::vk;
use hal::conv::{attachment_load_op, attachment_store_op, AttachmentFlags};
use hal::device::{ColorAttachmentKey, DepthStencilAttachmentKey, FramebufferKey, RenderPassKey};

/// Describes one color attachment as the render graph sees it — a format,
/// a load/store intent, and the layout the pass needs it in — before it's
/// turned into a `ColorAttachmentKey` for `Device::render_pass_for`'s cache
/// lookup. Kept distinct from `ColorAttachmentKey` itself so the graph
/// compiler doesn't need to know Vulkan's load/store-op enum, only the
/// higher-level `AttachmentFlags` table describes.
#[derive(Clone, Copy, Debug)]
pub struct ColorAttachmentDescription {
    pub format: vk::Format,
    pub flags: AttachmentFlags,
    pub layout: vk::ImageLayout,
}

#[derive(Clone, Copy, Debug)]
pub struct DepthStencilAttachmentDescription {
    pub format: vk::Format,
    pub depth_flags: AttachmentFlags,
    pub stencil_flags: AttachmentFlags,
    pub layout: vk::ImageLayout,
}

/// Build the cache key for a render pass from its attachment descriptions,
/// applying this system's attachment-flags → load/store-op table
/// (`hal::conv::attachment_load_op`/`attachment_store_op`) to each one.
pub fn render_pass_key(
    colors: &[ColorAttachmentDescription],
    depth_stencil: Option<DepthStencilAttachmentDescription>,
    sample_count: u32,
) -> RenderPassKey {
    let mut key = RenderPassKey {
        colors: Default::default(),
        depth_stencil: None,
        sample_count,
    };
    for color in colors {
        key.colors.push(ColorAttachmentKey {
            format: color.format,
            load_op: attachment_load_op(color.flags),
            store_op: attachment_store_op(color.flags),
            layout: color.layout,
        });
    }
    key.depth_stencil = depth_stencil.map(|ds| DepthStencilAttachmentKey {
        format: ds.format,
        depth_load_op: attachment_load_op(ds.depth_flags),
        depth_store_op: attachment_store_op(ds.depth_flags),
        stencil_load_op: attachment_load_op(ds.stencil_flags),
        stencil_store_op: attachment_store_op(ds.stencil_flags),
        layout: ds.layout,
    });
    key
}

pub fn framebuffer_key(
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: (u32, u32),
) -> FramebufferKey {
    let mut key = FramebufferKey {
        render_pass,
        attachments: Default::default(),
        extent,
    };
    for &view in attachments {
        key.attachments.push(view);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_pass_key_reflects_clear_and_store() {
        let colors = [ColorAttachmentDescription {
            format: vk::Format::R8G8B8A8_UNORM,
            flags: AttachmentFlags {
                clear: true,
                load: false,
                store: true,
            },
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let key = render_pass_key(&colors, None, 1);
        assert_eq!(key.colors[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(key.colors[0].store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn identical_descriptions_produce_equal_keys() {
        let colors = [ColorAttachmentDescription {
            format: vk::Format::B8G8R8A8_SRGB,
            flags: AttachmentFlags {
                clear: false,
                load: true,
                store: true,
            },
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let a = render_pass_key(&colors, None, 1);
        let b = render_pass_key(&colors, None, 1);
        assert_eq!(a, b);
    }
}
