use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// How a buffer may be used; composed freely, matching `wgpu-hal`'s
    /// `Workarounds`/`TextureUses`-style bitflags rather than a raw `u32`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const STORAGE = 1 << 2;
        const UNIFORM = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const INDIRECT = 1 << 6;
        const SHADER_DEVICE_ADDRESS = 1 << 7;
        const AS_BUILD_INPUT = 1 << 8;
        const AS_STORAGE = 1 << 9;
        const AS_SCRATCH = 1 << 10;
        const SHADER_BINDING_TABLE = 1 << 11;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
        const INPUT_ATTACHMENT = 1 << 6;
    }
}

bitflags! {
    /// Which queue families a resource must be usable from; drives whether
    /// the cache-state tracker inserts a queue-family-ownership transfer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct QueueFlags: u8 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryPreference {
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageDimension {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
}

/// Creation parameters for [`crate::device::Device::create_texture`]. Kept
/// distinct from [`Texture`] itself, which is the stored, already-bound
/// resource handed back.
#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub dimension: ImageDimension,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
}

/// Raw buffer plus the suballocation backing it. `gpu-core`'s resource pool
/// owns one of these per live `BufferId`.
pub struct Buffer {
    pub raw: vk::Buffer,
    pub allocation: gpu_alloc::MemoryBlock<vk::DeviceMemory>,
    pub size: u64,
    pub usage: BufferUsage,
    pub device_address: Option<vk::DeviceAddress>,
}

pub struct Texture {
    pub raw: vk::Image,
    pub allocation: Option<gpu_alloc::MemoryBlock<vk::DeviceMemory>>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub usage: TextureUsage,
    /// `None` for swapchain-owned images, whose lifetime belongs to the
    /// `Swapchain`, not this pool entry.
    pub is_swapchain_owned: bool,
}

pub struct TextureView {
    pub raw: vk::ImageView,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

pub struct Sampler {
    pub raw: vk::Sampler,
}

/// Fully describes a sampler's filtering/addressing/comparison config.
/// Hash+Eq so it can key a content-addressed cache: two samplers created
/// from equal descs are the same `VkSampler`, same as the original engine's
/// sampler cache.
///
/// `f32` fields (`max_anisotropy`, `min_lod`, `max_lod`) are compared/hashed
/// via bit pattern, not value — fine here since these are always one of a
/// handful of caller-chosen constants, never the result of arithmetic that
/// could produce `NaN` or differing bit patterns for the "same" value.
#[derive(Clone, Copy, Debug)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub max_anisotropy: Option<f32>,
    pub compare_op: Option<vk::CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl PartialEq for SamplerDesc {
    fn eq(&self, other: &Self) -> bool {
        self.mag_filter == other.mag_filter
            && self.min_filter == other.min_filter
            && self.mipmap_mode == other.mipmap_mode
            && self.address_mode_u == other.address_mode_u
            && self.address_mode_v == other.address_mode_v
            && self.address_mode_w == other.address_mode_w
            && self.max_anisotropy.map(f32::to_bits) == other.max_anisotropy.map(f32::to_bits)
            && self.compare_op == other.compare_op
            && self.min_lod.to_bits() == other.min_lod.to_bits()
            && self.max_lod.to_bits() == other.max_lod.to_bits()
    }
}
impl Eq for SamplerDesc {}

impl std::hash::Hash for SamplerDesc {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.mag_filter.hash(state);
        self.min_filter.hash(state);
        self.mipmap_mode.hash(state);
        self.address_mode_u.hash(state);
        self.address_mode_v.hash(state);
        self.address_mode_w.hash(state);
        self.max_anisotropy.map(f32::to_bits).hash(state);
        self.compare_op.hash(state);
        self.min_lod.to_bits().hash(state);
        self.max_lod.to_bits().hash(state);
    }
}

pub struct AccelerationStructure {
    pub raw: vk::AccelerationStructureKHR,
    pub buffer: Buffer,
    pub device_address: vk::DeviceAddress,
    pub is_top_level: bool,
}
