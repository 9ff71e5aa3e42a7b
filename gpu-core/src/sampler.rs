//! Content-addressed sampler cache: a sampler's identity is its filter/wrap/
//! compare/anisotropy configuration, so two calls with an equal `SamplerDesc`
//! return the same `SamplerId` instead of allocating a fresh `VkSampler` and
//! bindless slot each time.

use rustc_hash::FxHashMap;

use hal::types::SamplerDesc;
use hal::{Device, DeviceError};

use crate::bindless::BindlessDescriptorAllocator;
use crate::id::{DescriptorId, SamplerId};
use crate::pool::ChunkedSparsePool;

struct SamplerEntry {
    raw: ash::vk::Sampler,
    descriptor: DescriptorId,
}

#[derive(Default)]
pub struct SamplerCache {
    entries: ChunkedSparsePool<SamplerEntry>,
    by_desc: FxHashMap<SamplerDescKey, SamplerId>,
}

/// `SamplerDesc` wrapped so it can key an `FxHashMap` without pulling `Hash`
/// derivation into the `hal` crate's public type itself (it already
/// implements `Hash`/`Eq` by hand for its `f32` fields; this newtype just
/// lets it sit in a map here).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct SamplerDescKey(SamplerDesc);

impl SamplerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing `SamplerId` for `desc` if one was already
    /// created, or build a fresh `VkSampler` plus bindless descriptor slot.
    pub fn get_or_create(
        &mut self,
        device: &Device,
        bindless: &BindlessDescriptorAllocator,
        desc: SamplerDesc,
    ) -> Result<SamplerId, DeviceError> {
        let key = SamplerDescKey(desc);
        if let Some(&id) = self.by_desc.get(&key) {
            return Ok(id);
        }

        let raw = device.create_sampler(&desc)?;
        let descriptor = bindless.samplers.allocate().expect("sampler descriptor set exhausted");
        bindless.write_sampler(device.raw(), descriptor, raw);

        let id = self.entries.insert(SamplerEntry { raw, descriptor });
        self.by_desc.insert(key, id);
        Ok(id)
    }

    pub fn descriptor(&self, id: SamplerId) -> DescriptorId {
        self.entries.with(id, |entry| entry.descriptor).expect("unknown SamplerId")
    }

    pub fn raw(&self, id: SamplerId) -> ash::vk::Sampler {
        self.entries.with(id, |entry| entry.raw).expect("unknown SamplerId")
    }

    /// Tear down every cached sampler. Not routed through `Garbages`: samplers
    /// are immutable/content-addressed for the system's whole lifetime, so
    /// there is no per-frame churn to defer — only whole-system teardown.
    pub unsafe fn destroy(self, device: &Device, bindless: &BindlessDescriptorAllocator) {
        for (_, entry) in self.by_desc {
            let raw = self.entries.with(entry, |e| e.raw).expect("unknown SamplerId");
            let descriptor = self.entries.with(entry, |e| e.descriptor).expect("unknown SamplerId");
            bindless.samplers.free(descriptor);
            unsafe { device.destroy_sampler(raw) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    fn desc(mag: vk::Filter) -> SamplerDesc {
        SamplerDesc {
            mag_filter: mag,
            min_filter: mag,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
            compare_op: None,
            min_lod: 0.0,
            max_lod: 1000.0,
        }
    }

    #[test]
    fn equal_descs_hash_and_compare_equal() {
        let a = SamplerDescKey(desc(vk::Filter::LINEAR));
        let b = SamplerDescKey(desc(vk::Filter::LINEAR));
        assert_eq!(a, b);

        let mut set = FxHashMap::default();
        set.insert(a, 1u32);
        assert_eq!(set.get(&b), Some(&1));
    }

    #[test]
    fn different_filters_are_distinct_keys() {
        let a = SamplerDescKey(desc(vk::Filter::LINEAR));
        let b = SamplerDescKey(desc(vk::Filter::NEAREST));
        assert_ne!(a, b);
    }
}
