//! Bottom-/top-level acceleration structures and `BlasGroup` membership.
//!
//! A `Blas` wraps a device buffer holding the AS storage, the opaque AS
//! handle, and an optional `BlasGroup` it belongs to; a `Tlas` is the same
//! plus the `DescriptorId` shaders reference it by. Grounded in the way
//! `original_source` splits "build the acceleration structure" (sizing,
//! storage/scratch allocation, one `vkCmdBuildAccelerationStructuresKHR`)
//! from "use it" (a bindless descriptor slot written once built) — mirrors
//! this crate's `upload::Initializer`, whose `as_build` command buffer is
//! exactly where these builds get recorded.

use ash::vk;

use hal::device::{AccelerationStructureSizes, BlasGeometryDesc};
use hal::types::{Buffer, BufferUsage, MemoryPreference};
use hal::{Device, DeviceError};

use crate::bindless::BindlessDescriptorAllocator;
use crate::id::{BlasGroupId, BlasId, DescriptorId, TlasId};
use crate::pool::{ChunkedSparsePool, PoolError};

pub struct Blas {
    pub buffer: Buffer,
    pub scratch: Buffer,
    pub raw: vk::AccelerationStructureKHR,
    pub group: Option<BlasGroupId>,
}

pub struct Tlas {
    pub buffer: Buffer,
    pub scratch: Buffer,
    pub raw: vk::AccelerationStructureKHR,
    pub descriptor: DescriptorId,
}

/// A named collection of `BlasId`s that can be synchronized (rebuilt,
/// compacted) as one unit. Owns one membership record per member — an index
/// into this group's vector, per the doc on `Blas ↔ BlasGroup` index pairs
/// replacing a back-reference.
pub struct BlasGroup {
    pub name: String,
    members: Vec<BlasId>,
}

impl BlasGroup {
    pub fn members(&self) -> &[BlasId] {
        &self.members
    }
}

#[derive(Default)]
pub struct AccelerationStructureRegistry {
    blas: ChunkedSparsePool<Blas>,
    blas_groups: ChunkedSparsePool<BlasGroup>,
    tlas: ChunkedSparsePool<Tlas>,
}

impl AccelerationStructureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_blas_group(&mut self, name: impl Into<String>) -> BlasGroupId {
        self.blas_groups.insert(BlasGroup {
            name: name.into(),
            members: Vec::new(),
        })
    }

    pub fn destroy_blas_group(&mut self, id: BlasGroupId) -> Result<(), PoolError> {
        self.blas_groups.remove(id).map(|_| ())
    }

    /// Allocate storage/scratch buffers sized for `geometry`, bind a BLAS
    /// object to the storage buffer, and record its build into `cmd`. The
    /// caller owns `cmd`'s lifecycle (submission + waiting for the build to
    /// complete before the BLAS is read) — this only records.
    pub fn create_blas(
        &mut self,
        device: &Device,
        cmd: vk::CommandBuffer,
        geometry: &BlasGeometryDesc,
        group: Option<BlasGroupId>,
    ) -> Result<BlasId, DeviceError> {
        let sizes = device.blas_build_sizes(geometry)?;
        let (buffer, scratch, raw) = self.build(device, cmd, vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL, &sizes, |d, cmd, accel, scratch_address| unsafe {
            d.cmd_build_blas(cmd, accel, scratch_address, geometry);
        })?;

        let id = self.blas.insert(Blas { buffer, scratch, raw, group });
        if let Some(group_id) = group {
            let _ = self.blas_groups.with_mut(group_id, |g| g.members.push(id));
        }
        Ok(id)
    }

    pub unsafe fn destroy_blas(&mut self, device: &Device, id: BlasId) -> Result<(), PoolError> {
        let blas = self.blas.remove(id)?;
        if let Some(group) = blas.group {
            let _ = self.blas_groups.with_mut(group, |g| g.members.retain(|&m| m != id));
        }
        unsafe {
            device.destroy_acceleration_structure(blas.raw);
            device.destroy_buffer(blas.buffer);
            device.destroy_buffer(blas.scratch);
        }
        Ok(())
    }

    /// Allocate storage/scratch buffers for a TLAS over `instance_count`
    /// instances (a device-resident array of `VkAccelerationStructureInstanceKHR`
    /// at `instance_buffer_address`), bind and record its build, and allocate
    /// the bindless acceleration-structure descriptor slot shaders use to
    /// reference it.
    pub fn create_tlas(
        &mut self,
        device: &Device,
        bindless: &BindlessDescriptorAllocator,
        cmd: vk::CommandBuffer,
        instance_buffer_address: vk::DeviceAddress,
        instance_count: u32,
    ) -> Result<TlasId, DeviceError> {
        let sizes = device.tlas_build_sizes(instance_count)?;
        let (buffer, scratch, raw) = self.build(device, cmd, vk::AccelerationStructureTypeKHR::TOP_LEVEL, &sizes, |d, cmd, accel, scratch_address| unsafe {
            d.cmd_build_tlas(cmd, accel, scratch_address, instance_buffer_address, instance_count);
        })?;

        let descriptor = bindless
            .acceleration_structures
            .as_ref()
            .expect("create_tlas called on a bindless allocator built without ray tracing")
            .allocate()
            .expect("acceleration-structure descriptor set exhausted");
        bindless.write_acceleration_structure(device.raw(), descriptor, raw);

        let id = self.tlas.insert(Tlas { buffer, scratch, raw, descriptor });
        Ok(id)
    }

    pub unsafe fn destroy_tlas(&mut self, device: &Device, bindless: &BindlessDescriptorAllocator, id: TlasId) -> Result<(), PoolError> {
        let tlas = self.tlas.remove(id)?;
        if let Some(set) = &bindless.acceleration_structures {
            set.free(tlas.descriptor);
        }
        unsafe {
            device.destroy_acceleration_structure(tlas.raw);
            device.destroy_buffer(tlas.buffer);
            device.destroy_buffer(tlas.scratch);
        }
        Ok(())
    }

    pub fn raw_blas(&self, id: BlasId) -> Result<vk::AccelerationStructureKHR, PoolError> {
        self.blas.with(id, |b| b.raw)
    }

    pub fn raw_tlas(&self, id: TlasId) -> Result<vk::AccelerationStructureKHR, PoolError> {
        self.tlas.with(id, |t| t.raw)
    }

    pub fn tlas_descriptor(&self, id: TlasId) -> Result<DescriptorId, PoolError> {
        self.tlas.with(id, |t| t.descriptor)
    }

    fn build(
        &self,
        device: &Device,
        cmd: vk::CommandBuffer,
        ty: vk::AccelerationStructureTypeKHR,
        sizes: &AccelerationStructureSizes,
        record: impl FnOnce(&Device, vk::CommandBuffer, vk::AccelerationStructureKHR, vk::DeviceAddress),
    ) -> Result<(Buffer, Buffer, vk::AccelerationStructureKHR), DeviceError> {
        let buffer = device.create_buffer(
            sizes.acceleration_structure_size,
            BufferUsage::AS_STORAGE,
            MemoryPreference::GpuOnly,
        )?;
        let scratch = device.create_buffer(
            sizes.build_scratch_size.max(1),
            BufferUsage::AS_SCRATCH | BufferUsage::SHADER_DEVICE_ADDRESS,
            MemoryPreference::GpuOnly,
        )?;
        let raw = device.create_acceleration_structure(buffer.raw, 0, sizes.acceleration_structure_size, ty)?;
        let scratch_address = scratch
            .device_address
            .expect("AS_SCRATCH buffer must carry a device address");
        record(device, cmd, raw, scratch_address);
        Ok((buffer, scratch, raw))
    }

    pub fn is_empty(&self) -> bool {
        self.blas.is_empty() && self.tlas.is_empty() && self.blas_groups.is_empty()
    }
}
