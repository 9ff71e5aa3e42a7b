//! Shaders, programs, and the pipeline-state cache.
//!
//! A `Shader` is just a `VkShaderModule` plus its stage and entry point,
//! grounded in `original_source`'s thin shader-module wrapper. A `Program`
//! bundles a set of shaders under the one pipeline layout every pipeline in
//! this system shares (the bindless layout); it carries no raster state of
//! its own. `PipelineStateId` is the hashed-descriptor cache `original_source`
//! keys its native pipeline objects by, reusing `hal::device::PipelineStateKey`
//! and `Device::pipeline_for`'s lazy build-or-fetch.

use std::hash::{Hash, Hasher};

use ash::vk;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use hal::device::PipelineStateKey;
use hal::{Device, DeviceError};

use crate::bindless::BindlessDescriptorAllocator;
use crate::id::{PipelineStateId, ProgramId, ShaderId};
use crate::pool::ChunkedSparsePool;

pub struct Shader {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

/// Up to 5 shader stages (vertex/fragment/tess-control/tess-eval/geometry, or
/// a single compute stage) under the one shared bindless pipeline layout.
pub struct Program {
    pub shaders: SmallVec<[ShaderId; 5]>,
}

#[derive(Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// Everything needed to build (or look up) a graphics pipeline. Grouped
/// raster/blend/depth state is not part of `PipelineStateKey` today — see
/// the cache-key gap noted in `DESIGN.md` — so callers must not vary it for
/// the same `(program, render_pass, vertex_layout_hash, topology)` tuple.
pub struct GraphicsPipelineDesc {
    pub program: ProgramId,
    pub render_pass: vk::RenderPass,
    pub topology: vk::PrimitiveTopology,
    pub vertex_stride: u32,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub color_attachment_count: u32,
    pub sample_count: vk::SampleCountFlags,
}

pub struct ComputePipelineDesc {
    pub program: ProgramId,
}

fn hash_vertex_layout(stride: u32, attributes: &[VertexAttribute]) -> u64 {
    let mut hasher = FxHasher::default();
    stride.hash(&mut hasher);
    for attr in attributes {
        attr.location.hash(&mut hasher);
        attr.format.hash(&mut hasher);
        attr.offset.hash(&mut hasher);
    }
    hasher.finish()
}

/// Resource pools for shaders, programs, and the pipeline cache's
/// descriptor→`ProgramId` bookkeeping (the native `vk::Pipeline` objects
/// themselves stay cached in `hal::Device`, keyed by `PipelineStateKey`,
/// since that's where the `render_pass_for`/`framebuffer_for` caches live
/// too).
#[derive(Default)]
pub struct ProgramRegistry {
    shaders: ChunkedSparsePool<Shader>,
    programs: ChunkedSparsePool<Program>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_shader(
        &mut self,
        device: &Device,
        spirv: &[u32],
        stage: vk::ShaderStageFlags,
        entry_point: impl Into<String>,
    ) -> Result<ShaderId, DeviceError> {
        let module = device.create_shader_module(spirv)?;
        Ok(self.shaders.insert(Shader {
            stage,
            module,
            entry_point: entry_point.into(),
        }))
    }

    pub unsafe fn destroy_shader(&mut self, device: &Device, id: ShaderId) -> Result<(), crate::pool::PoolError> {
        let shader = self.shaders.remove(id)?;
        unsafe { device.destroy_shader_module(shader.module) };
        Ok(())
    }

    pub fn create_program(&mut self, shaders: &[ShaderId]) -> ProgramId {
        self.programs.insert(Program {
            shaders: shaders.iter().copied().collect(),
        })
    }

    pub fn destroy_program(&mut self, id: ProgramId) -> Result<(), crate::pool::PoolError> {
        self.programs.remove(id).map(|_| ())
    }

    fn stage_create_infos(&self, program: ProgramId) -> Result<Vec<(vk::ShaderStageFlags, vk::ShaderModule, String)>, crate::pool::PoolError> {
        self.programs.with(program, |p| p.shaders.clone())?
            .into_iter()
            .map(|shader_id| self.shaders.with(shader_id, |s| (s.stage, s.module, s.entry_point.clone())))
            .collect()
    }

    /// Build (or look up) a graphics pipeline for `desc`, using the shared
    /// bindless pipeline layout for every stage.
    pub fn graphics_pipeline_for(
        &self,
        device: &Device,
        bindless: &BindlessDescriptorAllocator,
        desc: &GraphicsPipelineDesc,
    ) -> crate::error::Result<PipelineStateId> {
        let stages = self.stage_create_infos(desc.program)?;
        let vertex_layout_hash = hash_vertex_layout(desc.vertex_stride, &desc.vertex_attributes);
        let key = PipelineStateKey {
            program: desc.program.index() as u64 | ((desc.program.generation() as u64) << 32),
            render_pass: desc.render_pass,
            vertex_layout_hash,
            topology: desc.topology,
        };

        let pipeline = device.pipeline_for(key, || unsafe {
            Self::build_graphics_pipeline(device, bindless, desc, &stages)
        })?;
        Ok(PipelineStateId::new(pipeline_key_index(pipeline), 0))
    }

    pub fn compute_pipeline_for(
        &self,
        device: &Device,
        bindless: &BindlessDescriptorAllocator,
        desc: &ComputePipelineDesc,
    ) -> crate::error::Result<PipelineStateId> {
        let stages = self.stage_create_infos(desc.program)?;
        let (stage, module, entry_point) = stages
            .into_iter()
            .find(|(stage, _, _)| stage.contains(vk::ShaderStageFlags::COMPUTE))
            .expect("compute program carries no compute shader");
        let entry_point_c = std::ffi::CString::new(entry_point).expect("shader entry point has no interior nul");
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(stage)
            .module(module)
            .name(&entry_point_c);
        let key = PipelineStateKey {
            program: desc.program.index() as u64 | ((desc.program.generation() as u64) << 32),
            render_pass: vk::RenderPass::null(),
            vertex_layout_hash: 0,
            topology: vk::PrimitiveTopology::POINT_LIST,
        };
        let pipeline = device.pipeline_for(key, || unsafe {
            let create_info = vk::ComputePipelineCreateInfo::default()
                .stage(stage_info)
                .layout(bindless.pipeline_layout);
            device
                .raw()
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
                .map(|pipelines| pipelines[0])
                .map_err(|(_, err)| DeviceError::from(err))
        })?;
        Ok(PipelineStateId::new(pipeline_key_index(pipeline), 0))
    }

    unsafe fn build_graphics_pipeline(
        device: &Device,
        bindless: &BindlessDescriptorAllocator,
        desc: &GraphicsPipelineDesc,
        stages: &[(vk::ShaderStageFlags, vk::ShaderModule, String)],
    ) -> Result<vk::Pipeline, DeviceError> {
        let entry_points: Vec<std::ffi::CString> = stages
            .iter()
            .map(|(_, _, name)| std::ffi::CString::new(name.as_str()).expect("shader entry point has no interior nul"))
            .collect();
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = stages
            .iter()
            .zip(&entry_points)
            .map(|((stage, module, _), name)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(*module)
                    .name(name)
            })
            .collect();

        let binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        let attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_attributes
            .iter()
            .map(|attr| vk::VertexInputAttributeDescription {
                location: attr.location,
                binding: 0,
                format: attr.format,
                offset: attr.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(std::slice::from_ref(&binding))
            .vertex_attribute_descriptions(&attributes);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(desc.sample_count);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(desc.depth_compare);

        let blend_attachment = vk::PipelineColorBlendAttachmentState::default().color_write_mask(
            vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
        );
        let blend_attachments = vec![blend_attachment; desc.color_attachment_count as usize];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(bindless.pipeline_layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        unsafe {
            device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
                .map(|pipelines| pipelines[0])
                .map_err(|(_, err)| DeviceError::from(err))
        }
    }
}

/// `PipelineStateId` is a handle this registry hands back to callers, not a
/// pool-backed id like every other resource here — the native `vk::Pipeline`
/// lives in `hal::Device`'s own cache, so this just wraps the raw handle's
/// bits well enough to round-trip through `Id<PipelineStateMarker>` without
/// a second allocation. Generation is always 0: `hal::Device`'s pipeline
/// cache never evicts, so there's no ABA to guard against.
fn pipeline_key_index(pipeline: vk::Pipeline) -> u32 {
    use ash::vk::Handle;
    (pipeline.as_raw() & 0xffff_ffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_hash_is_order_and_stride_sensitive() {
        let a = vec![VertexAttribute {
            location: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        }];
        let b = vec![VertexAttribute {
            location: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 12,
        }];
        assert_ne!(hash_vertex_layout(12, &a), hash_vertex_layout(12, &b));
        assert_ne!(hash_vertex_layout(12, &a), hash_vertex_layout(16, &a));
    }
}
