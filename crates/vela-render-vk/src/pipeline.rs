// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::util::read_spv;
use ash::vk;
use tracing::info;
use vela_render::Vertex;

use crate::error::{VkError, VkResult, VkResultExt};

/// Size of the vertex-stage push constant: one column-major mat4.
pub const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<[[f32; 4]; 4]>() as u32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

/// Reads a SPIR-V binary. Missing files and bad magic/length are both errors.
pub fn load_spirv(path: &Path) -> VkResult<Vec<u32>> {
    let shader_err = |source| VkError::Shader {
        path: path.to_owned(),
        source,
    };
    let bytes = fs::read(path).map_err(shader_err)?;
    read_spv(&mut Cursor::new(&bytes[..])).map_err(shader_err)
}

/// Binding 0 carries [`Vertex`]: position at location 0, color at location 1.
pub fn vertex_layout() -> (
    vk::VertexInputBindingDescription,
    [vk::VertexInputAttributeDescription; 2],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, color) as u32,
        },
    ];
    (binding, attributes)
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> VkResult<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .vk("vkCreateShaderModule")
}

/// The scene pipeline, built against a render pass of a given color format.
pub struct GraphicsPipeline {
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) handle: vk::Pipeline,
    color_format: vk::Format,
}

impl GraphicsPipeline {
    // STRICT: the render pass's color format must match the swapchain's.
    // A new swapchain generation with the same format keeps this pipeline.
    pub(crate) unsafe fn new(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        color_format: vk::Format,
        vertex_spv: &[u32],
        fragment_spv: &[u32],
    ) -> VkResult<Self> {
        // --- Shader modules (destroyed before return) ---
        let vs = create_shader_module(device, vertex_spv)?;
        let fs = match create_shader_module(device, fragment_spv) {
            Ok(fs) => fs,
            Err(e) => {
                device.destroy_shader_module(vs, None);
                return Err(e);
            }
        };

        let result = Self::build(device, render_pass, color_format, vs, fs);
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
        result
    }

    unsafe fn build(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        color_format: vk::Format,
        vs: vk::ShaderModule,
        fs: vk::ShaderModule,
    ) -> VkResult<Self> {
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        // --- Fixed-function state ---
        let (vb, va) = vertex_layout();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &vb,
            vertex_attribute_description_count: va.len() as u32,
            p_vertex_attribute_descriptions: va.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        // no culling: meshes come in either winding
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        // --- Layout: one vertex push constant, no descriptor sets ---
        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        };
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            push_constant_range_count: 1,
            p_push_constant_ranges: &push_range,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .vk("vkCreatePipelineLayout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let handle = match device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        ) {
            Ok(p) => p[0],
            Err((_, result)) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(VkError::Vulkan {
                    call: "vkCreateGraphicsPipelines",
                    result,
                });
            }
        };

        info!("graphics pipeline built for {:?}", color_format);
        Ok(GraphicsPipeline {
            layout,
            handle,
            color_format,
        })
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_pipeline(self.handle, None);
        device.destroy_pipeline_layout(self.layout, None);
        self.handle = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
    }
}
