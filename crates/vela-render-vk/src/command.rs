// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::warn;
use vela_render::DrawItem;

use crate::error::{VkError, VkResult, VkResultExt};
use crate::mesh::MeshRegistry;
use crate::pipeline::GraphicsPipeline;

/// What one recording targets: the acquired image's framebuffer and the
/// swapchain's current extent.
pub(crate) struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

/// One primary command buffer per frame slot, from a pool whose buffers
/// can be reset individually.
pub(crate) struct CommandRecorder {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    warned_clear_only: bool,
}

impl CommandRecorder {
    pub unsafe fn new(device: &ash::Device, queue_family: u32, slots: usize) -> VkResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = device
            .create_command_pool(&pool_info, None)
            .vk("vkCreateCommandPool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: slots as u32,
            ..Default::default()
        };
        let buffers = match device.allocate_command_buffers(&alloc_info) {
            Ok(b) => b,
            Err(result) => {
                device.destroy_command_pool(pool, None);
                return Err(VkError::Vulkan {
                    call: "vkAllocateCommandBuffers",
                    result,
                });
            }
        };
        Ok(CommandRecorder {
            pool,
            buffers,
            warned_clear_only: false,
        })
    }

    pub fn buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.buffers[slot]
    }

    /// True exactly once: the first time draws arrive with no pipeline bound.
    fn first_clear_only_frame(&mut self, has_pipeline: bool, draw_count: usize) -> bool {
        if has_pipeline || draw_count == 0 || self.warned_clear_only {
            return false;
        }
        self.warned_clear_only = true;
        true
    }

    /// Resets the slot's buffer and records one render pass into it. Draws
    /// are skipped when no pipeline is bound, leaving a cleared frame.
    pub unsafe fn record(
        &mut self,
        device: &ash::Device,
        slot: usize,
        target: &RecordTarget,
        clear: vk::ClearValue,
        pipeline: Option<&GraphicsPipeline>,
        meshes: &MeshRegistry,
        draws: &[DrawItem],
    ) -> VkResult<()> {
        let resolved = draws
            .iter()
            .map(|d| meshes.get(d.mesh).map(|m| (d, m)))
            .collect::<VkResult<Vec<_>>>()?;

        if self.first_clear_only_frame(pipeline.is_some(), draws.len()) {
            warn!(
                "{} draws dropped: no graphics pipeline, set [pipeline] shader paths",
                draws.len()
            );
        }

        let cmd = self.buffers[slot];
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .vk("vkResetCommandBuffer")?;

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &begin)
            .vk("vkBeginCommandBuffer")?;

        let clears = [clear];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: target.render_pass,
            framebuffer: target.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        if let Some(pipeline) = pipeline {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle);

            // y-up viewport
            let vp = vk::Viewport {
                x: 0.0,
                y: target.extent.height as f32,
                width: target.extent.width as f32,
                height: -(target.extent.height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
            let sc = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            };
            device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&sc));

            for (draw, mesh) in resolved {
                device.cmd_push_constants(
                    cmd,
                    pipeline.layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&draw.transform),
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.handle], &[0]);
                device.cmd_bind_index_buffer(cmd, mesh.indices.handle, 0, vk::IndexType::UINT32);
                device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
            }
        }

        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd).vk("vkEndCommandBuffer")
    }

    /// Frees the buffers, then the pool.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if !self.buffers.is_empty() {
            device.free_command_buffers(self.pool, &self.buffers);
            self.buffers.clear();
        }
        device.destroy_command_pool(self.pool, None);
        self.pool = vk::CommandPool::null();
    }
}
