// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::buffer::GpuBuffer;
use crate::device::DeviceContext;
use crate::error::{VkResult, VkResultExt};

/// One-shot copies on the transfer queue. Uses its own fence, never a frame
/// slot's, and blocks until each copy completes.
pub(crate) struct TransferContext {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    queue: vk::Queue,
}

impl TransferContext {
    pub unsafe fn new(dev: &DeviceContext) -> VkResult<Self> {
        let device = &dev.device;
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: dev.families.transfer,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        let pool = device
            .create_command_pool(&pool_info, None)
            .vk("vkCreateCommandPool")?;

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = match device.allocate_command_buffers(&alloc_info) {
            Ok(b) => b[0],
            Err(result) => {
                device.destroy_command_pool(pool, None);
                return Err(crate::VkError::Vulkan {
                    call: "vkAllocateCommandBuffers",
                    result,
                });
            }
        };

        // unsignaled: only ever waited on right after a submit
        let fence = match device.create_fence(&vk::FenceCreateInfo::default(), None) {
            Ok(f) => f,
            Err(result) => {
                device.destroy_command_pool(pool, None);
                return Err(crate::VkError::Vulkan {
                    call: "vkCreateFence",
                    result,
                });
            }
        };

        debug!(
            "transfer context on family {} (dedicated: {})",
            dev.families.transfer,
            dev.families.has_dedicated_transfer()
        );
        Ok(TransferContext {
            pool,
            cmd,
            fence,
            queue: dev.transfer_queue,
        })
    }

    /// Copies `size` bytes from `src` to `dst` and waits for completion.
    pub unsafe fn copy_buffer(
        &self,
        device: &ash::Device,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: vk::DeviceSize,
    ) -> VkResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(self.cmd, &begin)
            .vk("vkBeginCommandBuffer")?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(self.cmd, src.handle, dst.handle, std::slice::from_ref(&region));
        device
            .end_command_buffer(self.cmd)
            .vk("vkEndCommandBuffer")?;

        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &self.cmd,
            ..Default::default()
        };
        device
            .queue_submit(self.queue, std::slice::from_ref(&submit), self.fence)
            .vk("vkQueueSubmit")?;
        device
            .wait_for_fences(&[self.fence], true, u64::MAX)
            .vk("vkWaitForFences")?;
        device.reset_fences(&[self.fence]).vk("vkResetFences")?;
        device
            .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())
            .vk("vkResetCommandBuffer")
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_fence(self.fence, None);
        device.free_command_buffers(self.pool, &[self.cmd]);
        device.destroy_command_pool(self.pool, None);
        self.fence = vk::Fence::null();
        self.cmd = vk::CommandBuffer::null();
        self.pool = vk::CommandPool::null();
    }
}
