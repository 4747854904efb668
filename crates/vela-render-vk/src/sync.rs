// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{VkResult, VkResultExt};

/// Per-slot synchronization. Independent of the swapchain, so recreation
/// never touches it.
pub(crate) struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    fn empty() -> Self {
        FrameSlot {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        }
    }
}

/// Fences start signaled so the first wait on each slot returns at once.
pub(crate) unsafe fn create_frame_slots(device: &ash::Device, count: usize) -> VkResult<Vec<FrameSlot>> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    let mut slots = Vec::with_capacity(count);
    for _ in 0..count {
        // a slot that fails part-way still holds null for the rest
        let mut slot = FrameSlot::empty();
        let filled = fill_slot(device, &mut slot, &sem_ci, &fence_ci);
        slots.push(slot);
        if let Err(e) = filled {
            destroy_frame_slots(device, &mut slots);
            return Err(e);
        }
    }
    Ok(slots)
}

unsafe fn fill_slot(
    device: &ash::Device,
    slot: &mut FrameSlot,
    sem_ci: &vk::SemaphoreCreateInfo,
    fence_ci: &vk::FenceCreateInfo,
) -> VkResult<()> {
    slot.image_available = device
        .create_semaphore(sem_ci, None)
        .vk("vkCreateSemaphore")?;
    slot.render_finished = device
        .create_semaphore(sem_ci, None)
        .vk("vkCreateSemaphore")?;
    slot.in_flight = device.create_fence(fence_ci, None).vk("vkCreateFence")?;
    Ok(())
}

pub(crate) unsafe fn destroy_frame_slots(device: &ash::Device, slots: &mut Vec<FrameSlot>) {
    for s in slots.drain(..) {
        device.destroy_semaphore(s.image_available, None);
        device.destroy_semaphore(s.render_finished, None);
        device.destroy_fence(s.in_flight, None);
    }
}
