// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bytemuck::Pod;

use crate::error::{VkError, VkResult, VkResultExt};

/// First memory type allowed by `type_bits` that carries every flag in `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(flags)
    })
}

/// A buffer with its own dedicated allocation.
pub(crate) struct GpuBuffer {
    pub handle: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    /// `families` lists every queue family that will touch the buffer;
    /// more than one distinct family makes it CONCURRENT.
    pub unsafe fn new(
        device: &ash::Device,
        memory_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
        families: &[u32],
    ) -> VkResult<Self> {
        let mut unique = families.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        if unique.len() > 1 {
            info.sharing_mode = vk::SharingMode::CONCURRENT;
            info.queue_family_index_count = unique.len() as u32;
            info.p_queue_family_indices = unique.as_ptr();
        }
        let handle = device.create_buffer(&info, None).vk("vkCreateBuffer")?;

        let req = device.get_buffer_memory_requirements(handle);
        let Some(memory_type_index) = find_memory_type(memory_props, req.memory_type_bits, flags)
        else {
            device.destroy_buffer(handle, None);
            return Err(VkError::NoMemoryType {
                type_bits: req.memory_type_bits,
                flags,
            });
        };
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = match device.allocate_memory(&alloc, None) {
            Ok(m) => m,
            Err(result) => {
                device.destroy_buffer(handle, None);
                return Err(VkError::Vulkan {
                    call: "vkAllocateMemory",
                    result,
                });
            }
        };
        if let Err(result) = device.bind_buffer_memory(handle, memory, 0) {
            device.free_memory(memory, None);
            device.destroy_buffer(handle, None);
            return Err(VkError::Vulkan {
                call: "vkBindBufferMemory",
                result,
            });
        }

        Ok(GpuBuffer {
            handle,
            memory,
            size,
        })
    }

    /// Copies `data` to the start of a HOST_VISIBLE | HOST_COHERENT buffer.
    pub unsafe fn write<T: Pod>(&self, device: &ash::Device, data: &[T]) -> VkResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
        let ptr = device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .vk("vkMapMemory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
        device.unmap_memory(self.memory);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_buffer(self.handle, None);
        device.free_memory(self.memory, None);
        self.handle = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            p.memory_types[i].property_flags = flags;
        }
        p
    }

    #[test]
    fn picks_first_type_with_all_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host,
            host | vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(find_memory_type(&p, 0b1111, host), Some(2));
        assert_eq!(
            find_memory_type(&p, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn type_bits_mask_out_candidates() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&p, 0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn missing_flags_yield_none() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(
            find_memory_type(&p, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }
}
