// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::info;
use vela_render::{MeshId, Vertex};

use crate::buffer::GpuBuffer;
use crate::device::DeviceContext;
use crate::error::{VkError, VkResult};
use crate::transfer::TransferContext;

pub(crate) struct GpuMesh {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

/// Device-local meshes, addressed by the [`MeshId`] handed out at upload.
#[derive(Default)]
pub(crate) struct MeshRegistry {
    meshes: Vec<GpuMesh>,
}

impl MeshRegistry {
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn get(&self, id: MeshId) -> VkResult<&GpuMesh> {
        self.meshes
            .get(id.0 as usize)
            .ok_or(VkError::UnknownMesh(id))
    }

    /// Stages through host-visible memory and copies on the transfer queue.
    pub unsafe fn upload(
        &mut self,
        dev: &DeviceContext,
        transfer: &TransferContext,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> VkResult<MeshId> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(VkError::EmptyMesh);
        }
        let device = &dev.device;
        let staging_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        // drawn on graphics, written on transfer
        let owners = [dev.families.graphics, dev.families.transfer];

        let vertices = upload_one(
            dev,
            transfer,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            staging_flags,
            &owners,
        )?;
        let indices = match upload_one(
            dev,
            transfer,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            staging_flags,
            &owners,
        ) {
            Ok(b) => b,
            Err(e) => {
                let mut vertices = vertices;
                vertices.destroy(device);
                return Err(e);
            }
        };

        let index_count = (indices.size / std::mem::size_of::<u32>() as vk::DeviceSize) as u32;
        let id = MeshId(self.meshes.len() as u32);
        self.meshes.push(GpuMesh {
            vertices,
            indices,
            index_count,
        });
        info!("mesh {:?} uploaded ({} indices)", id, index_count);
        Ok(id)
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for mut m in self.meshes.drain(..) {
            m.vertices.destroy(device);
            m.indices.destroy(device);
        }
    }
}

unsafe fn upload_one(
    dev: &DeviceContext,
    transfer: &TransferContext,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
    staging_flags: vk::MemoryPropertyFlags,
    owners: &[u32],
) -> VkResult<GpuBuffer> {
    let device = &dev.device;
    let size = bytes.len() as vk::DeviceSize;

    let mut staging = GpuBuffer::new(
        device,
        &dev.memory,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        staging_flags,
        &[dev.families.transfer],
    )?;
    let result = copy_from_staging(dev, transfer, &staging, bytes, usage, owners);
    staging.destroy(device);
    result
}

unsafe fn copy_from_staging(
    dev: &DeviceContext,
    transfer: &TransferContext,
    staging: &GpuBuffer,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
    owners: &[u32],
) -> VkResult<GpuBuffer> {
    let device = &dev.device;
    staging.write(device, bytes)?;
    let mut dst = GpuBuffer::new(
        device,
        &dev.memory,
        staging.size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        owners,
    )?;
    if let Err(e) = transfer.copy_buffer(device, staging, &dst, staging.size) {
        dst.destroy(device);
        return Err(e);
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_rejects_every_id() {
        let reg = MeshRegistry::default();
        assert_eq!(reg.len(), 0);
        assert!(matches!(
            reg.get(MeshId(0)),
            Err(VkError::UnknownMesh(MeshId(0)))
        ));
        assert!(matches!(
            reg.get(MeshId(7)),
            Err(VkError::UnknownMesh(MeshId(7)))
        ));
    }
}
