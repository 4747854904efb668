// SPDX-License-Identifier: CEPL-1.0
use std::{io, path::PathBuf};

use ash::vk;
use thiserror::Error;
use vela_render::MeshId;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("failed to find GPU with Vulkan support")]
    NoGpu,

    #[error("failed to find a suitable GPU")]
    NoSuitableGpu,

    #[error("surface reports no formats")]
    NoSurfaceFormat,

    #[error("shader {}: {source}", path.display())]
    Shader {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no memory type in {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("mesh upload needs at least one vertex and one index")]
    EmptyMesh,

    #[error("draw references unknown mesh {0:?}")]
    UnknownMesh(MeshId),
}

pub type VkResult<T> = Result<T, VkError>;

/// Tags a raw `vk::Result` with the API call that produced it.
pub(crate) trait VkResultExt<T> {
    fn vk(self, call: &'static str) -> VkResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk(self, call: &'static str) -> VkResult<T> {
        self.map_err(|result| VkError::Vulkan { call, result })
    }
}
