// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};

/// Handle to vertex/index buffers the backend has uploaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MaterialPass {
    #[default]
    Opaque,
    Transparent,
}

/// One object as the command recorder sees it. `transform` is pushed to the
/// vertex stage as the object's world matrix (column-major).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawItem {
    pub mesh: MeshId,
    pub pass: MaterialPass,
    pub transform: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}
