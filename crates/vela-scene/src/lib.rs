// SPDX-License-Identifier: CEPL-1.0
//! Arena-backed scene tree that flattens into the frame loop's draw list.
//!
//! Nodes never own each other: children are indices into the arena and the
//! parent link is a plain optional index.

use glam::Mat4;
use thiserror::Error;
use tracing::trace;
use vela_render::{DrawItem, MaterialPass, MeshId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("unknown scene node {0:?}")]
    UnknownNode(NodeId),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeKind {
    /// Grouping/transform node with nothing to draw.
    Empty,
    Mesh { mesh: MeshId, pass: MaterialPass },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    local: Mat4,
    world: Mat4,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Node {
            kind,
            local: Mat4::IDENTITY,
            world: Mat4::IDENTITY,
            parent,
            children: Vec::new(),
        }
    }

    pub fn local_transform(&self) -> Mat4 {
        self.local
    }

    /// Cached value from the last [`SceneGraph::refresh_world_transforms`].
    pub fn world_transform(&self) -> Mat4 {
        self.world
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Clone, Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn add_root(&mut self, kind: NodeKind) -> NodeId {
        let id = self.push(Node::new(kind, None));
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId, SceneError> {
        self.node(parent)?;
        let id = self.push(Node::new(kind, Some(parent)));
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, SceneError> {
        self.nodes.get(id.0).ok_or(SceneError::UnknownNode(id))
    }

    /// Takes effect on the next [`refresh_world_transforms`](Self::refresh_world_transforms).
    pub fn set_local_transform(&mut self, id: NodeId, local: Mat4) -> Result<(), SceneError> {
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or(SceneError::UnknownNode(id))?;
        node.local = local;
        Ok(())
    }

    /// world = parent.world * local, propagated from every root.
    pub fn refresh_world_transforms(&mut self) {
        let mut stack: Vec<(NodeId, Mat4)> =
            self.roots.iter().rev().map(|&r| (r, Mat4::IDENTITY)).collect();

        while let Some((id, parent_world)) = stack.pop() {
            let node = &mut self.nodes[id.0];
            node.world = parent_world * node.local;
            let world = node.world;
            stack.extend(node.children.iter().rev().map(|&c| (c, world)));
        }
    }

    /// Flattens the tree depth-first. Every mesh node yields one item whose
    /// transform is `top * world`; opaque items precede transparent ones and
    /// each group keeps traversal order.
    pub fn collect_draws(&self, top: Mat4) -> Vec<DrawItem> {
        let mut opaque = Vec::new();
        let mut transparent = Vec::new();

        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if let NodeKind::Mesh { mesh, pass } = node.kind {
                let item = DrawItem {
                    mesh,
                    pass,
                    transform: (top * node.world).to_cols_array_2d(),
                };
                match pass {
                    MaterialPass::Opaque => opaque.push(item),
                    MaterialPass::Transparent => transparent.push(item),
                }
            }
            stack.extend(node.children.iter().rev().copied());
        }

        trace!(
            opaque = opaque.len(),
            transparent = transparent.len(),
            "scene flattened"
        );
        opaque.extend(transparent);
        opaque
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn mesh(id: u32, pass: MaterialPass) -> NodeKind {
        NodeKind::Mesh {
            mesh: MeshId(id),
            pass,
        }
    }

    #[test]
    fn world_transform_composes_parent_then_local() {
        let mut g = SceneGraph::new();
        let root = g.add_root(NodeKind::Empty);
        let child = g.add_child(root, mesh(0, MaterialPass::Opaque)).unwrap();

        g.set_local_transform(root, Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)))
            .unwrap();
        g.set_local_transform(child, Mat4::from_scale(Vec3::splat(2.0)))
            .unwrap();
        g.refresh_world_transforms();

        let p = g
            .node(child)
            .unwrap()
            .world_transform()
            .transform_point3(Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(p, Vec3::new(3.0, 2.0, 0.0));
    }

    #[test]
    fn local_changes_are_not_visible_until_refresh() {
        let mut g = SceneGraph::new();
        let root = g.add_root(NodeKind::Empty);
        g.set_local_transform(root, Mat4::from_scale(Vec3::splat(3.0)))
            .unwrap();
        assert_eq!(g.node(root).unwrap().world_transform(), Mat4::IDENTITY);

        g.refresh_world_transforms();
        assert_eq!(
            g.node(root).unwrap().world_transform(),
            Mat4::from_scale(Vec3::splat(3.0))
        );
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut g = SceneGraph::new();
        let err = g
            .add_child(NodeId(7), NodeKind::Empty)
            .unwrap_err();
        assert_eq!(err, SceneError::UnknownNode(NodeId(7)));
        assert!(g.is_empty());
    }

    #[test]
    fn parent_links_are_plain_indices() {
        let mut g = SceneGraph::new();
        let root = g.add_root(NodeKind::Empty);
        let a = g.add_child(root, NodeKind::Empty).unwrap();
        let b = g.add_child(a, mesh(1, MaterialPass::Opaque)).unwrap();

        assert_eq!(g.node(b).unwrap().parent(), Some(a));
        assert_eq!(g.node(root).unwrap().parent(), None);
        assert_eq!(g.node(root).unwrap().children(), &[a]);
        assert_eq!(g.roots(), &[root]);
    }

    #[test]
    fn opaque_draws_come_before_transparent_in_preorder() {
        let mut g = SceneGraph::new();
        let root = g.add_root(mesh(0, MaterialPass::Transparent));
        let a = g.add_child(root, mesh(1, MaterialPass::Opaque)).unwrap();
        g.add_child(a, mesh(2, MaterialPass::Transparent)).unwrap();
        g.add_child(root, mesh(3, MaterialPass::Opaque)).unwrap();
        g.add_root(NodeKind::Empty);
        g.add_root(mesh(4, MaterialPass::Opaque));
        g.refresh_world_transforms();

        let order: Vec<_> = g
            .collect_draws(Mat4::IDENTITY)
            .iter()
            .map(|d| (d.mesh.0, d.pass))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, MaterialPass::Opaque),
                (3, MaterialPass::Opaque),
                (4, MaterialPass::Opaque),
                (0, MaterialPass::Transparent),
                (2, MaterialPass::Transparent),
            ]
        );
    }

    #[test]
    fn top_matrix_is_applied_before_world() {
        let mut g = SceneGraph::new();
        let root = g.add_root(mesh(0, MaterialPass::Opaque));
        g.set_local_transform(root, Mat4::from_translation(Vec3::X))
            .unwrap();
        g.refresh_world_transforms();

        let top = Mat4::from_scale(Vec3::splat(10.0));
        let draws = g.collect_draws(top);
        assert_eq!(draws.len(), 1);
        assert_eq!(
            draws[0].transform,
            (top * Mat4::from_translation(Vec3::X)).to_cols_array_2d()
        );
    }

    #[test]
    fn empty_graph_has_nothing_to_draw() {
        let g = SceneGraph::new();
        assert!(g.collect_draws(Mat4::IDENTITY).is_empty());
    }
}
