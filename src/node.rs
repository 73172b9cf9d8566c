//! Scene-graph node data.
//!
//! Nodes live in the [`SceneGraph`](crate::scene::SceneGraph) arena and are
//! addressed by [`NodeId`]. Writable attributes are mutated through the
//! engine's setters, which OR the matching [`UpdateType`] bits; derived state
//! (world transform, world alpha, clipping rect, renderability) is
//! recomputed by the per-frame update traversal and never set directly.

use bitflags::bitflags;

use crate::color::Color;
use crate::id::{NodeId, TextureId};
use crate::matrix::Transform2D;
use crate::rect::Bound;
use crate::shader::Shader;

bitflags! {
    /// Dirty flags driving the update traversal. Each property setter ORs in
    /// the bits from the property dependency table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UpdateType: u16 {
        const LOCAL = 1 << 0;
        const GLOBAL = 1 << 1;
        const PARENT_RENDER_TEXTURE = 1 << 2;
        const SCALE_ROTATE = 1 << 3;
        const CLIPPING = 1 << 4;
        const RENDER_BOUNDS = 1 << 5;
        const Z_INDEX_CHILDREN = 1 << 6;
        const IS_RENDERABLE = 1 << 7;
        const ALL = 0xFF;
    }
}

/// Where a node's world AABB sits relative to its render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    #[default]
    OutOfBounds,
    /// Within the preload margin around the target but not yet visible.
    InBounds,
    /// Intersecting the viewport (or ancestor framebuffer) rect.
    InViewport,
}

/// Recognized texture sampling flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureOptions {
    pub flip_x: bool,
    pub flip_y: bool,
    /// Load the texture eagerly when it is attached, regardless of
    /// renderability.
    pub preload: bool,
}

/// Construction-time node configuration. Every writable attribute plus the
/// initial parent; unset fields take the resolved defaults.
#[derive(Debug, Clone)]
pub struct NodeProps {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub rotation: f32,
    pub pivot_x: f32,
    pub pivot_y: f32,
    pub mount_x: f32,
    pub mount_y: f32,
    /// Applied to all four corners. Defaults to transparent, which makes the
    /// node purely structural.
    pub color: Color,
    pub alpha: f32,
    pub clipping: bool,
    pub z_index: i32,
    pub z_index_locked: i32,
    pub rtt: bool,
    pub texture: Option<TextureId>,
    pub texture_options: TextureOptions,
    pub shader: Option<Shader>,
    pub autosize: bool,
    /// `None` attaches to the scene root.
    pub parent: Option<NodeId>,
}

impl Default for NodeProps {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            pivot_x: 0.5,
            pivot_y: 0.5,
            mount_x: 0.0,
            mount_y: 0.0,
            color: Color::TRANSPARENT,
            alpha: 1.0,
            clipping: false,
            z_index: 0,
            z_index_locked: 0,
            rtt: false,
            texture: None,
            texture_options: TextureOptions::default(),
            shader: None,
            autosize: false,
            parent: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    // Spatial
    pub(crate) x: f32,
    pub(crate) y: f32,
    pub(crate) width: f32,
    pub(crate) height: f32,
    pub(crate) scale_x: f32,
    pub(crate) scale_y: f32,
    pub(crate) rotation: f32,
    pub(crate) pivot_x: f32,
    pub(crate) pivot_y: f32,
    pub(crate) mount_x: f32,
    pub(crate) mount_y: f32,

    // Visual
    pub(crate) color_tl: Color,
    pub(crate) color_tr: Color,
    pub(crate) color_bl: Color,
    pub(crate) color_br: Color,
    pub(crate) alpha: f32,

    // Composition
    pub(crate) clipping: bool,
    pub(crate) z_index: i32,
    pub(crate) z_index_locked: i32,
    pub(crate) rtt: bool,

    // Resources
    pub(crate) texture: Option<TextureId>,
    pub(crate) texture_options: TextureOptions,
    pub(crate) shader: Option<Shader>,
    pub(crate) autosize: bool,
    /// Set when an SDF text state is attached to this node.
    pub(crate) text_attached: bool,

    // Topology
    pub(crate) parent: Option<NodeId>,
    /// Ownership order; never reordered by z-sorting.
    pub(crate) children: Vec<NodeId>,
    /// Parallel draw-order index rebuilt on `Z_INDEX_CHILDREN`.
    pub(crate) sorted_children: Vec<NodeId>,
    /// Monotonic attach sequence used to break z-sort ties.
    pub(crate) insertion_seq: u64,

    // Derived
    pub(crate) local_transform: Transform2D,
    pub(crate) world_transform: Transform2D,
    pub(crate) world_alpha: f32,
    pub(crate) world_bound: Bound,
    pub(crate) clipping_rect: Bound,
    pub(crate) render_state: RenderState,
    pub(crate) parent_has_render_texture: bool,
    pub(crate) parent_render_texture: Option<NodeId>,
    pub(crate) parent_framebuffer_dimensions: Option<(u32, u32)>,
    pub(crate) is_renderable: bool,
    /// The texture this node currently holds a renderable-owner reference on.
    pub(crate) owned_texture: Option<TextureId>,
    /// Cached by `SCALE_ROTATE`: whether the local transform needs the full
    /// pivot/rotation/scale composition.
    pub(crate) scale_rotate_active: bool,

    pub(crate) update_type: UpdateType,
    pub(crate) descendants_dirty: bool,
}

impl Node {
    pub(crate) fn from_props(props: &NodeProps) -> Self {
        Self {
            x: props.x,
            y: props.y,
            width: props.width,
            height: props.height,
            scale_x: props.scale_x,
            scale_y: props.scale_y,
            rotation: props.rotation,
            pivot_x: props.pivot_x,
            pivot_y: props.pivot_y,
            mount_x: props.mount_x,
            mount_y: props.mount_y,
            color_tl: props.color,
            color_tr: props.color,
            color_bl: props.color,
            color_br: props.color,
            alpha: props.alpha,
            clipping: props.clipping,
            z_index: props.z_index,
            z_index_locked: props.z_index_locked,
            rtt: props.rtt,
            texture: props.texture,
            texture_options: props.texture_options,
            shader: props.shader.clone(),
            autosize: props.autosize,
            text_attached: false,
            parent: None,
            children: Vec::new(),
            sorted_children: Vec::new(),
            insertion_seq: 0,
            local_transform: Transform2D::IDENTITY,
            world_transform: Transform2D::IDENTITY,
            world_alpha: 1.0,
            world_bound: Bound::INVALID,
            clipping_rect: Bound::INVALID,
            render_state: RenderState::OutOfBounds,
            parent_has_render_texture: false,
            parent_render_texture: None,
            parent_framebuffer_dimensions: None,
            is_renderable: false,
            owned_texture: None,
            scale_rotate_active: props.rotation != 0.0
                || props.scale_x != 1.0
                || props.scale_y != 1.0,
            update_type: UpdateType::ALL,
            descendants_dirty: false,
        }
    }

    /// Whether the node has anything to draw, ignoring visibility: a loaded
    /// texture when one is attached, an SDF text state, a render-texture
    /// host, a shader, or any non-transparent corner color.
    pub(crate) fn has_renderable_content(&self, texture_loaded: bool) -> bool {
        if self.texture.is_some() {
            return texture_loaded;
        }
        if self.text_attached || self.rtt || self.shader.is_some() {
            return true;
        }
        !(self.color_tl.is_transparent()
            && self.color_tr.is_transparent()
            && self.color_bl.is_transparent()
            && self.color_br.is_transparent())
    }

    /// Sort key for the draw-order index: `(z_index, z_index_locked)`
    /// lexicographically, insertion order breaking ties.
    pub(crate) fn z_sort_key(&self) -> (i32, i32, u64) {
        (self.z_index, self.z_index_locked, self.insertion_seq)
    }
}

/// Read-only snapshot of a node's state, both writable and derived.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub alpha: f32,
    pub world_alpha: f32,
    pub world_transform: Transform2D,
    pub clipping_rect: Bound,
    pub render_state: RenderState,
    pub is_renderable: bool,
    pub parent: Option<NodeId>,
    pub parent_has_render_texture: bool,
    pub parent_render_texture: Option<NodeId>,
    pub parent_framebuffer_dimensions: Option<(u32, u32)>,
    pub update_type: UpdateType,
}

#[cfg(test)]
mod tests {
    use super::{Node, NodeProps, UpdateType};
    use crate::color::Color;

    #[test]
    fn all_covers_every_flag() {
        assert_eq!(UpdateType::ALL, UpdateType::all());
    }

    #[test]
    fn default_node_has_no_renderable_content() {
        let node = Node::from_props(&NodeProps::default());
        assert!(!node.has_renderable_content(false));
    }

    #[test]
    fn colored_node_has_content() {
        let node = Node::from_props(&NodeProps {
            color: Color(0xFF0000FF),
            ..NodeProps::default()
        });
        assert!(node.has_renderable_content(false));
    }

    #[test]
    fn textured_node_content_tracks_load_state() {
        let node = Node::from_props(&NodeProps {
            color: Color(0xFF0000FF),
            texture: Some(crate::id::TextureId(5)),
            ..NodeProps::default()
        });
        assert!(!node.has_renderable_content(false));
        assert!(node.has_renderable_content(true));
    }
}
