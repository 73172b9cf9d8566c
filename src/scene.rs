//! The scene-graph arena.
//!
//! Nodes are stored in a slot vector indexed by [`NodeId`]; parents are back
//! references and children are id lists, so the tree has no cyclic
//! ownership. All mutation goes through the setters here, which OR the
//! property dependency table's bits into `update_type` and bubble a
//! descendants-dirty flag up the ancestor chain so the per-frame traversal
//! can skip clean subtrees.

use thiserror::Error;

use crate::color::Color;
use crate::events::{EventQueue, NodeEvent};
use crate::id::{NodeId, TextureId};
use crate::node::{Node, NodeProps, NodeSnapshot, TextureOptions, UpdateType};
use crate::shader::Shader;
use crate::texture::{OwnerChange, TextureStore};
use crate::texture_manager::TextureMemoryManager;

mod update;

pub(crate) use update::UpdateContext;

/// Topology mutations that are programmer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("invalid topology: node {child} cannot be attached under its own descendant {parent}")]
    InvalidTopology { child: NodeId, parent: NodeId },
    #[error("invalid topology: parent node {0} does not exist")]
    MissingParent(NodeId),
}

#[derive(Debug)]
pub(crate) struct SceneGraph {
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
    root: NodeId,
    pub(crate) events: EventQueue,
    insertion_counter: u64,
}

impl SceneGraph {
    pub(crate) fn new(width: f32, height: f32) -> Self {
        let mut root = Node::from_props(&NodeProps {
            width,
            height,
            ..NodeProps::default()
        });
        root.world_alpha = 1.0;
        let mut scene = Self {
            slots: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
            events: EventQueue::default(),
            insertion_counter: 0,
        };
        scene.mark_dirty(scene.root, UpdateType::ALL);
        scene
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub(crate) fn snapshot(&self, id: NodeId) -> Option<NodeSnapshot> {
        self.node(id).map(|node| NodeSnapshot {
            x: node.x,
            y: node.y,
            width: node.width,
            height: node.height,
            alpha: node.alpha,
            world_alpha: node.world_alpha,
            world_transform: node.world_transform,
            clipping_rect: node.clipping_rect,
            render_state: node.render_state,
            is_renderable: node.is_renderable,
            parent: node.parent,
            parent_has_render_texture: node.parent_has_render_texture,
            parent_render_texture: node.parent_render_texture,
            parent_framebuffer_dimensions: node.parent_framebuffer_dimensions,
            update_type: node.update_type,
        })
    }

    /// Draw-order children of `id`: insertion order after the stable z-sort.
    pub(crate) fn sorted_children(&self, id: NodeId) -> &[NodeId] {
        self.node(id)
            .map(|node| node.sorted_children.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.node(current).and_then(|node| node.parent) {
            depth += 1;
            current = parent;
        }
        depth
    }

    // ── Creation, attachment, destruction ────────────────────────────────

    pub(crate) fn create_node(&mut self, props: &NodeProps) -> Result<NodeId, SceneError> {
        let parent = props.parent.unwrap_or(self.root);
        if !self.contains(parent) {
            return Err(SceneError::MissingParent(parent));
        }

        let node = Node::from_props(props);
        let id = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(node);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() as u32 - 1)
            }
        };
        self.attach(id, parent);
        self.events.push(
            id,
            NodeEvent::ParentChanged {
                old_parent: None,
                new_parent: Some(parent),
            },
        );
        self.mark_dirty(id, UpdateType::ALL);
        Ok(id)
    }

    /// Re-parents `child` under `parent` atomically. Attaching a node under
    /// itself or one of its descendants is rejected.
    pub(crate) fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        if !self.contains(parent) {
            return Err(SceneError::MissingParent(parent));
        }
        if !self.contains(child) || child == self.root {
            return Ok(());
        }
        // Cycle check: walk up from the new parent.
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return Err(SceneError::InvalidTopology { child, parent });
            }
            cursor = self.node(current).and_then(|node| node.parent);
        }

        let old_parent = self.node(child).and_then(|node| node.parent);
        if old_parent == Some(parent) {
            return Ok(());
        }

        if old_parent.is_some() {
            self.detach(child);
        }
        self.attach(child, parent);
        self.events.push(
            child,
            NodeEvent::ParentChanged {
                old_parent,
                new_parent: Some(parent),
            },
        );
        self.mark_dirty(child, UpdateType::ALL);
        Ok(())
    }

    fn attach(&mut self, child: NodeId, parent: NodeId) {
        self.insertion_counter += 1;
        let seq = self.insertion_counter;
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
            node.insertion_seq = seq;
        }
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.push(child);
        }
        self.events.push(parent, NodeEvent::ChildAdded { child });
        self.mark_dirty(
            parent,
            UpdateType::Z_INDEX_CHILDREN | UpdateType::RENDER_BOUNDS,
        );
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.node(child).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.retain(|&id| id != child);
            parent_node.sorted_children.retain(|&id| id != child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
        self.events.push(parent, NodeEvent::ChildRemoved { child });
        self.mark_dirty(
            parent,
            UpdateType::Z_INDEX_CHILDREN | UpdateType::RENDER_BOUNDS,
        );
    }

    /// Destroys a node and its subtree. Destroying the root or an already
    /// destroyed id is a no-op; destroyed ids ignore all mutators.
    pub(crate) fn destroy(
        &mut self,
        id: NodeId,
        textures: &mut TextureStore,
        memory: &mut TextureMemoryManager,
    ) {
        if id == self.root || !self.contains(id) {
            return;
        }
        self.detach(id);
        self.destroy_subtree(id, textures, memory);
    }

    fn destroy_subtree(
        &mut self,
        id: NodeId,
        textures: &mut TextureStore,
        memory: &mut TextureMemoryManager,
    ) {
        let children = self
            .node(id)
            .map(|node| node.children.clone())
            .unwrap_or_default();
        for child in children {
            self.destroy_subtree(child, textures, memory);
        }

        if let Some(mut node) = self.slots[id.0 as usize].take() {
            if let Some(owned) = node.owned_texture.take() {
                self.release_ownership(id, owned, textures, memory);
            }
            self.events.push(id, NodeEvent::Destroyed);
            self.free.push(id.0);
        }
    }

    pub(crate) fn release_ownership(
        &mut self,
        owner: NodeId,
        texture: TextureId,
        textures: &mut TextureStore,
        memory: &mut TextureMemoryManager,
    ) {
        if textures.set_renderable_owner(texture, owner, false) == OwnerChange::BecameIdle {
            memory.mark_idle(textures.resolve_base(texture));
        }
    }

    // ── Dirty tracking ───────────────────────────────────────────────────

    pub(crate) fn mark_dirty(&mut self, id: NodeId, bits: UpdateType) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        node.update_type |= bits;
        let mut cursor = node.parent;
        while let Some(current) = cursor {
            let Some(parent) = self.node_mut(current) else {
                break;
            };
            if parent.descendants_dirty {
                break;
            }
            parent.descendants_dirty = true;
            cursor = parent.parent;
        }
    }

    // ── Spatial setters ──────────────────────────────────────────────────

    pub(crate) fn set_x(&mut self, id: NodeId, value: f32) {
        let Some(node) = self.node_mut(id) else { return };
        if node.x == value {
            return;
        }
        node.x = value;
        self.mark_dirty(
            id,
            UpdateType::LOCAL | UpdateType::GLOBAL | UpdateType::RENDER_BOUNDS,
        );
    }

    pub(crate) fn set_y(&mut self, id: NodeId, value: f32) {
        let Some(node) = self.node_mut(id) else { return };
        if node.y == value {
            return;
        }
        node.y = value;
        self.mark_dirty(
            id,
            UpdateType::LOCAL | UpdateType::GLOBAL | UpdateType::RENDER_BOUNDS,
        );
    }

    pub(crate) fn set_width(&mut self, id: NodeId, value: f32) {
        let Some(node) = self.node_mut(id) else { return };
        if node.width == value {
            return;
        }
        node.width = value;
        self.mark_dirty(
            id,
            UpdateType::LOCAL
                | UpdateType::GLOBAL
                | UpdateType::RENDER_BOUNDS
                | UpdateType::CLIPPING,
        );
    }

    pub(crate) fn set_height(&mut self, id: NodeId, value: f32) {
        let Some(node) = self.node_mut(id) else { return };
        if node.height == value {
            return;
        }
        node.height = value;
        self.mark_dirty(
            id,
            UpdateType::LOCAL
                | UpdateType::GLOBAL
                | UpdateType::RENDER_BOUNDS
                | UpdateType::CLIPPING,
        );
    }

    fn set_scale_rotate_field(&mut self, id: NodeId, write: impl FnOnce(&mut Node) -> bool) {
        let Some(node) = self.node_mut(id) else { return };
        if !write(node) {
            return;
        }
        node.scale_rotate_active =
            node.rotation != 0.0 || node.scale_x != 1.0 || node.scale_y != 1.0;
        self.mark_dirty(
            id,
            UpdateType::LOCAL
                | UpdateType::GLOBAL
                | UpdateType::SCALE_ROTATE
                | UpdateType::RENDER_BOUNDS,
        );
    }

    pub(crate) fn set_scale_x(&mut self, id: NodeId, value: f32) {
        self.set_scale_rotate_field(id, |node| {
            if node.scale_x == value {
                return false;
            }
            node.scale_x = value;
            true
        });
    }

    pub(crate) fn set_scale_y(&mut self, id: NodeId, value: f32) {
        self.set_scale_rotate_field(id, |node| {
            if node.scale_y == value {
                return false;
            }
            node.scale_y = value;
            true
        });
    }

    /// Convenience: writes both scale axes.
    pub(crate) fn set_scale(&mut self, id: NodeId, value: f32) {
        self.set_scale_x(id, value);
        self.set_scale_y(id, value);
    }

    pub(crate) fn set_rotation(&mut self, id: NodeId, value: f32) {
        self.set_scale_rotate_field(id, |node| {
            if node.rotation == value {
                return false;
            }
            node.rotation = value;
            true
        });
    }

    pub(crate) fn set_pivot_x(&mut self, id: NodeId, value: f32) {
        self.set_scale_rotate_field(id, |node| {
            if node.pivot_x == value {
                return false;
            }
            node.pivot_x = value;
            true
        });
    }

    pub(crate) fn set_pivot_y(&mut self, id: NodeId, value: f32) {
        self.set_scale_rotate_field(id, |node| {
            if node.pivot_y == value {
                return false;
            }
            node.pivot_y = value;
            true
        });
    }

    pub(crate) fn set_mount_x(&mut self, id: NodeId, value: f32) {
        self.set_scale_rotate_field(id, |node| {
            if node.mount_x == value {
                return false;
            }
            node.mount_x = value;
            true
        });
    }

    pub(crate) fn set_mount_y(&mut self, id: NodeId, value: f32) {
        self.set_scale_rotate_field(id, |node| {
            if node.mount_y == value {
                return false;
            }
            node.mount_y = value;
            true
        });
    }

    // ── Visual setters ───────────────────────────────────────────────────

    pub(crate) fn set_alpha(&mut self, id: NodeId, value: f32) {
        let Some(node) = self.node_mut(id) else { return };
        if node.alpha == value {
            return;
        }
        node.alpha = value;
        self.mark_dirty(id, UpdateType::GLOBAL | UpdateType::IS_RENDERABLE);
    }

    fn set_corner_colors(&mut self, id: NodeId, write: impl FnOnce(&mut Node) -> bool) {
        let Some(node) = self.node_mut(id) else { return };
        if !write(node) {
            return;
        }
        self.mark_dirty(id, UpdateType::IS_RENDERABLE);
    }

    pub(crate) fn set_color(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_tl != color
                || node.color_tr != color
                || node.color_bl != color
                || node.color_br != color;
            node.color_tl = color;
            node.color_tr = color;
            node.color_bl = color;
            node.color_br = color;
            changed
        });
    }

    pub(crate) fn set_color_top(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_tl != color || node.color_tr != color;
            node.color_tl = color;
            node.color_tr = color;
            changed
        });
    }

    pub(crate) fn set_color_bottom(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_bl != color || node.color_br != color;
            node.color_bl = color;
            node.color_br = color;
            changed
        });
    }

    pub(crate) fn set_color_left(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_tl != color || node.color_bl != color;
            node.color_tl = color;
            node.color_bl = color;
            changed
        });
    }

    pub(crate) fn set_color_right(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_tr != color || node.color_br != color;
            node.color_tr = color;
            node.color_br = color;
            changed
        });
    }

    pub(crate) fn set_color_tl(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_tl != color;
            node.color_tl = color;
            changed
        });
    }

    pub(crate) fn set_color_tr(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_tr != color;
            node.color_tr = color;
            changed
        });
    }

    pub(crate) fn set_color_bl(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_bl != color;
            node.color_bl = color;
            changed
        });
    }

    pub(crate) fn set_color_br(&mut self, id: NodeId, color: Color) {
        self.set_corner_colors(id, |node| {
            let changed = node.color_br != color;
            node.color_br = color;
            changed
        });
    }

    // ── Composition setters ──────────────────────────────────────────────

    pub(crate) fn set_clipping(&mut self, id: NodeId, value: bool) {
        let Some(node) = self.node_mut(id) else { return };
        if node.clipping == value {
            return;
        }
        node.clipping = value;
        self.mark_dirty(id, UpdateType::CLIPPING | UpdateType::RENDER_BOUNDS);
    }

    pub(crate) fn set_z_index(&mut self, id: NodeId, value: i32) {
        let Some(node) = self.node_mut(id) else { return };
        if node.z_index == value {
            return;
        }
        node.z_index = value;
        if let Some(parent) = self.node(id).and_then(|node| node.parent) {
            self.mark_dirty(parent, UpdateType::Z_INDEX_CHILDREN);
        }
    }

    pub(crate) fn set_z_index_locked(&mut self, id: NodeId, value: i32) {
        let Some(node) = self.node_mut(id) else { return };
        if node.z_index_locked == value {
            return;
        }
        node.z_index_locked = value;
        if let Some(parent) = self.node(id).and_then(|node| node.parent) {
            self.mark_dirty(parent, UpdateType::Z_INDEX_CHILDREN);
        }
    }

    pub(crate) fn set_rtt(&mut self, id: NodeId, value: bool) {
        let Some(node) = self.node_mut(id) else { return };
        if node.rtt == value {
            return;
        }
        node.rtt = value;
        self.mark_subtree_dirty(id, UpdateType::PARENT_RENDER_TEXTURE);
    }

    fn mark_subtree_dirty(&mut self, id: NodeId, bits: UpdateType) {
        self.mark_dirty(id, bits);
        let children = self
            .node(id)
            .map(|node| node.children.clone())
            .unwrap_or_default();
        for child in children {
            self.mark_subtree_dirty(child, bits);
        }
    }

    // ── Resource setters ─────────────────────────────────────────────────

    pub(crate) fn set_texture(
        &mut self,
        id: NodeId,
        value: Option<TextureId>,
        textures: &mut TextureStore,
        memory: &mut TextureMemoryManager,
    ) {
        let Some(node) = self.node_mut(id) else { return };
        if node.texture == value {
            return;
        }
        let released = node.owned_texture.take();
        node.texture = value;
        if let Some(old) = released {
            self.release_ownership(id, old, textures, memory);
        }
        self.mark_dirty(id, UpdateType::IS_RENDERABLE);
    }

    pub(crate) fn set_texture_options(&mut self, id: NodeId, value: TextureOptions) {
        if let Some(node) = self.node_mut(id) {
            node.texture_options = value;
        }
    }

    pub(crate) fn set_shader(&mut self, id: NodeId, value: Option<Shader>) {
        let Some(node) = self.node_mut(id) else { return };
        if node.shader == value {
            return;
        }
        node.shader = value;
        self.mark_dirty(id, UpdateType::IS_RENDERABLE);
    }

    pub(crate) fn set_autosize(&mut self, id: NodeId, value: bool) {
        if let Some(node) = self.node_mut(id) {
            node.autosize = value;
        }
    }

    pub(crate) fn set_text_attached(&mut self, id: NodeId, value: bool) {
        let Some(node) = self.node_mut(id) else { return };
        if node.text_attached == value {
            return;
        }
        node.text_attached = value;
        self.mark_dirty(id, UpdateType::IS_RENDERABLE);
    }
}
