//! Per-frame dirty-flag driven update traversal.
//!
//! Walks the tree depth-first from the root, skipping subtrees with no dirty
//! bits anywhere below them. Each processed node recomputes exactly the
//! derived state its dirty bits call for, in dependency order: local
//! transform, world transform/alpha, clipping chain, z-order index, render
//! bounds, render-texture ancestry, renderability. Bits that invalidate
//! descendants are pushed down as inherited flags rather than eagerly marked.

use crate::id::{NodeId, TextureId};
use crate::matrix::Transform2D;
use crate::node::{Node, RenderState, UpdateType};
use crate::rect::Bound;
use crate::scene::SceneGraph;
use crate::texture::{OwnerChange, TextureState, TextureStore};
use crate::texture_manager::TextureMemoryManager;

use crate::events::NodeEvent;

pub(crate) struct UpdateContext<'a> {
    pub viewport: Bound,
    /// Preload margin around the render target for the `InBounds` state.
    pub bounds_margin: f32,
    pub textures: &'a mut TextureStore,
    pub memory: &'a mut TextureMemoryManager,
    /// Render-to-texture roots whose subtree content changed this update.
    pub dirty_rtt: Vec<NodeId>,
    /// Textures that gained their first owner and are still `Freed`.
    pub pending_loads: Vec<TextureId>,
}

impl<'a> UpdateContext<'a> {
    pub(crate) fn new(
        viewport: Bound,
        bounds_margin: f32,
        textures: &'a mut TextureStore,
        memory: &'a mut TextureMemoryManager,
    ) -> Self {
        Self {
            viewport,
            bounds_margin,
            textures,
            memory,
            dirty_rtt: Vec::new(),
            pending_loads: Vec::new(),
        }
    }
}

/// Derived state a node inherits from its parent during the walk.
#[derive(Debug, Clone, Copy)]
struct ParentState {
    world: Transform2D,
    world_alpha: f32,
    clipping_rect: Bound,
    has_render_texture: bool,
    render_texture: Option<NodeId>,
    framebuffer_dimensions: Option<(u32, u32)>,
}

impl ParentState {
    fn root() -> Self {
        Self {
            world: Transform2D::IDENTITY,
            world_alpha: 1.0,
            clipping_rect: Bound::INVALID,
            has_render_texture: false,
            render_texture: None,
            framebuffer_dimensions: None,
        }
    }
}

/// Clipping-chain intersection. An invalid parent rect means "unclipped", so
/// the node's own contribution passes through untouched.
fn clip_intersection(parent: &Bound, contribution: Option<Bound>) -> Bound {
    match contribution {
        None => *parent,
        Some(own) if !parent.valid => own,
        Some(own) => parent.intersection(&own),
    }
}

fn compute_local_transform(node: &Node) -> Transform2D {
    let mount_tx = node.x - node.mount_x * node.width;
    let mount_ty = node.y - node.mount_y * node.height;
    if node.scale_rotate_active {
        let pivot_tx = node.pivot_x * node.width;
        let pivot_ty = node.pivot_y * node.height;
        let mut transform = Transform2D::translation(mount_tx + pivot_tx, mount_ty + pivot_ty);
        transform.rotate(node.rotation);
        transform.scale(node.scale_x, node.scale_y);
        transform.translate(-pivot_tx, -pivot_ty);
        transform
    } else {
        Transform2D::translation(mount_tx, mount_ty)
    }
}

fn world_aabb(transform: &Transform2D, width: f32, height: f32) -> Bound {
    let corners = [
        transform.transform_point(0.0, 0.0),
        transform.transform_point(width, 0.0),
        transform.transform_point(0.0, height),
        transform.transform_point(width, height),
    ];
    let mut x1 = f32::INFINITY;
    let mut y1 = f32::INFINITY;
    let mut x2 = f32::NEG_INFINITY;
    let mut y2 = f32::NEG_INFINITY;
    for (x, y) in corners {
        x1 = x1.min(x);
        y1 = y1.min(y);
        x2 = x2.max(x);
        y2 = y2.max(y);
    }
    Bound::new(x1, y1, x2, y2)
}

fn expand(bound: &Bound, margin: f32) -> Bound {
    Bound::new(
        bound.x1 - margin,
        bound.y1 - margin,
        bound.x2 + margin,
        bound.y2 + margin,
    )
}

impl SceneGraph {
    /// Runs the dirty-flag traversal. After it returns, every node's
    /// `update_type` is empty.
    pub(crate) fn update(&mut self, ctx: &mut UpdateContext<'_>) {
        let root = self.root();
        self.update_node(root, UpdateType::empty(), &ParentState::root(), ctx);
    }

    fn update_node(
        &mut self,
        id: NodeId,
        inherited: UpdateType,
        parent: &ParentState,
        ctx: &mut UpdateContext<'_>,
    ) {
        let index = id.0 as usize;
        let Some(mut node) = self.slots.get_mut(index).and_then(Option::take) else {
            return;
        };
        let dirty = node.update_type | inherited;
        if dirty.is_empty() && !node.descendants_dirty {
            self.slots[index] = Some(node);
            return;
        }

        if !dirty.is_empty() {
            if let Some(render_root) = parent.render_texture {
                if !ctx.dirty_rtt.contains(&render_root) {
                    ctx.dirty_rtt.push(render_root);
                }
            }
            if node.rtt
                && dirty.contains(UpdateType::Z_INDEX_CHILDREN)
                && !ctx.dirty_rtt.contains(&id)
            {
                ctx.dirty_rtt.push(id);
            }
        }

        if dirty.contains(UpdateType::LOCAL) {
            node.local_transform = compute_local_transform(&node);
        }

        if dirty.contains(UpdateType::GLOBAL) {
            Transform2D::multiply(&mut node.world_transform, &parent.world, &node.local_transform);
            node.world_alpha = (parent.world_alpha * node.alpha).clamp(0.0, 1.0);
        }

        if dirty.contains(UpdateType::CLIPPING) {
            let contribution = node
                .clipping
                .then(|| world_aabb(&node.world_transform, node.width, node.height));
            node.clipping_rect = clip_intersection(&parent.clipping_rect, contribution);
        }

        if dirty.contains(UpdateType::Z_INDEX_CHILDREN) {
            let mut order = node.children.clone();
            order.sort_by_key(|&child| {
                self.node(child)
                    .map(|child_node| child_node.z_sort_key())
                    .unwrap_or((0, 0, u64::MAX))
            });
            node.sorted_children = order;
        }

        if dirty.contains(UpdateType::PARENT_RENDER_TEXTURE) {
            node.parent_has_render_texture = parent.has_render_texture;
            node.parent_render_texture = parent.render_texture;
            node.parent_framebuffer_dimensions = parent.framebuffer_dimensions;
        }

        if dirty.contains(UpdateType::RENDER_BOUNDS) {
            node.world_bound = world_aabb(&node.world_transform, node.width, node.height);
            let target = if parent.has_render_texture {
                let (fb_width, fb_height) = parent.framebuffer_dimensions.unwrap_or((0, 0));
                Bound::new(0.0, 0.0, fb_width as f32, fb_height as f32)
            } else {
                ctx.viewport
            };
            let previous = node.render_state;
            node.render_state = if node.world_bound.intersects(&target) {
                RenderState::InViewport
            } else if node
                .world_bound
                .intersects(&expand(&target, ctx.bounds_margin))
            {
                RenderState::InBounds
            } else {
                RenderState::OutOfBounds
            };
            if previous != RenderState::InViewport
                && node.render_state == RenderState::InViewport
            {
                self.events.push(id, NodeEvent::InViewport);
            } else if previous == RenderState::InViewport
                && node.render_state != RenderState::InViewport
            {
                self.events.push(id, NodeEvent::OutOfViewport);
            }
        }

        if dirty
            .intersects(UpdateType::IS_RENDERABLE | UpdateType::RENDER_BOUNDS | UpdateType::GLOBAL)
        {
            self.refresh_renderability(id, &mut node, ctx);
        }

        node.update_type = UpdateType::empty();
        node.descendants_dirty = false;

        let mut child_inherited = UpdateType::empty();
        if dirty.contains(UpdateType::GLOBAL) {
            child_inherited |=
                UpdateType::GLOBAL | UpdateType::RENDER_BOUNDS | UpdateType::IS_RENDERABLE;
        }
        if dirty.contains(UpdateType::CLIPPING) {
            child_inherited |= UpdateType::CLIPPING;
        }
        if dirty.contains(UpdateType::PARENT_RENDER_TEXTURE) {
            child_inherited |= UpdateType::PARENT_RENDER_TEXTURE
                | UpdateType::GLOBAL
                | UpdateType::CLIPPING
                | UpdateType::RENDER_BOUNDS
                | UpdateType::IS_RENDERABLE;
        }

        let child_state = if node.rtt {
            ParentState {
                world: Transform2D::IDENTITY,
                world_alpha: 1.0,
                clipping_rect: Bound::INVALID,
                has_render_texture: true,
                render_texture: Some(id),
                framebuffer_dimensions: Some((node.width as u32, node.height as u32)),
            }
        } else {
            ParentState {
                world: node.world_transform,
                world_alpha: node.world_alpha,
                clipping_rect: node.clipping_rect,
                has_render_texture: node.parent_has_render_texture,
                render_texture: node.parent_render_texture,
                framebuffer_dimensions: node.parent_framebuffer_dimensions,
            }
        };

        let children = node.children.clone();
        self.slots[index] = Some(node);

        for child in children {
            self.update_node(child, child_inherited, &child_state, ctx);
        }
    }

    /// Recomputes `is_renderable` and syncs the renderable-owner reference on
    /// the node's texture. Ownership follows need (visible or within the
    /// preload margin), not load completion, so a texture can start loading
    /// before its first frame on screen.
    fn refresh_renderability(&mut self, id: NodeId, node: &mut Node, ctx: &mut UpdateContext<'_>) {
        // Sub-textures report their parent's residency.
        let texture_loaded = node
            .texture
            .map(|texture| ctx.textures.resolve_base(texture))
            .and_then(|base| ctx.textures.get(base))
            .is_some_and(|texture| texture.state() == TextureState::Loaded);

        let clipped_out = node.clipping_rect.valid && node.clipping_rect.is_empty();
        let visible = node.world_alpha > 0.0
            && node.render_state == RenderState::InViewport
            && !clipped_out;
        node.is_renderable = visible && node.has_renderable_content(texture_loaded);

        let wants_texture = node.world_alpha > 0.0
            && node.render_state != RenderState::OutOfBounds
            && !clipped_out;
        let desired = if wants_texture { node.texture } else { None };
        if desired == node.owned_texture {
            return;
        }
        if let Some(old) = node.owned_texture.take() {
            if ctx.textures.set_renderable_owner(old, id, false) == OwnerChange::BecameIdle {
                ctx.memory.mark_idle(ctx.textures.resolve_base(old));
            }
        }
        if let Some(new) = desired {
            if ctx.textures.set_renderable_owner(new, id, true) == OwnerChange::BecameLive {
                ctx.memory.mark_live(ctx.textures.resolve_base(new));
            }
            let base = ctx.textures.resolve_base(new);
            if ctx
                .textures
                .get(base)
                .is_some_and(|texture| texture.state() == TextureState::Freed)
                && !ctx.pending_loads.contains(&base)
            {
                ctx.pending_loads.push(base);
            }
        }
        node.owned_texture = desired;
    }
}

#[cfg(test)]
mod tests {
    use super::UpdateContext;
    use crate::color::Color;
    use crate::events::NodeEvent;
    use crate::node::{NodeProps, RenderState, UpdateType};
    use crate::rect::Bound;
    use crate::scene::SceneGraph;
    use crate::texture::TextureStore;
    use crate::texture_manager::TextureMemoryManager;

    const VIEWPORT: Bound = Bound {
        x1: 0.0,
        y1: 0.0,
        x2: 1920.0,
        y2: 1080.0,
        valid: true,
    };

    fn run_update(graph: &mut SceneGraph) {
        let mut textures = TextureStore::new();
        let mut memory = TextureMemoryManager::new(u64::MAX);
        let mut ctx = UpdateContext::new(VIEWPORT, 100.0, &mut textures, &mut memory);
        graph.update(&mut ctx);
    }

    fn visible_props() -> NodeProps {
        NodeProps {
            width: 100.0,
            height: 100.0,
            color: Color(0xFFFFFFFF),
            ..NodeProps::default()
        }
    }

    #[test]
    fn update_clears_every_dirty_bit() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let child = graph.create_node(&visible_props()).unwrap();
        let grandchild = graph
            .create_node(&NodeProps {
                parent: Some(child),
                ..visible_props()
            })
            .unwrap();
        run_update(&mut graph);

        for id in [graph.root(), child, grandchild] {
            assert_eq!(graph.node(id).unwrap().update_type, UpdateType::empty());
        }
    }

    #[test]
    fn world_alpha_is_the_parent_product_clamped() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let parent = graph
            .create_node(&NodeProps {
                alpha: 0.5,
                ..visible_props()
            })
            .unwrap();
        let child = graph
            .create_node(&NodeProps {
                parent: Some(parent),
                alpha: 0.5,
                ..visible_props()
            })
            .unwrap();
        run_update(&mut graph);

        assert_eq!(graph.node(parent).unwrap().world_alpha, 0.5);
        assert_eq!(graph.node(child).unwrap().world_alpha, 0.25);

        graph.set_alpha(parent, 2.0);
        run_update(&mut graph);
        assert_eq!(graph.node(parent).unwrap().world_alpha, 1.0);
        assert_eq!(graph.node(child).unwrap().world_alpha, 0.5);
    }

    #[test]
    fn world_transform_chains_through_parents() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let parent = graph
            .create_node(&NodeProps {
                x: 100.0,
                y: 100.0,
                ..visible_props()
            })
            .unwrap();
        let child = graph
            .create_node(&NodeProps {
                parent: Some(parent),
                x: 150.0,
                y: 150.0,
                ..visible_props()
            })
            .unwrap();
        run_update(&mut graph);

        let world = graph.node(child).unwrap().world_transform;
        assert_eq!(world.transform_point(0.0, 0.0), (250.0, 250.0));
    }

    #[test]
    fn clipping_rect_is_inherited_and_intersected() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let outer = graph
            .create_node(&NodeProps {
                x: 100.0,
                y: 100.0,
                width: 200.0,
                height: 200.0,
                clipping: true,
                ..NodeProps::default()
            })
            .unwrap();
        let inner = graph
            .create_node(&NodeProps {
                parent: Some(outer),
                x: 150.0,
                y: 150.0,
                width: 200.0,
                height: 200.0,
                clipping: true,
                ..NodeProps::default()
            })
            .unwrap();
        let leaf = graph
            .create_node(&NodeProps {
                parent: Some(inner),
                ..visible_props()
            })
            .unwrap();
        run_update(&mut graph);

        let outer_clip = graph.node(outer).unwrap().clipping_rect;
        assert_eq!(
            (outer_clip.x1, outer_clip.y1, outer_clip.x2, outer_clip.y2),
            (100.0, 100.0, 300.0, 300.0)
        );

        // The inner clipper's own rect (250..450) intersected with the
        // outer chain (100..300).
        let inner_clip = graph.node(inner).unwrap().clipping_rect;
        assert_eq!(
            (inner_clip.x1, inner_clip.y1, inner_clip.x2, inner_clip.y2),
            (250.0, 250.0, 300.0, 300.0)
        );

        // Non-clipping leaf inherits the chain unchanged.
        assert_eq!(graph.node(leaf).unwrap().clipping_rect, inner_clip);
    }

    #[test]
    fn z_order_ties_break_by_insertion_order() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let a = graph
            .create_node(&NodeProps {
                z_index: 2,
                ..visible_props()
            })
            .unwrap();
        let b = graph
            .create_node(&NodeProps {
                z_index: 1,
                ..visible_props()
            })
            .unwrap();
        let c = graph
            .create_node(&NodeProps {
                z_index: 2,
                ..visible_props()
            })
            .unwrap();
        run_update(&mut graph);

        assert_eq!(graph.sorted_children(graph.root()), &[b, a, c]);
        // Ownership order is untouched.
        assert_eq!(graph.node(graph.root()).unwrap().children, vec![a, b, c]);
    }

    #[test]
    fn render_state_transitions_emit_viewport_events() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let node = graph.create_node(&visible_props()).unwrap();
        run_update(&mut graph);
        let events = graph.events.drain();
        assert!(events.contains(&(node, NodeEvent::InViewport)));
        assert_eq!(graph.node(node).unwrap().render_state, RenderState::InViewport);

        // Move within the preload margin: InBounds, one OutOfViewport event.
        graph.set_x(node, -150.0);
        run_update(&mut graph);
        let events = graph.events.drain();
        assert!(events.contains(&(node, NodeEvent::OutOfViewport)));
        assert_eq!(graph.node(node).unwrap().render_state, RenderState::InBounds);

        // Far outside the margin.
        graph.set_x(node, -5000.0);
        run_update(&mut graph);
        assert!(graph.events.drain().is_empty());
        assert_eq!(graph.node(node).unwrap().render_state, RenderState::OutOfBounds);
    }

    #[test]
    fn moving_a_parent_updates_descendant_bounds() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let parent = graph.create_node(&visible_props()).unwrap();
        let child = graph
            .create_node(&NodeProps {
                parent: Some(parent),
                ..visible_props()
            })
            .unwrap();
        run_update(&mut graph);
        assert!(graph.node(child).unwrap().is_renderable);

        graph.set_x(parent, -10_000.0);
        run_update(&mut graph);
        assert!(!graph.node(child).unwrap().is_renderable);
        assert_eq!(
            graph.node(child).unwrap().render_state,
            RenderState::OutOfBounds
        );
    }

    #[test]
    fn texture_ownership_follows_visibility() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let mut textures = TextureStore::new();
        let mut memory = TextureMemoryManager::new(u64::MAX);
        let texture = textures.create_image(Some((32, 32)), None, false);
        let node = graph.create_node(&visible_props()).unwrap();
        graph.set_texture(node, Some(texture), &mut textures, &mut memory);

        let mut ctx = UpdateContext::new(VIEWPORT, 100.0, &mut textures, &mut memory);
        graph.update(&mut ctx);
        assert_eq!(ctx.pending_loads, vec![texture]);
        drop(ctx);
        assert!(textures.get(texture).unwrap().is_live());

        graph.set_x(node, -10_000.0);
        let mut ctx = UpdateContext::new(VIEWPORT, 100.0, &mut textures, &mut memory);
        graph.update(&mut ctx);
        drop(ctx);
        assert!(!textures.get(texture).unwrap().is_live());
    }

    #[test]
    fn rtt_children_compute_framebuffer_relative_state() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let host = graph
            .create_node(&NodeProps {
                x: 500.0,
                y: 500.0,
                width: 256.0,
                height: 256.0,
                rtt: true,
                ..NodeProps::default()
            })
            .unwrap();
        let child = graph
            .create_node(&NodeProps {
                parent: Some(host),
                x: 10.0,
                y: 20.0,
                ..visible_props()
            })
            .unwrap();
        run_update(&mut graph);

        let child_node = graph.node(child).unwrap();
        assert!(child_node.parent_has_render_texture);
        assert_eq!(child_node.parent_render_texture, Some(host));
        assert_eq!(child_node.parent_framebuffer_dimensions, Some((256, 256)));
        // World position is relative to the framebuffer, not the screen.
        assert_eq!(
            child_node.world_transform.transform_point(0.0, 0.0),
            (10.0, 20.0)
        );

        // The host itself still lives in screen space.
        let host_node = graph.node(host).unwrap();
        assert_eq!(
            host_node.world_transform.transform_point(0.0, 0.0),
            (500.0, 500.0)
        );
    }

    #[test]
    fn clean_subtrees_are_skipped_but_marked_ones_recompute() {
        let mut graph = SceneGraph::new(1920.0, 1080.0);
        let child = graph.create_node(&visible_props()).unwrap();
        run_update(&mut graph);

        graph.set_x(child, 42.0);
        run_update(&mut graph);
        let world = graph.node(child).unwrap().world_transform;
        assert_eq!(world.transform_point(0.0, 0.0), (42.0, 0.0));
    }
}
