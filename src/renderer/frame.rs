//! Per-frame control flow.
//!
//! Order within [`Renderer::render_frame`]: tick tweeners, drain the
//! completion queue, run the dirty-flag update traversal, lay out text,
//! render dirty render-to-texture subtrees (deepest first), render the
//! screen, then evict idle textures over budget. Render-ops never survive a
//! frame, so eviction can never touch a texture referenced by an in-flight
//! op.

use super::batcher::{scissor_for, PassTarget, QuadParams};
use super::*;
use crate::events::LoadedResource;
use crate::gpu::UniformValue;
use crate::node::{RenderState, UpdateType};
use crate::rect::Bound;
use crate::scene::UpdateContext;
use crate::texture::{OwnerChange, TextureKind, TextureState};
use crate::text::TextStatus;
use crate::tween::AnimatedProperty;

impl Renderer {
    /// Renders one frame and returns its counters.
    pub fn render_frame(&mut self) -> FrameStats {
        let now = Instant::now();
        let dt = self
            .last_frame_at
            .map(|previous| (now - previous).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame_at = Some(now);

        self.tick_tweeners(dt);
        self.process_completions();

        let viewport = Bound::new(0.0, 0.0, self.settings.width, self.settings.height);
        let (dirty_rtt, pending_loads) = {
            let mut ctx = UpdateContext::new(
                viewport,
                self.settings.bounds_margin,
                &mut self.textures,
                &mut self.memory,
            );
            self.scene.update(&mut ctx);
            (ctx.dirty_rtt, ctx.pending_loads)
        };
        for texture in pending_loads {
            self.load_texture(texture);
        }

        self.refresh_text_states();

        let mut stats = FrameStats::default();
        self.device.begin_frame();
        let rtt_passes = self.prepare_rtt_targets(&dirty_rtt);
        for rtt_node in rtt_passes {
            self.render_rtt_pass(rtt_node, &mut stats);
        }
        self.render_screen_pass(&mut stats);
        self.device.end_frame();

        stats.evicted_textures = self.evict_over_budget();
        if self.settings.debug.contains(DebugFlags::FRAME_LOG) {
            log::debug!(
                "frame: {} passes, {} ops, {} quads, {} evictions",
                stats.passes,
                stats.render_ops,
                stats.quads,
                stats.evicted_textures,
            );
        }
        self.last_stats = stats;
        stats
    }

    // ── Animation ────────────────────────────────────────────────────────

    fn tick_tweeners(&mut self, dt: f32) {
        if self.tweeners.is_empty() {
            return;
        }
        let mut updates = std::mem::take(&mut self.tween_scratch);
        updates.clear();
        let mut tweeners = std::mem::take(&mut self.tweeners);
        for tweener in tweeners.iter_mut() {
            tweener.tick(dt, &mut updates);
        }
        tweeners.retain(|tweener| !tweener.is_finished());
        self.tweeners = tweeners;

        for update in &updates {
            let value = update.value;
            match update.property {
                AnimatedProperty::X => self.scene.set_x(update.node, value),
                AnimatedProperty::Y => self.scene.set_y(update.node, value),
                AnimatedProperty::Width => self.scene.set_width(update.node, value),
                AnimatedProperty::Height => self.scene.set_height(update.node, value),
                AnimatedProperty::ScaleX => self.scene.set_scale_x(update.node, value),
                AnimatedProperty::ScaleY => self.scene.set_scale_y(update.node, value),
                AnimatedProperty::Rotation => self.scene.set_rotation(update.node, value),
                AnimatedProperty::Alpha => self.scene.set_alpha(update.node, value),
            }
        }
        self.tween_scratch = updates;
    }

    // ── Resource completions and texture loading ─────────────────────────

    fn process_completions(&mut self) {
        let completions: Vec<Completion> = self.completion_receiver.try_iter().collect();
        for completion in completions {
            match completion {
                Completion::TexturePixels { texture, result } => {
                    let base = self.textures.resolve_base(texture);
                    match result {
                        Ok(((width, height), pixels)) => {
                            let Some(entry) = self.textures.get_mut(base) else {
                                continue;
                            };
                            entry.dimensions = Some((width, height));
                            entry.pixels = Some(pixels);
                            if entry.state() == TextureState::Loading {
                                // A load whose owners all went away was
                                // cancelled; the late completion only stages
                                // the pixels for a future load.
                                if entry.owners.is_empty() && !entry.force_load {
                                    entry.state = TextureState::Freed;
                                } else {
                                    self.upload_texture(base);
                                }
                            }
                        }
                        Err(error) => self.fail_texture(base, error),
                    }
                }
                Completion::FontLoaded { family } => {
                    if let Some(font) = self.fonts.get_mut(&family) {
                        font.loaded = true;
                    } else {
                        log::warn!("font load completion for unregistered family '{family}'");
                    }
                    self.retry_pending_font_nodes(&family);
                }
                Completion::FontFailed { family, error } => {
                    let mut failed = Vec::new();
                    self.pending_font_nodes.retain(|(pending, node)| {
                        if pending == &family {
                            failed.push(*node);
                            false
                        } else {
                            true
                        }
                    });
                    for node in failed {
                        if let Some(state) = self.text_states.get_mut(&node) {
                            state.status = TextStatus::Failed;
                        }
                        self.scene.events.push(
                            node,
                            NodeEvent::Failed {
                                error: format!("font '{family}' failed to load: {error}"),
                            },
                        );
                    }
                }
            }
        }
    }

    /// Starts loading a texture: `Freed -> Loading`, uploading immediately
    /// when pixels are already staged. Sub-textures load their parent.
    pub fn load_texture(&mut self, id: TextureId) {
        let base = self.textures.resolve_base(id);
        let Some(texture) = self.textures.get_mut(base) else {
            return;
        };
        if texture.state() != TextureState::Freed {
            return;
        }
        texture.state = TextureState::Loading;
        if texture.pixels.is_some() && texture.dimensions.is_some() {
            self.upload_texture(base);
        }
    }

    fn upload_texture(&mut self, base: TextureId) {
        let Some(texture) = self.textures.get_mut(base) else {
            return;
        };
        let Some((width, height)) = texture.dimensions else {
            return;
        };
        let Some(pixels) = texture.pixels.as_ref() else {
            return;
        };
        let premultiply = matches!(
            texture.kind,
            TextureKind::Image {
                premultiply_alpha: true
            }
        );
        let mut data = pixels.clone();
        if premultiply {
            premultiply_rgba8_inplace(&mut data);
        }
        let byte_size = texture.byte_size();
        let owners: Vec<NodeId> = texture.owners.iter().copied().collect();

        let gpu = self.device.create_texture(width, height, &data);
        let texture = self
            .textures
            .get_mut(base)
            .expect("texture existed a moment ago");
        texture.gpu = Some(gpu);
        texture.state = TextureState::Loaded;
        self.memory.note_loaded(byte_size);
        log::debug!("texture {base} loaded ({width}x{height}, {byte_size} bytes)");

        for owner in owners {
            self.scene.events.push(
                owner,
                NodeEvent::Loaded {
                    resource: LoadedResource::Texture,
                    dimensions: (width as f32, height as f32),
                },
            );
            let autosize = self
                .scene
                .node(owner)
                .map(|node| node.autosize)
                .unwrap_or(false);
            if autosize {
                self.scene.set_width(owner, width as f32);
                self.scene.set_height(owner, height as f32);
            }
            self.scene.mark_dirty(owner, UpdateType::IS_RENDERABLE);
        }
    }

    fn fail_texture(&mut self, base: TextureId, error: String) {
        let Some(texture) = self.textures.get_mut(base) else {
            return;
        };
        texture.state = TextureState::Failed;
        texture.error = Some(error.clone());
        let owners: Vec<NodeId> = texture.owners.iter().copied().collect();
        for owner in owners {
            self.scene.events.push(
                owner,
                NodeEvent::Failed {
                    error: format!("texture load failed: {error}"),
                },
            );
        }
    }

    // ── Text ─────────────────────────────────────────────────────────────

    fn refresh_text_states(&mut self) {
        let ids: Vec<NodeId> = self.text_states.keys().copied().collect();
        for id in ids {
            if !self.scene.contains(id) {
                self.text_states.remove(&id);
                continue;
            }
            let family = self.text_states[&id].props.font_family.clone();
            if !self.fonts.contains_key(&family) {
                let state = self.text_states.get_mut(&id).expect("state exists");
                if state.status != TextStatus::Failed {
                    state.status = TextStatus::Failed;
                    self.scene.events.push(
                        id,
                        NodeEvent::Failed {
                            error: format!("font face unresolved: no family '{family}'"),
                        },
                    );
                }
                continue;
            }
            if !self.fonts[&family].loaded {
                if !self
                    .pending_font_nodes
                    .iter()
                    .any(|(pending, node)| pending == &family && *node == id)
                {
                    self.pending_font_nodes.push((family, id));
                }
                continue;
            }

            let (render_state, origin_y) = {
                let node = self.scene.node(id).expect("node exists");
                (node.render_state, node.world_transform.ty)
            };

            let font = self.fonts.get(&family).expect("family checked above");
            let atlas = font.atlas_texture;
            let state = self.text_states.get_mut(&id).expect("state exists");

            let force = state.props.force_load && !state.forced_layout_done;
            if render_state == RenderState::OutOfBounds && !force {
                continue;
            }
            let visible_y = if render_state == RenderState::OutOfBounds {
                // Forced first layout with no viewport overlap: lay out
                // everything.
                None
            } else {
                let top = (-origin_y).max(0.0);
                let bottom = (self.settings.height - origin_y).max(top);
                Some((top, bottom))
            };

            let laid_out = state.refresh(font, visible_y).is_some();
            if laid_out {
                state.forced_layout_done = true;
                if !state.announced {
                    state.announced = true;
                    let dimensions = (state.computed_width, state.computed_height);
                    self.scene.events.push(
                        id,
                        NodeEvent::Loaded {
                            resource: LoadedResource::Text,
                            dimensions,
                        },
                    );
                }
                if self.textures.set_renderable_owner(atlas, id, true) == OwnerChange::BecameLive {
                    self.memory.mark_live(self.textures.resolve_base(atlas));
                }
                let atlas_base = self.textures.resolve_base(atlas);
                if self
                    .textures
                    .get(atlas_base)
                    .is_some_and(|texture| texture.state() == TextureState::Freed)
                {
                    self.load_texture(atlas_base);
                }
            }
        }
    }

    // ── Render passes ────────────────────────────────────────────────────

    fn collect_rtt_nodes(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.scene.node(id) else {
            return;
        };
        if node.rtt {
            out.push(id);
        }
        for &child in &node.children {
            self.collect_rtt_nodes(child, out);
        }
    }

    /// Ensures every `rtt` node has a framebuffer target sized to it, drops
    /// stale targets, and returns the subtrees needing a render pass this
    /// frame, deepest first so nested render textures resolve before their
    /// hosts sample them.
    fn prepare_rtt_targets(&mut self, dirty: &[NodeId]) -> Vec<NodeId> {
        let mut rtt_nodes = Vec::new();
        self.collect_rtt_nodes(self.scene.root(), &mut rtt_nodes);

        let stale: Vec<NodeId> = self
            .rtt_targets
            .keys()
            .filter(|node| !rtt_nodes.contains(node))
            .copied()
            .collect();
        for node in stale {
            if let Some(target) = self.rtt_targets.remove(&node) {
                self.device.destroy_framebuffer(target.framebuffer);
                self.device.destroy_texture(target.gpu_texture);
                self.textures.remove(target.texture);
            }
        }

        let mut passes = Vec::new();
        for node in rtt_nodes {
            let (width, height) = {
                let node_ref = self.scene.node(node).expect("collected above");
                (
                    (node_ref.width as u32).max(1),
                    (node_ref.height as u32).max(1),
                )
            };
            let needs_target = self
                .rtt_targets
                .get(&node)
                .map(|target| target.dimensions != (width, height))
                .unwrap_or(true);
            if needs_target {
                if let Some(old) = self.rtt_targets.remove(&node) {
                    self.device.destroy_framebuffer(old.framebuffer);
                    self.device.destroy_texture(old.gpu_texture);
                    self.textures.remove(old.texture);
                }
                let (framebuffer, gpu_texture) = self.device.create_framebuffer(width, height);
                let texture = self.textures.create_render(node, width, height);
                let entry = self.textures.get_mut(texture).expect("just created");
                entry.gpu = Some(gpu_texture);
                entry.state = TextureState::Loaded;
                self.rtt_targets.insert(
                    node,
                    RttTarget {
                        framebuffer,
                        texture,
                        gpu_texture,
                        dimensions: (width, height),
                    },
                );
                passes.push(node);
            } else if dirty.contains(&node) {
                passes.push(node);
            }
        }
        passes.sort_by_key(|node| std::cmp::Reverse(self.scene.depth(*node)));
        passes
    }

    fn render_rtt_pass(&mut self, rtt_node: NodeId, stats: &mut FrameStats) {
        let Some(target) = self.rtt_targets.get(&rtt_node).copied() else {
            return;
        };
        let (width, height) = target.dimensions;
        self.device.bind_framebuffer(Some(target.framebuffer));
        self.device.set_viewport(0, 0, width, height);
        self.device.clear([0.0, 0.0, 0.0, 0.0]);
        self.batcher.reset();
        let pass = PassTarget {
            resolution: (width as f32, height as f32),
            pixel_ratio: 1.0,
        };
        let children = self.scene.sorted_children(rtt_node).to_vec();
        for child in children {
            self.draw_node(child, &pass, stats);
        }
        self.flush_batcher(&pass, stats);
        stats.passes += 1;
    }

    fn render_screen_pass(&mut self, stats: &mut FrameStats) {
        let pixel_ratio = self.settings.pixel_ratio;
        let physical = (
            (self.settings.width * pixel_ratio) as u32,
            (self.settings.height * pixel_ratio) as u32,
        );
        self.device.bind_framebuffer(None);
        self.device.set_viewport(0, 0, physical.0, physical.1);
        self.device.clear(self.settings.clear_color.normalize());
        self.batcher.reset();
        let pass = PassTarget {
            resolution: (self.settings.width, self.settings.height),
            pixel_ratio,
        };
        self.draw_node(self.scene.root(), &pass, stats);
        self.flush_batcher(&pass, stats);
        stats.passes += 1;
    }

    fn flush_batcher(&mut self, pass: &PassTarget, stats: &mut FrameStats) {
        stats.render_ops += self.batcher.ops().len() as u32;
        stats.quads += self.batcher.num_quads();
        self.batcher
            .render(self.device.as_mut(), &self.shaders, pass);
        self.batcher.clear_ops();
    }

    /// Emits a node (and, unless it hosts a render texture, its subtree) in
    /// draw order.
    fn draw_node(&mut self, id: NodeId, pass: &PassTarget, stats: &mut FrameStats) {
        let Some(node) = self.scene.node(id) else {
            return;
        };
        if node.world_alpha <= 0.0 {
            return;
        }
        let renderable = node.is_renderable;
        let rtt = node.rtt;
        let has_text = node.text_attached;
        let children = node.sorted_children.clone();

        let mut params = QuadParams {
            width: node.width,
            height: node.height,
            color_tl: node.color_tl,
            color_tr: node.color_tr,
            color_bl: node.color_bl,
            color_br: node.color_br,
            transform: node.world_transform,
            texture: node.texture,
            texture_options: node.texture_options,
            shader: node.shader.clone(),
            alpha: node.world_alpha,
            clipping_rect: node.clipping_rect,
            parent_has_render_texture: node.parent_has_render_texture,
            framebuffer_dimensions: node.parent_framebuffer_dimensions,
            rtt_boundary: false,
        };

        if renderable {
            if has_text {
                self.flush_batcher(pass, stats);
                self.draw_text(id, pass);
            } else {
                if rtt {
                    if let Some(target) = self.rtt_targets.get(&id) {
                        params.texture = Some(target.texture);
                        params.rtt_boundary = true;
                        let transparent = params.color_tl.is_transparent()
                            && params.color_tr.is_transparent()
                            && params.color_bl.is_transparent()
                            && params.color_br.is_transparent();
                        if transparent {
                            params.color_tl = Color::WHITE;
                            params.color_tr = Color::WHITE;
                            params.color_bl = Color::WHITE;
                            params.color_br = Color::WHITE;
                        }
                    }
                }
                if let Err(error) = self.batcher.add_quad(params, &self.textures, &self.shaders) {
                    log::warn!("render-op skipped: {error}");
                }
            }
        }

        if !rtt {
            for child in children {
                self.draw_node(child, pass, stats);
            }
        }
    }

    fn draw_text(&mut self, id: NodeId, pass: &PassTarget) {
        let Some(node) = self.scene.node(id) else {
            return;
        };
        let world = node.world_transform;
        let world_alpha = node.world_alpha;
        let clipping = node.clipping_rect;
        let parent_rt = node.parent_has_render_texture;
        let fb_dimensions = node.parent_framebuffer_dimensions;

        let Some(state) = self.text_states.get_mut(&id) else {
            return;
        };
        if state.status != TextStatus::Ready || state.num_quads == 0 {
            return;
        }
        let Some(font) = self.fonts.get(&state.props.font_family) else {
            return;
        };
        let ratio = state.props.font_size / font.info.size;
        let distance_range = font.distance_range * ratio;
        let Some(atlas) = self.textures.resolve_for_draw(font.atlas_texture, false, false) else {
            // Atlas not resident yet; the text draws once it uploads.
            return;
        };

        if state.gpu_buffer.is_none() {
            let bytes = (state.buffer.len() * 4).max(1024);
            state.gpu_buffer = Some(self.device.create_vertex_buffer(bytes));
        }
        let buffer = state.gpu_buffer.expect("created above");
        if !state.buffer_uploaded {
            self.device
                .upload_vertices(buffer, bytemuck::cast_slice(&state.buffer));
            state.buffer_uploaded = true;
        }

        let (resolution, pixel_ratio) = match (parent_rt, fb_dimensions) {
            (true, Some((width, height))) => ((width as f32, height as f32), 1.0),
            _ => (pass.resolution, pass.pixel_ratio),
        };
        let debug = state.props.debug || self.settings.debug.contains(DebugFlags::SDF_OVERLAY);

        let sdf = self.shaders.sdf_program();
        self.device.bind_program(sdf);
        self.device
            .set_uniform("u_resolution", UniformValue::Vec2([resolution.0, resolution.1]));
        self.device
            .set_uniform("u_pixelRatio", UniformValue::Float(pixel_ratio));
        self.device
            .set_uniform("u_alpha", UniformValue::Float(world_alpha));
        self.device
            .set_uniform("u_transform", UniformValue::Mat3x2(world.to_float6()));
        self.device
            .set_uniform("u_color", UniformValue::Vec4(state.props.color.normalize()));
        self.device.set_uniform("u_size", UniformValue::Float(ratio));
        self.device
            .set_uniform("u_scrollY", UniformValue::Float(state.props.scroll_y));
        self.device
            .set_uniform("u_distanceRange", UniformValue::Float(distance_range));
        self.device
            .set_uniform("u_debug", UniformValue::Int(debug as i32));
        self.device.bind_texture(0, atlas.gpu);
        self.device.set_scissor(scissor_for(
            &clipping,
            pixel_ratio,
            resolution.1 * pixel_ratio,
        ));
        let num_quads = state.num_quads;
        self.device.draw_quads(buffer, 0, num_quads);
    }

    // ── Texture memory ───────────────────────────────────────────────────

    fn evict_over_budget(&mut self) -> u32 {
        let textures = &self.textures;
        let candidates = self
            .memory
            .evictions(|id| textures.get(id).map(|texture| texture.byte_size()).unwrap_or(0));
        let count = candidates.len() as u32;
        for id in candidates {
            let Some(texture) = self.textures.get_mut(id) else {
                continue;
            };
            let bytes = texture.byte_size();
            if let Some(gpu) = texture.gpu.take() {
                self.device.destroy_texture(gpu);
            }
            texture.state = TextureState::Freed;
            self.memory.note_freed(id, bytes);
            log::debug!("evicted texture {id} ({bytes} bytes)");
        }
        count
    }
}

/// Straight (non-colorspace-aware) premultiplication for RGBA8 uploads.
fn premultiply_rgba8_inplace(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        let alpha = pixel[3] as u32;
        pixel[0] = ((pixel[0] as u32 * alpha + 127) / 255) as u8;
        pixel[1] = ((pixel[1] as u32 * alpha + 127) / 255) as u8;
        pixel[2] = ((pixel[2] as u32 * alpha + 127) / 255) as u8;
    }
}
