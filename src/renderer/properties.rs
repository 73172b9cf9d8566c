//! Public node, resource, and text APIs, forwarded onto the scene graph and
//! resource stores.

use super::*;
use crate::id::ProgramId;
use crate::node::{NodeProps, NodeSnapshot, TextureOptions};
use crate::rect::Rect;
use crate::scene::SceneError;
use crate::shader::{Shader, ShaderDescriptor};
use crate::text::TextProps;
use crate::texture::TextureState;

impl Renderer {
    // ── Nodes ────────────────────────────────────────────────────────────

    /// Creates a node with resolved defaults and `update_type = ALL`,
    /// attached to `props.parent` (the root when unset).
    pub fn create_node(&mut self, props: &NodeProps) -> Result<NodeId, SceneError> {
        let id = self.scene.create_node(props)?;
        if props.texture_options.preload {
            if let Some(texture) = props.texture {
                self.force_load_texture(texture);
            }
        }
        Ok(id)
    }

    /// Re-parents `child` under `parent` atomically.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        self.scene.add_child(parent, child)
    }

    /// Destroys the node and its subtree: detaches, releases texture
    /// ownership, destroys children, emits `Destroyed`. Idempotent.
    pub fn destroy_node(&mut self, id: NodeId) {
        self.scene.destroy(id, &mut self.textures, &mut self.memory);
        if let Some(state) = self.text_states.remove(&id) {
            if let Some(font) = self.fonts.get(&state.props.font_family) {
                let atlas = font.atlas_texture;
                self.scene
                    .release_ownership(id, atlas, &mut self.textures, &mut self.memory);
            }
        }
        self.pending_font_nodes.retain(|(_, node)| *node != id);
    }

    pub fn snapshot(&self, id: NodeId) -> Option<NodeSnapshot> {
        self.scene.snapshot(id)
    }

    /// Draw-order children: insertion order after the stable
    /// `(z_index, z_index_locked)` sort.
    pub fn sorted_children(&self, id: NodeId) -> Vec<NodeId> {
        self.scene.sorted_children(id).to_vec()
    }

    // ── Node property setters ────────────────────────────────────────────

    pub fn set_x(&mut self, id: NodeId, value: f32) {
        self.scene.set_x(id, value);
    }

    pub fn set_y(&mut self, id: NodeId, value: f32) {
        self.scene.set_y(id, value);
    }

    pub fn set_width(&mut self, id: NodeId, value: f32) {
        self.scene.set_width(id, value);
    }

    pub fn set_height(&mut self, id: NodeId, value: f32) {
        self.scene.set_height(id, value);
    }

    pub fn set_scale_x(&mut self, id: NodeId, value: f32) {
        self.scene.set_scale_x(id, value);
    }

    pub fn set_scale_y(&mut self, id: NodeId, value: f32) {
        self.scene.set_scale_y(id, value);
    }

    pub fn set_scale(&mut self, id: NodeId, value: f32) {
        self.scene.set_scale(id, value);
    }

    pub fn set_rotation(&mut self, id: NodeId, value: f32) {
        self.scene.set_rotation(id, value);
    }

    pub fn set_pivot_x(&mut self, id: NodeId, value: f32) {
        self.scene.set_pivot_x(id, value);
    }

    pub fn set_pivot_y(&mut self, id: NodeId, value: f32) {
        self.scene.set_pivot_y(id, value);
    }

    pub fn set_mount_x(&mut self, id: NodeId, value: f32) {
        self.scene.set_mount_x(id, value);
    }

    pub fn set_mount_y(&mut self, id: NodeId, value: f32) {
        self.scene.set_mount_y(id, value);
    }

    pub fn set_alpha(&mut self, id: NodeId, value: f32) {
        self.scene.set_alpha(id, value);
    }

    pub fn set_color(&mut self, id: NodeId, color: Color) {
        self.scene.set_color(id, color);
    }

    pub fn set_color_top(&mut self, id: NodeId, color: Color) {
        self.scene.set_color_top(id, color);
    }

    pub fn set_color_bottom(&mut self, id: NodeId, color: Color) {
        self.scene.set_color_bottom(id, color);
    }

    pub fn set_color_left(&mut self, id: NodeId, color: Color) {
        self.scene.set_color_left(id, color);
    }

    pub fn set_color_right(&mut self, id: NodeId, color: Color) {
        self.scene.set_color_right(id, color);
    }

    pub fn set_color_tl(&mut self, id: NodeId, color: Color) {
        self.scene.set_color_tl(id, color);
    }

    pub fn set_color_tr(&mut self, id: NodeId, color: Color) {
        self.scene.set_color_tr(id, color);
    }

    pub fn set_color_bl(&mut self, id: NodeId, color: Color) {
        self.scene.set_color_bl(id, color);
    }

    pub fn set_color_br(&mut self, id: NodeId, color: Color) {
        self.scene.set_color_br(id, color);
    }

    pub fn set_clipping(&mut self, id: NodeId, value: bool) {
        self.scene.set_clipping(id, value);
    }

    pub fn set_z_index(&mut self, id: NodeId, value: i32) {
        self.scene.set_z_index(id, value);
    }

    pub fn set_z_index_locked(&mut self, id: NodeId, value: i32) {
        self.scene.set_z_index_locked(id, value);
    }

    pub fn set_rtt(&mut self, id: NodeId, value: bool) {
        self.scene.set_rtt(id, value);
    }

    pub fn set_texture(&mut self, id: NodeId, texture: Option<TextureId>) {
        self.scene
            .set_texture(id, texture, &mut self.textures, &mut self.memory);
        if let Some(texture) = texture {
            if self
                .scene
                .node(id)
                .map(|node| node.texture_options.preload)
                .unwrap_or(false)
            {
                self.force_load_texture(texture);
            }
        }
    }

    /// Starts a load that persists even if no renderable owner ever
    /// references the texture.
    pub fn force_load_texture(&mut self, id: TextureId) {
        let base = self.textures.resolve_base(id);
        if let Some(texture) = self.textures.get_mut(base) {
            texture.force_load = true;
        }
        self.load_texture(base);
    }

    pub fn set_texture_options(&mut self, id: NodeId, options: TextureOptions) {
        self.scene.set_texture_options(id, options);
    }

    pub fn set_shader(&mut self, id: NodeId, shader: Option<Shader>) {
        self.scene.set_shader(id, shader);
    }

    pub fn set_autosize(&mut self, id: NodeId, value: bool) {
        self.scene.set_autosize(id, value);
    }

    // ── Textures ─────────────────────────────────────────────────────────

    /// Creates an image texture whose pixels are already available. The
    /// texture stays `Freed` until a renderable owner (or an explicit
    /// [`Renderer::load_texture`]) triggers the upload.
    pub fn create_texture_with_pixels(
        &mut self,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        premultiply_alpha: bool,
    ) -> TextureId {
        self.textures
            .create_image(Some((width, height)), Some(pixels), premultiply_alpha)
    }

    /// Creates an image texture whose pixels arrive later through the
    /// completion queue.
    pub fn create_texture_async(&mut self, premultiply_alpha: bool) -> TextureId {
        self.textures.create_image(None, None, premultiply_alpha)
    }

    /// Creates a 1x1 solid-color texture.
    pub fn create_solid_texture(&mut self, color: Color) -> TextureId {
        self.textures.create_solid(color)
    }

    /// Creates a rectangular window into `parent`, resolved to normalized
    /// UVs at draw time.
    pub fn create_sub_texture(&mut self, parent: TextureId, region: Rect) -> TextureId {
        self.textures.create_sub(parent, region)
    }

    pub fn texture_state(&self, id: TextureId) -> Option<TextureState> {
        self.textures.get(id).map(|texture| texture.state())
    }

    pub fn texture_dimensions(&self, id: TextureId) -> Option<(u32, u32)> {
        self.textures.get(id).and_then(|texture| texture.dimensions())
    }

    // ── Shaders ──────────────────────────────────────────────────────────

    /// Compiles and registers a custom shader program. Fatal on compile or
    /// link failure, matching built-in program creation.
    pub fn register_shader(&mut self, descriptor: ShaderDescriptor) -> Result<ProgramId, InitError> {
        Ok(self.shaders.register(self.device.as_mut(), descriptor)?)
    }

    pub fn default_shader_program(&self) -> ProgramId {
        self.shaders.default_program()
    }

    // ── Fonts and text ───────────────────────────────────────────────────

    /// Registers an SDF font face. If the face is already loaded, text
    /// states waiting on the family are retried on the next frame.
    pub fn register_font(&mut self, face: SdfFontFace) {
        let family = face.family.clone();
        let loaded = face.loaded;
        self.fonts.insert(family.clone(), face);
        if loaded {
            self.retry_pending_font_nodes(&family);
        }
    }

    /// Attaches (or replaces) SDF text on a node. The node renders the text
    /// through the SDF pipeline instead of a quad.
    pub fn set_text(&mut self, id: NodeId, props: TextProps) {
        if !self.scene.contains(id) {
            return;
        }
        match self.text_states.get_mut(&id) {
            Some(state) => state.set_props(props),
            None => {
                self.text_states.insert(id, TextState::new(props));
            }
        }
        self.scene.set_text_attached(id, true);
    }

    /// The laid-out text dimensions, available after the first layout.
    pub fn text_dimensions(&self, id: NodeId) -> Option<(f32, f32)> {
        self.text_states
            .get(&id)
            .map(|state| (state.computed_width, state.computed_height))
    }

    pub(crate) fn retry_pending_font_nodes(&mut self, family: &str) {
        let mut retried = Vec::new();
        self.pending_font_nodes.retain(|(pending_family, node)| {
            if pending_family == family {
                retried.push(*node);
                false
            } else {
                true
            }
        });
        for node in retried {
            if let Some(state) = self.text_states.get_mut(&node) {
                state.dirty = true;
            }
        }
    }
}
