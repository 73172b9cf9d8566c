//! The draw-operation batcher.
//!
//! Visible nodes are pushed as quads into a single preallocated vertex arena;
//! consecutive quads that share a compatible program, an exactly equal
//! clipping rect, and texture-slot room collapse into one render-op, and each
//! render-op becomes one `drawElements` call at dispatch.
//!
//! Quad vertex layout (wire-exact, 24 bytes per vertex, 4 vertices per quad):
//!
//! ```text
//! a_position       vec2  offset 0,  float
//! a_textureCoords  vec2  offset 8,  float
//! a_color          vec4  offset 16, unsigned byte normalized
//! a_textureIndex   float offset 20, float
//! ```

use smallvec::SmallVec;
use thiserror::Error;

use crate::color::Color;
use crate::gpu::{GpuDevice, ScissorRect, UniformValue, FLOATS_PER_QUAD};
use crate::id::{GpuBufferId, GpuTextureId, ProgramId, TextureId};
use crate::matrix::Transform2D;
use crate::node::TextureOptions;
use crate::rect::Bound;
use crate::shader::{Shader, ShaderProps, ShaderRegistry};
use crate::texture::TextureStore;

/// Sentinel returned when a texture does not fit the op's slot set.
pub(crate) const TEXTURE_SLOT_FULL: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// A quad's texture did not fit even a freshly opened render-op.
    #[error("too many textures for shader: texture does not fit an empty render-op")]
    TooManyTexturesForShader,
}

/// Everything `add_quad` needs to place one quad.
#[derive(Debug, Clone)]
pub(crate) struct QuadParams {
    pub width: f32,
    pub height: f32,
    pub color_tl: Color,
    pub color_tr: Color,
    pub color_bl: Color,
    pub color_br: Color,
    pub transform: Transform2D,
    pub texture: Option<TextureId>,
    pub texture_options: TextureOptions,
    /// `None` uses the built-in default program with default props.
    pub shader: Option<Shader>,
    pub alpha: f32,
    pub clipping_rect: Bound,
    pub parent_has_render_texture: bool,
    pub framebuffer_dimensions: Option<(u32, u32)>,
    /// Render-to-texture boundaries always start a fresh op.
    pub rtt_boundary: bool,
}

/// A contiguous run of quads submitted as one `drawElements` call.
#[derive(Debug)]
pub(crate) struct RenderOp {
    pub program: ProgramId,
    pub props: ShaderProps,
    pub clipping: Bound,
    /// First quad's dimensions, bound as `u_dimensions` when declared.
    pub dimensions: (f32, f32),
    pub alpha: f32,
    pub parent_has_render_texture: bool,
    pub framebuffer_dimensions: Option<(u32, u32)>,
    /// Float index of the op's first vertex in the arena.
    pub buffer_start: usize,
    pub num_quads: u32,
    pub textures: SmallVec<[GpuTextureId; 4]>,
    pub max_textures: u32,
    pub rtt_boundary: bool,
}

impl RenderOp {
    /// Returns the 0-based slot of `texture`, appending it if there is room;
    /// [`TEXTURE_SLOT_FULL`] signals "spill to a new op".
    pub(crate) fn add_texture(&mut self, texture: GpuTextureId) -> u32 {
        for (slot, existing) in self.textures.iter().enumerate() {
            if *existing == texture {
                return slot as u32;
            }
        }
        if (self.textures.len() as u32) < self.max_textures {
            self.textures.push(texture);
            self.textures.len() as u32 - 1
        } else {
            TEXTURE_SLOT_FULL
        }
    }
}

/// Per-pass target description for dispatch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PassTarget {
    /// Logical dimensions of the pass target (canvas or framebuffer).
    pub resolution: (f32, f32),
    /// Application pixel ratio; forced to 1.0 for render-to-texture passes.
    pub pixel_ratio: f32,
}

impl PassTarget {
    fn physical_height(&self) -> f32 {
        self.resolution.1 * self.pixel_ratio
    }
}

pub(crate) struct DrawBatcher {
    arena: Vec<f32>,
    buffer_idx: usize,
    ops: Vec<RenderOp>,
    vertex_buffer: GpuBufferId,
    device_texture_units: u32,
}

impl DrawBatcher {
    /// `buffer_memory` is the arena byte size from the engine settings.
    pub(crate) fn new(device: &mut dyn GpuDevice, buffer_memory: usize) -> Self {
        let float_capacity = buffer_memory / 4;
        Self {
            arena: vec![0.0; float_capacity],
            buffer_idx: 0,
            ops: Vec::new(),
            vertex_buffer: device.create_vertex_buffer(buffer_memory),
            device_texture_units: device.capabilities().max_texture_units,
        }
    }

    /// Starts a fresh pass: rewinds the arena cursor and drops all ops.
    pub(crate) fn reset(&mut self) {
        self.buffer_idx = 0;
        self.ops.clear();
    }

    /// Drops dispatched ops while keeping the arena cursor, so a pass can
    /// interleave flushes (e.g. around SDF text draws) without overwriting
    /// vertex data the earlier draws reference.
    pub(crate) fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub(crate) fn ops(&self) -> &[RenderOp] {
        &self.ops
    }

    pub(crate) fn num_quads(&self) -> u32 {
        self.ops.iter().map(|op| op.num_quads).sum()
    }

    fn max_textures_for(&self, registry: &ShaderRegistry, program: ProgramId) -> u32 {
        if registry.descriptor(program).supports_indexed_textures {
            // The built-in fragment stage addresses four units.
            self.device_texture_units.min(4)
        } else {
            1
        }
    }

    /// Whether the currently open op can absorb a quad with these
    /// parameters. Texture-slot room is checked separately because it
    /// mutates the op.
    fn op_accepts(
        &self,
        registry: &ShaderRegistry,
        program: ProgramId,
        props: &ShaderProps,
        params: &QuadParams,
    ) -> bool {
        let Some(op) = self.ops.last() else {
            return false;
        };
        if params.rtt_boundary || op.rtt_boundary {
            return false;
        }
        if op.program != program
            || op.clipping != params.clipping_rect
            || op.parent_has_render_texture != params.parent_has_render_texture
            || op.framebuffer_dimensions != params.framebuffer_dimensions
        {
            return false;
        }
        let descriptor = registry.descriptor(program);
        if descriptor.declares_alpha && op.alpha != params.alpha {
            return false;
        }
        (descriptor.can_batch)(&op.props, props)
    }

    fn open_op(
        &mut self,
        registry: &ShaderRegistry,
        program: ProgramId,
        props: ShaderProps,
        params: &QuadParams,
    ) {
        self.ops.push(RenderOp {
            program,
            props,
            clipping: params.clipping_rect,
            dimensions: (params.width, params.height),
            alpha: params.alpha,
            parent_has_render_texture: params.parent_has_render_texture,
            framebuffer_dimensions: params.framebuffer_dimensions,
            buffer_start: self.buffer_idx,
            num_quads: 0,
            textures: SmallVec::new(),
            max_textures: self.max_textures_for(registry, program),
            rtt_boundary: params.rtt_boundary,
        });
    }

    pub(crate) fn add_quad(
        &mut self,
        mut params: QuadParams,
        textures: &TextureStore,
        registry: &ShaderRegistry,
    ) -> Result<(), BatchError> {
        if let Some(shader) = params.shader.as_mut() {
            shader.props.patch_dimensions(params.width, params.height);
        }
        let (program, props) = match &params.shader {
            Some(shader) => (shader.program, shader.props.clone()),
            None => (registry.default_program(), ShaderProps::Default),
        };

        if self.buffer_idx + FLOATS_PER_QUAD > self.arena.len() {
            log::warn!("vertex arena full; dropping quad");
            return Ok(());
        }

        let texture_id = params.texture.unwrap_or_else(|| textures.white());
        let Some(resolved) = textures.resolve_for_draw(
            texture_id,
            params.texture_options.flip_x,
            params.texture_options.flip_y,
        ) else {
            log::warn!("texture {texture_id} is not resident; dropping quad");
            return Ok(());
        };
        let mut slot = if self.op_accepts(registry, program, &props, &params) {
            let op = self.ops.last_mut().expect("op_accepts saw an open op");
            op.add_texture(resolved.gpu)
        } else {
            TEXTURE_SLOT_FULL
        };

        if slot == TEXTURE_SLOT_FULL {
            self.open_op(registry, program, props, &params);
            let op = self.ops.last_mut().expect("op was just opened");
            slot = op.add_texture(resolved.gpu);
            if slot == TEXTURE_SLOT_FULL {
                return Err(BatchError::TooManyTexturesForShader);
            }
        }

        self.write_quad(&params, resolved.uv, slot as f32);
        let op = self.ops.last_mut().expect("op is open");
        op.num_quads += 1;
        Ok(())
    }

    /// Writes the four vertices (TL, TR, BL, BR) for one quad and advances
    /// the arena cursor.
    fn write_quad(&mut self, params: &QuadParams, uv: [f32; 4], texture_index: f32) {
        let transform = &params.transform;
        let (width, height) = (params.width, params.height);
        let [(tl_x, tl_y), (tr_x, tr_y), (bl_x, bl_y), (br_x, br_y)] =
            if transform.is_axis_aligned() {
                let x1 = transform.tx;
                let y1 = transform.ty;
                let x2 = transform.tx + transform.ta * width;
                let y2 = transform.ty + transform.td * height;
                [(x1, y1), (x2, y1), (x1, y2), (x2, y2)]
            } else {
                [
                    transform.transform_point(0.0, 0.0),
                    transform.transform_point(width, 0.0),
                    transform.transform_point(0.0, height),
                    transform.transform_point(width, height),
                ]
            };

        let [u1, v1, u2, v2] = uv;
        let alpha = params.alpha;
        let mut cursor = self.buffer_idx;
        let mut push_vertex = |x: f32, y: f32, u: f32, v: f32, color: Color| {
            let packed = u32::from_le_bytes(color.premultiplied(alpha));
            self.arena[cursor] = x;
            self.arena[cursor + 1] = y;
            self.arena[cursor + 2] = u;
            self.arena[cursor + 3] = v;
            self.arena[cursor + 4] = f32::from_bits(packed);
            self.arena[cursor + 5] = texture_index;
            cursor += 6;
        };
        push_vertex(tl_x, tl_y, u1, v1, params.color_tl);
        push_vertex(tr_x, tr_y, u2, v1, params.color_tr);
        push_vertex(bl_x, bl_y, u1, v2, params.color_bl);
        push_vertex(br_x, br_y, u2, v2, params.color_br);
        self.buffer_idx = cursor;
    }

    /// Uploads the used arena prefix and issues one draw call per render-op.
    pub(crate) fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        registry: &ShaderRegistry,
        target: &PassTarget,
    ) {
        if self.ops.is_empty() {
            return;
        }
        let bytes: &[u8] = bytemuck::cast_slice(&self.arena[..self.buffer_idx]);
        device.upload_vertices(self.vertex_buffer, bytes);

        let mut bound_program: Option<ProgramId> = None;
        for op in &self.ops {
            if op.num_quads == 0 {
                continue;
            }
            if bound_program != Some(op.program) {
                device.bind_program(op.program);
                bound_program = Some(op.program);
            }

            let descriptor = registry.descriptor(op.program);
            let resolution = match (op.parent_has_render_texture, op.framebuffer_dimensions) {
                (true, Some((width, height))) => (width as f32, height as f32),
                _ => target.resolution,
            };
            let pixel_ratio = if op.parent_has_render_texture {
                1.0
            } else {
                target.pixel_ratio
            };
            device.set_uniform("u_resolution", UniformValue::Vec2([resolution.0, resolution.1]));
            device.set_uniform("u_pixelRatio", UniformValue::Float(pixel_ratio));
            if descriptor.declares_alpha {
                device.set_uniform("u_alpha", UniformValue::Float(op.alpha));
            }
            if descriptor.declares_dimensions {
                device.set_uniform(
                    "u_dimensions",
                    UniformValue::Vec2([op.dimensions.0, op.dimensions.1]),
                );
            }
            for (name, value) in op.props.uniform_entries() {
                if !name.starts_with('$') && !device.set_uniform(name, *value) {
                    log::warn!(
                        "program '{}' does not declare uniform '{name}'; skipped",
                        descriptor.name
                    );
                }
            }

            for (unit, texture) in op.textures.iter().enumerate() {
                device.bind_texture(unit as u32, *texture);
            }

            device.set_scissor(scissor_for(&op.clipping, pixel_ratio, target.physical_height()));
            device.draw_quads(
                self.vertex_buffer,
                (op.buffer_start / FLOATS_PER_QUAD) as u32,
                op.num_quads,
            );
        }
    }
}

/// Converts a logical clipping rect into a bottom-origin GL scissor rect in
/// physical pixels. Invalid rects disable the scissor test.
pub(crate) fn scissor_for(
    clipping: &Bound,
    pixel_ratio: f32,
    physical_height: f32,
) -> Option<ScissorRect> {
    if !clipping.valid {
        return None;
    }
    let width = clipping.width() * pixel_ratio;
    let height = clipping.height() * pixel_ratio;
    Some(ScissorRect {
        x: (clipping.x1 * pixel_ratio).round() as i32,
        y: (physical_height - height - clipping.y1 * pixel_ratio).round() as i32,
        width: width.round() as u32,
        height: height.round() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::{DrawBatcher, PassTarget, QuadParams, TEXTURE_SLOT_FULL};
    use crate::color::Color;
    use crate::gpu::recording::{GpuCommand, RecordingDevice};
    use crate::gpu::GpuDevice;
    use crate::matrix::Transform2D;
    use crate::node::TextureOptions;
    use crate::rect::Bound;
    use crate::shader::ShaderRegistry;
    use crate::texture::TextureStore;

    fn setup() -> (RecordingDevice, ShaderRegistry, TextureStore, DrawBatcher) {
        let mut device = RecordingDevice::default();
        let registry = ShaderRegistry::new(&mut device).unwrap();
        let mut textures = TextureStore::new();
        // Make the white default resident.
        let white = textures.white();
        let gpu = device.create_texture(1, 1, &[255, 255, 255, 255]);
        textures.get_mut(white).unwrap().gpu = Some(gpu);
        textures.get_mut(white).unwrap().state = crate::texture::TextureState::Loaded;
        let batcher = DrawBatcher::new(&mut device, 4 * 1024 * 1024);
        (device, registry, textures, batcher)
    }

    fn quad(x: f32, y: f32, w: f32, h: f32, color: Color) -> QuadParams {
        QuadParams {
            width: w,
            height: h,
            color_tl: color,
            color_tr: color,
            color_bl: color,
            color_br: color,
            transform: Transform2D::translation(x, y),
            texture: None,
            texture_options: TextureOptions::default(),
            shader: None,
            alpha: 1.0,
            clipping_rect: Bound::INVALID,
            parent_has_render_texture: false,
            framebuffer_dimensions: None,
            rtt_boundary: false,
        }
    }

    #[test]
    fn consecutive_compatible_quads_share_one_op() {
        let (_device, registry, textures, mut batcher) = setup();
        for i in 0..3 {
            batcher
                .add_quad(
                    quad(i as f32 * 10.0, 0.0, 10.0, 10.0, Color(0xFF0000FF)),
                    &textures,
                    &registry,
                )
                .unwrap();
        }
        assert_eq!(batcher.ops().len(), 1);
        assert_eq!(batcher.ops()[0].num_quads, 3);
    }

    #[test]
    fn differing_clipping_rects_split_ops() {
        let (_device, registry, textures, mut batcher) = setup();
        batcher
            .add_quad(quad(0.0, 0.0, 10.0, 10.0, Color(0xFF0000FF)), &textures, &registry)
            .unwrap();
        let mut clipped = quad(10.0, 0.0, 10.0, 10.0, Color(0xFF0000FF));
        clipped.clipping_rect = Bound::new(0.0, 0.0, 5.0, 5.0);
        batcher.add_quad(clipped, &textures, &registry).unwrap();

        assert_eq!(batcher.ops().len(), 2);
    }

    #[test]
    fn rtt_boundaries_force_a_fresh_op() {
        let (_device, registry, textures, mut batcher) = setup();
        batcher
            .add_quad(quad(0.0, 0.0, 10.0, 10.0, Color(0xFF0000FF)), &textures, &registry)
            .unwrap();
        let mut boundary = quad(10.0, 0.0, 10.0, 10.0, Color(0xFF0000FF));
        boundary.rtt_boundary = true;
        batcher.add_quad(boundary.clone(), &textures, &registry).unwrap();
        // And nothing batches onto an rtt-boundary op either.
        batcher
            .add_quad(quad(20.0, 0.0, 10.0, 10.0, Color(0xFF0000FF)), &textures, &registry)
            .unwrap();

        assert_eq!(batcher.ops().len(), 3);
    }

    #[test]
    fn texture_slot_spill_opens_a_new_op() {
        let (mut device, registry, mut textures, mut batcher) = setup();
        let mut ids = Vec::new();
        for i in 0..5 {
            let id = textures.create_image(Some((8, 8)), None, false);
            let gpu = device.create_texture(8, 8, &[0; 8 * 8 * 4]);
            textures.get_mut(id).unwrap().gpu = Some(gpu);
            textures.get_mut(id).unwrap().state = crate::texture::TextureState::Loaded;
            ids.push(id);
            let _ = i;
        }
        for id in &ids {
            let mut params = quad(0.0, 0.0, 8.0, 8.0, Color(0xFFFFFFFF));
            params.texture = Some(*id);
            batcher.add_quad(params, &textures, &registry).unwrap();
        }
        // Four textures fit one op; the fifth spills.
        assert_eq!(batcher.ops().len(), 2);
        assert_eq!(batcher.ops()[0].textures.len(), 4);
        assert_eq!(batcher.ops()[1].textures.len(), 1);
        let _ = TEXTURE_SLOT_FULL;
    }

    #[test]
    fn axis_aligned_quad_writes_wire_exact_vertices() {
        let (mut device, registry, textures, mut batcher) = setup();
        batcher
            .add_quad(
                quad(100.0, 200.0, 300.0, 150.0, Color(0xFF0000FF)),
                &textures,
                &registry,
            )
            .unwrap();
        batcher.render(
            &mut device,
            &registry,
            &PassTarget {
                resolution: (1920.0, 1080.0),
                pixel_ratio: 1.0,
            },
        );

        let uploads: Vec<_> = device
            .commands()
            .iter()
            .filter_map(|command| match command {
                GpuCommand::UploadVertices { bytes, .. } => Some(bytes.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(uploads.len(), 1);
        let floats: Vec<f32> = uploads[0]
            .chunks_exact(4)
            .map(|word| f32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        assert_eq!(floats.len(), 24);
        // Vertex 0 (top-left): position, uv, color, texture index.
        assert_eq!(&floats[0..4], &[100.0, 200.0, 0.0, 0.0]);
        assert_eq!(
            floats[4].to_bits(),
            u32::from_le_bytes([0xFF, 0x00, 0x00, 0xFF])
        );
        assert_eq!(floats[5], 0.0);
        // Vertex 3 (bottom-right).
        assert_eq!(&floats[18..22], &[400.0, 350.0, 1.0, 1.0]);
    }

    #[test]
    fn rotated_quads_take_the_full_affine_path() {
        let (_device, registry, textures, mut batcher) = setup();
        let mut params = quad(0.0, 0.0, 10.0, 10.0, Color(0xFFFFFFFF));
        let mut transform = Transform2D::translation(50.0, 50.0);
        transform.rotate(std::f32::consts::FRAC_PI_2);
        params.transform = transform;
        batcher.add_quad(params, &textures, &registry).unwrap();

        // After a 90-degree rotation the top-right corner (10, 0) lands at
        // (50, 60).
        assert_eq!(batcher.ops()[0].num_quads, 1);
    }

    #[test]
    fn scissor_rect_converts_to_bottom_origin() {
        let scissor = super::scissor_for(&Bound::new(250.0, 250.0, 300.0, 300.0), 1.0, 1080.0);
        let scissor = scissor.unwrap();
        assert_eq!(scissor.x, 250);
        assert_eq!(scissor.y, (1080.0 - 50.0 - 250.0) as i32);
        assert_eq!(scissor.width, 50);
        assert_eq!(scissor.height, 50);
    }

    #[test]
    fn render_emits_one_draw_per_op_with_matching_index_counts() {
        let (mut device, registry, textures, mut batcher) = setup();
        batcher
            .add_quad(quad(0.0, 0.0, 10.0, 10.0, Color(0xFF0000FF)), &textures, &registry)
            .unwrap();
        batcher
            .add_quad(quad(10.0, 0.0, 10.0, 10.0, Color(0xFF0000FF)), &textures, &registry)
            .unwrap();
        let mut clipped = quad(20.0, 0.0, 10.0, 10.0, Color(0xFF0000FF));
        clipped.clipping_rect = Bound::new(0.0, 0.0, 5.0, 5.0);
        batcher.add_quad(clipped, &textures, &registry).unwrap();

        batcher.render(
            &mut device,
            &registry,
            &PassTarget {
                resolution: (1920.0, 1080.0),
                pixel_ratio: 1.0,
            },
        );

        let draws = device.draw_calls();
        assert_eq!(draws.len(), batcher.ops().len());
        let total_indices: u32 = draws
            .iter()
            .map(|command| match command {
                GpuCommand::DrawElements { index_count, .. } => *index_count,
                _ => 0,
            })
            .sum();
        assert_eq!(total_indices, 6 * batcher.num_quads());
        // The second op starts two quads into the index buffer.
        assert_eq!(
            draws[1],
            &GpuCommand::DrawElements {
                index_count: 6,
                index_byte_offset: 24,
            }
        );
    }
}
