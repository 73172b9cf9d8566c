//! GPU capability abstraction.
//!
//! The batcher and the render dispatch talk exclusively to [`GpuDevice`], a
//! narrow interface over an OpenGL ES 2/3-class API: buffers, textures,
//! programs, uniforms, scissor, framebuffers, and indexed-quad draws. Two
//! implementations exist: [`RecordingDevice`](recording::RecordingDevice)
//! records a deterministic command stream for the test suites, and
//! [`WgpuDevice`](crate::WgpuDevice) executes on `wgpu`.

use thiserror::Error;

use crate::id::{FramebufferId, GpuBufferId, GpuTextureId, ProgramId};
use crate::shader::ShaderDescriptor;

pub mod recording;

/// Number of floats in one quad: 4 vertices x 6 floats.
pub const FLOATS_PER_QUAD: usize = 24;
/// Bytes per vertex: `vec2 position + vec2 texcoord + u32 color + f32 index`.
pub const VERTEX_STRIDE: usize = 24;
/// Index-buffer bytes per quad: 6 `u16` indices.
pub const INDEX_BYTES_PER_QUAD: u32 = 12;

/// Static device limits queried once at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCapabilities {
    /// Fragment texture units usable by one draw call.
    pub max_texture_units: u32,
    /// Largest supported square texture edge.
    pub max_texture_size: u32,
}

/// A uniform value passed through [`GpuDevice::set_uniform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    /// A 2D affine transform as `[ta, tb, tx, tc, td, ty]`.
    Mat3x2([f32; 6]),
}

/// Scissor rectangle in physical pixels, bottom-origin GL convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Program creation failure. Fatal at engine initialization.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("shader compilation failed for '{name}': {message}")]
    ShaderCompileFailed { name: String, message: String },
    #[error("program link failed for '{name}': {message}")]
    LinkFailed { name: String, message: String },
}

/// The capability interface the renderer is written against.
///
/// All methods are state-machine style like the underlying API: bind, set,
/// draw. `draw_quads` draws `quad_count` quads starting at `first_quad` of
/// the currently uploaded vertex arena, using the shared quad index pattern
/// `(4k, 4k+1, 4k+2, 4k+2, 4k+1, 4k+3)`.
pub trait GpuDevice {
    fn capabilities(&self) -> GpuCapabilities;

    fn create_vertex_buffer(&mut self, byte_capacity: usize) -> GpuBufferId;
    fn upload_vertices(&mut self, buffer: GpuBufferId, bytes: &[u8]);

    fn create_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> GpuTextureId;
    fn destroy_texture(&mut self, texture: GpuTextureId);

    fn create_program(&mut self, descriptor: &ShaderDescriptor) -> Result<ProgramId, ProgramError>;
    fn bind_program(&mut self, program: ProgramId);

    /// Returns `false` when the bound program does not declare the uniform;
    /// callers log and skip in that case.
    fn set_uniform(&mut self, name: &str, value: UniformValue) -> bool;

    fn bind_texture(&mut self, unit: u32, texture: GpuTextureId);

    /// `Some` enables the scissor test with the given rect, `None` disables
    /// it.
    fn set_scissor(&mut self, rect: Option<ScissorRect>);

    /// Creates an offscreen framebuffer with an attached color texture that
    /// can later be sampled like any other texture.
    fn create_framebuffer(&mut self, width: u32, height: u32) -> (FramebufferId, GpuTextureId);
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    /// `None` selects the default (screen) target.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);
    fn clear(&mut self, color: [f32; 4]);

    fn draw_quads(&mut self, vertex_buffer: GpuBufferId, first_quad: u32, quad_count: u32);

    fn begin_frame(&mut self);
    fn end_frame(&mut self);

    /// Escape hatch for test suites that need the concrete device behind the
    /// trait object (e.g. to read a recorded command stream).
    fn as_any(&mut self) -> &mut dyn std::any::Any;
}
