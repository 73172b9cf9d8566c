//! A deterministic [`GpuDevice`] that records the command stream.
//!
//! Used by the integration suites: the batcher's output is asserted against
//! expected command sequences, and repeated frames can be compared for
//! byte-identical streams.

use ahash::{HashMap, HashMapExt, HashSet};

use crate::gpu::{
    GpuCapabilities, GpuDevice, ProgramError, ScissorRect, UniformValue, INDEX_BYTES_PER_QUAD,
};
use crate::id::{FramebufferId, GpuBufferId, GpuTextureId, ProgramId};
use crate::shader::ShaderDescriptor;

/// One recorded GPU command. `DrawElements` is recorded with the GL-level
/// numbers: an index count of `6 * quads` and a byte offset into the shared
/// index buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    BeginFrame,
    EndFrame,
    UploadVertices {
        buffer: GpuBufferId,
        bytes: Vec<u8>,
    },
    BindProgram(ProgramId),
    SetUniform {
        name: String,
        value: UniformValue,
    },
    BindTexture {
        unit: u32,
        texture: GpuTextureId,
    },
    SetScissor(Option<ScissorRect>),
    BindFramebuffer(Option<FramebufferId>),
    SetViewport {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Clear([f32; 4]),
    DrawElements {
        index_count: u32,
        index_byte_offset: u32,
    },
}

struct RecordedProgram {
    uniforms: HashSet<String>,
}

pub struct RecordingDevice {
    capabilities: GpuCapabilities,
    commands: Vec<GpuCommand>,
    programs: Vec<RecordedProgram>,
    bound_program: Option<ProgramId>,
    next_buffer: u32,
    next_texture: u32,
    next_framebuffer: u32,
    texture_sizes: HashMap<GpuTextureId, (u32, u32)>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new(4)
    }
}

impl RecordingDevice {
    pub fn new(max_texture_units: u32) -> Self {
        Self {
            capabilities: GpuCapabilities {
                max_texture_units,
                max_texture_size: 4096,
            },
            commands: Vec::new(),
            programs: Vec::new(),
            bound_program: None,
            next_buffer: 0,
            next_texture: 0,
            next_framebuffer: 0,
            texture_sizes: HashMap::new(),
        }
    }

    /// All commands recorded so far, in issue order.
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Commands issued since the last `take_commands` call.
    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Recorded draw calls only, in issue order.
    pub fn draw_calls(&self) -> Vec<&GpuCommand> {
        self.commands
            .iter()
            .filter(|command| matches!(command, GpuCommand::DrawElements { .. }))
            .collect()
    }

    pub fn texture_size(&self, texture: GpuTextureId) -> Option<(u32, u32)> {
        self.texture_sizes.get(&texture).copied()
    }
}

impl GpuDevice for RecordingDevice {
    fn capabilities(&self) -> GpuCapabilities {
        self.capabilities
    }

    fn create_vertex_buffer(&mut self, _byte_capacity: usize) -> GpuBufferId {
        let id = GpuBufferId(self.next_buffer);
        self.next_buffer += 1;
        id
    }

    fn upload_vertices(&mut self, buffer: GpuBufferId, bytes: &[u8]) {
        self.commands.push(GpuCommand::UploadVertices {
            buffer,
            bytes: bytes.to_vec(),
        });
    }

    fn create_texture(&mut self, width: u32, height: u32, _pixels: &[u8]) -> GpuTextureId {
        let id = GpuTextureId(self.next_texture);
        self.next_texture += 1;
        self.texture_sizes.insert(id, (width, height));
        id
    }

    fn destroy_texture(&mut self, texture: GpuTextureId) {
        self.texture_sizes.remove(&texture);
    }

    fn create_program(&mut self, descriptor: &ShaderDescriptor) -> Result<ProgramId, ProgramError> {
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(RecordedProgram {
            uniforms: descriptor.uniform_names().collect(),
        });
        Ok(id)
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.bound_program = Some(program);
        self.commands.push(GpuCommand::BindProgram(program));
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) -> bool {
        let known = self
            .bound_program
            .and_then(|id| self.programs.get(id.0 as usize))
            .map(|program| program.uniforms.contains(name))
            .unwrap_or(false);
        if known {
            self.commands.push(GpuCommand::SetUniform {
                name: name.to_owned(),
                value,
            });
        }
        known
    }

    fn bind_texture(&mut self, unit: u32, texture: GpuTextureId) {
        self.commands.push(GpuCommand::BindTexture { unit, texture });
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.commands.push(GpuCommand::SetScissor(rect));
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> (FramebufferId, GpuTextureId) {
        let framebuffer = FramebufferId(self.next_framebuffer);
        self.next_framebuffer += 1;
        let texture = self.create_texture(width, height, &[]);
        (framebuffer, texture)
    }

    fn destroy_framebuffer(&mut self, _framebuffer: FramebufferId) {}

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.commands.push(GpuCommand::BindFramebuffer(framebuffer));
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.commands.push(GpuCommand::SetViewport {
            x,
            y,
            width,
            height,
        });
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.commands.push(GpuCommand::Clear(color));
    }

    fn draw_quads(&mut self, _vertex_buffer: GpuBufferId, first_quad: u32, quad_count: u32) {
        self.commands.push(GpuCommand::DrawElements {
            index_count: 6 * quad_count,
            index_byte_offset: first_quad * INDEX_BYTES_PER_QUAD,
        });
    }

    fn begin_frame(&mut self) {
        self.commands.push(GpuCommand::BeginFrame);
    }

    fn end_frame(&mut self) {
        self.commands.push(GpuCommand::EndFrame);
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
