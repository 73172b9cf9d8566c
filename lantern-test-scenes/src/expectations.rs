//! Helpers for asserting over recorded GPU command streams.

use lantern::{GpuCommand, ScissorRect, UniformValue};

/// One parsed vertex of the 24-byte quad layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadVertex {
    pub x: f32,
    pub y: f32,
    pub u: f32,
    pub v: f32,
    /// Premultiplied color bytes `[r, g, b, a]`.
    pub color: [u8; 4],
    pub texture_index: f32,
}

/// Parses an uploaded vertex-arena prefix into quads of 4 vertices
/// (TL, TR, BL, BR).
pub fn parse_quads(bytes: &[u8]) -> Vec<[QuadVertex; 4]> {
    assert!(
        bytes.len() % 96 == 0,
        "vertex upload length {} is not a whole number of quads",
        bytes.len(),
    );
    // Decode byte-wise: the uploaded Vec<u8> carries no f32 alignment.
    let floats: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|word| f32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect();
    floats
        .chunks_exact(24)
        .map(|quad| {
            let vertex = |offset: usize| QuadVertex {
                x: quad[offset],
                y: quad[offset + 1],
                u: quad[offset + 2],
                v: quad[offset + 3],
                color: quad[offset + 4].to_bits().to_le_bytes(),
                texture_index: quad[offset + 5],
            };
            [vertex(0), vertex(6), vertex(12), vertex(18)]
        })
        .collect()
}

/// `(index_count, index_byte_offset)` per draw call, in stream order.
pub fn draw_calls(commands: &[GpuCommand]) -> Vec<(u32, u32)> {
    commands
        .iter()
        .filter_map(|command| match command {
            GpuCommand::DrawElements {
                index_count,
                index_byte_offset,
            } => Some((*index_count, *index_byte_offset)),
            _ => None,
        })
        .collect()
}

pub fn total_indices(commands: &[GpuCommand]) -> u32 {
    draw_calls(commands).iter().map(|(count, _)| count).sum()
}

/// Every value bound for a uniform name, in stream order.
pub fn uniform_values(commands: &[GpuCommand], uniform: &str) -> Vec<UniformValue> {
    commands
        .iter()
        .filter_map(|command| match command {
            GpuCommand::SetUniform { name, value } if name == uniform => Some(*value),
            _ => None,
        })
        .collect()
}

/// Every scissor state change, in stream order.
pub fn scissors(commands: &[GpuCommand]) -> Vec<Option<ScissorRect>> {
    commands
        .iter()
        .filter_map(|command| match command {
            GpuCommand::SetScissor(rect) => Some(*rect),
            _ => None,
        })
        .collect()
}

/// Framebuffer bind sequence; `None` is the screen.
pub fn framebuffer_binds(commands: &[GpuCommand]) -> Vec<Option<lantern::FramebufferId>> {
    commands
        .iter()
        .filter_map(|command| match command {
            GpuCommand::BindFramebuffer(target) => Some(*target),
            _ => None,
        })
        .collect()
}
