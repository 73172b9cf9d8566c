//! The renderer engine: scene graph, resources, batcher, and frame loop.

use std::sync::mpsc::{Receiver, Sender};
use std::time::Instant;

use ahash::HashMap;
use bitflags::bitflags;
use thiserror::Error;

use crate::color::Color;
use crate::events::NodeEvent;
use crate::gpu::{GpuDevice, ProgramError};
use crate::id::{FramebufferId, GpuTextureId, NodeId, TextureId};
use crate::scene::SceneGraph;
use crate::shader::ShaderRegistry;
use crate::text::{SdfFontFace, TextState};
use crate::texture::TextureStore;
use crate::texture_manager::TextureMemoryManager;
use crate::tween::{PropertyTweener, PropertyUpdate};

pub(crate) mod batcher;
mod construction;
mod frame;
mod properties;

use batcher::DrawBatcher;

bitflags! {
    /// Engine debug switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u8 {
        /// Per-frame op/quad counts at debug level.
        const FRAME_LOG = 1 << 0;
        /// Minimum-coverage overlay in the SDF text shader.
        const SDF_OVERLAY = 1 << 1;
    }
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Logical canvas width.
    pub width: f32,
    /// Logical canvas height.
    pub height: f32,
    pub clear_color: Color,
    /// Byte size of the quad vertex arena.
    pub buffer_memory: usize,
    pub pixel_ratio: f32,
    /// GPU texture residency budget in bytes.
    pub texture_memory_budget: u64,
    /// Preload margin around the viewport for the `InBounds` render state.
    pub bounds_margin: f32,
    pub debug: DebugFlags,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
            clear_color: Color(0xFF3677E0),
            buffer_memory: 4 * 1024 * 1024,
            pixel_ratio: 1.0,
            texture_memory_budget: 128 * 1024 * 1024,
            bounds_margin: 100.0,
            debug: DebugFlags::empty(),
        }
    }
}

/// Fatal engine construction failures.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("required GPU capability missing: {0}")]
    GpuCapabilityMissing(String),
}

/// Completion of an external I/O operation, posted back to the engine queue
/// and processed between frames.
#[derive(Debug)]
pub enum Completion {
    TexturePixels {
        texture: TextureId,
        result: Result<((u32, u32), Vec<u8>), String>,
    },
    FontLoaded {
        family: String,
    },
    FontFailed {
        family: String,
        error: String,
    },
}

/// Clonable handle external loaders use to deliver [`Completion`]s.
#[derive(Clone)]
pub struct CompletionSender(Sender<Completion>);

impl CompletionSender {
    /// Best-effort: completions for an engine that has shut down are dropped.
    pub fn send(&self, completion: Completion) {
        let _ = self.0.send(completion);
    }
}

/// Per-frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Render passes executed (render-to-texture passes plus the screen).
    pub passes: u32,
    pub render_ops: u32,
    pub quads: u32,
    pub evicted_textures: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RttTarget {
    pub framebuffer: FramebufferId,
    pub texture: TextureId,
    pub gpu_texture: GpuTextureId,
    pub dimensions: (u32, u32),
}

/// The engine. Owns the scene graph, all shared resources, and the GPU
/// device; single-threaded, driven by [`Renderer::render_frame`].
pub struct Renderer {
    pub(crate) settings: EngineSettings,
    pub(crate) device: Box<dyn GpuDevice>,
    pub(crate) scene: SceneGraph,
    pub(crate) textures: TextureStore,
    pub(crate) memory: TextureMemoryManager,
    pub(crate) shaders: ShaderRegistry,
    pub(crate) batcher: DrawBatcher,
    pub(crate) fonts: HashMap<String, SdfFontFace>,
    pub(crate) text_states: HashMap<NodeId, TextState>,
    /// Nodes whose text waits for a font family to finish loading.
    pub(crate) pending_font_nodes: Vec<(String, NodeId)>,
    pub(crate) rtt_targets: HashMap<NodeId, RttTarget>,
    pub(crate) completion_sender: CompletionSender,
    pub(crate) completion_receiver: Receiver<Completion>,
    pub(crate) tweeners: Vec<Box<dyn PropertyTweener>>,
    pub(crate) tween_scratch: Vec<PropertyUpdate>,
    pub(crate) last_frame_at: Option<Instant>,
    pub(crate) last_stats: FrameStats,
}

impl Renderer {
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn root(&self) -> NodeId {
        self.scene.root()
    }

    /// Handle for external loaders to post texture/font completions.
    pub fn completion_sender(&self) -> CompletionSender {
        self.completion_sender.clone()
    }

    /// The GPU device driving this engine.
    pub fn device_mut(&mut self) -> &mut dyn GpuDevice {
        self.device.as_mut()
    }

    /// All node events emitted since the previous drain, in emission order.
    pub fn drain_events(&mut self) -> Vec<(NodeId, NodeEvent)> {
        self.scene.events.drain()
    }

    pub fn resident_texture_bytes(&self) -> u64 {
        self.memory.resident_bytes()
    }

    pub fn texture_memory_budget(&self) -> u64 {
        self.memory.budget()
    }

    pub fn last_frame_stats(&self) -> FrameStats {
        self.last_stats
    }

    pub fn add_tweener(&mut self, tweener: Box<dyn PropertyTweener>) {
        self.tweeners.push(tweener);
    }

    /// Updates the logical canvas size; the root node tracks it.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.settings.width = width;
        self.settings.height = height;
        let root = self.scene.root();
        self.scene.set_width(root, width);
        self.scene.set_height(root, height);
    }
}
