//! # Lantern
//!
//! Lantern is a retained-mode 2D scene-graph renderer for GPU-accelerated UI
//! composition, aimed at constrained devices such as television set-top
//! boxes. Applications build a tree of visual nodes with spatial, color,
//! texture, shader, and text attributes; each frame the engine recomputes
//! dirty derived state (world transforms, alpha, clipping, visibility,
//! z-order) and emits a minimal batched stream of indexed-quad draw calls to
//! a narrow GPU capability interface.
//!
//! ## Features
//!
//! - **Scene graph**: node hierarchy with transform/alpha propagation,
//!   clipping, stable z-ordering, and render-to-texture subtrees.
//! - **Dirty-flag updates**: property setters mark exactly the derived state
//!   that must be recomputed; clean subtrees are skipped entirely.
//! - **Draw batching**: consecutive quads sharing a program, clipping rect,
//!   and texture slots collapse into single draw calls over one shared
//!   vertex arena.
//! - **Texture memory management**: GPU residency is kept under a byte
//!   budget by evicting textures in least-recently-made-idle order.
//! - **SDF text**: scrollable signed-distance-field text layout with a line
//!   cache and incremental revalidation against a render window.
//!
//! ## Getting started
//!
//! ```rust
//! use lantern::{Color, EngineSettings, NodeProps, RecordingDevice, Renderer};
//!
//! let mut renderer = Renderer::new(
//!     Box::new(RecordingDevice::default()),
//!     EngineSettings::default(),
//! )
//! .expect("engine construction");
//!
//! let child = renderer
//!     .create_node(&NodeProps {
//!         x: 100.0,
//!         y: 200.0,
//!         width: 300.0,
//!         height: 150.0,
//!         color: Color(0xFF0000FF),
//!         ..NodeProps::default()
//!     })
//!     .unwrap();
//!
//! renderer.render_frame();
//! assert!(renderer.snapshot(child).unwrap().is_renderable);
//! ```
//!
//! The [`RecordingDevice`] above records the GPU command stream and backs
//! the test suites; [`WgpuDevice`] executes the same interface on `wgpu`.

pub use wgpu;

mod color;
mod events;
mod gpu;
mod id;
mod matrix;
mod node;
mod rect;
mod renderer;
mod scene;
mod shader;
mod text;
mod texture;
mod texture_manager;
mod tween;
mod wgpu_state;

pub use color::Color;
pub use events::{LoadedResource, NodeEvent};
pub use gpu::recording::{GpuCommand, RecordingDevice};
pub use gpu::{GpuCapabilities, GpuDevice, ProgramError, ScissorRect, UniformValue};
pub use id::{FramebufferId, GpuBufferId, GpuTextureId, NodeId, ProgramId, TextureId};
pub use matrix::Transform2D;
pub use node::{NodeProps, NodeSnapshot, RenderState, TextureOptions, UpdateType};
pub use rect::{Bound, Rect};
pub use renderer::batcher::BatchError;
pub use renderer::{
    Completion, CompletionSender, DebugFlags, EngineSettings, FrameStats, InitError, Renderer,
};
pub use scene::SceneError;
pub use shader::{
    batch_always, batch_never, CanBatch, Shader, ShaderDescriptor, ShaderProps, UniformDecl,
    UniformKind, VertexLayout,
};
pub use text::layout::{LayoutResult, LineEntry, RenderWindow};
pub use text::{
    Contain, FontInfo, SdfFontFace, SdfGlyph, TextAlign, TextProps, VerticalAlign, WordBreak,
};
pub use texture::TextureState;
pub use texture_manager::TextureMemoryManager;
pub use tween::{AnimatedProperty, PropertyTweener, PropertyUpdate};
pub use wgpu_state::WgpuDevice;
