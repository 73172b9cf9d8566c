use std::fmt;

/// Index of a node in the scene-graph arena.
///
/// Ids are reused after [`SceneGraph::destroy`](crate::SceneGraph::destroy);
/// a destroyed id is inert (all mutators no-op) until its slot is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a bitmap resource tracked by the texture store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a compiled shader program on the GPU device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Handle to a GPU-side vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuBufferId(pub u32);

/// Handle to a GPU-side texture object (distinct from [`TextureId`], which
/// names the logical resource whether or not it is currently resident).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuTextureId(pub u32);

/// Handle to an offscreen framebuffer used for render-to-texture subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);
