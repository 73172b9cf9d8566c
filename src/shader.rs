//! Shader programs and per-node shader properties.
//!
//! A shader is the pairing of a compiled program identity with an attribute
//! layout and a set of declared uniforms. The system separates **registering**
//! (compile once, fatal on failure) from **attaching** (reference per node,
//! cheap): [`ShaderRegistry::register`] compiles a [`ShaderDescriptor`] into a
//! device program, and nodes carry a [`Shader`] handle plus opaque
//! [`ShaderProps`] passed through to the program at bind time.
//!
//! Custom WGSL programs follow the one-`vec4`-per-uniform block convention:
//! group 0 binding 0 is a uniform struct whose fields are declared in
//! [`ShaderDescriptor::uniform_names`] order, each padded to a `vec4<f32>`
//! (a 2D affine transform occupies two).

use crate::gpu::{GpuDevice, ProgramError, UniformValue};
use crate::id::ProgramId;

/// Size class of a declared uniform, used to compute uniform-block offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec4,
    /// 2D affine transform, two `vec4` rows.
    Mat3x2,
}

impl UniformKind {
    /// Number of 16-byte uniform-block slots this kind occupies.
    pub fn slots(&self) -> u32 {
        match self {
            UniformKind::Mat3x2 => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
}

impl UniformDecl {
    pub fn new(name: &str, kind: UniformKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
        }
    }
}

/// Vertex stream layout a program consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    /// The batcher's quad layout: `vec2 position, vec2 texcoord, unorm8x4
    /// color, float texture index` at stride 24.
    Quad,
    /// SDF glyph layout: `vec2 position, vec2 texcoord` at stride 16.
    SdfGlyph,
}

/// Batching predicate: may two quads with these props share one render-op?
pub type CanBatch = fn(&ShaderProps, &ShaderProps) -> bool;

pub fn batch_always(_: &ShaderProps, _: &ShaderProps) -> bool {
    true
}

pub fn batch_never(_: &ShaderProps, _: &ShaderProps) -> bool {
    false
}

/// Everything needed to compile and drive one shader program.
#[derive(Debug, Clone)]
pub struct ShaderDescriptor {
    pub name: String,
    /// WGSL source consumed by the wgpu device; ignored by the recorder.
    pub source: String,
    pub vertex_layout: VertexLayout,
    /// Uniforms beyond the built-in `u_resolution` / `u_pixelRatio` pair.
    pub uniforms: Vec<UniformDecl>,
    /// Whether the fragment stage selects between multiple bound textures via
    /// the vertex texture index. When false the batcher caps ops at one
    /// texture.
    pub supports_indexed_textures: bool,
    pub declares_alpha: bool,
    pub declares_dimensions: bool,
    pub can_batch: CanBatch,
}

impl ShaderDescriptor {
    /// The built-in quad shader: per-vertex premultiplied color, indexed
    /// textures, always batchable.
    pub fn default_shader() -> Self {
        Self {
            name: "quad".to_owned(),
            source: QUAD_SHADER_SOURCE.to_owned(),
            vertex_layout: VertexLayout::Quad,
            uniforms: Vec::new(),
            supports_indexed_textures: true,
            declares_alpha: false,
            declares_dimensions: false,
            can_batch: batch_always,
        }
    }

    /// The built-in SDF glyph shader used by the text renderer. One draw per
    /// text node; never batched with neighbors.
    pub fn sdf_shader() -> Self {
        Self {
            name: "sdf".to_owned(),
            source: SDF_SHADER_SOURCE.to_owned(),
            vertex_layout: VertexLayout::SdfGlyph,
            uniforms: vec![
                UniformDecl::new("u_transform", UniformKind::Mat3x2),
                UniformDecl::new("u_color", UniformKind::Vec4),
                UniformDecl::new("u_size", UniformKind::Float),
                UniformDecl::new("u_scrollY", UniformKind::Float),
                UniformDecl::new("u_distanceRange", UniformKind::Float),
                UniformDecl::new("u_debug", UniformKind::Int),
            ],
            supports_indexed_textures: false,
            declares_alpha: true,
            declares_dimensions: false,
            can_batch: batch_never,
        }
    }

    /// All uniform names the program declares, built-ins first, in
    /// uniform-block order.
    pub fn uniform_names(&self) -> impl Iterator<Item = String> + '_ {
        let mut names = vec!["u_resolution".to_owned(), "u_pixelRatio".to_owned()];
        if self.declares_alpha {
            names.push("u_alpha".to_owned());
        }
        if self.declares_dimensions {
            names.push("u_dimensions".to_owned());
        }
        names
            .into_iter()
            .chain(self.uniforms.iter().map(|decl| decl.name.clone()))
    }

    /// `(name, slot offset)` pairs for the uniform block, 16 bytes per slot.
    pub fn uniform_slots(&self) -> Vec<(String, u32)> {
        let mut slots = Vec::new();
        let mut offset = 0u32;
        let mut push = |name: String, kind: UniformKind, offset: &mut u32| {
            slots.push((name, *offset));
            *offset += kind.slots();
        };
        push("u_resolution".to_owned(), UniformKind::Vec2, &mut offset);
        push("u_pixelRatio".to_owned(), UniformKind::Float, &mut offset);
        if self.declares_alpha {
            push("u_alpha".to_owned(), UniformKind::Float, &mut offset);
        }
        if self.declares_dimensions {
            push("u_dimensions".to_owned(), UniformKind::Vec2, &mut offset);
        }
        for decl in &self.uniforms {
            push(decl.name.clone(), decl.kind, &mut offset);
        }
        slots
    }

    /// Total uniform-block slot count (16 bytes each).
    pub fn uniform_slot_count(&self) -> u32 {
        let mut count = 2;
        if self.declares_alpha {
            count += 1;
        }
        if self.declares_dimensions {
            count += 1;
        }
        count + self.uniforms.iter().map(|decl| decl.kind.slots()).sum::<u32>()
    }
}

/// Opaque per-node shader properties forwarded to the program at bind time.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ShaderProps {
    #[default]
    Default,
    /// Name/value bag for custom programs. A `"$dimensions"` entry is patched
    /// with the quad's width/height as it is batched.
    Custom(Vec<(String, UniformValue)>),
}

impl ShaderProps {
    pub(crate) fn patch_dimensions(&mut self, width: f32, height: f32) {
        if let ShaderProps::Custom(entries) = self {
            for (name, value) in entries.iter_mut() {
                if name == "$dimensions" {
                    *value = UniformValue::Vec2([width, height]);
                }
            }
        }
    }

    /// Entries to forward as program uniforms, skipping patch slots.
    pub(crate) fn uniform_entries(&self) -> &[(String, UniformValue)] {
        match self {
            ShaderProps::Default => &[],
            ShaderProps::Custom(entries) => entries,
        }
    }
}

/// A node's shader resource: program identity plus its opaque props.
#[derive(Debug, Clone, PartialEq)]
pub struct Shader {
    pub program: ProgramId,
    pub props: ShaderProps,
}

pub(crate) struct ShaderRegistry {
    descriptors: Vec<(ProgramId, ShaderDescriptor)>,
    default_program: ProgramId,
    sdf_program: ProgramId,
}

impl ShaderRegistry {
    pub(crate) fn new(device: &mut dyn GpuDevice) -> Result<Self, ProgramError> {
        let default_descriptor = ShaderDescriptor::default_shader();
        let default_program = device.create_program(&default_descriptor)?;
        let sdf_descriptor = ShaderDescriptor::sdf_shader();
        let sdf_program = device.create_program(&sdf_descriptor)?;
        Ok(Self {
            descriptors: vec![
                (default_program, default_descriptor),
                (sdf_program, sdf_descriptor),
            ],
            default_program,
            sdf_program,
        })
    }

    pub(crate) fn register(
        &mut self,
        device: &mut dyn GpuDevice,
        descriptor: ShaderDescriptor,
    ) -> Result<ProgramId, ProgramError> {
        let program = device.create_program(&descriptor)?;
        self.descriptors.push((program, descriptor));
        Ok(program)
    }

    pub(crate) fn descriptor(&self, program: ProgramId) -> &ShaderDescriptor {
        self.descriptors
            .iter()
            .find(|(id, _)| *id == program)
            .map(|(_, descriptor)| descriptor)
            .expect("program was registered through this registry")
    }

    pub(crate) fn default_program(&self) -> ProgramId {
        self.default_program
    }

    pub(crate) fn sdf_program(&self) -> ProgramId {
        self.sdf_program
    }
}

/// Built-in quad shader. Vertices arrive in logical pixels; colors are
/// premultiplied in the vertex buffer. The fragment stage samples all four
/// units and selects by the vertex texture index to keep control flow
/// uniform.
pub(crate) const QUAD_SHADER_SOURCE: &str = r#"
struct Uniforms {
    resolution: vec4<f32>,
    pixel_ratio: vec4<f32>,
};
@group(0) @binding(0) var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) texcoord: vec2<f32>,
    @location(2) color: vec4<f32>,
    @location(3) texture_index: f32,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) texcoord: vec2<f32>,
    @location(1) color: vec4<f32>,
    @location(2) texture_index: f32,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let normalized = in.position * u.pixel_ratio.x / u.resolution.xy;
    out.position = vec4<f32>(normalized.x * 2.0 - 1.0, 1.0 - normalized.y * 2.0, 0.0, 1.0);
    out.texcoord = in.texcoord;
    out.color = in.color;
    out.texture_index = in.texture_index;
    return out;
}

@group(1) @binding(0) var tex_sampler: sampler;
@group(1) @binding(1) var t0: texture_2d<f32>;
@group(1) @binding(2) var t1: texture_2d<f32>;
@group(1) @binding(3) var t2: texture_2d<f32>;
@group(1) @binding(4) var t3: texture_2d<f32>;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let c0 = textureSample(t0, tex_sampler, in.texcoord);
    let c1 = textureSample(t1, tex_sampler, in.texcoord);
    let c2 = textureSample(t2, tex_sampler, in.texcoord);
    let c3 = textureSample(t3, tex_sampler, in.texcoord);
    let index = in.texture_index;
    var texel = c0;
    texel = select(texel, c1, index >= 0.5 && index < 1.5);
    texel = select(texel, c2, index >= 1.5 && index < 2.5);
    texel = select(texel, c3, index >= 2.5);
    return texel * in.color;
}
"#;

/// Built-in SDF glyph shader. Vertices are in SDF design units; `u_size`
/// scales them to element space, `u_transform` is the node's world transform.
/// Color arrives unpremultiplied with separate alpha and is premultiplied at
/// output for the shared blend state.
pub(crate) const SDF_SHADER_SOURCE: &str = r#"
struct Uniforms {
    resolution: vec4<f32>,
    pixel_ratio: vec4<f32>,
    alpha: vec4<f32>,
    transform_row0: vec4<f32>,
    transform_row1: vec4<f32>,
    color: vec4<f32>,
    size: vec4<f32>,
    scroll_y: vec4<f32>,
    distance_range: vec4<f32>,
    debug: vec4<f32>,
};
@group(0) @binding(0) var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) texcoord: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) texcoord: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let local = vec2<f32>(
        in.position.x * u.size.x,
        in.position.y * u.size.x - u.scroll_y.x,
    );
    let world = vec2<f32>(
        u.transform_row0.x * local.x + u.transform_row0.y * local.y + u.transform_row0.z,
        u.transform_row1.x * local.x + u.transform_row1.y * local.y + u.transform_row1.z,
    );
    let normalized = world * u.pixel_ratio.x / u.resolution.xy;
    out.position = vec4<f32>(normalized.x * 2.0 - 1.0, 1.0 - normalized.y * 2.0, 0.0, 1.0);
    out.texcoord = in.texcoord;
    return out;
}

@group(1) @binding(0) var tex_sampler: sampler;
@group(1) @binding(1) var atlas: texture_2d<f32>;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let distance = textureSample(atlas, tex_sampler, in.texcoord).r;
    let scaled = (distance - 0.5) * u.distance_range.x;
    var coverage = clamp(scaled / max(fwidth(scaled), 1e-5) + 0.5, 0.0, 1.0);
    if (u.debug.x > 0.5) {
        coverage = max(coverage, 0.2);
    }
    let alpha = coverage * u.color.w * u.alpha.x;
    return vec4<f32>(u.color.xyz * alpha, alpha);
}
"#;
