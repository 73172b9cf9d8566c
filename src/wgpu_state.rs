//! `wgpu` implementation of the GPU capability interface.
//!
//! The device records the capability calls into a per-frame command list and
//! encodes them as render passes at [`GpuDevice::end_frame`]. Recording
//! first keeps the bind/set/draw call shape of the interface while mapping
//! cleanly onto wgpu's pass model: a pass boundary is a framebuffer change
//! or a clear. Vertex uploads are snapshotted into fresh buffers so a later
//! pass rewinding the shared arena cannot corrupt draws already recorded.
//!
//! Programs follow the one-`vec4`-per-uniform block convention described in
//! [`crate::shader`]; uniforms are staged CPU-side per draw and written into
//! small uniform buffers during encoding.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use ahash::{HashMap, HashMapExt};
use wgpu::util::DeviceExt;

use crate::gpu::{
    GpuCapabilities, GpuDevice, ProgramError, ScissorRect, UniformValue, VERTEX_STRIDE,
};
use crate::id::{FramebufferId, GpuBufferId, GpuTextureId, ProgramId};
use crate::shader::{ShaderDescriptor, VertexLayout};

/// Quads addressable with the shared `u16` index pattern (65536 vertices).
const MAX_INDEXED_QUADS: u32 = (u16::MAX as u32 + 1) / 4;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct ProgramEntry {
    pipeline: wgpu::RenderPipeline,
    uniform_slots: HashMap<String, u32>,
    uniform_block_bytes: usize,
    texture_count: u32,
}

struct TextureEntry {
    _texture: wgpu::Texture,
    view: Arc<wgpu::TextureView>,
}

struct FramebufferEntry {
    view: Arc<wgpu::TextureView>,
    width: u32,
    height: u32,
}

#[derive(Clone)]
struct DrawOp {
    program: ProgramId,
    uniform_bytes: Vec<u8>,
    textures: Vec<Option<Arc<wgpu::TextureView>>>,
    scissor: Option<ScissorRect>,
    vertex_buffer: Arc<wgpu::Buffer>,
    first_index: u32,
    index_count: u32,
}

struct PendingPass {
    target: Option<FramebufferId>,
    clear: Option<wgpu::Color>,
    viewport: Option<(u32, u32, u32, u32)>,
    draws: Vec<DrawOp>,
}

impl PendingPass {
    fn new(target: Option<FramebufferId>) -> Self {
        Self {
            target,
            clear: None,
            viewport: None,
            draws: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.clear.is_none() && self.draws.is_empty()
    }
}

/// Headless wgpu backend rendering into an offscreen color target.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    capabilities: GpuCapabilities,

    sampler: wgpu::Sampler,
    uniform_bind_group_layout: wgpu::BindGroupLayout,
    quad_texture_bind_group_layout: wgpu::BindGroupLayout,
    single_texture_bind_group_layout: wgpu::BindGroupLayout,
    /// Fallback view bound to unused texture units.
    white_view: Arc<wgpu::TextureView>,
    index_buffer: wgpu::Buffer,

    programs: Vec<ProgramEntry>,
    textures: HashMap<GpuTextureId, TextureEntry>,
    framebuffers: HashMap<FramebufferId, FramebufferEntry>,
    /// Latest snapshot per logical vertex buffer.
    vertex_snapshots: HashMap<GpuBufferId, Arc<wgpu::Buffer>>,

    screen_view: Arc<wgpu::TextureView>,
    _screen_texture: wgpu::Texture,
    screen_size: (u32, u32),

    next_buffer: u32,
    next_texture: u32,
    next_framebuffer: u32,

    // Recording state for the current frame.
    passes: Vec<PendingPass>,
    current_target: Option<FramebufferId>,
    bound_program: Option<ProgramId>,
    staged_uniforms: Vec<u8>,
    bound_textures: Vec<Option<Arc<wgpu::TextureView>>>,
    scissor: Option<ScissorRect>,
}

impl WgpuDevice {
    /// Creates a headless device with an offscreen screen target of the
    /// given physical size.
    pub async fn new_headless(physical_size: (u32, u32)) -> Result<Self, ProgramError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|error| ProgramError::LinkFailed {
                name: "adapter".to_owned(),
                message: error.to_string(),
            })?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|error| ProgramError::LinkFailed {
                name: "device".to_owned(),
                message: error.to_string(),
            })?;
        Ok(Self::from_device(device, queue, physical_size))
    }

    fn from_device(device: wgpu::Device, queue: wgpu::Queue, size: (u32, u32)) -> Self {
        let limits = device.limits();
        let capabilities = GpuCapabilities {
            max_texture_units: limits.max_sampled_textures_per_shader_stage.min(16),
            max_texture_size: limits.max_texture_dimension_2d,
        };

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniform_bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let quad_texture_bind_group_layout = create_texture_bind_group_layout(&device, 4);
        let single_texture_bind_group_layout = create_texture_bind_group_layout(&device, 1);

        let white_texture = create_rgba_texture(&device, &queue, 1, 1, &[255, 255, 255, 255]);
        let white_view = Arc::new(white_texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let index_buffer = create_quad_index_buffer(&device, MAX_INDEXED_QUADS);

        let screen_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("screen_target"),
            size: wgpu::Extent3d {
                width: size.0.max(1),
                height: size.1.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let screen_view =
            Arc::new(screen_texture.create_view(&wgpu::TextureViewDescriptor::default()));

        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            capabilities,
            sampler,
            uniform_bind_group_layout,
            quad_texture_bind_group_layout,
            single_texture_bind_group_layout,
            white_view,
            index_buffer,
            programs: Vec::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            vertex_snapshots: HashMap::new(),
            screen_view,
            _screen_texture: screen_texture,
            screen_size: size,
            next_buffer: 0,
            next_texture: 0,
            next_framebuffer: 0,
            passes: Vec::new(),
            current_target: None,
            bound_program: None,
            staged_uniforms: Vec::new(),
            bound_textures: Vec::new(),
            scissor: None,
        }
    }

    fn current_pass(&mut self) -> &mut PendingPass {
        if self.passes.is_empty() {
            let target = self.current_target;
            self.passes.push(PendingPass::new(target));
        }
        self.passes.last_mut().expect("pushed above")
    }

    fn target_size(&self, target: Option<FramebufferId>) -> (u32, u32) {
        match target {
            Some(framebuffer) => self
                .framebuffers
                .get(&framebuffer)
                .map(|entry| (entry.width, entry.height))
                .unwrap_or(self.screen_size),
            None => self.screen_size,
        }
    }

    fn encode_passes(&mut self) {
        let passes = std::mem::take(&mut self.passes);
        if passes.iter().all(PendingPass::is_empty) {
            return;
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        for pass in &passes {
            if pass.is_empty() {
                continue;
            }
            let view = match pass.target {
                Some(framebuffer) => match self.framebuffers.get(&framebuffer) {
                    Some(entry) => entry.view.clone(),
                    None => continue,
                },
                None => self.screen_view.clone(),
            };
            let (target_width, target_height) = self.target_size(pass.target);
            let load = match pass.clear {
                Some(color) => wgpu::LoadOp::Clear(color),
                None => wgpu::LoadOp::Load,
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: None,
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some((x, y, width, height)) = pass.viewport {
                render_pass.set_viewport(
                    x as f32,
                    y as f32,
                    width.min(target_width) as f32,
                    height.min(target_height) as f32,
                    0.0,
                    1.0,
                );
            }

            let mut current_pipeline: Option<ProgramId> = None;
            for draw in &pass.draws {
                let Some(program) = self.programs.get(draw.program.0 as usize) else {
                    continue;
                };
                if current_pipeline != Some(draw.program) {
                    render_pass.set_pipeline(&program.pipeline);
                    current_pipeline = Some(draw.program);
                }

                match gl_scissor_to_wgpu(draw.scissor, target_width, target_height) {
                    Some((x, y, width, height)) => {
                        render_pass.set_scissor_rect(x, y, width, height)
                    }
                    None => render_pass.set_scissor_rect(0, 0, target_width, target_height),
                }

                let uniform_buffer =
                    self.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: None,
                            contents: &draw.uniform_bytes,
                            usage: wgpu::BufferUsages::UNIFORM,
                        });
                let uniform_bind_group =
                    self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: None,
                        layout: &self.uniform_bind_group_layout,
                        entries: &[wgpu::BindGroupEntry {
                            binding: 0,
                            resource: uniform_buffer.as_entire_binding(),
                        }],
                    });

                let texture_layout = if program.texture_count == 1 {
                    &self.single_texture_bind_group_layout
                } else {
                    &self.quad_texture_bind_group_layout
                };
                let mut entries = vec![wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                }];
                let views: Vec<&wgpu::TextureView> = (0..program.texture_count as usize)
                    .map(|unit| {
                        draw.textures
                            .get(unit)
                            .and_then(|slot| slot.as_deref())
                            .unwrap_or(&self.white_view)
                    })
                    .collect();
                for (unit, view) in views.iter().enumerate() {
                    entries.push(wgpu::BindGroupEntry {
                        binding: unit as u32 + 1,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                }
                let texture_bind_group =
                    self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: None,
                        layout: texture_layout,
                        entries: &entries,
                    });

                render_pass.set_bind_group(0, &uniform_bind_group, &[]);
                render_pass.set_bind_group(1, &texture_bind_group, &[]);
                render_pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
                render_pass
                    .set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                render_pass.draw_indexed(
                    draw.first_index..draw.first_index + draw.index_count,
                    0,
                    0..1,
                );
            }
            drop(render_pass);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl GpuDevice for WgpuDevice {
    fn capabilities(&self) -> GpuCapabilities {
        self.capabilities
    }

    fn create_vertex_buffer(&mut self, _byte_capacity: usize) -> GpuBufferId {
        let id = GpuBufferId(self.next_buffer);
        self.next_buffer += 1;
        id
    }

    fn upload_vertices(&mut self, buffer: GpuBufferId, bytes: &[u8]) {
        // Snapshot per upload: draws recorded against earlier contents keep
        // their buffer even if the caller rewinds and refills the arena.
        let snapshot = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytes,
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.vertex_snapshots.insert(buffer, Arc::new(snapshot));
    }

    fn create_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> GpuTextureId {
        let id = GpuTextureId(self.next_texture);
        self.next_texture += 1;
        let texture = create_rgba_texture(&self.device, &self.queue, width, height, pixels);
        let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        self.textures.insert(
            id,
            TextureEntry {
                _texture: texture,
                view,
            },
        );
        id
    }

    fn destroy_texture(&mut self, texture: GpuTextureId) {
        self.textures.remove(&texture);
    }

    fn create_program(&mut self, descriptor: &ShaderDescriptor) -> Result<ProgramId, ProgramError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&descriptor.name),
                source: wgpu::ShaderSource::Wgsl(descriptor.source.as_str().into()),
            });

        let texture_count = match descriptor.vertex_layout {
            VertexLayout::Quad => 4,
            VertexLayout::SdfGlyph => 1,
        };
        let texture_layout = if texture_count == 1 {
            &self.single_texture_bind_group_layout
        } else {
            &self.quad_texture_bind_group_layout
        };
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &[&self.uniform_bind_group_layout, texture_layout],
                push_constant_ranges: &[],
            });

        let vertex_attributes_quad = [
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            },
            wgpu::VertexAttribute {
                offset: 8,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x2,
            },
            wgpu::VertexAttribute {
                offset: 16,
                shader_location: 2,
                format: wgpu::VertexFormat::Unorm8x4,
            },
            wgpu::VertexAttribute {
                offset: 20,
                shader_location: 3,
                format: wgpu::VertexFormat::Float32,
            },
        ];
        let vertex_attributes_sdf = [
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x2,
            },
            wgpu::VertexAttribute {
                offset: 8,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x2,
            },
        ];
        let vertex_layout = match descriptor.vertex_layout {
            VertexLayout::Quad => wgpu::VertexBufferLayout {
                array_stride: VERTEX_STRIDE as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &vertex_attributes_quad,
            },
            VertexLayout::SdfGlyph => wgpu::VertexBufferLayout {
                array_stride: 16,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &vertex_attributes_sdf,
            },
        };

        // Premultiplied-alpha blending: ONE / ONE_MINUS_SRC_ALPHA.
        let blend = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&descriptor.name),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[vertex_layout],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        if let Some(error) = block_on_simple(self.device.pop_error_scope()) {
            return Err(ProgramError::ShaderCompileFailed {
                name: descriptor.name.clone(),
                message: error.to_string(),
            });
        }

        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(ProgramEntry {
            pipeline,
            uniform_slots: descriptor.uniform_slots().into_iter().collect(),
            uniform_block_bytes: descriptor.uniform_slot_count() as usize * 16,
            texture_count,
        });
        Ok(id)
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.bound_program = Some(program);
        let block_bytes = self
            .programs
            .get(program.0 as usize)
            .map(|entry| entry.uniform_block_bytes)
            .unwrap_or(0);
        self.staged_uniforms.clear();
        self.staged_uniforms.resize(block_bytes, 0);
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) -> bool {
        let Some(program) = self
            .bound_program
            .and_then(|id| self.programs.get(id.0 as usize))
        else {
            return false;
        };
        let Some(&slot) = program.uniform_slots.get(name) else {
            return false;
        };
        let offset = slot as usize * 16;
        let mut floats = [0.0f32; 8];
        let count = match value {
            UniformValue::Float(v) => {
                floats[0] = v;
                1
            }
            UniformValue::Int(v) => {
                // The uniform block convention is all-f32; integers are
                // widened and compared against 0.5 in shaders.
                floats[0] = v as f32;
                1
            }
            UniformValue::Vec2(v) => {
                floats[..2].copy_from_slice(&v);
                2
            }
            UniformValue::Vec4(v) => {
                floats[..4].copy_from_slice(&v);
                4
            }
            UniformValue::Mat3x2(v) => {
                // Two vec4 rows: [ta, tb, tx, 0] [tc, td, ty, 0].
                floats[0] = v[0];
                floats[1] = v[1];
                floats[2] = v[2];
                floats[4] = v[3];
                floats[5] = v[4];
                floats[6] = v[5];
                8
            }
        };
        let bytes: &[u8] = bytemuck::cast_slice(&floats[..count]);
        if offset + bytes.len() <= self.staged_uniforms.len() {
            self.staged_uniforms[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        true
    }

    fn bind_texture(&mut self, unit: u32, texture: GpuTextureId) {
        let unit = unit as usize;
        if self.bound_textures.len() <= unit {
            self.bound_textures.resize(unit + 1, None);
        }
        self.bound_textures[unit] = self.textures.get(&texture).map(|entry| entry.view.clone());
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.scissor = rect;
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> (FramebufferId, GpuTextureId) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("render_texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let texture_id = GpuTextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(
            texture_id,
            TextureEntry {
                _texture: texture,
                view: view.clone(),
            },
        );

        let framebuffer_id = FramebufferId(self.next_framebuffer);
        self.next_framebuffer += 1;
        self.framebuffers.insert(
            framebuffer_id,
            FramebufferEntry {
                view,
                width,
                height,
            },
        );
        (framebuffer_id, texture_id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if self.current_target == framebuffer && !self.passes.is_empty() {
            return;
        }
        self.current_target = framebuffer;
        self.passes.push(PendingPass::new(framebuffer));
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        let viewport = (x.max(0) as u32, y.max(0) as u32, width, height);
        self.current_pass().viewport = Some(viewport);
    }

    fn clear(&mut self, color: [f32; 4]) {
        let clear = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
        let target = self.current_target;
        let (has_draws, viewport) = {
            let pass = self.current_pass();
            (!pass.draws.is_empty(), pass.viewport)
        };
        if has_draws {
            let mut fresh = PendingPass::new(target);
            fresh.clear = Some(clear);
            fresh.viewport = viewport;
            self.passes.push(fresh);
        } else {
            self.current_pass().clear = Some(clear);
        }
    }

    fn draw_quads(&mut self, vertex_buffer: GpuBufferId, first_quad: u32, quad_count: u32) {
        if first_quad + quad_count > MAX_INDEXED_QUADS {
            log::warn!(
                "draw of quads {first_quad}..{} exceeds the 16-bit index space; clamped",
                first_quad + quad_count
            );
        }
        let last_quad = (first_quad + quad_count).min(MAX_INDEXED_QUADS);
        if first_quad >= last_quad {
            return;
        }
        let Some(snapshot) = self.vertex_snapshots.get(&vertex_buffer).cloned() else {
            log::warn!("draw against vertex buffer {vertex_buffer:?} with no uploaded data");
            return;
        };
        let Some(program) = self.bound_program else {
            return;
        };
        let draw = DrawOp {
            program,
            uniform_bytes: self.staged_uniforms.clone(),
            textures: self.bound_textures.clone(),
            scissor: self.scissor,
            vertex_buffer: snapshot,
            first_index: first_quad * 6,
            index_count: (last_quad - first_quad) * 6,
        };
        self.current_pass().draws.push(draw);
    }

    fn begin_frame(&mut self) {
        self.passes.clear();
        self.current_target = None;
        self.bound_program = None;
        self.bound_textures.clear();
        self.scissor = None;
    }

    fn end_frame(&mut self) {
        self.encode_passes();
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn create_texture_bind_group_layout(device: &wgpu::Device, textures: u32) -> wgpu::BindGroupLayout {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }];
    for unit in 0..textures {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: unit + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: None,
        entries: &entries,
    })
}

fn create_rgba_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> wgpu::Texture {
    let extent = wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: None,
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    if pixels.len() as u64 >= u64::from(width) * u64::from(height) * 4 && width > 0 && height > 0 {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            extent,
        );
    }
    texture
}

/// Shared `u16` index pattern: `(4k, 4k+1, 4k+2, 4k+2, 4k+1, 4k+3)`.
fn create_quad_index_buffer(device: &wgpu::Device, quads: u32) -> wgpu::Buffer {
    let mut indices: Vec<u16> = Vec::with_capacity(quads as usize * 6);
    for quad in 0..quads {
        let base = (quad * 4) as u16;
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
    }
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("quad_indices"),
        contents: bytemuck::cast_slice(&indices),
        usage: wgpu::BufferUsages::INDEX,
    })
}

/// Converts the interface's bottom-origin GL scissor into wgpu's top-origin
/// rect, clamped to the attachment.
fn gl_scissor_to_wgpu(
    scissor: Option<ScissorRect>,
    target_width: u32,
    target_height: u32,
) -> Option<(u32, u32, u32, u32)> {
    let rect = scissor?;
    let x = rect.x.max(0) as u32;
    let flipped_y = target_height as i32 - rect.y - rect.height as i32;
    let y = flipped_y.max(0) as u32;
    let x = x.min(target_width);
    let y = y.min(target_height);
    let width = rect.width.min(target_width - x);
    let height = rect.height.min(target_height - y);
    Some((x, y, width, height))
}

/// Minimal executor for wgpu's error-scope future; validation resolves
/// synchronously on native backends.
fn block_on_simple<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);
    let waker = Waker::noop();
    let mut context = Context::from_waker(waker);
    loop {
        match future.as_mut().poll(&mut context) {
            Poll::Ready(output) => return output,
            Poll::Pending => std::thread::yield_now(),
        }
    }
}
