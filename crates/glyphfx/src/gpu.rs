#![forbid(unsafe_code)]

//! wgpu implementation of [`RenderBackend`].
//!
//! One bind group layout serves both families: frame uniforms at binding 0,
//! the unit-0 texture at binding 1 and a filtering sampler at binding 2. The
//! scene pass binds the glyph atlas, the post pass binds the offscreen target.
//! Both pipelines blend premultiplied alpha into the surface format.

use std::borrow::Cow;

use wgpu::util::DeviceExt;

use crate::backend::{FrameUniforms, RenderBackend, RenderPlan};
use crate::error::{RenderError, ShaderError};
use crate::geometry::{GlyphVertex, PixelSize, PostVertex, QUAD_VERTICES, fullscreen_quad};
use crate::glyph_atlas::AtlasUpload;
use crate::shader::{ProgramCompiler, ProgramFamily, StageSource, ValidatedProgram};

const SCENE_ATTRIBUTES: [wgpu::VertexAttribute; 4] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32x4, 3 => Float32x4];
const POST_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

const ATLAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Minimum vertex buffer capacity (in vertices), roughly one line of text.
const MIN_VERTEX_CAPACITY: usize = 64 * QUAD_VERTICES;

/// Linked pipeline for one registry entry.
#[derive(Debug)]
pub struct WgpuProgram {
    pub family: ProgramFamily,
    pipeline: wgpu::RenderPipeline,
}

struct AtlasTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

struct OffscreenTarget {
    size: PixelSize,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
}

/// Surface-backed wgpu renderer.
pub struct WgpuBackend<'window> {
    surface: wgpu::Surface<'window>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    vertex_capacity: usize,
    quad_buffer: wgpu::Buffer,
    atlas_width: u32,
    atlas_height: u32,
    atlas: AtlasTexture,
    offscreen: Option<OffscreenTarget>,
}

impl std::fmt::Debug for WgpuBackend<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("format", &self.surface_config.format)
            .field("width", &self.surface_config.width)
            .field("height", &self.surface_config.height)
            .field("atlas", &(self.atlas_width, self.atlas_height))
            .field("vertex_capacity", &self.vertex_capacity)
            .field("offscreen", &self.offscreen.as_ref().map(|t| t.size))
            .finish_non_exhaustive()
    }
}

impl<'window> WgpuBackend<'window> {
    /// Create device, surface and static resources.
    ///
    /// Fails with [`RenderError::ResourceCreation`] when no adapter or device is
    /// available or the atlas exceeds the device texture limit.
    pub async fn new(
        target: impl Into<wgpu::SurfaceTarget<'window>>,
        size: PixelSize,
        atlas_width: u32,
        atlas_height: u32,
    ) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(target)
            .map_err(|e| RenderError::ResourceCreation(format!("surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RenderError::ResourceCreation(format!("adapter: {e}")))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("glyphfx"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                ..Default::default()
            })
            .await
            .map_err(|e| RenderError::ResourceCreation(format!("device: {e}")))?;

        let max_dim = device.limits().max_texture_dimension_2d;
        if atlas_width > max_dim || atlas_height > max_dim {
            return Err(RenderError::ResourceCreation(format!(
                "atlas {atlas_width}x{atlas_height} exceeds the device limit of {max_dim}"
            )));
        }

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .first()
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);
        let alpha_mode = if caps
            .alpha_modes
            .contains(&wgpu::CompositeAlphaMode::PreMultiplied)
        {
            wgpu::CompositeAlphaMode::PreMultiplied
        } else {
            caps.alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto)
        };
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("glyphfx_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<FrameUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("glyphfx_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("glyphfx_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glyphfx_uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let vertex_buffer = create_vertex_buffer(&device, MIN_VERTEX_CAPACITY);
        let quad_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("glyphfx_fullscreen_quad"),
            contents: bytemuck::cast_slice(&fullscreen_quad()),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let atlas = create_atlas(
            &device,
            &bind_group_layout,
            &uniform_buffer,
            &sampler,
            atlas_width,
            atlas_height,
        );

        tracing::info!(
            ?format,
            ?alpha_mode,
            width = surface_config.width,
            height = surface_config.height,
            atlas_width,
            atlas_height,
            "wgpu backend initialized"
        );

        Ok(Self {
            surface,
            device,
            queue,
            surface_config,
            bind_group_layout,
            pipeline_layout,
            sampler,
            uniform_buffer,
            vertex_buffer,
            vertex_capacity: MIN_VERTEX_CAPACITY,
            quad_buffer,
            atlas_width,
            atlas_height,
            atlas,
            offscreen: None,
        })
    }

    /// [`WgpuBackend::new`] driven to completion on the current thread.
    ///
    /// Native only; on the web the future must be awaited.
    pub fn new_blocking(
        target: impl Into<wgpu::SurfaceTarget<'window>>,
        size: PixelSize,
        atlas_width: u32,
        atlas_height: u32,
    ) -> Result<Self, RenderError> {
        pollster::block_on(Self::new(target, size, atlas_width, atlas_height))
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    #[must_use]
    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_config.format
    }

    fn shader_module(&self, label: &str, stage: &StageSource) -> wgpu::ShaderModule {
        self.device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(stage.source.as_str())),
            })
    }

    fn bind_group(&self, label: &str, view: &wgpu::TextureView) -> wgpu::BindGroup {
        texture_bind_group(
            &self.device,
            &self.bind_group_layout,
            &self.uniform_buffer,
            &self.sampler,
            label,
            view,
        )
    }
}

fn create_vertex_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("glyphfx_vertices"),
        size: (capacity * std::mem::size_of::<GlyphVertex>()) as u64,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniforms: &wgpu::Buffer,
    sampler: &wgpu::Sampler,
    label: &str,
    view: &wgpu::TextureView,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn create_atlas(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniforms: &wgpu::Buffer,
    sampler: &wgpu::Sampler,
    width: u32,
    height: u32,
) -> AtlasTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("glyphfx_atlas"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: ATLAS_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let bind_group = texture_bind_group(device, layout, uniforms, sampler, "glyphfx_atlas_bind_group", &view);
    AtlasTexture {
        texture,
        bind_group,
    }
}

fn begin_clear_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    })
}

/// Scene pass commands shared by both plans.
struct SceneDraw<'a> {
    bind_group: &'a wgpu::BindGroup,
    vertices: &'a wgpu::Buffer,
    vertex_count: u32,
}

impl SceneDraw<'_> {
    fn record(&self, pass: &mut wgpu::RenderPass<'_>, scene: &WgpuProgram) {
        if self.vertex_count == 0 {
            return;
        }
        let bytes = u64::from(self.vertex_count) * std::mem::size_of::<GlyphVertex>() as u64;
        pass.set_pipeline(&scene.pipeline);
        pass.set_bind_group(0, self.bind_group, &[]);
        pass.set_vertex_buffer(0, self.vertices.slice(..bytes));
        pass.draw(0..self.vertex_count, 0..1);
    }
}

impl ProgramCompiler for WgpuBackend<'_> {
    type Program = WgpuProgram;

    fn link(&mut self, program: &ValidatedProgram) -> Result<WgpuProgram, ShaderError> {
        let (stride, attributes): (usize, &[wgpu::VertexAttribute]) = match program.family {
            ProgramFamily::Scene => (std::mem::size_of::<GlyphVertex>(), &SCENE_ATTRIBUTES),
            ProgramFamily::Post => (std::mem::size_of::<PostVertex>(), &POST_ATTRIBUTES),
        };
        let vs = self.shader_module("glyphfx_vs", &program.vertex);
        let fs = self.shader_module("glyphfx_fs", &program.fragment);

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("glyphfx_pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vs,
                    entry_point: Some(program.vertex.entry_point.as_str()),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: stride as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes,
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fs,
                    entry_point: Some(program.fragment.entry_point.as_str()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.surface_config.format,
                        blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });

        Ok(WgpuProgram {
            family: program.family,
            pipeline,
        })
    }
}

impl RenderBackend for WgpuBackend<'_> {
    fn resize_surface(&mut self, size: PixelSize) {
        self.surface_config.width = size.width.max(1);
        self.surface_config.height = size.height.max(1);
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn apply_atlas_uploads(&mut self, uploads: Vec<AtlasUpload>) -> Result<(), RenderError> {
        for upload in uploads {
            match upload {
                AtlasUpload::Clear => {
                    self.atlas.texture.destroy();
                    self.atlas = create_atlas(
                        &self.device,
                        &self.bind_group_layout,
                        &self.uniform_buffer,
                        &self.sampler,
                        self.atlas_width,
                        self.atlas_height,
                    );
                }
                AtlasUpload::Region { rect, pixels } => {
                    if rect.right() > self.atlas_width || rect.bottom() > self.atlas_height {
                        return Err(RenderError::ResourceCreation(format!(
                            "atlas upload at ({}, {}) overruns the {}x{} texture",
                            rect.x, rect.y, self.atlas_width, self.atlas_height
                        )));
                    }
                    self.queue.write_texture(
                        wgpu::TexelCopyTextureInfo {
                            texture: &self.atlas.texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d {
                                x: rect.x,
                                y: rect.y,
                                z: 0,
                            },
                            aspect: wgpu::TextureAspect::All,
                        },
                        &pixels,
                        wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(rect.w * 4),
                            rows_per_image: Some(rect.h),
                        },
                        wgpu::Extent3d {
                            width: rect.w,
                            height: rect.h,
                            depth_or_array_layers: 1,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn upload_vertices(&mut self, vertices: &[GlyphVertex]) -> Result<(), RenderError> {
        if vertices.len() > self.vertex_capacity {
            let capacity = vertices.len().next_power_of_two();
            tracing::debug!(
                from = self.vertex_capacity,
                to = capacity,
                "growing vertex buffer"
            );
            self.vertex_buffer.destroy();
            self.vertex_buffer = create_vertex_buffer(&self.device, capacity);
            self.vertex_capacity = capacity;
        }
        if !vertices.is_empty() {
            self.queue
                .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(vertices));
        }
        Ok(())
    }

    fn ensure_offscreen_target(&mut self, size: PixelSize) -> Result<(), RenderError> {
        if self.offscreen.as_ref().is_some_and(|t| t.size == size) {
            return Ok(());
        }
        let max_dim = self.device.limits().max_texture_dimension_2d;
        if size.is_empty() || size.width > max_dim || size.height > max_dim {
            self.release_offscreen_target();
            return Err(RenderError::FramebufferIncomplete {
                width: size.width,
                height: size.height,
                reason: format!("colour attachment must be 1..={max_dim} px per side"),
            });
        }
        self.release_offscreen_target();
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("glyphfx_offscreen"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.surface_config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.bind_group("glyphfx_offscreen_bind_group", &view);
        tracing::debug!(width = size.width, height = size.height, "allocated offscreen target");
        self.offscreen = Some(OffscreenTarget {
            size,
            texture,
            view,
            bind_group,
        });
        Ok(())
    }

    fn release_offscreen_target(&mut self) {
        if let Some(target) = self.offscreen.take() {
            target.texture.destroy();
        }
    }

    fn render(
        &mut self,
        plan: RenderPlan<'_, WgpuProgram>,
        uniforms: &FrameUniforms,
        vertex_count: u32,
    ) -> Result<(), RenderError> {
        let surface_size = PixelSize::new(self.surface_config.width, self.surface_config.height);
        if matches!(plan, RenderPlan::SceneThenPost { .. })
            && self.offscreen.as_ref().is_none_or(|t| t.size != surface_size)
        {
            return Err(RenderError::FramebufferIncomplete {
                width: surface_size.width,
                height: surface_size.height,
                reason: "offscreen target does not match the surface".to_string(),
            });
        }

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(err) => {
                if matches!(err, wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) {
                    self.surface.configure(&self.device, &self.surface_config);
                }
                return Err(RenderError::Surface(err.to_string()));
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyphfx_frame"),
            });

        let scene_draw = SceneDraw {
            bind_group: &self.atlas.bind_group,
            vertices: &self.vertex_buffer,
            vertex_count,
        };

        match plan {
            RenderPlan::DirectToSurface { scene } => {
                let mut pass = begin_clear_pass(&mut encoder, "glyphfx_scene", &view);
                scene_draw.record(&mut pass, scene);
            }
            RenderPlan::SceneThenPost { scene, post } => {
                let Some(target) = self.offscreen.as_ref() else {
                    return Err(RenderError::FramebufferIncomplete {
                        width: surface_size.width,
                        height: surface_size.height,
                        reason: "offscreen target missing".to_string(),
                    });
                };
                {
                    let mut pass = begin_clear_pass(&mut encoder, "glyphfx_scene", &target.view);
                    scene_draw.record(&mut pass, scene);
                }
                let mut pass = begin_clear_pass(&mut encoder, "glyphfx_post", &view);
                pass.set_pipeline(&post.pipeline);
                pass.set_bind_group(0, &target.bind_group, &[]);
                pass.set_vertex_buffer(0, self.quad_buffer.slice(..));
                pass.draw(0..QUAD_VERTICES as u32, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn dispose(&mut self) {
        self.release_offscreen_target();
        self.atlas.texture.destroy();
        self.vertex_buffer.destroy();
        self.quad_buffer.destroy();
        self.uniform_buffer.destroy();
        tracing::info!("wgpu backend disposed");
    }
}
