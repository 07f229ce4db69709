#![forbid(unsafe_code)]

//! GPU backend seam.
//!
//! The frame controller drives a [`RenderBackend`]; the wgpu implementation
//! lives in `gpu` and [`HeadlessBackend`] records the same command stream in
//! memory, keeping a CPU copy of the atlas texture.

use bytemuck::{Pod, Zeroable};

use crate::error::{RenderError, ShaderError};
use crate::geometry::{GlyphVertex, PixelSize, QUAD_VERTICES};
use crate::glyph_atlas::{AtlasRect, AtlasUpload};
use crate::shader::{ProgramCompiler, ProgramFamily, ValidatedProgram};

/// Frame uniform block, bit-exact with the WGSL `FrameUniforms` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub intensity: f32,
    pub speed: f32,
    pub _pad: [f32; 3],
}

impl FrameUniforms {
    #[must_use]
    pub fn new(resolution: PixelSize, time: f32, intensity: f32, speed: f32) -> Self {
        Self {
            resolution: [resolution.width as f32, resolution.height as f32],
            time,
            intensity,
            speed,
            _pad: [0.0; 3],
        }
    }
}

/// Passes for one frame, chosen once before any GPU work.
#[derive(Debug)]
pub enum RenderPlan<'a, P> {
    /// Scene program draws glyphs straight into the surface.
    DirectToSurface { scene: &'a P },
    /// Scene into the offscreen target, then a full-screen post pass.
    SceneThenPost { scene: &'a P, post: &'a P },
}

impl<P> RenderPlan<'_, P> {
    #[must_use]
    pub const fn passes(&self) -> usize {
        match self {
            Self::DirectToSurface { .. } => 1,
            Self::SceneThenPost { .. } => 2,
        }
    }
}

/// GPU operations the frame controller needs.
///
/// Every pass clears its target to transparent and blends premultiplied
/// (`ONE, ONE_MINUS_SRC_ALPHA`). Texture unit 0 is the atlas for the scene
/// pass and the offscreen target for the post pass.
pub trait RenderBackend: ProgramCompiler {
    /// Reconfigure the visible surface.
    fn resize_surface(&mut self, size: PixelSize);

    /// Apply queued atlas writes in order.
    fn apply_atlas_uploads(&mut self, uploads: Vec<AtlasUpload>) -> Result<(), RenderError>;

    /// Replace the glyph vertex buffer contents.
    fn upload_vertices(&mut self, vertices: &[GlyphVertex]) -> Result<(), RenderError>;

    /// Make sure an offscreen colour target of exactly `size` exists.
    fn ensure_offscreen_target(&mut self, size: PixelSize) -> Result<(), RenderError>;

    /// Free the offscreen target, if any.
    fn release_offscreen_target(&mut self);

    /// Record and submit the passes of `plan`.
    fn render(
        &mut self,
        plan: RenderPlan<'_, Self::Program>,
        uniforms: &FrameUniforms,
        vertex_count: u32,
    ) -> Result<(), RenderError>;

    /// Release every GPU resource held by the backend.
    fn dispose(&mut self);
}

// ---------------------------------------------------------------------------
// Headless backend
// ---------------------------------------------------------------------------

/// Program object of the headless backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessProgram {
    pub id: u64,
    pub family: ProgramFamily,
    pub vertex_entry: String,
    pub fragment_entry: String,
}

/// Render target of a recorded draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    Surface,
    Offscreen,
}

/// Texture bound to unit 0 for a recorded draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSource {
    Atlas,
    Offscreen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub program: u64,
    pub target: DrawTarget,
    pub source: DrawSource,
    pub vertex_count: u32,
    pub uniforms: FrameUniforms,
}

/// Everything the headless backend was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    ResizeSurface(PixelSize),
    AtlasClear,
    AtlasRegion(AtlasRect),
    UploadVertices(usize),
    AllocateOffscreen(PixelSize),
    ReleaseOffscreen,
    Draw(RecordedDraw),
    Dispose,
}

/// In-memory backend for tests and tooling.
#[derive(Debug)]
pub struct HeadlessBackend {
    atlas_width: u32,
    atlas_height: u32,
    atlas: Vec<u8>,
    max_target_size: u32,
    surface: PixelSize,
    offscreen: Option<PixelSize>,
    vertices: Vec<GlyphVertex>,
    next_program: u64,
    calls: Vec<BackendCall>,
}

impl HeadlessBackend {
    /// Default per-axis texture limit, matching common WebGL2/wgpu defaults.
    pub const DEFAULT_MAX_TARGET_SIZE: u32 = 8192;

    #[must_use]
    pub fn new(atlas_width: u32, atlas_height: u32) -> Self {
        Self {
            atlas_width,
            atlas_height,
            atlas: vec![0; (atlas_width as usize) * (atlas_height as usize) * 4],
            max_target_size: Self::DEFAULT_MAX_TARGET_SIZE,
            surface: PixelSize::default(),
            offscreen: None,
            vertices: Vec::new(),
            next_program: 0,
            calls: Vec::new(),
        }
    }

    /// Offscreen allocations larger than `max` per axis fail.
    #[must_use]
    pub fn with_max_target_size(mut self, max: u32) -> Self {
        self.max_target_size = max;
        self
    }

    #[must_use]
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    /// Draws recorded so far.
    pub fn draws(&self) -> impl Iterator<Item = &RecordedDraw> {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    #[must_use]
    pub fn surface_size(&self) -> PixelSize {
        self.surface
    }

    #[must_use]
    pub fn offscreen_size(&self) -> Option<PixelSize> {
        self.offscreen
    }

    /// Last uploaded glyph vertices.
    #[must_use]
    pub fn vertices(&self) -> &[GlyphVertex] {
        &self.vertices
    }

    /// Premultiplied RGBA texel of the atlas copy; transparent out of bounds.
    #[must_use]
    pub fn atlas_texel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.atlas_width || y >= self.atlas_height {
            return [0; 4];
        }
        let i = ((y as usize) * (self.atlas_width as usize) + (x as usize)) * 4;
        [
            self.atlas[i],
            self.atlas[i + 1],
            self.atlas[i + 2],
            self.atlas[i + 3],
        ]
    }

    fn write_region(&mut self, rect: AtlasRect, pixels: &[u8]) -> Result<(), RenderError> {
        let expected = (rect.w as usize) * (rect.h as usize) * 4;
        if rect.right() > self.atlas_width
            || rect.bottom() > self.atlas_height
            || pixels.len() != expected
        {
            return Err(RenderError::ResourceCreation(format!(
                "atlas upload {}x{} at ({}, {}) does not fit the {}x{} texture",
                rect.w, rect.h, rect.x, rect.y, self.atlas_width, self.atlas_height
            )));
        }
        let row_bytes = (rect.w as usize) * 4;
        for row in 0..rect.h as usize {
            let dst = (((rect.y as usize) + row) * (self.atlas_width as usize) + rect.x as usize) * 4;
            let src = row * row_bytes;
            self.atlas[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }
        Ok(())
    }

    fn draw(
        &mut self,
        program: &HeadlessProgram,
        target: DrawTarget,
        source: DrawSource,
        vertex_count: u32,
        uniforms: &FrameUniforms,
    ) {
        self.calls.push(BackendCall::Draw(RecordedDraw {
            program: program.id,
            target,
            source,
            vertex_count,
            uniforms: *uniforms,
        }));
    }
}

impl ProgramCompiler for HeadlessBackend {
    type Program = HeadlessProgram;

    fn link(&mut self, program: &ValidatedProgram) -> Result<HeadlessProgram, ShaderError> {
        self.next_program += 1;
        Ok(HeadlessProgram {
            id: self.next_program,
            family: program.family,
            vertex_entry: program.vertex.entry_point.clone(),
            fragment_entry: program.fragment.entry_point.clone(),
        })
    }
}

impl RenderBackend for HeadlessBackend {
    fn resize_surface(&mut self, size: PixelSize) {
        self.surface = size;
        self.calls.push(BackendCall::ResizeSurface(size));
    }

    fn apply_atlas_uploads(&mut self, uploads: Vec<AtlasUpload>) -> Result<(), RenderError> {
        for upload in uploads {
            match upload {
                AtlasUpload::Clear => {
                    self.atlas.fill(0);
                    self.calls.push(BackendCall::AtlasClear);
                }
                AtlasUpload::Region { rect, pixels } => {
                    self.write_region(rect, &pixels)?;
                    self.calls.push(BackendCall::AtlasRegion(rect));
                }
            }
        }
        Ok(())
    }

    fn upload_vertices(&mut self, vertices: &[GlyphVertex]) -> Result<(), RenderError> {
        self.vertices.clear();
        self.vertices.extend_from_slice(vertices);
        self.calls.push(BackendCall::UploadVertices(vertices.len()));
        Ok(())
    }

    fn ensure_offscreen_target(&mut self, size: PixelSize) -> Result<(), RenderError> {
        if self.offscreen == Some(size) {
            return Ok(());
        }
        if size.is_empty() || size.width > self.max_target_size || size.height > self.max_target_size
        {
            self.offscreen = None;
            return Err(RenderError::FramebufferIncomplete {
                width: size.width,
                height: size.height,
                reason: format!("exceeds the {} px texture limit", self.max_target_size),
            });
        }
        self.offscreen = Some(size);
        self.calls.push(BackendCall::AllocateOffscreen(size));
        Ok(())
    }

    fn release_offscreen_target(&mut self) {
        if self.offscreen.take().is_some() {
            self.calls.push(BackendCall::ReleaseOffscreen);
        }
    }

    fn render(
        &mut self,
        plan: RenderPlan<'_, HeadlessProgram>,
        uniforms: &FrameUniforms,
        vertex_count: u32,
    ) -> Result<(), RenderError> {
        match plan {
            RenderPlan::DirectToSurface { scene } => {
                self.draw(scene, DrawTarget::Surface, DrawSource::Atlas, vertex_count, uniforms);
            }
            RenderPlan::SceneThenPost { scene, post } => {
                if self.offscreen != Some(self.surface) {
                    return Err(RenderError::FramebufferIncomplete {
                        width: self.surface.width,
                        height: self.surface.height,
                        reason: "offscreen target does not match the surface".to_string(),
                    });
                }
                self.draw(scene, DrawTarget::Offscreen, DrawSource::Atlas, vertex_count, uniforms);
                self.draw(
                    post,
                    DrawTarget::Surface,
                    DrawSource::Offscreen,
                    QUAD_VERTICES as u32,
                    uniforms,
                );
            }
        }
        Ok(())
    }

    fn dispose(&mut self) {
        self.offscreen = None;
        self.vertices.clear();
        self.atlas.fill(0);
        self.calls.push(BackendCall::Dispose);
    }
}
