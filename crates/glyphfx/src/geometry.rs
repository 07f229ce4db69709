#![forbid(unsafe_code)]

//! Glyph placements → interleaved quad vertices.
//!
//! Every quad is two triangles, six vertices, no index buffer. Positions are
//! emitted in normalized device coordinates with the canvas origin at the
//! top-left.

use bytemuck::{Pod, Zeroable};

use crate::error::AtlasError;
use crate::glyph_atlas::{CachedGlyph, GlyphAtlas, UvRect};
use crate::layout::GlyphPlacement;
use crate::raster::GlyphRasterizer;
use crate::style::Rgba;

const MIN_DPR: f32 = 0.25;
const MAX_DPR: f32 = 8.0;

/// Boxes at most this wide (layout px) get no debug outline.
pub const MIN_DEBUG_BOX_WIDTH: f32 = 1.0;

/// Tint of debug outlines.
pub const DEBUG_BOX_COLOR: Rgba = Rgba::new(1.0, 0.0, 1.0, 0.75);

/// Vertices per quad.
pub const QUAD_VERTICES: usize = 6;

/// Corner order of the two triangles making up a quad.
const QUAD_CORNERS: [(f32, f32); QUAD_VERTICES] = [
    (0.0, 0.0),
    (1.0, 0.0),
    (0.0, 1.0),
    (1.0, 0.0),
    (1.0, 1.0),
    (0.0, 1.0),
];

fn normalized_scale(value: f32, fallback: f32, min: f32, max: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Clamp a device pixel ratio to a usable range; non-finite or non-positive
/// values become 1.
#[must_use]
pub fn normalize_pixel_ratio(dpr: f32) -> f32 {
    normalized_scale(dpr, 1.0, MIN_DPR, MAX_DPR)
}

/// Canvas size in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Host element size in CSS pixels plus its device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub css_width: f32,
    pub css_height: f32,
    pub device_pixel_ratio: f32,
}

impl Viewport {
    #[must_use]
    pub const fn new(css_width: f32, css_height: f32, device_pixel_ratio: f32) -> Self {
        Self {
            css_width,
            css_height,
            device_pixel_ratio,
        }
    }

    #[must_use]
    pub fn pixel_ratio(&self) -> f32 {
        normalize_pixel_ratio(self.device_pixel_ratio)
    }

    /// Backing store size: `round(css * dpr)` per axis.
    #[must_use]
    pub fn pixel_size(&self) -> PixelSize {
        let dpr = self.pixel_ratio();
        let scale = |css: f32| {
            if css.is_finite() && css > 0.0 {
                (css * dpr).round() as u32
            } else {
                0
            }
        };
        PixelSize::new(scale(self.css_width), scale(self.css_height))
    }
}

/// Device pixel → normalized device coordinates, y flipped.
#[must_use]
pub fn to_ndc(px: f32, py: f32, size: PixelSize) -> [f32; 2] {
    let w = size.width.max(1) as f32;
    let h = size.height.max(1) as f32;
    [(px / w) * 2.0 - 1.0, 1.0 - (py / h) * 2.0]
}

/// Scene-pass vertex. Matches attribute locations 0..=3.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlyphVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
    /// Full UV rect of the source cell: xy = min, zw = max.
    pub uv_bounds: [f32; 4],
}

/// Post-pass vertex. Matches attribute locations 0..=1.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PostVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Full-screen quad for the post pass; texture origin at the top-left.
#[must_use]
pub fn fullscreen_quad() -> [PostVertex; QUAD_VERTICES] {
    QUAD_CORNERS.map(|(cx, cy)| PostVertex {
        position: [cx * 2.0 - 1.0, 1.0 - cy * 2.0],
        uv: [cx, cy],
    })
}

/// Counts from the last build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeometryStats {
    pub placements: usize,
    pub glyph_quads: usize,
    pub debug_quads: usize,
    pub empty_placements: usize,
}

impl GeometryStats {
    #[must_use]
    pub const fn quads(&self) -> usize {
        self.glyph_quads + self.debug_quads
    }

    #[must_use]
    pub const fn vertex_count(&self) -> usize {
        self.quads() * QUAD_VERTICES
    }
}

/// Reusable vertex builder; keeps its buffer between frames.
#[derive(Debug, Default)]
pub struct GeometryBuilder {
    vertices: Vec<GlyphVertex>,
    stats: GeometryStats,
}

impl GeometryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn vertices(&self) -> &[GlyphVertex] {
        &self.vertices
    }

    #[must_use]
    pub fn stats(&self) -> GeometryStats {
        self.stats
    }

    /// Rebuild the vertex list for `placements`.
    ///
    /// On error the previous contents are left in place.
    pub fn build<R: GlyphRasterizer>(
        &mut self,
        atlas: &mut GlyphAtlas<R>,
        placements: &[GlyphPlacement],
        canvas: PixelSize,
        pixel_ratio: f32,
        debug_boxes: bool,
    ) -> Result<&[GlyphVertex], AtlasError> {
        let ratio = normalize_pixel_ratio(pixel_ratio);
        let mut out = Vec::with_capacity(placements.len() * QUAD_VERTICES);
        let mut stats = GeometryStats {
            placements: placements.len(),
            ..GeometryStats::default()
        };

        for placement in placements {
            match atlas.get_glyph(&placement.style, placement.ch, ratio)? {
                CachedGlyph::Empty => stats.empty_placements += 1,
                CachedGlyph::Glyph(glyph) => {
                    let x = placement.baseline_x * ratio - glyph.baseline_x;
                    let y = placement.baseline_y * ratio - glyph.baseline_y;
                    push_quad(
                        &mut out,
                        canvas,
                        [x, y, glyph.width as f32, glyph.height as f32],
                        glyph.uv,
                        glyph.uv,
                        placement.color,
                    );
                    stats.glyph_quads += 1;
                }
            }

            if debug_boxes && placement.box_w > MIN_DEBUG_BOX_WIDTH {
                push_box_outline(&mut out, canvas, placement, ratio, atlas.white_uv());
                stats.debug_quads += 4;
            }
        }

        tracing::trace!(
            glyph_quads = stats.glyph_quads,
            debug_quads = stats.debug_quads,
            vertices = out.len(),
            "built glyph geometry"
        );
        self.vertices = out;
        self.stats = stats;
        Ok(&self.vertices)
    }
}

fn push_quad(
    out: &mut Vec<GlyphVertex>,
    canvas: PixelSize,
    [x, y, w, h]: [f32; 4],
    uv: UvRect,
    bounds: UvRect,
    color: Rgba,
) {
    let color = color.to_array();
    let uv_bounds = bounds.to_array();
    for (cx, cy) in QUAD_CORNERS {
        out.push(GlyphVertex {
            position: to_ndc(x + cx * w, y + cy * h, canvas),
            uv: [
                uv.u0 + (uv.u1 - uv.u0) * cx,
                uv.v0 + (uv.v1 - uv.v0) * cy,
            ],
            color,
            uv_bounds,
        });
    }
}

/// Top, bottom, left, right edges, one layout pixel thick.
fn push_box_outline(
    out: &mut Vec<GlyphVertex>,
    canvas: PixelSize,
    placement: &GlyphPlacement,
    ratio: f32,
    white: UvRect,
) {
    let x = placement.box_x * ratio;
    let y = placement.box_y * ratio;
    let w = placement.box_w * ratio;
    let h = placement.box_h.max(0.0) * ratio;
    let t = ratio;
    let edges = [
        [x, y, w, t],
        [x, y + h - t, w, t],
        [x, y, t, h],
        [x + w - t, y, t, h],
    ];
    for rect in edges {
        push_quad(out, canvas, rect, white, white, DEBUG_BOX_COLOR);
    }
}
