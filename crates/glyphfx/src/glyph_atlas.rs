#![forbid(unsafe_code)]

//! Glyph rasterization + atlas cache.
//!
//! One RGBA8 texture holds every rasterized character, packed left-to-right on
//! shelves. Packing is write-once: cells are never moved or evicted within a
//! generation, and a full atlas is a hard error until [`GlyphAtlas::reset`].
//!
//! The atlas does not talk to the GPU directly. Writes are queued as
//! [`AtlasUpload`]s and drained by the backend once per frame.
//!
//! Texels are premultiplied white (`[a, a, a, a]`); glyph colour comes from the
//! vertex stream.

use rustc_hash::FxHashMap;

use crate::error::AtlasError;
use crate::geometry::normalize_pixel_ratio;
use crate::raster::{GlyphCanvas, GlyphExtents, GlyphRasterizer};
use crate::style::FontStyle;

/// Recommended atlas edge length in pixels.
pub const DEFAULT_ATLAS_SIZE: u32 = 4096;

/// Gap between neighbouring cells, horizontally and between shelves.
pub const CELL_GAP: u32 = 1;

/// Cache key: resolved style, character and device pixel ratio.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlyphKey {
    style: FontStyle,
    ch: char,
    pixel_ratio_bits: u32,
}

impl GlyphKey {
    #[must_use]
    pub fn new(style: &FontStyle, ch: char, pixel_ratio: f32) -> Self {
        Self {
            style: style.clone(),
            ch,
            pixel_ratio_bits: pixel_ratio.to_bits(),
        }
    }

    #[must_use]
    pub fn style(&self) -> &FontStyle {
        &self.style
    }

    #[must_use]
    pub fn ch(&self) -> char {
        self.ch
    }

    #[must_use]
    pub fn pixel_ratio(&self) -> f32 {
        f32::from_bits(self.pixel_ratio_bits)
    }

    /// Font size in device pixels.
    #[must_use]
    pub fn device_size(&self) -> f32 {
        self.style.device_size(self.pixel_ratio())
    }
}

/// Pixel rectangle within the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl AtlasRect {
    #[must_use]
    pub const fn right(self) -> u32 {
        self.x + self.w
    }

    #[must_use]
    pub const fn bottom(self) -> u32 {
        self.y + self.h
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Normalized texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl UvRect {
    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.u0, self.v0, self.u1, self.v1]
    }
}

/// A packed, rasterized glyph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasGlyph {
    pub uv: UvRect,
    pub rect: AtlasRect,
    /// Cell width in device pixels, border included.
    pub width: u32,
    /// Cell height in device pixels, border included.
    pub height: u32,
    /// Baseline origin inside the cell, from its top-left corner.
    pub baseline_x: f32,
    pub baseline_y: f32,
}

/// Atlas lookup result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CachedGlyph {
    /// Whitespace/control character: contributes no geometry.
    Empty,
    Glyph(AtlasGlyph),
}

/// Shelf packing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtlasCursor {
    pub x: u32,
    pub y: u32,
    pub shelf_height: u32,
}

/// Pending texture write, drained by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtlasUpload {
    /// New generation: every texel goes back to transparent.
    Clear,
    /// Premultiplied RGBA8 texels for `rect`, row-major, tightly packed.
    Region { rect: AtlasRect, pixels: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtlasStats {
    pub hits: u64,
    pub misses: u64,
    pub rasterizations: u64,
    pub empty_glyphs: u64,
    pub bytes_uploaded: u64,
    pub generation: u64,
}

/// Characters that map to [`CachedGlyph::Empty`] without rasterization.
#[must_use]
pub const fn is_blank(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r')
}

/// Transparent border on each side of a cell, scaled by pixel ratio.
#[must_use]
pub fn cell_border(pixel_ratio: f32) -> u32 {
    pixel_ratio.ceil().max(1.0) as u32
}

/// Glyph atlas cache owning its rasterizer.
#[derive(Debug)]
pub struct GlyphAtlas<R> {
    rasterizer: R,
    width: u32,
    height: u32,
    cursor: AtlasCursor,
    cache: FxHashMap<GlyphKey, CachedGlyph>,
    white: AtlasRect,
    pending: Vec<AtlasUpload>,
    stats: AtlasStats,
}

impl<R: GlyphRasterizer> GlyphAtlas<R> {
    /// Create an atlas of fixed dimensions. There is no growth later.
    pub fn new(rasterizer: R, width: u32, height: u32) -> Self {
        let mut atlas = Self {
            rasterizer,
            width: width.max(1),
            height: height.max(1),
            cursor: AtlasCursor::default(),
            cache: FxHashMap::default(),
            white: AtlasRect {
                x: 0,
                y: 0,
                w: 1,
                h: 1,
            },
            pending: Vec::new(),
            stats: AtlasStats::default(),
        };
        atlas.begin_generation();
        atlas
    }

    #[must_use]
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn cursor(&self) -> AtlasCursor {
        self.cursor
    }

    #[must_use]
    pub fn stats(&self) -> AtlasStats {
        self.stats
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.stats.generation
    }

    /// Number of cached keys, empty glyphs included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[must_use]
    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    pub fn rasterizer_mut(&mut self) -> &mut R {
        &mut self.rasterizer
    }

    /// Pixel rect of the reserved opaque cell.
    #[must_use]
    pub fn white_rect(&self) -> AtlasRect {
        self.white
    }

    /// Zero-area UV at the centre of the reserved opaque cell.
    #[must_use]
    pub fn white_uv(&self) -> UvRect {
        let u = (self.white.x as f32 + 0.5) / self.width as f32;
        let v = (self.white.y as f32 + 0.5) / self.height as f32;
        UvRect {
            u0: u,
            v0: v,
            u1: u,
            v1: v,
        }
    }

    #[must_use]
    pub fn has_pending_uploads(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take all queued texture writes, in order.
    pub fn take_pending_uploads(&mut self) -> Vec<AtlasUpload> {
        std::mem::take(&mut self.pending)
    }

    /// Look up a glyph, rasterizing and packing it on a miss.
    ///
    /// A failed pack leaves cache and cursor untouched.
    pub fn get_glyph(
        &mut self,
        style: &FontStyle,
        ch: char,
        pixel_ratio: f32,
    ) -> Result<CachedGlyph, AtlasError> {
        let pixel_ratio = normalize_pixel_ratio(pixel_ratio);
        let key = GlyphKey::new(style, ch, pixel_ratio);
        if let Some(glyph) = self.cache.get(&key) {
            self.stats.hits += 1;
            return Ok(*glyph);
        }
        self.stats.misses += 1;

        if is_blank(ch) {
            self.stats.empty_glyphs += 1;
            self.cache.insert(key, CachedGlyph::Empty);
            return Ok(CachedGlyph::Empty);
        }

        let extents = self
            .rasterizer
            .measure(&key)
            .unwrap_or_else(|| GlyphExtents::estimate(key.device_size()));
        let border = cell_border(pixel_ratio);
        let (ink_w, ink_h) = extents.ink_size();
        // Saturates for absurd sizes so `allocate` reports Full.
        let cell_w = ink_w.saturating_add(2 * border);
        let cell_h = ink_h.saturating_add(2 * border);

        let rect = self.allocate(cell_w, cell_h).inspect_err(|err| {
            tracing::warn!(ch = %ch.escape_debug(), %err, "glyph atlas overflow");
        })?;

        let baseline_x = border as f32 + extents.left.max(0.0);
        let baseline_y = border as f32 + extents.ascent.max(0.0);
        let mut canvas = GlyphCanvas::new(cell_w, cell_h);
        self.rasterizer
            .draw(&key, &mut canvas, baseline_x, baseline_y);
        self.stats.rasterizations += 1;

        let pixels = canvas.to_premultiplied_rgba();
        self.stats.bytes_uploaded += pixels.len() as u64;
        self.pending.push(AtlasUpload::Region { rect, pixels });

        let glyph = CachedGlyph::Glyph(AtlasGlyph {
            uv: self.uv_of(rect),
            rect,
            width: cell_w,
            height: cell_h,
            baseline_x,
            baseline_y,
        });
        tracing::debug!(
            ch = %ch.escape_debug(),
            x = rect.x,
            y = rect.y,
            w = cell_w,
            h = cell_h,
            "packed glyph"
        );
        self.cache.insert(key, glyph);
        Ok(glyph)
    }

    /// Start a new generation: empty cache, cursor at the origin, texture
    /// cleared and the reserved opaque cell written again.
    pub fn reset(&mut self) {
        let dropped = self.cache.len();
        self.cache.clear();
        self.pending.clear();
        self.pending.push(AtlasUpload::Clear);
        self.stats.generation += 1;
        self.begin_generation();
        tracing::info!(
            generation = self.stats.generation,
            dropped,
            "glyph atlas reset"
        );
    }

    fn begin_generation(&mut self) {
        self.white = AtlasRect {
            x: 0,
            y: 0,
            w: 1,
            h: 1,
        };
        self.cursor = AtlasCursor {
            x: self.white.w + CELL_GAP,
            y: 0,
            shelf_height: self.white.h,
        };
        self.pending.push(AtlasUpload::Region {
            rect: self.white,
            pixels: vec![0xFF; 4],
        });
    }

    fn allocate(&mut self, w: u32, h: u32) -> Result<AtlasRect, AtlasError> {
        let full = AtlasError::Full {
            cell_width: w,
            cell_height: h,
            atlas_width: self.width,
            atlas_height: self.height,
        };
        if w > self.width || h > self.height {
            return Err(full);
        }

        let mut cursor = self.cursor;
        if cursor.x + w > self.width {
            cursor.x = 0;
            cursor.y += cursor.shelf_height + CELL_GAP;
            cursor.shelf_height = 0;
        }
        if cursor.y + h > self.height {
            return Err(full);
        }

        let rect = AtlasRect {
            x: cursor.x,
            y: cursor.y,
            w,
            h,
        };
        cursor.x += w + CELL_GAP;
        cursor.shelf_height = cursor.shelf_height.max(h);
        self.cursor = cursor;
        Ok(rect)
    }

    fn uv_of(&self, rect: AtlasRect) -> UvRect {
        let w = self.width as f32;
        let h = self.height as f32;
        UvRect {
            u0: rect.x as f32 / w,
            v0: rect.y as f32 / h,
            u1: rect.right() as f32 / w,
            v1: rect.bottom() as f32 / h,
        }
    }
}
