#![forbid(unsafe_code)]

//! Single-character rasterization into scratch coverage cells.
//!
//! The atlas asks a [`GlyphRasterizer`] for extents first, sizes a padded cell
//! from them, then has the rasterizer draw coverage into that cell with the
//! baseline origin at a known position.

use crate::error::RenderError;
use crate::glyph_atlas::GlyphKey;
use crate::style::{FontSlant, FontVariant, FontWeight};

/// Ink extents around the baseline origin, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphExtents {
    /// Distance the glyph reaches left of the origin.
    pub left: f32,
    /// Distance the glyph (or its advance) reaches right of the origin.
    pub right: f32,
    pub ascent: f32,
    pub descent: f32,
}

impl GlyphExtents {
    /// Proportional estimate used when no precise metrics are available.
    #[must_use]
    pub fn estimate(font_px: f32) -> Self {
        let font_px = font_px.max(1.0);
        Self {
            left: 0.0,
            right: font_px * 3.0 / 5.0,
            ascent: font_px * 4.0 / 5.0,
            descent: font_px / 5.0,
        }
    }

    /// Ink box size, rounded up to whole pixels (at least 1x1).
    #[must_use]
    pub fn ink_size(&self) -> (u32, u32) {
        let w = (self.left.max(0.0) + self.right.max(0.0)).ceil().max(1.0);
        let h = (self.ascent.max(0.0) + self.descent.max(0.0)).ceil().max(1.0);
        (w as u32, h as u32)
    }
}

/// Single-channel coverage surface sized to one atlas cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphCanvas {
    width: u32,
    height: u32,
    coverage: Vec<u8>,
}

impl GlyphCanvas {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            coverage: vec![0; (width as usize) * (height as usize)],
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn coverage(&self) -> &[u8] {
        &self.coverage
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x < self.width && y < self.height {
            self.coverage[(y as usize) * (self.width as usize) + (x as usize)]
        } else {
            0
        }
    }

    /// Max-blend one pixel. Out-of-bounds writes are clipped.
    pub fn blend(&mut self, x: i32, y: i32, alpha: u8) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        let idx = (y as usize) * (self.width as usize) + (x as usize);
        self.coverage[idx] = self.coverage[idx].max(alpha);
    }

    /// Max-blend a coverage bitmap with its top-left corner at `(x, y)`.
    pub fn blit(&mut self, x: i32, y: i32, width: usize, height: usize, src: &[u8]) {
        for row in 0..height {
            for col in 0..width {
                let alpha = src[row * width + col];
                if alpha != 0 {
                    self.blend(x + col as i32, y + row as i32, alpha);
                }
            }
        }
    }

    /// Expand to premultiplied white RGBA8, the atlas texel format.
    #[must_use]
    pub fn to_premultiplied_rgba(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.coverage.len() * 4);
        for &a in &self.coverage {
            out.extend_from_slice(&[a, a, a, a]);
        }
        out
    }
}

/// Measures and draws single characters for the atlas.
pub trait GlyphRasterizer {
    /// Precise extents for `key`, or `None` to fall back to estimates.
    fn measure(&mut self, key: &GlyphKey) -> Option<GlyphExtents>;

    /// Draw `key` into `canvas` with its baseline origin at `(origin_x, origin_y)`.
    fn draw(&mut self, key: &GlyphKey, canvas: &mut GlyphCanvas, origin_x: f32, origin_y: f32);
}

impl<R: GlyphRasterizer + ?Sized> GlyphRasterizer for Box<R> {
    fn measure(&mut self, key: &GlyphKey) -> Option<GlyphExtents> {
        (**self).measure(key)
    }

    fn draw(&mut self, key: &GlyphKey, canvas: &mut GlyphCanvas, origin_x: f32, origin_y: f32) {
        (**self).draw(key, canvas, origin_x, origin_y);
    }
}

// ---------------------------------------------------------------------------
// Procedural rasterizer
// ---------------------------------------------------------------------------

/// Deterministic block glyphs on a uniform em box.
///
/// Every character measures `0.6em` wide, `0.8em` ascent, `0.2em` descent and
/// draws a bordered hash pattern, so atlas placement is predictable. Used when
/// no font face is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralRasterizer;

impl GlyphRasterizer for ProceduralRasterizer {
    fn measure(&mut self, key: &GlyphKey) -> Option<GlyphExtents> {
        Some(GlyphExtents::estimate(key.device_size()))
    }

    fn draw(&mut self, key: &GlyphKey, canvas: &mut GlyphCanvas, origin_x: f32, origin_y: f32) {
        let extents = GlyphExtents::estimate(key.device_size());
        let (w, h) = extents.ink_size();
        let x0 = (origin_x - extents.left).round() as i32;
        let y0 = (origin_y - extents.ascent).round() as i32;
        let seed = (key.ch() as u32).wrapping_mul(0x9E37_79B9) ^ (w << 16) ^ h;
        for y in 0..h {
            for x in 0..w {
                let border = x == 0 || y == 0 || x + 1 == w || y + 1 == h;
                let bit = ((seed >> ((x + y * 7) & 31)) & 1) == 1;
                let stripe = (x * 3 + y).wrapping_add(seed) % 11 == 0;
                if border || (bit && stripe) {
                    canvas.blend(x0 + x as i32, y0 + y as i32, 0xFF);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// fontdue-backed rasterizer
// ---------------------------------------------------------------------------

/// Scale applied to lowercase letters rendered as small capitals.
const SMALL_CAPS_SCALE: f32 = 0.75;

struct Face {
    family: String,
    weight: FontWeight,
    slant: FontSlant,
    font: fontdue::Font,
}

/// Registered font faces, matched by family, weight and slant.
#[derive(Default)]
pub struct FontBook {
    faces: Vec<Face>,
}

impl std::fmt::Debug for FontBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontBook")
            .field("faces", &self.faces.len())
            .finish_non_exhaustive()
    }
}

impl FontBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register a face. Family matching is case-insensitive.
    pub fn add_face(
        &mut self,
        family: &str,
        weight: FontWeight,
        slant: FontSlant,
        bytes: &[u8],
    ) -> Result<(), RenderError> {
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|msg| RenderError::ResourceCreation(format!("font '{family}': {msg}")))?;
        tracing::debug!(family, weight = weight.0, ?slant, "registered font face");
        self.faces.push(Face {
            family: family.to_ascii_lowercase(),
            weight,
            slant,
            font,
        });
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Closest face: same family if any, then slant, then nearest weight.
    fn select(&self, family: &str, weight: FontWeight, slant: FontSlant) -> Option<&fontdue::Font> {
        let family = family.to_ascii_lowercase();
        let in_family = self.faces.iter().any(|face| face.family == family);
        self.faces
            .iter()
            .filter(|face| !in_family || face.family == family)
            .min_by_key(|face| {
                let slant_penalty = if face.slant == slant { 0 } else { 1000 };
                slant_penalty + u32::from(face.weight.0.abs_diff(weight.0))
            })
            .map(|face| &face.font)
    }
}

/// Outline rasterizer over a [`FontBook`].
#[derive(Debug, Default)]
pub struct FontdueRasterizer {
    book: FontBook,
}

impl FontdueRasterizer {
    #[must_use]
    pub fn new(book: FontBook) -> Self {
        Self { book }
    }

    #[must_use]
    pub fn book(&self) -> &FontBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut FontBook {
        &mut self.book
    }

    /// Character and pixel size actually rendered, after small-caps mapping.
    fn resolve(key: &GlyphKey) -> (char, f32) {
        let px = key.device_size();
        let ch = key.ch();
        if key.style().variant == FontVariant::SmallCaps && ch.is_lowercase() {
            let upper = ch.to_uppercase().next().unwrap_or(ch);
            return (upper, px * SMALL_CAPS_SCALE);
        }
        (ch, px)
    }
}

impl GlyphRasterizer for FontdueRasterizer {
    fn measure(&mut self, key: &GlyphKey) -> Option<GlyphExtents> {
        let style = key.style();
        let font = self.book.select(&style.family, style.weight, style.slant)?;
        let (ch, px) = Self::resolve(key);
        let m = font.metrics(ch, px);
        let ink_right = m.xmin as f32 + m.width as f32;
        let ink_top = m.ymin as f32 + m.height as f32;
        Some(GlyphExtents {
            left: (-(m.xmin as f32)).max(0.0),
            right: ink_right.max(m.advance_width),
            ascent: ink_top.max(0.0),
            descent: (-(m.ymin as f32)).max(0.0),
        })
    }

    fn draw(&mut self, key: &GlyphKey, canvas: &mut GlyphCanvas, origin_x: f32, origin_y: f32) {
        let style = key.style();
        let Some(font) = self.book.select(&style.family, style.weight, style.slant) else {
            return;
        };
        let (ch, px) = Self::resolve(key);
        let (m, bitmap) = font.rasterize(ch, px);
        let x = (origin_x + m.xmin as f32).round() as i32;
        let y = (origin_y - (m.ymin as f32 + m.height as f32)).round() as i32;
        canvas.blit(x, y, m.width, m.height, &bitmap);
    }
}
