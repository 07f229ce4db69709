#![forbid(unsafe_code)]

//! Resolved font style and colour as reported by the layout provider.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontSlant {
    #[default]
    Normal,
    Italic,
    Oblique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontVariant {
    #[default]
    Normal,
    SmallCaps,
}

/// Font weight on the CSS 100..=900 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FontWeight(pub u16);

impl FontWeight {
    pub const NORMAL: Self = Self(400);
    pub const BOLD: Self = Self(700);

    #[must_use]
    pub const fn is_bold(self) -> bool {
        self.0 >= 600
    }
}

impl Default for FontWeight {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Fully resolved style of one character.
///
/// `size` is in layout pixels; the device pixel ratio is applied separately
/// so the same style can be cached at several ratios.
#[derive(Debug, Clone)]
pub struct FontStyle {
    pub slant: FontSlant,
    pub variant: FontVariant,
    pub weight: FontWeight,
    pub size: f32,
    pub family: Arc<str>,
}

impl FontStyle {
    #[must_use]
    pub fn new(family: &str, size: f32) -> Self {
        Self {
            slant: FontSlant::Normal,
            variant: FontVariant::Normal,
            weight: FontWeight::NORMAL,
            size,
            family: Arc::from(family),
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: FontWeight) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_slant(mut self, slant: FontSlant) -> Self {
        self.slant = slant;
        self
    }

    #[must_use]
    pub fn with_variant(mut self, variant: FontVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Font size in device pixels.
    #[must_use]
    pub fn device_size(&self, pixel_ratio: f32) -> f32 {
        self.size * pixel_ratio
    }
}

impl Default for FontStyle {
    fn default() -> Self {
        Self::new("sans-serif", 16.0)
    }
}

// Size compares by bit pattern so the style can key a hash map.
impl PartialEq for FontStyle {
    fn eq(&self, other: &Self) -> bool {
        self.slant == other.slant
            && self.variant == other.variant
            && self.weight == other.weight
            && self.size.to_bits() == other.size.to_bits()
            && self.family == other.family
    }
}

impl Eq for FontStyle {}

impl Hash for FontStyle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slant.hash(state);
        self.variant.hash(state);
        self.weight.hash(state);
        self.size.to_bits().hash(state);
        self.family.hash(state);
    }
}

/// Straight-alpha RGBA colour with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// From 8-bit channels, e.g. a parsed CSS `rgba()` value.
    #[must_use]
    pub fn from_u8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            f32::from(a) / 255.0,
        )
    }

    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}
