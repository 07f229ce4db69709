#![forbid(unsafe_code)]

//! Text-layout provider contract.
//!
//! Line breaking and per-character placement are owned by an external layout
//! engine. The renderer only consumes its output: an ordered list of
//! [`GlyphPlacement`]s, treated as a disposable per-frame snapshot.
//!
//! The renderable repertoire is printable ASCII plus the Latin-1 supplement;
//! anything else must be replaced with `?` before layout.

use crate::style::{FontStyle, Rgba};

/// Replacement for characters outside the repertoire.
pub const REPLACEMENT_CHAR: char = '?';

/// Resolved position, box and style of one character, in layout pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphPlacement {
    pub ch: char,
    pub style: FontStyle,
    pub baseline_x: f32,
    pub baseline_y: f32,
    pub box_x: f32,
    pub box_y: f32,
    pub box_w: f32,
    pub box_h: f32,
    pub color: Rgba,
}

/// Source of glyph placements for the current layout state.
pub trait TextLayoutProvider {
    /// Ordered placements for the live text. Called only when geometry is dirty.
    fn placements(&mut self) -> Vec<GlyphPlacement>;

    /// Drop any cached layout so the next `placements` call recomputes it.
    fn invalidate(&mut self);

    /// Replace out-of-repertoire characters in the live text with `?`.
    ///
    /// Returns the number of characters replaced.
    fn sanitize(&mut self) -> usize;
}

/// Whether `ch` can be rasterized by the atlas.
#[must_use]
pub const fn in_repertoire(ch: char) -> bool {
    matches!(ch, '\t' | '\n' | '\r' | ' '..='~' | '\u{A0}'..='\u{FF}')
}

/// Replace every out-of-repertoire character with [`REPLACEMENT_CHAR`].
///
/// Returns the number of replacements; the string is untouched when zero.
pub fn sanitize_in_place(text: &mut String) -> usize {
    let replaced = text.chars().filter(|&ch| !in_repertoire(ch)).count();
    if replaced > 0 {
        *text = text
            .chars()
            .map(|ch| if in_repertoire(ch) { ch } else { REPLACEMENT_CHAR })
            .collect();
    }
    replaced
}

/// Provider over a fixed, externally computed placement list.
///
/// Useful when the host performs layout itself and pushes snapshots.
#[derive(Debug, Clone, Default)]
pub struct FixedLayout {
    placements: Vec<GlyphPlacement>,
    fetches: usize,
}

impl FixedLayout {
    #[must_use]
    pub fn new(placements: Vec<GlyphPlacement>) -> Self {
        Self {
            placements,
            fetches: 0,
        }
    }

    /// Replace the snapshot. The caller must mark the renderer dirty.
    pub fn set_placements(&mut self, placements: Vec<GlyphPlacement>) {
        self.placements = placements;
    }

    /// How many times `placements` has been requested.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }
}

impl TextLayoutProvider for FixedLayout {
    fn placements(&mut self) -> Vec<GlyphPlacement> {
        self.fetches += 1;
        self.placements.clone()
    }

    fn invalidate(&mut self) {}

    fn sanitize(&mut self) -> usize {
        let mut replaced = 0;
        for placement in &mut self.placements {
            if !in_repertoire(placement.ch) {
                placement.ch = REPLACEMENT_CHAR;
                replaced += 1;
            }
        }
        replaced
    }
}

/// Minimal fixed-advance layout: one line per `\n`, greedy wrap at
/// `wrap_width`. Stands in for a real layout engine in demos and tests.
#[derive(Debug, Clone)]
pub struct MonospaceLayout {
    text: String,
    style: FontStyle,
    color: Rgba,
    origin: (f32, f32),
    wrap_width: Option<f32>,
    cached: Option<Vec<GlyphPlacement>>,
}

impl MonospaceLayout {
    #[must_use]
    pub fn new(text: impl Into<String>, style: FontStyle, color: Rgba) -> Self {
        Self {
            text: text.into(),
            style,
            color,
            origin: (0.0, 0.0),
            wrap_width: None,
            cached: None,
        }
    }

    #[must_use]
    pub fn with_origin(mut self, x: f32, y: f32) -> Self {
        self.origin = (x, y);
        self
    }

    #[must_use]
    pub fn with_wrap_width(mut self, width: f32) -> Self {
        self.wrap_width = Some(width);
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.cached = None;
    }

    fn advance(&self) -> f32 {
        self.style.size * 0.6
    }

    fn line_height(&self) -> f32 {
        self.style.size * 1.2
    }

    fn layout(&self) -> Vec<GlyphPlacement> {
        let advance = self.advance();
        let line_height = self.line_height();
        let ascent = self.style.size * 0.8 + (line_height - self.style.size) / 2.0;
        let (x0, y0) = self.origin;
        let mut x = x0;
        let mut y = y0;
        let mut out = Vec::with_capacity(self.text.len());

        for ch in self.text.chars() {
            if ch == '\n' {
                x = x0;
                y += line_height;
                continue;
            }
            if ch == '\r' {
                continue;
            }
            if let Some(width) = self.wrap_width
                && x > x0
                && x + advance > x0 + width
            {
                x = x0;
                y += line_height;
            }
            out.push(GlyphPlacement {
                ch,
                style: self.style.clone(),
                baseline_x: x,
                baseline_y: y + ascent,
                box_x: x,
                box_y: y,
                box_w: advance,
                box_h: line_height,
                color: self.color,
            });
            x += advance;
        }
        out
    }
}

impl TextLayoutProvider for MonospaceLayout {
    fn placements(&mut self) -> Vec<GlyphPlacement> {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let placements = self.layout();
        self.cached = Some(placements.clone());
        placements
    }

    fn invalidate(&mut self) {
        self.cached = None;
    }

    fn sanitize(&mut self) -> usize {
        let replaced = sanitize_in_place(&mut self.text);
        if replaced > 0 {
            self.cached = None;
        }
        replaced
    }
}
