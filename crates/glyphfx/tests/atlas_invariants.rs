//! Property-based invariant tests for the glyph atlas.
//!
//! Verifies:
//! 1. Packed cells never overlap each other or the reserved opaque cell
//! 2. Every packed cell lies inside the atlas
//! 3. Repeated lookups of one key return the identical entry without rasterizing
//! 4. A failed pack leaves cursor and cache untouched

use glyphfx::error::AtlasError;
use glyphfx::glyph_atlas::{AtlasRect, CachedGlyph, GlyphAtlas};
use glyphfx::raster::ProceduralRasterizer;
use glyphfx::style::{FontSlant, FontStyle, FontWeight};
use proptest::prelude::*;

fn style_for(size: u8, bold: bool, italic: bool) -> FontStyle {
    let mut style = FontStyle::new("mono", f32::from(size));
    if bold {
        style = style.with_weight(FontWeight::BOLD);
    }
    if italic {
        style = style.with_slant(FontSlant::Italic);
    }
    style
}

fn request() -> impl Strategy<Value = (char, u8, bool, bool, u8)> {
    (
        proptest::char::range('!', '~'),
        4u8..=40,
        any::<bool>(),
        any::<bool>(),
        prop_oneof![Just(1u8), Just(2u8), Just(3u8)],
    )
}

// ═════════════════════════════════════════════════════════════════════════
// 1–2. Packed cells are disjoint and in bounds
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn packed_cells_are_disjoint(requests in proptest::collection::vec(request(), 1..=80)) {
        let mut atlas = GlyphAtlas::new(ProceduralRasterizer, 256, 256);
        let white = atlas.white_rect();
        let mut rects: Vec<AtlasRect> = Vec::new();

        for (ch, size, bold, italic, ratio) in requests {
            let style = style_for(size, bold, italic);
            match atlas.get_glyph(&style, ch, f32::from(ratio)) {
                Ok(CachedGlyph::Glyph(glyph)) => {
                    if !rects.contains(&glyph.rect) {
                        rects.push(glyph.rect);
                    }
                }
                Ok(CachedGlyph::Empty) => prop_assert!(false, "printable {:?} cached as empty", ch),
                Err(AtlasError::Full { .. }) => {}
            }
        }

        let (w, h) = atlas.dims();
        for (i, a) in rects.iter().enumerate() {
            prop_assert!(a.right() <= w && a.bottom() <= h, "{:?} outside {}x{}", a, w, h);
            prop_assert!(!a.intersects(white), "{:?} overlaps the opaque cell", a);
            for b in &rects[i + 1..] {
                prop_assert!(!a.intersects(*b), "{:?} overlaps {:?}", a, b);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Lookups are idempotent
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn repeated_lookup_is_a_cache_hit(req in request(), repeats in 1usize..=5) {
        let (ch, size, bold, italic, ratio) = req;
        let style = style_for(size, bold, italic);
        let mut atlas = GlyphAtlas::new(ProceduralRasterizer, 512, 512);

        let first = atlas.get_glyph(&style, ch, f32::from(ratio)).expect("fits");
        let rasterized = atlas.stats().rasterizations;
        for _ in 0..repeats {
            let again = atlas.get_glyph(&style, ch, f32::from(ratio)).expect("cached");
            prop_assert_eq!(again, first);
        }
        prop_assert_eq!(atlas.stats().rasterizations, rasterized);
        prop_assert_eq!(atlas.stats().hits, repeats as u64);
        prop_assert_eq!(atlas.len(), 1);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Overflow boundary
// ═════════════════════════════════════════════════════════════════════════

fn fill(atlas: &mut GlyphAtlas<ProceduralRasterizer>, style: &FontStyle, limit: usize) -> usize {
    let mut packed = 0;
    for ch in ('!'..='~').take(limit) {
        if atlas.get_glyph(style, ch, 1.0).is_err() {
            break;
        }
        packed += 1;
    }
    packed
}

#[test]
fn one_fewer_than_overflow_succeeds() {
    let style = FontStyle::new("mono", 10.0);
    let mut sizing = GlyphAtlas::new(ProceduralRasterizer, 64, 64);
    let capacity = fill(&mut sizing, &style, usize::MAX);
    assert!(capacity > 0 && capacity < 94, "64x64 atlas should overflow");

    let mut atlas = GlyphAtlas::new(ProceduralRasterizer, 64, 64);
    assert_eq!(fill(&mut atlas, &style, capacity), capacity);

    let cursor = atlas.cursor();
    let cached = atlas.len();
    let next = ('!'..='~').nth(capacity).expect("repertoire is larger");
    assert!(matches!(
        atlas.get_glyph(&style, next, 1.0),
        Err(AtlasError::Full { .. })
    ));
    assert_eq!(atlas.cursor(), cursor);
    assert_eq!(atlas.len(), cached);

    atlas.reset();
    assert!(atlas.get_glyph(&style, next, 1.0).is_ok());
}
