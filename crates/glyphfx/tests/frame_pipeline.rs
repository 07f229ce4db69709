#![forbid(unsafe_code)]

//! End-to-end frame tests over the headless backend.
//!
//! Each test drives a [`FrameController`] exactly as a host would (config,
//! layout snapshot, `render_at`) and inspects the recorded command stream.

use glyphfx::backend::{BackendCall, DrawTarget, HeadlessBackend};
use glyphfx::config::RendererConfig;
use glyphfx::error::{AtlasError, RenderError, ShaderError, ShaderStage};
use glyphfx::frame::FrameController;
use glyphfx::geometry::Viewport;
use glyphfx::layout::{FixedLayout, GlyphPlacement};
use glyphfx::raster::ProceduralRasterizer;
use glyphfx::shader::{ProgramFamily, default_effect, generate};
use glyphfx::style::{FontStyle, Rgba};
use tracing::Level;

type Controller = FrameController<HeadlessBackend, FixedLayout, ProceduralRasterizer>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::INFO)
        .try_init();
}

fn placement(ch: char, x: f32) -> GlyphPlacement {
    GlyphPlacement {
        ch,
        style: FontStyle::new("mono", 16.0),
        baseline_x: x,
        baseline_y: 30.0,
        box_x: x,
        box_y: 14.0,
        box_w: 10.0,
        box_h: 20.0,
        color: Rgba::WHITE,
    }
}

fn controller(placements: Vec<GlyphPlacement>, debug_boxes: bool) -> Controller {
    init_tracing();
    let config = RendererConfig {
        atlas_size: 512,
        debug_boxes,
        ..RendererConfig::default()
    };
    FrameController::new(
        HeadlessBackend::new(512, 512),
        FixedLayout::new(placements),
        ProceduralRasterizer,
        &config,
    )
    .expect("builtins link")
}

fn viewport() -> Viewport {
    Viewport::new(100.0, 100.0, 1.0)
}

fn last_scene_program(c: &Controller) -> u64 {
    c.backend()
        .draws()
        .filter(|draw| draw.target == DrawTarget::Surface)
        .last()
        .expect("a surface draw")
        .program
}

// ============================================================================
// Geometry
// ============================================================================

#[test]
fn single_glyph_is_one_quad() {
    let mut c = controller(vec![placement('A', 10.0)], false);
    let stats = c.render_at(viewport(), 0.0, false).expect("frame");

    assert_eq!(stats.vertex_count, 6);
    assert_eq!(stats.geometry.glyph_quads, 1);
    assert_eq!(c.backend().vertices().len(), 6);
    assert!(
        c.backend()
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::AtlasRegion(_)))
    );
}

#[test]
fn debug_boxes_add_four_edge_quads() {
    let mut c = controller(vec![placement('A', 10.0)], true);
    let stats = c.render_at(viewport(), 0.0, false).expect("frame");
    assert_eq!(stats.vertex_count, 30);
    assert_eq!(stats.geometry.debug_quads, 4);

    c.set_debug_boxes(false);
    let stats = c.render_at(viewport(), 0.0, false).expect("frame");
    assert!(stats.rebuilt);
    assert_eq!(stats.vertex_count, 6);
}

#[test]
fn box_at_origin_gives_six_then_thirty_vertices() {
    let origin = GlyphPlacement {
        baseline_x: 0.0,
        baseline_y: 16.0,
        box_x: 0.0,
        box_y: 0.0,
        ..placement('A', 0.0)
    };
    let mut c = controller(vec![origin], false);
    assert_eq!(c.render_at(viewport(), 0.0, false).expect("plain").vertex_count, 6);

    c.set_debug_boxes(true);
    let stats = c.render_at(viewport(), 0.0, false).expect("debug");
    assert_eq!(stats.vertex_count, 30);
    assert_eq!(c.backend().vertices().len(), 30);
}

#[test]
fn identical_glyphs_share_one_atlas_cell() {
    let mut c = controller(vec![placement('A', 10.0), placement('A', 40.0)], false);
    let stats = c.render_at(viewport(), 0.0, false).expect("frame");

    assert_eq!(stats.vertex_count, 12);
    assert_eq!(stats.atlas.rasterizations, 1);
    let vertices = c.backend().vertices();
    assert_eq!(vertices[0].uv_bounds, vertices[6].uv_bounds);
    assert_ne!(vertices[0].position, vertices[6].position);
}

#[test]
fn whitespace_emits_no_geometry() {
    let mut c = controller(vec![placement(' ', 10.0), placement('\t', 20.0)], false);
    let stats = c.render_at(viewport(), 0.0, false).expect("frame");
    assert_eq!(stats.vertex_count, 0);
    assert_eq!(stats.atlas.rasterizations, 0);
    assert_eq!(stats.geometry.empty_placements, 2);
}

#[test]
fn clear_cache_reuploads_the_atlas() {
    let mut c = controller(vec![placement('A', 10.0)], false);
    c.render_at(viewport(), 0.0, false).expect("frame");
    c.backend_mut().take_calls();

    c.clear_cache();
    let stats = c.render_at(viewport(), 0.0, false).expect("frame");
    assert!(stats.rebuilt);
    assert_eq!(stats.atlas.generation, 1);
    let calls = c.backend().calls();
    assert!(calls.contains(&BackendCall::AtlasClear));
    assert_eq!(c.backend().atlas_texel(0, 0), [255, 255, 255, 255]);
}

// ============================================================================
// Programs
// ============================================================================

#[test]
fn raw_scene_program_is_selected_by_key() {
    let mut c = controller(vec![placement('A', 10.0)], false);
    c.render_at(viewport(), 0.0, false).expect("default frame");
    let default_program = last_scene_program(&c);

    let source = generate(&default_effect()).expect("builtin effect generates");
    c.register_raw_program(ProgramFamily::Scene, "copy", &source, &source)
        .expect("raw program links");
    c.set_scene_program("copy");
    assert!(c.should_animate());

    c.render_at(viewport(), 0.1, false).expect("copy frame");
    assert_ne!(last_scene_program(&c), default_program);
}

#[test]
fn invalid_fragment_keeps_previous_program() {
    let mut c = controller(vec![placement('A', 10.0)], false);
    let source = generate(&default_effect()).expect("builtin effect generates");
    c.register_raw_program(ProgramFamily::Scene, "fx", &source, &source)
        .expect("first version links");
    c.set_scene_program("fx");
    c.render_at(viewport(), 0.0, false).expect("frame");
    let linked = last_scene_program(&c);

    let broken = source.replace("fn fs_main(", "fn fs_main((");
    let err = c
        .register_raw_program(ProgramFamily::Scene, "fx", &source, &broken)
        .expect_err("broken fragment is rejected");
    match err {
        RenderError::Shader { key, error } => {
            assert_eq!(key, "fx");
            assert!(matches!(
                error,
                ShaderError::Compile {
                    stage: ShaderStage::Fragment,
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }

    c.render_at(viewport(), 0.5, false).expect("still renders");
    assert_eq!(last_scene_program(&c), linked);
}

#[test]
fn unknown_keys_fall_back_to_defaults() {
    let mut c = controller(vec![placement('A', 10.0)], false);
    c.set_scene_program("missing");
    c.set_post_program(Some("also-missing"))
        .expect("offscreen allocation is deferred until sized");
    assert!(!c.should_animate());

    let stats = c.render_at(viewport(), 0.0, false).expect("frame");
    assert_eq!(stats.passes, 2);
    let draws: Vec<_> = c.backend().draws().cloned().collect();
    assert_eq!(draws[0].target, DrawTarget::Offscreen);
    assert_eq!(draws[1].target, DrawTarget::Surface);
}

#[test]
fn oversized_offscreen_target_fails_the_frame() {
    init_tracing();
    let config = RendererConfig {
        atlas_size: 512,
        post_program: Some("identity".to_string()),
        ..RendererConfig::default()
    };
    let mut c = FrameController::new(
        HeadlessBackend::new(512, 512).with_max_target_size(64),
        FixedLayout::new(vec![placement('A', 10.0)]),
        ProceduralRasterizer,
        &config,
    )
    .expect("builtins link");

    let err = c
        .render_at(viewport(), 0.0, false)
        .expect_err("100x100 exceeds the 64px limit");
    assert!(matches!(
        err,
        RenderError::FramebufferIncomplete {
            width: 100,
            height: 100,
            ..
        }
    ));

    c.set_post_program(None).expect("disable post");
    let stats = c.render_at(viewport(), 0.0, false).expect("direct frame");
    assert_eq!(stats.passes, 1);
}

// ============================================================================
// Atlas overflow
// ============================================================================

fn sized(ch: char, x: f32, size: f32) -> GlyphPlacement {
    GlyphPlacement {
        style: FontStyle::new("mono", size),
        ..placement(ch, x)
    }
}

fn small_atlas_controller(placements: Vec<GlyphPlacement>) -> Controller {
    init_tracing();
    let config = RendererConfig {
        atlas_size: 64,
        ..RendererConfig::default()
    };
    FrameController::new(
        HeadlessBackend::new(64, 64),
        FixedLayout::new(placements),
        ProceduralRasterizer,
        &config,
    )
    .expect("builtins link")
}

fn last_draw_vertex_count(c: &Controller) -> u32 {
    c.backend()
        .draws()
        .last()
        .expect("a draw")
        .vertex_count
}

#[test]
fn full_atlas_keeps_geometry_of_the_same_generation() {
    let mut c = small_atlas_controller(vec![sized('A', 10.0, 16.0)]);
    c.render_at(viewport(), 0.0, false).expect("first frame");
    let before = c.backend().vertices().to_vec();
    assert_eq!(before.len(), 6);

    c.layout_mut()
        .set_placements(vec![sized('A', 10.0, 16.0), sized('W', 30.0, 200.0)]);
    let stats = c.render_at(viewport(), 0.1, false).expect("frame still draws");

    assert!(matches!(stats.atlas_error, Some(AtlasError::Full { .. })));
    assert!(!stats.rebuilt);
    assert_eq!(stats.vertex_count, 6);
    assert_eq!(c.backend().vertices(), before.as_slice());
    assert_eq!(last_draw_vertex_count(&c), 6);
}

#[test]
fn full_atlas_after_reset_drops_stale_geometry() {
    let mut c = small_atlas_controller(vec![sized('A', 10.0, 16.0)]);
    c.render_at(viewport(), 0.0, false).expect("first frame");
    c.backend_mut().take_calls();

    c.layout_mut()
        .set_placements(vec![sized('Q', 10.0, 10.0), sized('W', 30.0, 200.0)]);
    c.clear_cache();
    let stats = c.render_at(viewport(), 0.1, false).expect("frame still draws");

    assert!(matches!(stats.atlas_error, Some(AtlasError::Full { .. })));
    assert_eq!(stats.vertex_count, 0);
    assert!(c.backend().vertices().is_empty());
    assert!(c.backend().calls().contains(&BackendCall::UploadVertices(0)));
    assert_eq!(last_draw_vertex_count(&c), 0);
    assert_eq!(c.state().geometry_generation, 1);

    c.layout_mut().set_placements(vec![sized('Q', 10.0, 10.0)]);
    let stats = c.render_at(viewport(), 0.2, false).expect("recovers");
    assert!(stats.rebuilt && stats.atlas_error.is_none());
    assert_eq!(stats.vertex_count, 6);
}
