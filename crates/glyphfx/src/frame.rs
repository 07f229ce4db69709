#![forbid(unsafe_code)]

//! Per-frame orchestration.
//!
//! [`FrameController`] owns the atlas, the program registry, the geometry
//! builder and a [`RenderBackend`]. Geometry is rebuilt only while the state is
//! dirty (resize, pixel-ratio change, cache clear, explicit request or debug
//! toggle); otherwise the last uploaded vertex buffer is drawn again.
//!
//! Each frame runs:
//!
//! 1. resize check against `round(css * dpr)`,
//! 2. placement fetch and vertex rebuild when dirty or forced,
//! 3. atlas upload flush, then a single vertex upload,
//! 4. a [`RenderPlan`] chosen from the active post key, then submission.

use web_time::Instant;

use crate::backend::{FrameUniforms, RenderBackend, RenderPlan};
use crate::config::RendererConfig;
use crate::error::{AtlasError, RenderError};
use crate::geometry::{GeometryBuilder, GeometryStats, PixelSize, Viewport};
use crate::glyph_atlas::{AtlasStats, GlyphAtlas};
use crate::layout::TextLayoutProvider;
use crate::raster::GlyphRasterizer;
use crate::shader::{FetchConfig, ProgramFamily, ProgramRegistry, ShaderEffect, ShaderFetcher};

/// Seconds since construction (or the last reset), for the `time` uniform.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    start: Instant,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

/// Bookkeeping that decides whether geometry is rebuilt or reused.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub dirty: bool,
    pub canvas: PixelSize,
    pub pixel_ratio: f32,
    pub vertex_count: u32,
    /// Atlas generation the uploaded vertices sample from.
    pub geometry_generation: u64,
    pub scene_key: String,
    pub post_key: Option<String>,
    pub offscreen: Option<PixelSize>,
}

impl FrameState {
    fn new(config: &RendererConfig) -> Self {
        Self {
            dirty: true,
            canvas: PixelSize::default(),
            pixel_ratio: 0.0,
            vertex_count: 0,
            geometry_generation: 0,
            scene_key: config.scene_program.clone(),
            post_key: config.post_program.clone(),
            offscreen: None,
        }
    }
}

/// What one `render` call did.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStats {
    pub time: f32,
    pub canvas: PixelSize,
    pub resized: bool,
    pub rebuilt: bool,
    /// Passes submitted; zero when the canvas has no area.
    pub passes: usize,
    pub vertex_count: u32,
    pub geometry: GeometryStats,
    pub atlas: AtlasStats,
    /// Set when a rebuild hit a full atlas. The previous geometry was drawn
    /// if it still matches the atlas generation, otherwise nothing was.
    pub atlas_error: Option<AtlasError>,
}

/// Frame-driven text renderer over a backend, a layout provider and a glyph
/// rasterizer.
pub struct FrameController<B: RenderBackend, L, R> {
    backend: B,
    layout: L,
    atlas: GlyphAtlas<R>,
    registry: ProgramRegistry<B::Program>,
    builder: GeometryBuilder,
    state: FrameState,
    clock: FrameClock,
    intensity: f32,
    speed: f32,
    debug_boxes: bool,
    disposed: bool,
}

impl<B, L, R> std::fmt::Debug for FrameController<B, L, R>
where
    B: RenderBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameController")
            .field("state", &self.state)
            .field("intensity", &self.intensity)
            .field("speed", &self.speed)
            .field("debug_boxes", &self.debug_boxes)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl<B, L, R> FrameController<B, L, R>
where
    B: RenderBackend,
    L: TextLayoutProvider,
    R: GlyphRasterizer,
{
    /// Build a controller and register the built-in programs.
    ///
    /// Fails if the built-ins cannot be linked, since every lookup needs them.
    pub fn new(
        mut backend: B,
        layout: L,
        rasterizer: R,
        config: &RendererConfig,
    ) -> Result<Self, RenderError> {
        let mut registry = ProgramRegistry::new();
        registry.install_builtins(&mut backend)?;
        for family in ProgramFamily::ALL {
            registry.get(family, family.default_key())?;
        }
        tracing::info!(
            atlas_size = config.atlas_size,
            scene = %config.scene_program,
            post = ?config.post_program,
            "frame controller ready"
        );
        Ok(Self {
            backend,
            layout,
            atlas: GlyphAtlas::new(rasterizer, config.atlas_size, config.atlas_size),
            registry,
            builder: GeometryBuilder::new(),
            state: FrameState::new(config),
            clock: FrameClock::new(),
            intensity: config.intensity,
            speed: config.speed,
            debug_boxes: config.debug_boxes,
            disposed: false,
        })
    }

    #[must_use]
    pub fn state(&self) -> &FrameState {
        &self.state
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[must_use]
    pub fn atlas(&self) -> &GlyphAtlas<R> {
        &self.atlas
    }

    #[must_use]
    pub fn registry(&self) -> &ProgramRegistry<B::Program> {
        &self.registry
    }

    #[must_use]
    pub fn layout(&self) -> &L {
        &self.layout
    }

    /// Mutable access to the layout provider. Marks geometry dirty.
    pub fn layout_mut(&mut self) -> &mut L {
        self.state.dirty = true;
        &mut self.layout
    }

    pub fn clock_mut(&mut self) -> &mut FrameClock {
        &mut self.clock
    }

    #[must_use]
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    #[must_use]
    pub fn speed(&self) -> f32 {
        self.speed
    }

    #[must_use]
    pub fn debug_boxes(&self) -> bool {
        self.debug_boxes
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn mark_dirty(&mut self) {
        self.state.dirty = true;
    }

    /// Drop every cached glyph; the next frame rasterizes again.
    pub fn clear_cache(&mut self) {
        self.atlas.reset();
        self.layout.invalidate();
        self.state.dirty = true;
    }

    /// Replace out-of-repertoire characters in the live text.
    pub fn sanitize_text(&mut self) -> usize {
        let replaced = self.layout.sanitize();
        if replaced > 0 {
            tracing::debug!(replaced, "sanitized layout text");
            self.layout.invalidate();
            self.state.dirty = true;
        }
        replaced
    }

    pub fn set_debug_boxes(&mut self, enabled: bool) {
        if self.debug_boxes != enabled {
            self.debug_boxes = enabled;
            self.state.dirty = true;
        }
    }

    /// Non-finite values are ignored.
    pub fn set_intensity(&mut self, intensity: f32) {
        if intensity.is_finite() {
            self.intensity = intensity;
        }
    }

    /// Non-finite values are ignored.
    pub fn set_speed(&mut self, speed: f32) {
        if speed.is_finite() {
            self.speed = speed;
        }
    }

    /// Select the scene program. Unknown keys render with `default`.
    pub fn set_scene_program(&mut self, key: &str) {
        if !self.registry.contains(ProgramFamily::Scene, key) {
            tracing::warn!(key, "scene program not registered; using default");
        }
        self.state.scene_key = key.to_string();
    }

    /// Enable (`Some`) or disable (`None`) the post pass.
    ///
    /// Enabling allocates the offscreen target for the current canvas right
    /// away; if that fails the post pass stays as it was.
    pub fn set_post_program(&mut self, key: Option<&str>) -> Result<(), RenderError> {
        match key {
            Some(key) => {
                if !self.state.canvas.is_empty() {
                    self.backend.ensure_offscreen_target(self.state.canvas)?;
                    self.state.offscreen = Some(self.state.canvas);
                }
                if !self.registry.contains(ProgramFamily::Post, key) {
                    tracing::warn!(key, "post program not registered; using identity");
                }
                self.state.post_key = Some(key.to_string());
            }
            None => {
                self.backend.release_offscreen_target();
                self.state.offscreen = None;
                self.state.post_key = None;
            }
        }
        Ok(())
    }

    /// Whether an animated program is active: any scene program other than
    /// `default`, or any post program other than `identity`.
    #[must_use]
    pub fn should_animate(&self) -> bool {
        let resolved = |family: ProgramFamily, key: &str| {
            self.registry
                .get(family, key)
                .is_ok_and(|info| info.key != family.default_key())
        };
        resolved(ProgramFamily::Scene, &self.state.scene_key)
            || self
                .state
                .post_key
                .as_deref()
                .is_some_and(|key| resolved(ProgramFamily::Post, key))
    }

    pub fn register_effect_program(
        &mut self,
        key: &str,
        effect: &ShaderEffect,
    ) -> Result<(), RenderError> {
        self.registry
            .register_effect_program(&mut self.backend, key, effect)
    }

    pub fn register_raw_program(
        &mut self,
        family: ProgramFamily,
        key: &str,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<(), RenderError> {
        self.registry
            .register_raw_program(&mut self.backend, family, key, vertex_src, fragment_src)
    }

    pub async fn register_raw_program_from_files<F: ShaderFetcher>(
        &mut self,
        fetcher: &F,
        family: ProgramFamily,
        key: &str,
        vertex_url: &str,
        fragment_url: &str,
        config: &FetchConfig,
    ) -> Result<(), RenderError> {
        self.registry
            .register_raw_program_from_files(
                &mut self.backend,
                fetcher,
                family,
                key,
                vertex_url,
                fragment_url,
                config,
            )
            .await
    }

    /// Render one frame using the controller's clock for `time`.
    pub fn render(&mut self, viewport: Viewport, force: bool) -> Result<FrameStats, RenderError> {
        let time = self.clock.elapsed_secs();
        self.render_at(viewport, time, force)
    }

    /// Render one frame with an explicit `time` uniform.
    pub fn render_at(
        &mut self,
        viewport: Viewport,
        time: f32,
        force: bool,
    ) -> Result<FrameStats, RenderError> {
        if self.disposed {
            return Err(RenderError::Surface("renderer has been disposed".to_string()));
        }
        let size = viewport.pixel_size();
        let ratio = viewport.pixel_ratio();
        let _span = tracing::debug_span!("frame", width = size.width, height = size.height).entered();

        let resized = size != self.state.canvas
            || ratio.to_bits() != self.state.pixel_ratio.to_bits();
        if resized {
            tracing::debug!(?size, ratio, "canvas resized");
            self.state.canvas = size;
            self.state.pixel_ratio = ratio;
            self.state.dirty = true;
            self.backend.resize_surface(size);
        }

        let mut stats = FrameStats {
            time,
            canvas: size,
            resized,
            rebuilt: false,
            passes: 0,
            vertex_count: self.state.vertex_count,
            geometry: self.builder.stats(),
            atlas: self.atlas.stats(),
            atlas_error: None,
        };
        if size.is_empty() {
            return Ok(stats);
        }

        if self.state.dirty || force {
            let placements = self.layout.placements();
            let built = self.builder.build(
                &mut self.atlas,
                &placements,
                size,
                ratio,
                self.debug_boxes,
            );
            // Rebuilds are not retried; a full atlas waits for clear_cache.
            self.state.dirty = false;
            match built {
                Ok(vertices) => {
                    if self.atlas.has_pending_uploads() {
                        self.backend
                            .apply_atlas_uploads(self.atlas.take_pending_uploads())?;
                    }
                    self.backend.upload_vertices(vertices)?;
                    self.state.vertex_count = vertices.len() as u32;
                    self.state.geometry_generation = self.atlas.generation();
                    stats.rebuilt = true;
                }
                Err(err) => {
                    // Old quads address cells of the old generation.
                    if self.state.geometry_generation != self.atlas.generation() {
                        tracing::warn!(
                            %err,
                            "geometry rebuild failed after atlas reset; dropping stale geometry"
                        );
                        self.backend.upload_vertices(&[])?;
                        self.state.vertex_count = 0;
                        self.state.geometry_generation = self.atlas.generation();
                    } else {
                        tracing::warn!(%err, "geometry rebuild failed; keeping previous frame");
                    }
                    stats.atlas_error = Some(err);
                }
            }
        }
        if self.atlas.has_pending_uploads() {
            self.backend
                .apply_atlas_uploads(self.atlas.take_pending_uploads())?;
        }

        let scene = &self.registry.get(ProgramFamily::Scene, &self.state.scene_key)?.program;
        let plan = match self.state.post_key.as_deref() {
            Some(post_key) => {
                let post = &self.registry.get(ProgramFamily::Post, post_key)?.program;
                self.backend.ensure_offscreen_target(size)?;
                self.state.offscreen = Some(size);
                RenderPlan::SceneThenPost { scene, post }
            }
            None => RenderPlan::DirectToSurface { scene },
        };
        stats.passes = plan.passes();

        let uniforms = FrameUniforms::new(size, time, self.intensity, self.speed);
        self.backend.render(plan, &uniforms, self.state.vertex_count)?;

        stats.vertex_count = self.state.vertex_count;
        stats.geometry = self.builder.stats();
        stats.atlas = self.atlas.stats();
        Ok(stats)
    }

    /// Release programs and GPU resources. Further renders fail.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.registry.dispose();
        self.backend.dispose();
        self.state.offscreen = None;
        self.state.vertex_count = 0;
        self.disposed = true;
        tracing::info!("frame controller disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, DrawSource, DrawTarget, HeadlessBackend};
    use crate::layout::MonospaceLayout;
    use crate::raster::ProceduralRasterizer;
    use crate::style::{FontStyle, Rgba};

    type Controller = FrameController<HeadlessBackend, MonospaceLayout, ProceduralRasterizer>;

    fn controller(text: &str) -> Controller {
        let config = RendererConfig {
            atlas_size: 256,
            ..RendererConfig::default()
        };
        let layout = MonospaceLayout::new(text, FontStyle::new("mono", 10.0), Rgba::WHITE);
        FrameController::new(HeadlessBackend::new(256, 256), layout, ProceduralRasterizer, &config)
            .expect("builtins link")
    }

    fn viewport() -> Viewport {
        Viewport::new(100.0, 100.0, 1.0)
    }

    #[test]
    fn clean_frames_reuse_geometry() {
        let mut c = controller("hi");
        let first = c.render_at(viewport(), 0.0, false).expect("first");
        assert!(first.resized && first.rebuilt);
        assert_eq!(first.vertex_count, 12);

        let second = c.render_at(viewport(), 0.5, false).expect("second");
        assert!(!second.resized && !second.rebuilt);
        assert_eq!(second.vertex_count, 12);

        let forced = c.render_at(viewport(), 1.0, true).expect("forced");
        assert!(forced.rebuilt);
        assert_eq!(c.layout().text(), "hi");
    }

    #[test]
    fn pixel_ratio_change_counts_as_resize() {
        let mut c = controller("a");
        c.render_at(Viewport::new(50.0, 50.0, 1.0), 0.0, false).expect("1x");
        let stats = c
            .render_at(Viewport::new(50.0, 50.0, 2.0), 0.0, false)
            .expect("2x");
        assert!(stats.resized && stats.rebuilt);
        assert_eq!(stats.canvas, PixelSize::new(100, 100));
    }

    #[test]
    fn direct_plan_draws_once_into_surface() {
        let mut c = controller("a");
        c.render_at(viewport(), 2.0, false).expect("frame");
        let draws: Vec<_> = c.backend().draws().cloned().collect();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].target, DrawTarget::Surface);
        assert_eq!(draws[0].source, DrawSource::Atlas);
        assert_eq!(draws[0].uniforms.resolution, [100.0, 100.0]);
        assert_eq!(draws[0].uniforms.time, 2.0);
    }

    #[test]
    fn post_plan_renders_scene_then_fullscreen_pass() {
        let mut c = controller("a");
        c.render_at(viewport(), 0.0, false).expect("size known");
        c.set_post_program(Some("identity")).expect("offscreen");
        assert_eq!(c.state().offscreen, Some(PixelSize::new(100, 100)));
        c.backend_mut().take_calls();

        let stats = c.render_at(viewport(), 0.0, false).expect("two passes");
        assert_eq!(stats.passes, 2);
        let draws: Vec<_> = c.backend().draws().cloned().collect();
        assert_eq!(draws[0].target, DrawTarget::Offscreen);
        assert_eq!(draws[1].target, DrawTarget::Surface);
        assert_eq!(draws[1].source, DrawSource::Offscreen);
        assert_eq!(draws[1].vertex_count, 6);

        c.set_post_program(None).expect("disable");
        assert!(c.backend().calls().contains(&BackendCall::ReleaseOffscreen));
    }

    #[test]
    fn post_target_failure_is_reported_when_enabling() {
        let config = RendererConfig {
            atlas_size: 256,
            ..RendererConfig::default()
        };
        let layout = MonospaceLayout::new("a", FontStyle::new("mono", 10.0), Rgba::WHITE);
        let backend = HeadlessBackend::new(256, 256).with_max_target_size(64);
        let mut c = FrameController::new(backend, layout, ProceduralRasterizer, &config)
            .expect("builtins link");
        c.render_at(viewport(), 0.0, false).expect("direct works");
        let err = c.set_post_program(Some("identity")).expect_err("100px > 64px");
        assert!(matches!(err, RenderError::FramebufferIncomplete { .. }));
        assert_eq!(c.state().post_key, None);
    }

    #[test]
    fn animation_follows_active_programs() {
        let mut c = controller("a");
        assert!(!c.should_animate());
        c.set_scene_program("unregistered");
        assert!(!c.should_animate());
        c.register_effect_program(
            "pulse",
            &ShaderEffect::new("return local_uv;", "return base_color * (0.5 + 0.5 * sin(time * speed));"),
        )
        .expect("pulse links");
        c.set_scene_program("pulse");
        assert!(c.should_animate());
    }

    #[test]
    fn debug_toggle_and_cache_clear_mark_dirty() {
        let mut c = controller("ab");
        c.render_at(viewport(), 0.0, false).expect("first");
        c.set_debug_boxes(true);
        let stats = c.render_at(viewport(), 0.0, false).expect("debug");
        assert!(stats.rebuilt);
        assert_eq!(stats.vertex_count, 12 + 48);

        c.clear_cache();
        let stats = c.render_at(viewport(), 0.0, false).expect("after clear");
        assert!(stats.rebuilt);
        assert_eq!(stats.atlas.generation, 1);
        assert!(c.backend().calls().contains(&BackendCall::AtlasClear));
    }

    #[test]
    fn sanitize_marks_dirty_only_when_text_changes() {
        let mut c = controller("x€");
        c.render_at(viewport(), 0.0, false).expect("first");
        assert_eq!(c.sanitize_text(), 1);
        assert!(c.state().dirty);
        c.render_at(viewport(), 0.0, false).expect("second");
        assert_eq!(c.sanitize_text(), 0);
        assert!(!c.state().dirty);
    }

    #[test]
    fn zero_area_canvas_skips_drawing() {
        let mut c = controller("a");
        let stats = c.render_at(Viewport::new(0.0, 40.0, 1.0), 0.0, false).expect("empty");
        assert_eq!(stats.passes, 0);
        assert_eq!(c.backend().draws().count(), 0);
    }

    #[test]
    fn disposed_controller_refuses_to_render() {
        let mut c = controller("a");
        c.dispose();
        assert!(c.registry().is_empty());
        assert!(matches!(
            c.render_at(viewport(), 0.0, false),
            Err(RenderError::Surface(_))
        ));
    }
}
