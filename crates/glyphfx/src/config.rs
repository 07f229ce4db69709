#![forbid(unsafe_code)]

//! Renderer configuration.
//!
//! Every field has a default, so a partial JSON document is a valid config.
//! A few knobs can be overridden from the environment:
//!
//! - `GLYPHFX_DEBUG_BOXES=1|true` forces debug outlines on.
//! - `GLYPHFX_ATLAS_SIZE=<px>` overrides the atlas edge length.

use serde::{Deserialize, Serialize};

use crate::glyph_atlas::DEFAULT_ATLAS_SIZE;
use crate::shader::ProgramFamily;

pub const ENV_DEBUG_BOXES: &str = "GLYPHFX_DEBUG_BOXES";
pub const ENV_ATLAS_SIZE: &str = "GLYPHFX_ATLAS_SIZE";

/// Smallest accepted atlas edge; room for the reserved cell and a few glyphs.
pub const MIN_ATLAS_SIZE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Atlas edge length in pixels (square texture).
    pub atlas_size: u32,
    pub debug_boxes: bool,
    pub intensity: f32,
    pub speed: f32,
    /// Initially active scene program.
    pub scene_program: String,
    /// Initially active post program; `None` renders directly to the surface.
    pub post_program: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            atlas_size: DEFAULT_ATLAS_SIZE,
            debug_boxes: false,
            intensity: 1.0,
            speed: 1.0,
            scene_program: ProgramFamily::Scene.default_key().to_string(),
            post_program: None,
        }
    }
}

fn truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

impl RendererConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Self>(json).map(Self::sanitized)
    }

    /// Apply `GLYPHFX_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if lookup(ENV_DEBUG_BOXES).is_some_and(|v| truthy(&v)) {
            self.debug_boxes = true;
        }
        if let Some(raw) = lookup(ENV_ATLAS_SIZE) {
            match raw.trim().parse::<u32>() {
                Ok(size) => self.atlas_size = size,
                Err(err) => tracing::warn!(value = %raw, %err, "ignoring {ENV_ATLAS_SIZE}"),
            }
        }
        self.sanitized()
    }

    fn sanitized(mut self) -> Self {
        self.atlas_size = self.atlas_size.max(MIN_ATLAS_SIZE);
        if !self.intensity.is_finite() {
            self.intensity = 1.0;
        }
        if !self.speed.is_finite() {
            self.speed = 1.0;
        }
        self
    }
}
