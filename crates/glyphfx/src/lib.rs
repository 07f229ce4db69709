#![forbid(unsafe_code)]

//! GPU text renderer with pluggable per-pixel effects.
//!
//! # Role
//! `glyphfx` draws text whose line breaking and character placement were
//! already decided by an external layout engine. Each character becomes a
//! textured quad sampling a shared glyph atlas, shaded by a hot-swappable WGSL
//! program, optionally followed by a full-screen post pass.
//!
//! # Primary responsibilities
//! - **GlyphAtlas**: style-aware cache packing rasterized characters into one
//!   RGBA texture with shelf allocation.
//! - **GeometryBuilder**: placements + atlas lookups → interleaved quad vertices.
//! - **ProgramRegistry**: effect-snippet code generation, naga compile/link
//!   checks, keyed scene and post programs with default fallbacks.
//! - **FrameController**: dirty tracking, resize handling and the
//!   direct-or-two-pass render plan over a [`RenderBackend`].
//!
//! # Backends
//! [`gpu::WgpuBackend`] (feature `gpu`) renders through wgpu;
//! [`HeadlessBackend`] records the same command stream in memory.

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod glyph_atlas;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod layout;
pub mod logging;
pub mod raster;
pub mod shader;
pub mod style;

pub use backend::{FrameUniforms, HeadlessBackend, RenderBackend, RenderPlan};
pub use config::RendererConfig;
pub use error::{AtlasError, FetchError, RenderError, ShaderError, ShaderStage};
pub use frame::{FrameClock, FrameController, FrameState, FrameStats};
pub use geometry::{GeometryBuilder, GlyphVertex, PixelSize, Viewport};
pub use glyph_atlas::{AtlasGlyph, CachedGlyph, GlyphAtlas, GlyphKey, UvRect};
pub use layout::{GlyphPlacement, TextLayoutProvider};
pub use raster::{FontBook, FontdueRasterizer, GlyphRasterizer, ProceduralRasterizer};
pub use shader::{ProgramFamily, ProgramRegistry, ShaderEffect};
pub use style::{FontSlant, FontStyle, FontVariant, FontWeight, Rgba};
