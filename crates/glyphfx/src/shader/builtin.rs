#![forbid(unsafe_code)]

//! Programs registered by [`ProgramRegistry::install_builtins`](super::ProgramRegistry::install_builtins).

use super::template::ShaderEffect;

/// Scene fallback: unwarped sampling, layout colour.
#[must_use]
pub fn default_effect() -> ShaderEffect {
    ShaderEffect::new("return local_uv;", "return base_color;")
}

/// Post fallback vertex stage: full-screen quad pass-through.
pub const IDENTITY_VERTEX: &str = r"struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.clip = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}
";

/// Post fallback fragment stage: copies the scene target unchanged.
pub const IDENTITY_FRAGMENT: &str = r"struct FrameUniforms {
    resolution: vec2<f32>,
    time: f32,
    intensity: f32,
    speed: f32,
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(0) @binding(1) var scene: texture_2d<f32>;
@group(0) @binding(2) var scene_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(scene, scene_sampler, uv);
}
";
