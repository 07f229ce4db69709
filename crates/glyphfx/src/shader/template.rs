#![forbid(unsafe_code)]

//! Effect program code generation.
//!
//! A [`ShaderEffect`] supplies two function bodies. [`generate`] wraps them
//! into a complete WGSL module: shared uniforms and bindings, a pass-through
//! vertex stage, noise helpers, and a fragment stage that maps the fragment
//! into glyph-local UV space, calls `warp`, samples the atlas inside the
//! glyph's UV bounds, then calls `shade` and premultiplies.

use crate::error::ShaderError;

/// Pair of WGSL function bodies plugged into the effect template.
///
/// `warp_body` has these parameters in scope and must return `vec2<f32>`
/// (clamped to `[0, 1]` afterwards):
/// `local_uv, global_uv: vec2<f32>`, `uv_bounds: vec4<f32>`,
/// `frag_coord, resolution: vec2<f32>`, `time, intensity, speed: f32`.
///
/// `shade_body` sees `local_uv, global_uv: vec2<f32>`, `base_color: vec3<f32>`,
/// `alpha: f32`, `frag_coord, resolution: vec2<f32>`, `time, intensity, speed:
/// f32` and must return `vec3<f32>` (clamped to non-negative afterwards).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderEffect {
    pub warp_body: String,
    pub shade_body: String,
}

impl ShaderEffect {
    #[must_use]
    pub fn new(warp_body: impl Into<String>, shade_body: impl Into<String>) -> Self {
        Self {
            warp_body: warp_body.into(),
            shade_body: shade_body.into(),
        }
    }
}

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

const PRELUDE: &str = r"struct FrameUniforms {
    resolution: vec2<f32>,
    time: f32,
    intensity: f32,
    speed: f32,
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(0) @binding(1) var atlas: texture_2d<f32>;
@group(0) @binding(2) var atlas_sampler: sampler;

struct VertexIn {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
    @location(3) uv_bounds: vec4<f32>,
};

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
    @location(2) uv_bounds: vec4<f32>,
};

@vertex
fn vs_main(in: VertexIn) -> VertexOut {
    var out: VertexOut;
    out.clip = vec4<f32>(in.position, 0.0, 1.0);
    out.uv = in.uv;
    out.color = in.color;
    out.uv_bounds = in.uv_bounds;
    return out;
}

fn hash2(p: vec2<f32>) -> f32 {
    let h = dot(p, vec2<f32>(127.1, 311.7));
    return fract(sin(h) * 43758.5453);
}

fn value_noise(p: vec2<f32>) -> f32 {
    let i = floor(p);
    let f = fract(p);
    let u = f * f * (3.0 - 2.0 * f);
    let a = hash2(i);
    let b = hash2(i + vec2<f32>(1.0, 0.0));
    let c = hash2(i + vec2<f32>(0.0, 1.0));
    let d = hash2(i + vec2<f32>(1.0, 1.0));
    return mix(mix(a, b, u.x), mix(c, d, u.x), u.y);
}
";

const WARP_SIGNATURE: &str = "fn warp(
    local_uv: vec2<f32>,
    global_uv: vec2<f32>,
    uv_bounds: vec4<f32>,
    frag_coord: vec2<f32>,
    resolution: vec2<f32>,
    time: f32,
    intensity: f32,
    speed: f32,
) -> vec2<f32> {
";

const SHADE_SIGNATURE: &str = "fn shade(
    local_uv: vec2<f32>,
    global_uv: vec2<f32>,
    base_color: vec3<f32>,
    alpha: f32,
    frag_coord: vec2<f32>,
    resolution: vec2<f32>,
    time: f32,
    intensity: f32,
    speed: f32,
) -> vec3<f32> {
";

const FRAGMENT_MAIN: &str = r"@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let lo = in.uv_bounds.xy;
    let hi = in.uv_bounds.zw;
    let extent = max(hi - lo, vec2<f32>(1e-6));
    let local_uv = clamp((in.uv - lo) / extent, vec2<f32>(0.0), vec2<f32>(1.0));
    let frag_coord = in.clip.xy;
    let warped = clamp(
        warp(local_uv, in.uv, in.uv_bounds, frag_coord, frame.resolution, frame.time, frame.intensity, frame.speed),
        vec2<f32>(0.0),
        vec2<f32>(1.0),
    );
    let texel = textureSample(atlas, atlas_sampler, mix(lo, hi, warped));
    let alpha = texel.a * in.color.a;
    let rgb = max(
        shade(warped, in.uv, in.color.rgb, alpha, frag_coord, frame.resolution, frame.time, frame.intensity, frame.speed),
        vec3<f32>(0.0),
    );
    return vec4<f32>(rgb * alpha, alpha);
}
";

/// Check both snippets for balance, then emit the complete WGSL module.
pub fn generate(effect: &ShaderEffect) -> Result<String, ShaderError> {
    check_balanced("warp", &effect.warp_body)?;
    check_balanced("shade", &effect.shade_body)?;

    let mut src = String::with_capacity(
        PRELUDE.len()
            + WARP_SIGNATURE.len()
            + SHADE_SIGNATURE.len()
            + FRAGMENT_MAIN.len()
            + effect.warp_body.len()
            + effect.shade_body.len()
            + 16,
    );
    src.push_str(PRELUDE);
    src.push('\n');
    push_function(&mut src, WARP_SIGNATURE, &effect.warp_body);
    push_function(&mut src, SHADE_SIGNATURE, &effect.shade_body);
    src.push_str(FRAGMENT_MAIN);
    Ok(src)
}

fn push_function(src: &mut String, signature: &str, body: &str) {
    src.push_str(signature);
    for line in body.trim_end().lines() {
        src.push_str("    ");
        src.push_str(line);
        src.push('\n');
    }
    src.push_str("}\n\n");
}

/// Reject unbalanced `()`, `[]`, `{}` outside comments.
///
/// Line and column are 1-based and refer to the snippet itself.
pub fn check_balanced(snippet: &'static str, body: &str) -> Result<(), ShaderError> {
    let err = |line, column, message: String| ShaderError::Structure {
        snippet,
        line,
        column,
        message,
    };

    let mut stack: Vec<(char, usize, usize)> = Vec::new();
    let mut chars = body.chars().peekable();
    let (mut line, mut column) = (1usize, 0usize);
    let mut block_depth = 0usize;

    while let Some(ch) = chars.next() {
        if ch == '\n' {
            line += 1;
            column = 0;
            continue;
        }
        column += 1;

        if block_depth > 0 {
            match (ch, chars.peek()) {
                ('*', Some('/')) => {
                    chars.next();
                    column += 1;
                    block_depth -= 1;
                }
                ('/', Some('*')) => {
                    chars.next();
                    column += 1;
                    block_depth += 1;
                }
                _ => {}
            }
            continue;
        }

        match ch {
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|&c| c != '\n') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                column += 1;
                block_depth = 1;
            }
            '(' | '[' | '{' => stack.push((ch, line, column)),
            ')' | ']' | '}' => {
                let open = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((top, ..)) if top == open => {}
                    Some((top, ..)) => {
                        return Err(err(
                            line,
                            column,
                            format!("mismatched `{ch}`, expected `{}`", closer(top)),
                        ));
                    }
                    None => return Err(err(line, column, format!("unmatched `{ch}`"))),
                }
            }
            _ => {}
        }
    }

    if block_depth > 0 {
        return Err(err(line, column, "unterminated block comment".to_string()));
    }
    if let Some((open, l, c)) = stack.pop() {
        return Err(err(l, c, format!("unclosed `{open}`")));
    }
    Ok(())
}

const fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}
