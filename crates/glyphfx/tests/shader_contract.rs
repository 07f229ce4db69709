//! Program registration through every entry point: effect snippets, raw
//! source pairs and file-backed sources.

use std::fs;

use glyphfx::backend::{HeadlessBackend, HeadlessProgram};
use glyphfx::error::{FetchError, RenderError, ShaderError};
use glyphfx::shader::{
    FetchConfig, FsFetcher, IDENTITY_FRAGMENT, IDENTITY_VERTEX, ProgramFamily, ProgramOrigin,
    ProgramRegistry, ShaderEffect, default_effect, generate,
};

fn registry() -> (ProgramRegistry<HeadlessProgram>, HeadlessBackend) {
    let mut backend = HeadlessBackend::new(64, 64);
    let mut registry = ProgramRegistry::new();
    registry
        .install_builtins(&mut backend)
        .expect("builtins link");
    (registry, backend)
}

fn ripple() -> ShaderEffect {
    ShaderEffect::new(
        "let wave = sin(local_uv.y * 12.0 + time * speed) * 0.02 * intensity;
         return local_uv + vec2<f32>(wave, 0.0);",
        "let n = value_noise(global_uv * 40.0 + vec2<f32>(time, 0.0));
         return base_color * (0.8 + 0.2 * n);",
    )
}

#[test]
fn effect_program_registers_under_scene() {
    let (mut registry, mut backend) = registry();
    registry
        .register_effect_program(&mut backend, "ripple", &ripple())
        .expect("ripple links");

    let info = registry
        .get(ProgramFamily::Scene, "ripple")
        .expect("registered");
    assert_eq!(info.origin, ProgramOrigin::Effect);
    assert!(info.uniforms.samples_texture());
    assert_eq!(
        registry.keys(ProgramFamily::Scene),
        vec!["default", "ripple"]
    );
}

#[test]
fn unbalanced_snippet_is_rejected_before_compilation() {
    let (mut registry, mut backend) = registry();
    let effect = ShaderEffect::new("return (local_uv;", "return base_color;");

    let err = registry
        .register_effect_program(&mut backend, "broken", &effect)
        .expect_err("unclosed paren");
    assert!(matches!(
        err,
        RenderError::Shader {
            error: ShaderError::Structure { .. },
            ..
        }
    ));
    assert!(!registry.contains(ProgramFamily::Scene, "broken"));
}

#[test]
fn wrong_return_type_fails_to_compile() {
    let (mut registry, mut backend) = registry();
    let effect = ShaderEffect::new("return local_uv;", "return alpha;");
    let err = registry
        .register_effect_program(&mut backend, "scalar", &effect)
        .expect_err("shade must return vec3");
    assert!(matches!(
        err,
        RenderError::Shader {
            error: ShaderError::Compile { .. },
            ..
        }
    ));
}

#[test]
fn scene_source_does_not_link_as_post() {
    let (mut registry, mut backend) = registry();
    let source = generate(&default_effect()).expect("generates");
    let err = registry
        .register_raw_program(&mut backend, ProgramFamily::Post, "wrong", &source, &source)
        .expect_err("post vertices carry two attributes");
    assert!(matches!(
        err,
        RenderError::Shader {
            error: ShaderError::Link { .. },
            ..
        }
    ));
    assert_eq!(registry.keys(ProgramFamily::Post), vec!["identity"]);
}

#[test]
fn defaults_cannot_be_removed() {
    let (mut registry, mut backend) = registry();
    registry
        .register_raw_program(
            &mut backend,
            ProgramFamily::Post,
            "copy",
            IDENTITY_VERTEX,
            IDENTITY_FRAGMENT,
        )
        .expect("identity pair links under any key");

    assert!(!registry.remove(ProgramFamily::Post, "identity"));
    assert!(registry.remove(ProgramFamily::Post, "copy"));
    let fallback = registry
        .get(ProgramFamily::Post, "copy")
        .expect("falls back");
    assert_eq!(fallback.key, "identity");
}

// ============================================================================
// File-backed sources
// ============================================================================

#[test]
fn post_program_loads_from_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("post.vert.wgsl"), IDENTITY_VERTEX).expect("write vs");
    fs::write(dir.path().join("post.frag.wgsl"), IDENTITY_FRAGMENT).expect("write fs");

    let (mut registry, mut backend) = registry();
    let fetcher = FsFetcher::new(dir.path());
    pollster::block_on(registry.register_raw_program_from_files(
        &mut backend,
        &fetcher,
        ProgramFamily::Post,
        "from-disk",
        "post.vert.wgsl",
        "post.frag.wgsl",
        &FetchConfig::default(),
    ))
    .expect("loads and links");

    let info = registry
        .get(ProgramFamily::Post, "from-disk")
        .expect("registered");
    assert_eq!(info.key, "from-disk");
    assert_eq!(info.origin, ProgramOrigin::Raw);
}

#[test]
fn missing_file_leaves_registry_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("post.vert.wgsl"), IDENTITY_VERTEX).expect("write vs");

    let (mut registry, mut backend) = registry();
    let before = registry.len();
    let fetcher = FsFetcher::new(dir.path());
    let err = pollster::block_on(registry.register_raw_program_from_files(
        &mut backend,
        &fetcher,
        ProgramFamily::Post,
        "half",
        "post.vert.wgsl",
        "post.frag.wgsl",
        &FetchConfig::default(),
    ))
    .expect_err("fragment file missing");

    match err {
        RenderError::Fetch(FetchError::Status { status, url, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(url, "post.frag.wgsl");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.len(), before);
    assert!(!registry.contains(ProgramFamily::Post, "half"));
}

#[test]
fn size_limit_applies_to_fetched_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("vs.wgsl"), IDENTITY_VERTEX).expect("write vs");
    fs::write(dir.path().join("fs.wgsl"), IDENTITY_FRAGMENT).expect("write fs");

    let (mut registry, mut backend) = registry();
    let config = FetchConfig {
        max_bytes: Some(16),
        ..FetchConfig::default()
    };
    let err = pollster::block_on(registry.register_raw_program_from_files(
        &mut backend,
        &FsFetcher::new(dir.path()),
        ProgramFamily::Post,
        "big",
        "vs.wgsl",
        "fs.wgsl",
        &config,
    ))
    .expect_err("sources exceed 16 bytes");
    assert!(matches!(
        err,
        RenderError::Fetch(FetchError::Status { status: 413, .. })
    ));
}
