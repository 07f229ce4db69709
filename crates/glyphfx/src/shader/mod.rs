#![forbid(unsafe_code)]

//! Shader program registry.
//!
//! Programs live in two namespaces, [`ProgramFamily::Scene`] (glyph pass) and
//! [`ProgramFamily::Post`] (full-screen pass), each keyed by name. Every
//! registration path ends in the same place: a [`ValidatedProgram`] handed to a
//! [`ProgramCompiler`], whose output replaces the previous entry only on
//! success.
//!
//! Lookups for unknown keys fall back to the family default (`default` or
//! `identity`); a missing default is an initialization error.

mod builtin;
mod fetch;
mod template;
mod validate;

use std::fmt;

use rustc_hash::FxHashMap;

pub use builtin::{IDENTITY_FRAGMENT, IDENTITY_VERTEX, default_effect};
pub use fetch::{FetchConfig, FsFetcher, ShaderFetcher};
pub use template::{FRAGMENT_ENTRY, ShaderEffect, VERTEX_ENTRY, check_balanced, generate};
pub use validate::{
    BIND_GROUP, FRAME_UNIFORM_MEMBERS, FRAME_UNIFORMS_BINDING, SAMPLER_BINDING, StageSource,
    TEXTURE_BINDING, UniformBindings, ValidatedProgram, validate_program,
};

use crate::error::{RenderError, ShaderError};

/// Program namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramFamily {
    /// Glyph quads sampling the atlas.
    Scene,
    /// Full-screen pass sampling the offscreen scene target.
    Post,
}

impl ProgramFamily {
    pub const ALL: [Self; 2] = [Self::Scene, Self::Post];

    /// Key used when a lookup misses.
    #[must_use]
    pub const fn default_key(self) -> &'static str {
        match self {
            Self::Scene => "default",
            Self::Post => "identity",
        }
    }
}

impl fmt::Display for ProgramFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scene => f.write_str("scene"),
            Self::Post => f.write_str("post"),
        }
    }
}

/// How a program's source was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramOrigin {
    Effect,
    Raw,
}

/// Turns validated source into a backend program object.
pub trait ProgramCompiler {
    type Program;

    fn link(&mut self, program: &ValidatedProgram) -> Result<Self::Program, ShaderError>;
}

/// A linked program and its resolved bindings.
#[derive(Debug)]
pub struct ProgramInfo<P> {
    pub program: P,
    pub key: String,
    pub family: ProgramFamily,
    pub uniforms: UniformBindings,
    pub origin: ProgramOrigin,
}

/// Key → program maps for both families, owned by one renderer.
#[derive(Debug)]
pub struct ProgramRegistry<P> {
    scene: FxHashMap<String, ProgramInfo<P>>,
    post: FxHashMap<String, ProgramInfo<P>>,
}

impl<P> Default for ProgramRegistry<P> {
    fn default() -> Self {
        Self {
            scene: FxHashMap::default(),
            post: FxHashMap::default(),
        }
    }
}

impl<P> ProgramRegistry<P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, family: ProgramFamily) -> &FxHashMap<String, ProgramInfo<P>> {
        match family {
            ProgramFamily::Scene => &self.scene,
            ProgramFamily::Post => &self.post,
        }
    }

    fn map_mut(&mut self, family: ProgramFamily) -> &mut FxHashMap<String, ProgramInfo<P>> {
        match family {
            ProgramFamily::Scene => &mut self.scene,
            ProgramFamily::Post => &mut self.post,
        }
    }

    /// Register the `default` scene effect and `identity` post program.
    pub fn install_builtins<C>(&mut self, compiler: &mut C) -> Result<(), RenderError>
    where
        C: ProgramCompiler<Program = P>,
    {
        self.register_effect_program(
            compiler,
            ProgramFamily::Scene.default_key(),
            &default_effect(),
        )?;
        self.register_raw_program(
            compiler,
            ProgramFamily::Post,
            ProgramFamily::Post.default_key(),
            IDENTITY_VERTEX,
            IDENTITY_FRAGMENT,
        )
    }

    /// Generate, compile and link a scene program from effect snippets.
    pub fn register_effect_program<C>(
        &mut self,
        compiler: &mut C,
        key: &str,
        effect: &ShaderEffect,
    ) -> Result<(), RenderError>
    where
        C: ProgramCompiler<Program = P>,
    {
        let source = generate(effect).map_err(|err| rejected(key, err))?;
        self.install(
            compiler,
            ProgramFamily::Scene,
            key,
            &source,
            &source,
            ProgramOrigin::Effect,
        )
    }

    /// Compile and link a caller-supplied program pair as-is.
    pub fn register_raw_program<C>(
        &mut self,
        compiler: &mut C,
        family: ProgramFamily,
        key: &str,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<(), RenderError>
    where
        C: ProgramCompiler<Program = P>,
    {
        self.install(
            compiler,
            family,
            key,
            vertex_src,
            fragment_src,
            ProgramOrigin::Raw,
        )
    }

    /// Fetch both stages, then register them as a raw program.
    ///
    /// If either fetch fails nothing is compiled and the registry is unchanged.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_raw_program_from_files<C, F>(
        &mut self,
        compiler: &mut C,
        fetcher: &F,
        family: ProgramFamily,
        key: &str,
        vertex_url: &str,
        fragment_url: &str,
        config: &FetchConfig,
    ) -> Result<(), RenderError>
    where
        C: ProgramCompiler<Program = P>,
        F: ShaderFetcher,
    {
        let vertex_src = fetcher.fetch(vertex_url, config).await.inspect_err(|err| {
            tracing::warn!(key, %err, "vertex shader fetch failed");
        })?;
        let fragment_src = fetcher.fetch(fragment_url, config).await.inspect_err(|err| {
            tracing::warn!(key, %err, "fragment shader fetch failed");
        })?;
        self.register_raw_program(compiler, family, key, &vertex_src, &fragment_src)
    }

    fn install<C>(
        &mut self,
        compiler: &mut C,
        family: ProgramFamily,
        key: &str,
        vertex_src: &str,
        fragment_src: &str,
        origin: ProgramOrigin,
    ) -> Result<(), RenderError>
    where
        C: ProgramCompiler<Program = P>,
    {
        let validated =
            validate_program(family, vertex_src, fragment_src).map_err(|err| rejected(key, err))?;
        let program = compiler
            .link(&validated)
            .map_err(|err| rejected(key, err))?;

        let info = ProgramInfo {
            program,
            key: key.to_string(),
            family,
            uniforms: validated.bindings,
            origin,
        };
        let replaced = self.map_mut(family).insert(key.to_string(), info).is_some();
        tracing::info!(%family, key, ?origin, replaced, "registered shader program");
        Ok(())
    }

    /// Program for `key`, falling back to the family default.
    pub fn get(&self, family: ProgramFamily, key: &str) -> Result<&ProgramInfo<P>, RenderError> {
        let map = self.map(family);
        map.get(key)
            .or_else(|| map.get(family.default_key()))
            .ok_or(RenderError::MissingDefaultProgram(family))
    }

    #[must_use]
    pub fn contains(&self, family: ProgramFamily, key: &str) -> bool {
        self.map(family).contains_key(key)
    }

    /// Registered keys of `family`, sorted.
    #[must_use]
    pub fn keys(&self, family: ProgramFamily) -> Vec<&str> {
        let mut keys: Vec<&str> = self.map(family).keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Drop a program. Family defaults stay registered.
    pub fn remove(&mut self, family: ProgramFamily, key: &str) -> bool {
        if key == family.default_key() {
            tracing::warn!(%family, key, "refusing to remove default program");
            return false;
        }
        self.map_mut(family).remove(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scene.len() + self.post.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scene.is_empty() && self.post.is_empty()
    }

    /// Release every program, defaults included.
    pub fn dispose(&mut self) {
        let released = self.len();
        self.scene.clear();
        self.post.clear();
        tracing::debug!(released, "disposed shader programs");
    }
}

fn rejected(key: &str, err: ShaderError) -> RenderError {
    tracing::warn!(key, %err, "shader program rejected");
    RenderError::shader(key, err)
}
