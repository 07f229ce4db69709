#![forbid(unsafe_code)]

//! Error taxonomy.
//!
//! Construction-time failures ([`RenderError::ResourceCreation`]) are fatal.
//! Per-call failures (bad shader, atlas overflow, fetch failure) leave prior
//! state intact: the previous program and geometry keep rendering.

use std::fmt;

use crate::shader::ProgramFamily;

/// Atlas packing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasError {
    /// The padded cell does not fit in the remaining atlas space.
    ///
    /// There is no eviction or growth; the caller decides whether to `reset`.
    Full {
        cell_width: u32,
        cell_height: u32,
        atlas_width: u32,
        atlas_height: u32,
    },
}

impl fmt::Display for AtlasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full {
                cell_width,
                cell_height,
                atlas_width,
                atlas_height,
            } => write!(
                f,
                "glyph atlas full: cannot pack {cell_width}x{cell_height} cell into {atlas_width}x{atlas_height} atlas"
            ),
        }
    }
}

impl std::error::Error for AtlasError {}

/// Which half of a program pair a diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// Shader build failures. All are recoverable: the registry keeps the
/// previous program for the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// Unbalanced delimiters in an effect snippet, caught before compilation.
    Structure {
        snippet: &'static str,
        line: usize,
        column: usize,
        message: String,
    },
    /// WGSL parse or validation failure for one stage.
    Compile {
        stage: ShaderStage,
        diagnostic: String,
    },
    /// Stages compiled but do not satisfy the interface contract or each other.
    Link { diagnostic: String },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structure {
                snippet,
                line,
                column,
                message,
            } => write!(f, "{snippet} snippet {line}:{column}: {message}"),
            Self::Compile { stage, diagnostic } => {
                write!(f, "{stage} shader failed to compile:\n{diagnostic}")
            }
            Self::Link { diagnostic } => write!(f, "program failed to link: {diagnostic}"),
        }
    }
}

impl std::error::Error for ShaderError {}

/// Shader source fetch failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The source answered with a non-success status.
    Status {
        url: String,
        status: u16,
        reason: String,
    },
    /// The source could not be reached at all.
    Io { url: String, message: String },
}

impl FetchError {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Status { url, .. } | Self::Io { url, .. } => url,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status {
                url,
                status,
                reason,
            } => write!(f, "failed to fetch {url}: {status} {reason}"),
            Self::Io { url, message } => write!(f, "failed to fetch {url}: {message}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Top-level renderer error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// GPU adapter/device/object creation failed.
    ResourceCreation(String),
    Atlas(AtlasError),
    Shader { key: String, error: ShaderError },
    Fetch(FetchError),
    /// The offscreen colour target for the post pass could not be allocated.
    FramebufferIncomplete {
        width: u32,
        height: u32,
        reason: String,
    },
    /// The fallback program of a family was never registered.
    MissingDefaultProgram(ProgramFamily),
    /// Surface acquisition/presentation failed for this frame.
    Surface(String),
}

impl RenderError {
    #[must_use]
    pub fn shader(key: &str, error: ShaderError) -> Self {
        Self::Shader {
            key: key.to_string(),
            error,
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceCreation(msg) => write!(f, "GPU resource creation failed: {msg}"),
            Self::Atlas(err) => err.fmt(f),
            Self::Shader { key, error } => write!(f, "program '{key}': {error}"),
            Self::Fetch(err) => err.fmt(f),
            Self::FramebufferIncomplete {
                width,
                height,
                reason,
            } => write!(f, "offscreen target {width}x{height} incomplete: {reason}"),
            Self::MissingDefaultProgram(family) => write!(
                f,
                "no '{}' program registered for the {family} family",
                family.default_key()
            ),
            Self::Surface(msg) => write!(f, "surface error: {msg}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Atlas(err) => Some(err),
            Self::Shader { error, .. } => Some(error),
            Self::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AtlasError> for RenderError {
    fn from(err: AtlasError) -> Self {
        Self::Atlas(err)
    }
}

impl From<FetchError> for RenderError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}
