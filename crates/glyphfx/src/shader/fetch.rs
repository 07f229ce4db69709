#![forbid(unsafe_code)]

//! Shader source fetching for file-based registration.

use std::future::Future;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::error::FetchError;

/// Per-request options.
///
/// `headers` and `no_cache` are only meaningful to HTTP fetchers implemented
/// by the host; [`FsFetcher`] ignores them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchConfig {
    /// Extra request headers (HTTP fetchers only).
    pub headers: Vec<(String, String)>,
    /// Bypass any cache between the caller and the source (HTTP fetchers only).
    pub no_cache: bool,
    /// Reject sources larger than this many bytes.
    pub max_bytes: Option<usize>,
}

/// Retrieves shader text by URL.
///
/// Fetchers report non-success as [`FetchError::Status`] and unreachable
/// sources as [`FetchError::Io`]. There are no retries.
pub trait ShaderFetcher {
    fn fetch(
        &self,
        url: &str,
        config: &FetchConfig,
    ) -> impl Future<Output = Result<String, FetchError>>;
}

/// Fetcher over the local filesystem.
///
/// Accepts `file://` URLs and paths relative to a base directory. Relative
/// paths may not climb out of the base directory.
///
/// Files are read synchronously, so the returned future is ready on its first
/// poll. The size limit is checked against file metadata before reading.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    base_dir: PathBuf,
}

impl FsFetcher {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(FetchError::Io {
                url: url.to_string(),
                message: format!("unsupported scheme '{scheme}'"),
            });
        }
        let relative = Path::new(url);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(status(url, 403, "Forbidden"));
        }
        Ok(self.base_dir.join(relative))
    }
}

fn status(url: &str, code: u16, reason: &str) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: code,
        reason: reason.to_string(),
    }
}

fn io_status(url: &str, err: &io::Error) -> FetchError {
    match err.kind() {
        io::ErrorKind::NotFound => status(url, 404, "Not Found"),
        io::ErrorKind::PermissionDenied => status(url, 403, "Forbidden"),
        io::ErrorKind::InvalidData => status(url, 415, "Unsupported Media Type"),
        _ => status(url, 500, "Internal Server Error"),
    }
}

impl ShaderFetcher for FsFetcher {
    async fn fetch(&self, url: &str, config: &FetchConfig) -> Result<String, FetchError> {
        let path = self.resolve(url)?;
        let failed = |err: io::Error| {
            tracing::debug!(url, path = %path.display(), %err, "shader fetch failed");
            io_status(url, &err)
        };
        let file = File::open(&path).map_err(failed)?;
        let len = file.metadata().map_err(failed)?.len();
        let limit = config.max_bytes.map(|max| max as u64);
        if limit.is_some_and(|max| len > max) {
            return Err(status(url, 413, "Payload Too Large"));
        }
        // The file may grow between the size check and the read.
        let mut text = String::new();
        file.take(limit.map_or(u64::MAX, |max| max.saturating_add(1)))
            .read_to_string(&mut text)
            .map_err(failed)?;
        if limit.is_some_and(|max| text.len() as u64 > max) {
            return Err(status(url, 413, "Payload Too Large"));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_relative_and_file_urls() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("post.wgsl"), "// post").expect("write");
        let fetcher = FsFetcher::new(dir.path());
        let config = FetchConfig::default();

        let rel = pollster::block_on(fetcher.fetch("post.wgsl", &config)).expect("relative");
        assert_eq!(rel, "// post");

        let url = format!("file://{}", dir.path().join("post.wgsl").display());
        let abs = pollster::block_on(fetcher.fetch(&url, &config)).expect("file url");
        assert_eq!(abs, "// post");
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = FsFetcher::new(dir.path());
        let err = pollster::block_on(fetcher.fetch("nope.wgsl", &FetchConfig::default()))
            .expect_err("missing");
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(err.url(), "nope.wgsl");
    }

    #[test]
    fn parent_traversal_is_forbidden() {
        let fetcher = FsFetcher::new("/srv/shaders");
        let err = pollster::block_on(fetcher.fetch("../secret.wgsl", &FetchConfig::default()))
            .expect_err("escape");
        assert!(matches!(err, FetchError::Status { status: 403, .. }));
    }

    #[test]
    fn remote_schemes_are_unreachable() {
        let fetcher = FsFetcher::new(".");
        let err = pollster::block_on(
            fetcher.fetch("https://example.invalid/a.wgsl", &FetchConfig::default()),
        )
        .expect_err("no network");
        assert!(matches!(err, FetchError::Io { .. }));
    }

    #[test]
    fn size_limit_is_enforced() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("big.wgsl"), "x".repeat(64)).expect("write");
        let fetcher = FsFetcher::new(dir.path());
        let config = FetchConfig {
            max_bytes: Some(16),
            ..FetchConfig::default()
        };
        let err = pollster::block_on(fetcher.fetch("big.wgsl", &config)).expect_err("too big");
        assert!(matches!(err, FetchError::Status { status: 413, .. }));
    }

    #[test]
    fn source_at_the_limit_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("edge.wgsl"), "x".repeat(16)).expect("write");
        let config = FetchConfig {
            max_bytes: Some(16),
            headers: vec![("Accept".into(), "text/wgsl".into())],
            no_cache: true,
        };
        let text = pollster::block_on(FsFetcher::new(dir.path()).fetch("edge.wgsl", &config))
            .expect("exactly at the limit");
        assert_eq!(text.len(), 16);
    }

    #[test]
    fn non_utf8_source_is_415() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("bin.wgsl"), [0xFF, 0xFE, 0x00]).expect("write");
        let err = pollster::block_on(
            FsFetcher::new(dir.path()).fetch("bin.wgsl", &FetchConfig::default()),
        )
        .expect_err("not text");
        assert!(matches!(err, FetchError::Status { status: 415, .. }));
    }
}
