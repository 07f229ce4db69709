#![forbid(unsafe_code)]

//! Log subscriber setup.
//!
//! The crate itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call [`init`] (feature `tracing-subscriber`).

/// Environment variable holding the `EnvFilter` directives.
pub const LOG_ENV: &str = "GLYPHFX_LOG";

/// Output format for [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// `"json"` selects JSON; anything else is compact text.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Compact
        }
    }
}

/// Install a global fmt subscriber filtered by `GLYPHFX_LOG` (default `info`).
///
/// Returns an error string if a global subscriber is already set.
#[cfg(feature = "tracing-subscriber")]
pub fn init(format: LogFormat) -> Result<(), String> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| err.to_string())
}
