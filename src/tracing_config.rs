//! Tracing subscriber setup for the command-line tool
//!
//! The library only emits `log` records and `tracing` spans; installing a
//! subscriber is left to the binary.

use tracing::Span;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors
    Console,
    /// Compact output without colors, for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// Standard error
    Console,
    /// A log file, written without colors
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    /// Standard error and a log file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it last
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let directive = self
            .env_filter
            .as_deref()
            .unwrap_or_else(|| self.verbosity_to_filter());
        Ok(EnvFilter::try_new(directive)?)
    }

    fn console_layer(&self) -> anyhow::Result<BoxedLayer> {
        let layer = match self.format {
            TracingFormat::Console => fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false)
                .compact()
                .with_filter(self.filter()?)
                .boxed(),
            TracingFormat::Compact => fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .compact()
                .with_filter(self.filter()?)
                .boxed(),
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => fmt::layer()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_filter(self.filter()?)
                .boxed(),
        };
        Ok(layer)
    }

    #[cfg(feature = "tracing-files")]
    fn file_layer(
        &self,
        path: &std::path::Path,
    ) -> anyhow::Result<(BoxedLayer, tracing_appender::non_blocking::WorkerGuard)> {
        use tracing_appender::{non_blocking, rolling};

        let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("bgswap.log"));
        let (writer, guard) = non_blocking(rolling::never(directory, file_name));

        let layer = match self.format {
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(self.filter()?)
                .boxed(),
            _ => fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .compact()
                .with_filter(self.filter()?)
                .boxed(),
        };
        Ok((layer, guard))
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match &self.output {
            TracingOutput::Console => layers.push(self.console_layer()?),
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let (layer, file_guard) = self.file_layer(path)?;
                layers.push(layer);
                guard._file_guard = Some(file_guard);
            },
            #[cfg(feature = "tracing-files")]
            TracingOutput::Both(path) => {
                layers.push(self.console_layer()?);
                let (layer, file_guard) = self.file_layer(path)?;
                layers.push(layer);
                guard._file_guard = Some(file_guard);
            },
        }

        tracing_subscriber::registry().with(layers).try_init()?;

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "🚀 Background swap session started");
        }
        Ok(guard)
    }
}

/// Initialize tracing with CLI defaults and a fresh session id
///
/// # Errors
/// - As [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span creation helpers for CLI operations
pub mod spans {
    use super::Span;

    /// Span for the whole batch
    #[must_use]
    pub fn batch_processing(file_count: usize, mode: &str) -> Span {
        tracing::span!(
            tracing::Level::INFO,
            "batch_processing",
            file_count = %file_count,
            mode = %mode
        )
    }

    /// Span for one input file
    #[must_use]
    pub fn file_processing(file_path: &std::path::Path) -> Span {
        tracing::span!(
            tracing::Level::INFO,
            "file_processing",
            file_path = %file_path.display()
        )
    }
}
