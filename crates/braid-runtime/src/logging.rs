//! Global `tracing` subscriber setup.
//!
//! The runtime calls [`init_from_config`] with the `logging` section of
//! [`BraidConfig`](crate::config::BraidConfig). Applications that install
//! logging themselves can use [`LoggingBuilder`] directly:
//!
//! ```rust,ignore
//! LoggingBuilder::new()
//!     .with_level(tracing::Level::DEBUG)
//!     .directive("braid_core::integration=trace")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```
//!
//! `RUST_LOG`, when set, replaces the base level. Directives are added on
//! top of either.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Which span transitions are logged.
///
/// Pipeline stages and outbound calls run inside spans, so `LIFECYCLE`
/// gives one line when each opens and one when it closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    const fn flags(new: bool, enter: bool, exit: bool, close: bool) -> Self {
        Self {
            new,
            enter,
            exit,
            close,
        }
    }

    pub const NONE: Self = Self::flags(false, false, false, false);
    /// Creation and close.
    pub const LIFECYCLE: Self = Self::flags(true, false, false, true);
    /// Enter and exit.
    pub const ACTIVE: Self = Self::flags(false, true, true, false);
    pub const FULL: Self = Self::flags(true, true, true, true);

    fn as_fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, flag)| acc | flag)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self::flags(config.new, config.enter, config.exit, config.close)
    }
}

/// Installs the subscriber described by `config`; a no-op when one is
/// already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Assembles an `EnvFilter` plus one fmt layer.
#[derive(Debug, Default)]
pub struct LoggingBuilder {
    level: Option<tracing::Level>,
    directives: Vec<String>,
    format: LogFormat,
    output: LogOutput,
    log_file: Option<PathBuf>,
    rotation: LogRotation,
    span_events: SpanEvents,
    show_target: bool,
    show_thread_ids: bool,
    show_source: bool,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            show_target: true,
            ..Default::default()
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new()
            .with_level(config.level.to_tracing_level())
            .format(config.format)
            .output(config.output)
            .rotation(config.rotation)
            .span_events((&config.span_events).into())
            .with_thread_ids(config.thread_ids)
            .with_source_location(config.file_location);
        builder.log_file.clone_from(&config.file_path);

        // Map order is unstable.
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));
        for (target, level) in filters {
            builder = builder.directive(&format!("{target}={level}"));
        }
        builder
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Adds an `EnvFilter` directive, e.g. `braid_core=debug`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_owned());
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Target file for [`LogOutput::File`].
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.show_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.show_thread_ids = enabled;
        self
    }

    /// Includes file and line of each event.
    pub fn with_source_location(mut self, enabled: bool) -> Self {
        self.show_source = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = self.level.unwrap_or(tracing::Level::INFO);
            EnvFilter::new(level.to_string().to_ascii_lowercase())
        });

        self.directives
            .iter()
            .fold(base, |filter, raw| match raw.parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(err) => {
                    eprintln!("braid: skipping log directive {raw:?}: {err}");
                    filter
                }
            })
    }

    fn appender(&self, path: &Path) -> RollingFileAppender {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let prefix = path.file_name().unwrap_or(OsStr::new("braid.log"));
        match self.rotation {
            LogRotation::Never => rolling::never(dir, prefix),
            LogRotation::Hourly => rolling::hourly(dir, prefix),
            LogRotation::Daily => rolling::daily(dir, prefix),
        }
    }

    fn writer(&self) -> BoxMakeWriter {
        match (self.output, &self.log_file) {
            (LogOutput::Stdout, _) => BoxMakeWriter::new(std::io::stdout),
            (LogOutput::Stderr, _) => BoxMakeWriter::new(std::io::stderr),
            (LogOutput::File, Some(path)) => BoxMakeWriter::new(self.appender(path)),
            (LogOutput::File, None) => {
                eprintln!("braid: file logging has no file_path, writing to stdout");
                BoxMakeWriter::new(std::io::stdout)
            }
        }
    }

    fn fmt_layer(&self) -> BoxedLayer {
        let layer = fmt::layer()
            .with_writer(self.writer())
            .with_span_events(self.span_events.as_fmt_span())
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread_ids)
            .with_file(self.show_source)
            .with_line_number(self.show_source);

        match self.format {
            LogFormat::Full => layer.boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => {
                eprintln!("braid: json logs need the `json-log` feature, using compact");
                layer.compact().boxed()
            }
        }
    }

    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber globally; errors if one is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        tracing_subscriber::registry()
            .with(self.fmt_layer())
            .with(self.filter())
            .try_init()
    }
}
