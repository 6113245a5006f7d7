//! Structured logging utilities for MARGIE
//!
//! All logs use structured fields so a run can be reconstructed from the
//! log stream alone.
//!
//! # Log Format Conventions
//!
//! - `operation`: what is happening ("restore", "capture", "engine", "load")
//! - `status`: the result ("hit", "miss", "success", "failed")
//! - `computation`: descriptor name (e.g. "prodigal")
//! - `artifact`: artifact name within the computation (e.g. "gff")
//! - `fingerprint`: 16-hex input fingerprint
//! - `size_bytes`: payload size
//! - `run_id`: ledger run identifier
//!
//! # Examples
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(
//!     operation = operations::RESTORE,
//!     status = status::HIT,
//!     computation = "prodigal",
//!     artifact = "gff",
//!     size_bytes = data.len(),
//!     "restored from cache"
//! );
//! ```
//!
//! Full restores additionally emit the plain line `Cache HIT for <computation>`.

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter that shows "margie" instead of the full module path
struct MargieFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for MargieFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(margie)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(margie): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Same layout without color (CI)
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// Resolve from `MARGIE_LOG_FORMAT`, then the configured value, then
    /// the environment default (compact under CI)
    pub fn resolve(configured: Option<&str>) -> Self {
        let from_env = std::env::var("MARGIE_LOG_FORMAT").ok();

        from_env
            .as_deref()
            .or(configured)
            .and_then(Self::parse)
            .unwrap_or_else(|| {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            })
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: overrides `level` (e.g. "debug", "margie=trace")
/// - `MARGIE_LOG_FORMAT`: "pretty", "compact" or "json"
/// - `CI`: if set, defaults to compact format
///
/// Logs go to stderr; stdout is reserved for command output.
pub fn init(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = match format {
        LogFormat::Pretty | LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(MargieFormatter {
                        with_ansi: format == LogFormat::Pretty,
                    })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };
}

/// Operation names
pub mod operations {
    pub const FINGERPRINT: &str = "fingerprint";
    pub const RESTORE: &str = "restore";
    pub const CAPTURE: &str = "capture";
    pub const ENGINE: &str = "engine";
    pub const LEDGER: &str = "ledger";
    pub const LOAD: &str = "load";
}

/// Status values
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const FAILED: &str = "failed";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const MISSING: &str = "missing";
    pub const STALE: &str = "stale";
}
