//! Tracing helpers
// (c) 2026 Ross Younger

use std::{
    fs::File,
    path::Path,
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Context as _;
use tracing_subscriber::{
    EnvFilter,
    fmt::{
        MakeWriter,
        time::{ChronoLocal, ChronoUtc},
    },
    prelude::*,
};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

const FRIENDLY_FORMAT_LOCAL: &str = "%Y-%m-%d %H:%M:%SL";
const FRIENDLY_FORMAT_UTC: &str = "%Y-%m-%d %H:%M:%SZ";

/// Environment variable that controls what gets logged to stderr
const STANDARD_ENV_VAR: &str = "RUST_LOG";
/// Environment variable that controls what gets logged to file
const LOG_FILE_DETAIL_ENV_VAR: &str = "RUST_LOG_FILE_DETAIL";

/// Computes the trace level from the `--debug` and `--quiet` options
#[must_use]
pub fn trace_level(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    }
}

/// Selects the format of time stamps in output messages
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
pub enum TimeFormat {
    /// Local time (as best as we can figure it out), as "year-month-day HH:MM:SS"
    #[default]
    Local,
    /// UTC time, as "year-month-day HH:MM:SS"
    Utc,
    /// UTC time, in the format described in [RFC 3339](https://datatracker.ietf.org/doc/html/rfc3339).
    ///
    /// Examples:
    /// `1997-11-12T09:55:06-06:00`
    /// `2010-03-14T18:32:03Z`
    Rfc3339,
}

/// Result type for `filter_for()`
struct FilterResult {
    filter: EnvFilter,
    used_env: bool, // Did we use the environment variable we were requested to?
}

/// Log filter setup:
/// Use a given environment variable; if it wasn't present, log only our own items at a given trace level.
fn filter_for(trace_level: &str, key: &str) -> anyhow::Result<FilterResult> {
    EnvFilter::try_from_env(key)
        .map(|filter| FilterResult {
            filter,
            used_env: true,
        })
        .or_else(|e| {
            // The env var was unset or invalid. Which is it?
            if std::env::var(key).is_ok() {
                anyhow::bail!("{key} (set in environment) was not understood: {e}");
            }
            Ok(FilterResult {
                filter: EnvFilter::try_new(format!("fcp={trace_level}"))?,
                used_env: false,
            })
        })
}

fn make_tracing_layer<S, W, F>(
    writer: W,
    filter: F,
    time_format: TimeFormat,
    show_target: bool,
    ansi: bool,
) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static + Sync + Send,
    F: tracing_subscriber::layer::Filter<S> + 'static + Sync + Send,
{
    let layer = tracing_subscriber::fmt::layer::<S>()
        .compact()
        .with_target(show_target)
        .with_ansi(ansi);

    // The timer has to go on before the writer and filter
    match time_format {
        TimeFormat::Local => layer
            .with_timer(ChronoLocal::new(FRIENDLY_FORMAT_LOCAL.into()))
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        TimeFormat::Utc => layer
            .with_timer(ChronoUtc::new(FRIENDLY_FORMAT_UTC.into()))
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        TimeFormat::Rfc3339 => layer
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    }
}

/// Where console traces go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTraceType {
    /// Trace to stderr
    Standard,
    /// Do not print traces anywhere
    None,
}

/// Set up rust tracing, to console and optionally to file.
///
/// By default we log only our own events, at a given trace level.
/// This can be overridden by setting `RUST_LOG`.
/// The log file, if any, uses the same filter unless `RUST_LOG_FILE_DETAIL` is set.
///
/// **CAUTION:** If this function fails, tracing won't be set up; callers must take extra care to report the error.
///
/// **NOTE:** You can only run this once per process. A global bool prevents re-running.
pub fn setup(
    trace_level: &str,
    display: ConsoleTraceType,
    log_file: Option<&Path>,
    time_format: TimeFormat,
    ansi_colours: bool,
) -> anyhow::Result<()> {
    if is_initialized() {
        tracing::warn!("tracing::setup called a second time (ignoring)");
        return Ok(());
    }
    TRACING_INITIALIZED.store(true, Ordering::Relaxed);

    let layers = setup_inner(trace_level, display, log_file, time_format, ansi_colours)?;
    tracing_subscriber::registry().with(layers).init();

    Ok(())
}

fn setup_inner(
    trace_level: &str,
    display: ConsoleTraceType,
    log_file: Option<&Path>,
    time_format: TimeFormat,
    ansi_colours: bool,
) -> anyhow::Result<
    Vec<Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>>,
> {
    let mut layers = Vec::new();

    // If we used the environment variable, show log targets; if we did not, we're only logging ourselves.
    let filter = filter_for(trace_level, STANDARD_ENV_VAR)?;
    if display == ConsoleTraceType::Standard {
        layers.push(make_tracing_layer(
            std::io::stderr,
            filter.filter,
            time_format,
            filter.used_env,
            ansi_colours,
        ));
    }

    if let Some(filename) = log_file {
        let out_file = Arc::new(
            File::create(filename)
                .with_context(|| format!("Failed to open log file {}", filename.display()))?,
        );
        let filter = if std::env::var(LOG_FILE_DETAIL_ENV_VAR).is_ok() {
            FilterResult {
                filter: EnvFilter::try_from_env(LOG_FILE_DETAIL_ENV_VAR)?,
                used_env: true,
            }
        } else {
            filter_for(trace_level, STANDARD_ENV_VAR)?
        };
        layers.push(make_tracing_layer(
            out_file,
            filter.filter,
            time_format,
            filter.used_env,
            false,
        ));
    }

    Ok(layers)
}

/// Returns whether tracing has been initialized
#[must_use]
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::Relaxed)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use pretty_assertions::assert_eq;
    use rusty_fork::rusty_fork_test;

    use super::{ConsoleTraceType, TimeFormat, setup, setup_inner, trace_level};

    #[test]
    fn trace_levels() {
        assert_eq!(trace_level(true, true), "debug");
        assert_eq!(trace_level(false, true), "error");
        assert_eq!(trace_level(false, false), "info");
    }

    #[test]
    fn time_format_names() {
        assert_eq!(TimeFormat::Rfc3339.to_string(), "rfc3339");
        assert_eq!("utc".parse::<TimeFormat>().unwrap(), TimeFormat::Utc);
    }

    #[test]
    fn console_layer() {
        let layers =
            setup_inner("info", ConsoleTraceType::Standard, None, TimeFormat::Local, false).unwrap();
        assert_eq!(layers.len(), 1);
        let layers =
            setup_inner("info", ConsoleTraceType::None, None, TimeFormat::Local, false).unwrap();
        assert!(layers.is_empty());
    }

    #[test]
    fn file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let filename = dir.path().join("test.log");
        let layers = setup_inner(
            "info",
            ConsoleTraceType::Standard,
            Some(filename.as_path()),
            TimeFormat::Rfc3339,
            false,
        )
        .unwrap();
        assert_eq!(layers.len(), 2);
        assert!(filename.exists());
    }

    #[test]
    fn invalid_level() {
        let result = setup_inner(
            "invalid_level",
            ConsoleTraceType::None,
            None,
            TimeFormat::Utc,
            false,
        );
        assert!(result.is_err());
    }

    // these tests affect global state, so need to run in forks
    rusty_fork_test! {
        #[test]
        fn setup_is_idempotent() {
            assert!(!super::is_initialized());
            setup("debug", ConsoleTraceType::None, None, TimeFormat::Utc, false).unwrap();
            assert!(super::is_initialized());
            // a second call must succeed (albeit with a warning)
            setup("debug", ConsoleTraceType::None, None, TimeFormat::Utc, false).unwrap();
        }

        #[test]
        fn file_receives_events() {
            let dir = tempfile::tempdir().unwrap();
            let filename = dir.path().join("events.log");
            setup("debug", ConsoleTraceType::None, Some(filename.as_path()), TimeFormat::Utc, false).unwrap();
            tracing::info!("hello from the test");
            let contents = std::fs::read_to_string(&filename).unwrap();
            assert!(contents.contains("hello from the test"), "{contents}");
        }
    }
}
