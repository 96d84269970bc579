//! Logging setup for applications embedding graphopt
//!
//! The library itself only emits `tracing` events; this module installs a global
//! subscriber with a bracketed, timestamped format and INFO as the default level.

use tracing::Level;

/// Install the global subscriber at INFO. `RUST_LOG` overrides the level.
///
/// Lines look like `[INFO 2024-05-01 12:00:00 graphopt::optimizer::driver] ...`; DEBUG and
/// TRACE lines carry `file:line` instead of the module path.
///
/// ```no_run
/// graphopt::init_logger();
/// tracing::info!("pose graph loaded");
/// ```
///
/// Per-iteration tables are emitted at DEBUG; enable them with
/// `RUST_LOG=graphopt=debug`.
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Same as [`init_logger`] with a different default level.
///
/// Calling this more than once is harmless: later calls leave the first subscriber in place
/// and report that at DEBUG through it.
///
/// ```no_run
/// use graphopt::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// ```
pub fn init_logger_with_level(default_level: Level) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_level(false)
        .with_thread_ids(false)
        .event_format(BracketFormatter)
        .try_init();
    if let Err(e) = installed {
        tracing::debug!("keeping the existing global subscriber: {e}");
    }
}

/// `[LEVEL timestamp location] message`
struct BracketFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for BracketFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use chrono::Local;

        let metadata = event.metadata();
        let level = *metadata.level();

        let tag = match level {
            Level::ERROR => "\x1b[31mERROR\x1b[0m",
            Level::WARN => "\x1b[33mWARN\x1b[0m",
            Level::INFO => "\x1b[32mINFO\x1b[0m",
            Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
            Level::TRACE => "\x1b[35mTRACE\x1b[0m",
        };
        write!(writer, "[{} {} ", tag, Local::now().format("%Y-%m-%d %H:%M:%S"))?;

        let verbose = level == Level::DEBUG || level == Level::TRACE;
        match (verbose, metadata.file()) {
            (true, Some(file)) => {
                let filename = file.rsplit('/').next().unwrap_or(file);
                write!(writer, "{}:{}", filename, metadata.line().unwrap_or(0))?;
            }
            _ => write!(writer, "{}", metadata.target())?,
        }

        write!(writer, "] ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
