use pollcdc_config::Environment;
use std::io::{Error, Write};
use std::sync::{Once, OnceLock};
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::PanicHookInfo,
};
use thiserror::Error;
use tracing::field::display;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// JSON field name of the pipeline id in log entries.
const PIPELINE_KEY_IN_LOG: &str = "pipeline_id";
/// JSON field name of the polled table in log entries.
const TABLE_KEY_IN_LOG: &str = "table";

/// Directory of the log files written in production.
const LOG_DIR: &str = "logs";
/// Number of daily log files kept on disk.
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

/// Keeps buffered log lines alive until dropped.
///
/// In production the non-blocking file writer flushes when its [`WorkerGuard`] is dropped, so the
/// flusher must live until the process exits.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing in tests.
///
/// Output is only enabled when the `ENABLE_TRACING` environment variable is set:
///
/// ENABLE_TRACING=1 cargo test <test_name>
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an environment the process counts as prod, which logs to files.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}

/// Fields added at the top level of every JSON log entry.
#[derive(Debug, Default)]
struct TopLevelFields {
    pipeline_id: Option<u64>,
    table: Option<String>,
}

static TOP_LEVEL_FIELDS: OnceLock<TopLevelFields> = OnceLock::new();

/// Writer injecting the [`TopLevelFields`] into each JSON log line it writes.
///
/// Lines which are not JSON objects, or already carry a field, are written unchanged.
struct FieldInjectingWriter<W> {
    inner: W,
}

impl<W> FieldInjectingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> Write for FieldInjectingWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let Some(fields) = TOP_LEVEL_FIELDS.get() else {
            return self.inner.write(buf);
        };

        let Ok(line) = std::str::from_utf8(buf) else {
            return self.inner.write(buf);
        };

        let Ok(serde_json::Value::Object(mut map)) = serde_json::from_str(line) else {
            return self.inner.write(buf);
        };

        let mut modified = false;
        if let Some(pipeline_id) = fields.pipeline_id
            && !map.contains_key(PIPELINE_KEY_IN_LOG)
        {
            map.insert(PIPELINE_KEY_IN_LOG.to_string(), pipeline_id.into());
            modified = true;
        }
        if let Some(table) = &fields.table
            && !map.contains_key(TABLE_KEY_IN_LOG)
        {
            map.insert(TABLE_KEY_IN_LOG.to_string(), table.clone().into());
            modified = true;
        }

        if !modified {
            return self.inner.write(buf);
        }

        let Ok(mut output) = serde_json::to_string(&map) else {
            return self.inner.write(buf);
        };
        if line.ends_with('\n') {
            output.push('\n');
        }

        // The caller accounts for the bytes it handed over, not the rewritten line.
        self.inner.write_all(output.as_bytes())?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Initializes tracing for the application.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_top_level_fields(app_name, None, None)
}

/// Like [`init_tracing`], additionally stamping `pipeline_id` and `table` on every JSON entry.
///
/// In `dev` the pretty console output shows them through the spans instead.
pub fn init_tracing_with_top_level_fields(
    app_name: &str,
    pipeline_id: Option<u64>,
    table: Option<String>,
) -> Result<LogFlusher, TracingError> {
    let _ = TOP_LEVEL_FIELDS.set(TopLevelFields { pipeline_id, table });

    // Forwards `log` records of dependencies to the subscriber.
    LogTracer::init()?;

    let is_prod = Environment::load()?.is_prod();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if is_prod {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(LOG_DIR)?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || FieldInjectingWriter::new(file_appender.make_writer()))
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Logs panics through `tracing` before running the previous hook, which only writes to stderr.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        panic.location = location,
        panic.backtrace = backtrace.map(display),
        panic.note = note,
        "a panic occurred",
    );
}
