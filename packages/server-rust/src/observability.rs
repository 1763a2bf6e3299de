//! Log subscriber bootstrap.
//!
//! The interceptors only emit `tracing` events; a host that has no subscriber
//! of its own can install this one. JSON output can be made Cloud Logging
//! compatible (`severity` key, `WARNING` level name) and can drop the source
//! location for selected files.

use std::fmt;
use std::sync::OnceLock;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::layer::Layered;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{prelude::*, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

type FilteredRegistry = Layered<EnvFilter, Registry>;

/// Installs the global subscriber once for the process, writing to stdout.
///
/// `RUST_LOG` wins over `config.level`. Later calls, and calls made after
/// another subscriber was installed, are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.get_or_init(|| {
        let rust_log = std::env::var("RUST_LOG").ok();
        let filter = resolve_filter(config, rust_log.as_deref());
        if let Err(err) = build_subscriber(config, filter, std::io::stdout).try_init() {
            tracing::debug!(%err, "tracing init skipped");
        }
    });
}

/// Picks the filter directives: `rust_log` when set and valid, then
/// `config.level`, then `info`.
#[must_use]
pub fn resolve_filter(config: &LoggingConfig, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(&config.level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Builds the layered subscriber described by `config` without installing it.
pub fn build_subscriber<W>(
    config: &LoggingConfig,
    filter: EnvFilter,
    make_writer: W,
) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let format: Box<dyn Layer<FilteredRegistry> + Send + Sync> = if !config.json {
        tracing_subscriber::fmt::layer()
            .with_writer(make_writer)
            .compact()
            .with_file(config.include_source)
            .with_line_number(config.include_source)
            .boxed()
    } else if config.severity_key || !config.skip_source.is_empty() {
        tracing_subscriber::fmt::layer()
            .with_writer(make_writer)
            .event_format(JsonRecord::from_config(config))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(make_writer)
            .json()
            .flatten_event(true)
            .with_file(config.include_source)
            .with_line_number(config.include_source)
            .boxed()
    };

    tracing_subscriber::registry().with(filter).with(format)
}

// ---------------------------------------------------------------------------
// JsonRecord
// ---------------------------------------------------------------------------

/// JSON event format with a configurable level key and per-file source
/// suppression. Field names otherwise follow the stock flattened JSON format.
#[derive(Debug, Clone)]
struct JsonRecord {
    severity_key: bool,
    include_source: bool,
    skip_source: Vec<String>,
}

impl JsonRecord {
    fn from_config(config: &LoggingConfig) -> Self {
        Self {
            severity_key: config.severity_key,
            include_source: config.include_source,
            skip_source: config.skip_source.clone(),
        }
    }

    fn level_entry(&self, level: Level) -> (&'static str, &'static str) {
        if !self.severity_key {
            return ("level", level.as_str());
        }
        let name = if level == Level::WARN {
            "WARNING"
        } else {
            level.as_str()
        };
        ("severity", name)
    }

    fn shows_source(&self, file: &str) -> bool {
        self.include_source && !self.skip_source.iter().any(|skip| file.contains(skip.as_str()))
    }
}

impl<S, N> FormatEvent<S, N> for JsonRecord
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut record = Map::new();

        let mut timestamp = String::new();
        SystemTime.format_time(&mut Writer::new(&mut timestamp))?;
        record.insert("timestamp".to_string(), Value::String(timestamp));

        let (key, name) = self.level_entry(*meta.level());
        record.insert(key.to_string(), Value::from(name));
        record.insert("target".to_string(), Value::from(meta.target()));

        if let Some(file) = meta.file().filter(|file| self.shows_source(file)) {
            record.insert("filename".to_string(), Value::from(file));
            if let Some(line) = meta.line() {
                record.insert("line_number".to_string(), Value::from(line));
            }
        }

        event.record(&mut JsonFields(&mut record));

        let line = serde_json::to_string(&record).map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

struct JsonFields<'a>(&'a mut Map<String, Value>);

impl Visit for JsonFields<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }
}
