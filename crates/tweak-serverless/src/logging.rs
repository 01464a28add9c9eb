//! Structured logging.
//!
//! This module provides:
//! - [`LogLevel`]: the severity scale used by handler code
//! - [`Logger`]: a cloneable handle owning its own `tracing` dispatcher
//!
//! The console sink is always installed. It writes JSON lines for CloudWatch,
//! or pretty colored output when `ON_LOCAL` is set. In JSON lines the
//! `metadata` of a [`Logger::log`] call is kept as a nested object. When Loggly is enabled
//! a [`LogglyLayer`](crate::loggly::LogglyLayer) ships the same events
//! remotely.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use tweak_serverless::{Config, ConfigOverrides, LogLevel, Logger, PackageInfo, ProcessEnv};
//!
//! let package = PackageInfo::new("orders-api", "1.0.0");
//! let config = Config::resolve(&package, ConfigOverrides::default(), &ProcessEnv).unwrap();
//! let logger = Logger::stdout(&config);
//! logger.log(LogLevel::Info, "order stored", json!({"orderId": 7}));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::dispatcher::{self, Dispatch, SetGlobalDefaultError};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Layer, Registry};

use crate::config::{Config, ConfigError};
use crate::loggly::LogglyLayer;

/// Log severities, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Verbose,
    Debug,
    Silly,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Silly => "silly",
        }
    }

    /// The `tracing` level events of this severity are emitted at.
    ///
    /// `verbose` sits between info and debug, so it maps onto `DEBUG`;
    /// `debug` and `silly` both map onto `TRACE`.
    pub fn tracing_level(&self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Verbose => Level::DEBUG,
            LogLevel::Debug | LogLevel::Silly => Level::TRACE,
        }
    }

    fn filter_directive(&self) -> String {
        let level = self.tracing_level().as_str().to_ascii_lowercase();
        format!("{},hyper=warn,reqwest=warn,rustls=warn", level)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            "silly" | "trace" => Ok(LogLevel::Silly),
            _ => Err(ConfigError::InvalidLogLevel {
                value: s.to_string(),
            }),
        }
    }
}

type Base = Layered<EnvFilter, Registry>;

/// Field holding the structured metadata of a [`Logger::log`] call.
const METADATA_FIELD: &str = "metadata";

/// Flatten `event` into one JSON object: its fields plus level, target and
/// timestamp.
pub(crate) fn event_entry(event: &Event<'_>) -> Map<String, Value> {
    let metadata = event.metadata();
    let mut entry = Map::new();
    event.record(&mut JsonVisitor(&mut entry));
    entry.insert("level".to_string(), Value::from(metadata.level().as_str()));
    entry.insert("target".to_string(), Value::from(metadata.target()));
    entry.insert(
        "timestamp".to_string(),
        Value::from(chrono::Utc::now().to_rfc3339()),
    );
    entry
}

struct JsonVisitor<'a>(&'a mut Map<String, Value>);

impl Visit for JsonVisitor<'_> {
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
        let text = format!("{:?}", value);
        let recorded = if field.name() == METADATA_FIELD {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };
        self.0.insert(field.name().to_string(), recorded);
    }
}

/// Console formatter writing one JSON object per event.
struct JsonLines;

impl<S, N> FormatEvent<S, N> for JsonLines
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        writeln!(writer, "{}", Value::Object(event_entry(event)))
    }
}

/// Logging sink handle.
///
/// Each logger owns a `tracing` dispatcher built from [`Config`], so handler
/// code receives it explicitly instead of relying on a process-global
/// subscriber. [`Logger::install_global`] additionally routes events from
/// other crates (e.g. `lambda_runtime`) through the same sinks.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    level: LogLevel,
}

impl Logger {
    /// Build a logger writing console output to stdout.
    pub fn stdout(config: &Config) -> Self {
        Self::with_writer(config, BoxMakeWriter::new(std::io::stdout))
    }

    /// Build a logger writing console output to `writer`.
    pub fn with_writer(config: &Config, writer: BoxMakeWriter) -> Self {
        let filter = EnvFilter::new(config.log_level.filter_directive());

        let console: Box<dyn Layer<Base> + Send + Sync> = if config.on_local {
            tracing_fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_writer(writer)
                .boxed()
        } else {
            tracing_fmt::layer()
                .event_format(JsonLines)
                .with_writer(writer)
                .boxed()
        };

        let remote = config.loggly.as_ref().map(LogglyLayer::spawn);

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(remote);

        Self {
            dispatch: Dispatch::new(subscriber),
            level: config.log_level,
        }
    }

    /// Minimum severity this logger emits.
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// The underlying dispatcher, for instrumenting futures with
    /// `tracing::instrument::WithSubscriber`.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Make this logger the process-wide default subscriber.
    ///
    /// Call once at the start of the Lambda `main` function.
    pub fn install_global(&self) -> Result<(), SetGlobalDefaultError> {
        dispatcher::set_global_default(self.dispatch.clone())
    }

    /// Emit `message` at `level` with structured `metadata`.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        dispatcher::with_default(&self.dispatch, || match level {
            LogLevel::Error => tracing::error!(log_level = level.as_str(), metadata = %metadata, "{}", message),
            LogLevel::Warn => tracing::warn!(log_level = level.as_str(), metadata = %metadata, "{}", message),
            LogLevel::Info => tracing::info!(log_level = level.as_str(), metadata = %metadata, "{}", message),
            LogLevel::Verbose => tracing::debug!(log_level = level.as_str(), metadata = %metadata, "{}", message),
            LogLevel::Debug | LogLevel::Silly => {
                tracing::trace!(log_level = level.as_str(), metadata = %metadata, "{}", message)
            }
        });
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}
