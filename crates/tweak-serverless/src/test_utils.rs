//! Test utilities for handler testing.
//!
//! This module provides shared test infrastructure for this crate and for
//! crates depending on it with the `test-utils` feature: a log capture
//! writer, recording and failing notifiers, a facade factory and mock
//! Lambda contexts.
//!
//! # Usage
//!
//! ```ignore
//! use tweak_serverless::test_utils::{test_facade, mock_context};
//! use tweak_serverless::MapEnv;
//!
//! #[tokio::test]
//! async fn test_handler() {
//!     let (facade, logs) = test_facade(MapEnv::new().with("NODE_ENV", "test"));
//!     let context = mock_context("test-request-123");
//!     // ... drive the lifecycle, then inspect `logs.lines()`
//! }
//! ```

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use lambda_runtime::Context;
use serde_json::Value;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter};

use crate::config::PackageInfo;
use crate::env::MapEnv;
use crate::error::StructuredError;
use crate::facade::Facade;
use crate::monitor::{MonitorError, Notice, Notifier};

/// Collects console log output in memory.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// A writer to pass to [`Logger::with_writer`](crate::Logger::with_writer)
    /// or [`FacadeBuilder::log_writer`](crate::FacadeBuilder::log_writer).
    pub fn writer(&self) -> BoxMakeWriter {
        BoxMakeWriter::new(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panicking writer only leaves a partial line behind.
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Written lines parsed as JSON. Lines that are not JSON are skipped.
    pub fn lines(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Notifier remembering every error it was given.
#[derive(Default)]
pub struct RecordingNotifier {
    notified: Mutex<Vec<StructuredError>>,
}

impl RecordingNotifier {
    pub fn notified(&self) -> Vec<StructuredError> {
        self.notified
            .lock()
            .map(|errors| errors.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, error: &StructuredError) -> Result<Notice, MonitorError> {
        let id = match self.notified.lock() {
            Ok(mut errors) => {
                errors.push(error.clone());
                errors.len()
            }
            Err(_) => 0,
        };
        Ok(Notice {
            id: format!("recorded-{}", id),
            url: None,
        })
    }
}

/// Notifier that always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _error: &StructuredError) -> Result<Notice, MonitorError> {
        Err(MonitorError::Rejected {
            status: 503,
            body: "tracker unavailable".to_string(),
        })
    }
}

/// Package descriptor used by [`test_facade`].
pub fn test_package() -> PackageInfo {
    PackageInfo::new("test-package", "0.0.0")
}

/// Build a facade reading `env`, with console output captured.
///
/// Loggly and Airbrake stay disabled unless `env` enables them.
pub fn test_facade(env: MapEnv) -> (Arc<Facade>, CapturedLogs) {
    let captured = CapturedLogs::default();
    let facade = Facade::builder(test_package())
        .env_source(env)
        .log_writer(captured.writer())
        .build()
        .expect("test facade configuration should resolve");
    (Arc::new(facade), captured)
}

/// Create a Lambda context for `request_id`.
///
/// `lambda_runtime::Context` is non-exhaustive, so the mock starts from
/// `Context::default()` and fills in the fields handlers read.
pub fn mock_context(request_id: &str) -> Context {
    let mut config = lambda_runtime::Config::default();
    config.function_name = "test-function".to_string();
    config.memory = 128;
    config.version = "$LATEST".to_string();

    let mut context = Context::default();
    context.request_id = request_id.to_string();
    context.deadline = 1_700_000_000_000;
    context.invoked_function_arn =
        "arn:aws:lambda:us-east-1:123456789012:function:test-function".to_string();
    context.xray_trace_id = Some("Root=1-5759e988-bd862e3fe1be46a994272793".to_string());
    context.env_config = Arc::new(config);
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_logs_parse_json_lines() {
        let mut captured = CapturedLogs::default();
        io::Write::write_all(&mut captured, b"{\"a\":1}\nnot json\n{\"b\":2}\n").unwrap();
        let lines = captured.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["b"], 2);
        assert!(captured.contents().contains("not json"));
    }

    #[tokio::test]
    async fn recording_notifier_counts_notices() {
        let notifier = RecordingNotifier::default();
        let first = notifier.notify(&StructuredError::bad_request("a")).await.unwrap();
        let second = notifier.notify(&StructuredError::bad_request("b")).await.unwrap();
        assert_eq!(first.id, "recorded-1");
        assert_eq!(second.id, "recorded-2");
        assert_eq!(notifier.notified().len(), 2);
    }

    #[test]
    fn mock_context_sets_request_id() {
        let context = mock_context("req-9");
        assert_eq!(context.request_id, "req-9");
        assert_eq!(context.env_config.function_name, "test-function");
    }
}
