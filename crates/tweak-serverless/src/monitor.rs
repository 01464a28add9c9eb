//! Error monitoring notifications.
//!
//! A [`Notifier`] reports failed invocations to an error tracker. With
//! Airbrake enabled the [`AirbrakeNotifier`] posts notices to the Airbrake v3
//! API; otherwise the [`DisabledNotifier`] logs the call and acknowledges it
//! with a synthetic id, so callers never branch on whether monitoring is on.

use std::error::Error as StdError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{AirbrakeConfig, PackageInfo, LIBRARY_TAG};
use crate::error::StructuredError;
use crate::logging::{LogLevel, Logger};

/// Id returned by the [`DisabledNotifier`].
pub const FAKED_NOTICE_ID: &str = "faked";

/// Acknowledgment from the error tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Errors raised while notifying. They are logged, never surfaced.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to reach error tracker: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("error tracker rejected notice with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Sink for failure notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, error: &StructuredError) -> Result<Notice, MonitorError>;
}

/// Stand-in used when monitoring is disabled.
#[derive(Debug, Clone)]
pub struct DisabledNotifier {
    logger: Logger,
}

impl DisabledNotifier {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify(&self, error: &StructuredError) -> Result<Notice, MonitorError> {
        self.logger.log(
            LogLevel::Verbose,
            "[Airbrake] Notify",
            json!({
                "message": error.message(),
                "statusCode": error.status_code(),
            }),
        );
        Ok(Notice {
            id: FAKED_NOTICE_ID.to_string(),
            url: None,
        })
    }
}

/// Posts notices to the Airbrake v3 notices API.
#[derive(Debug, Clone)]
pub struct AirbrakeNotifier {
    client: reqwest::Client,
    endpoint: String,
    project_key: String,
    environment: String,
    package: PackageInfo,
}

impl AirbrakeNotifier {
    pub fn new(config: &AirbrakeConfig, environment: &str, package: &PackageInfo) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/api/v3/projects/{}/notices",
                config.host.trim_end_matches('/'),
                config.project_id
            ),
            project_key: config.project_key.clone(),
            environment: environment.to_string(),
            package: package.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Notice document for `error`.
    ///
    /// Diagnostic data is always sent here, even in production; only the
    /// client-facing response suppresses it.
    pub fn notice(&self, error: &StructuredError) -> Value {
        let kind = error
            .output()
            .payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Error");

        let mut errors = vec![json!({
            "type": kind,
            "message": error.message(),
            "backtrace": [],
        })];
        let mut source = StdError::source(error);
        while let Some(cause) = source {
            errors.push(json!({
                "type": "cause",
                "message": cause.to_string(),
                "backtrace": [],
            }));
            source = cause.source();
        }

        json!({
            "errors": errors,
            "context": {
                "notifier": {
                    "name": LIBRARY_TAG,
                    "version": env!("CARGO_PKG_VERSION"),
                    "url": env!("CARGO_PKG_REPOSITORY"),
                },
                "environment": self.environment,
                "component": self.package.name,
                "version": self.package.version,
                "severity": if error.is_server_error() { "error" } else { "warning" },
            },
            "params": {
                "statusCode": error.status_code(),
                "data": error.data().map(|data| data.surfaced()),
            },
        })
    }
}

#[async_trait]
impl Notifier for AirbrakeNotifier {
    async fn notify(&self, error: &StructuredError) -> Result<Notice, MonitorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.project_key)
            .json(&self.notice(error))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Notice>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigOverrides};
    use crate::env::MapEnv;
    use crate::error::{ErrorArgs, HandlerError};
    use crate::test_utils::CapturedLogs;

    fn airbrake() -> AirbrakeNotifier {
        AirbrakeNotifier::new(
            &AirbrakeConfig {
                project_id: "42".to_string(),
                project_key: "secret".to_string(),
                host: "https://airbrake.example.com/".to_string(),
            },
            "stage",
            &PackageInfo::new("orders-api", "1.2.3"),
        )
    }

    #[tokio::test]
    async fn disabled_notifier_fakes_acknowledgment() {
        let captured = CapturedLogs::default();
        let config = Config::resolve(
            &PackageInfo::new("orders-api", "1.2.3"),
            ConfigOverrides::default(),
            &MapEnv::new(),
        )
        .unwrap();
        let notifier = DisabledNotifier::new(Logger::with_writer(&config, captured.writer()));

        for err in [
            StructuredError::bad_request("bad"),
            StructuredError::internal("worse"),
        ] {
            let notice = notifier.notify(&err).await.unwrap();
            assert_eq!(notice.id, FAKED_NOTICE_ID);
        }

        let lines = captured.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "[Airbrake] Notify");
    }

    #[test]
    fn endpoint_targets_project_notices() {
        assert_eq!(
            airbrake().endpoint(),
            "https://airbrake.example.com/api/v3/projects/42/notices"
        );
    }

    #[test]
    fn notice_carries_error_and_context() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = HandlerError::native(io).into_structured(ErrorArgs::status(503));
        let notice = airbrake().notice(&err);

        assert_eq!(notice["errors"][0]["type"], "Service Unavailable");
        assert_eq!(notice["errors"][0]["message"], "disk full");
        assert_eq!(notice["errors"][1]["message"], "disk full");
        assert_eq!(notice["context"]["environment"], "stage");
        assert_eq!(notice["context"]["component"], "orders-api");
        assert_eq!(notice["context"]["severity"], "error");
        assert_eq!(notice["params"]["statusCode"], 503);
    }
}
