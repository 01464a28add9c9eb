//! The facade shared by all handlers of a Lambda package.
//!
//! A [`Facade`] is built once per process from a [`PackageInfo`] and
//! optional [`ConfigOverrides`]. It owns the resolved [`Config`], the
//! [`Logger`], the monitoring [`Notifier`] and the [`SchemaEngine`], and
//! provides the response and failure helpers every lifecycle goes through.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tweak_serverless::{package_info, Callback, ConfigOverrides, Facade, Output};
//!
//! let facade = Arc::new(Facade::new(package_info!(), ConfigOverrides::default()).unwrap());
//! let (callback, _completion) = Callback::channel();
//! facade.respond(Output::ok(json!({"ok": true})), callback);
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{Config, ConfigError, ConfigOverrides, PackageInfo};
use crate::env::{EnvSource, ProcessEnv};
use crate::error::{
    ErrorArgs, ErrorData, ErrorKind, HandlerError, StructuredError, DEFAULT_ERROR_STATUS,
};
use crate::lifecycle::{Lifecycle, LifecycleOptions};
use crate::logging::{LogLevel, Logger};
use crate::monitor::{AirbrakeNotifier, DisabledNotifier, Notifier};
use crate::response::{build_response, Callback, Output, Response};
use crate::schema::{DeclarativeEngine, Schema, SchemaEngine};

/// Configuration, sinks and response helpers for one Lambda package.
pub struct Facade {
    package: PackageInfo,
    config: Config,
    logger: Logger,
    notifier: Arc<dyn Notifier>,
    schema: Arc<dyn SchemaEngine>,
    env: Arc<dyn EnvSource>,
    pending: TaskTracker,
    draining: Mutex<()>,
}

/// Builder for [`Facade`].
pub struct FacadeBuilder {
    package: PackageInfo,
    overrides: ConfigOverrides,
    env: Option<Arc<dyn EnvSource>>,
    log_writer: Option<BoxMakeWriter>,
    notifier: Option<Arc<dyn Notifier>>,
    schema: Option<Arc<dyn SchemaEngine>>,
}

impl FacadeBuilder {
    pub fn overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Read variables from `env` instead of the process environment.
    pub fn env_source(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Some(Arc::new(env));
        self
    }

    /// Send console output to `writer` instead of stdout.
    pub fn log_writer(mut self, writer: BoxMakeWriter) -> Self {
        self.log_writer = Some(writer);
        self
    }

    /// Replace the notifier derived from configuration.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn schema_engine(mut self, engine: Arc<dyn SchemaEngine>) -> Self {
        self.schema = Some(engine);
        self
    }

    /// Resolve configuration and wire the sinks.
    pub fn build(self) -> Result<Facade, ConfigError> {
        let env: Arc<dyn EnvSource> = self.env.unwrap_or_else(|| Arc::new(ProcessEnv));
        let config = Config::resolve(&self.package, self.overrides, &*env)?;

        let logger = match self.log_writer {
            Some(writer) => Logger::with_writer(&config, writer),
            None => Logger::stdout(&config),
        };

        if config.loggly.is_none() {
            logger.log(
                LogLevel::Warn,
                &format!("Online Logger disabled (NODE_ENV {})", config.environment),
                Value::Null,
            );
        }

        let configured: Arc<dyn Notifier> = match &config.airbrake {
            Some(airbrake) => Arc::new(AirbrakeNotifier::new(
                airbrake,
                &config.environment,
                &self.package,
            )),
            None => {
                logger.log(
                    LogLevel::Warn,
                    &format!("Airbrake disabled (NODE_ENV {})", config.environment),
                    Value::Null,
                );
                Arc::new(DisabledNotifier::new(logger.clone()))
            }
        };

        Ok(Facade {
            package: self.package,
            notifier: self.notifier.unwrap_or(configured),
            schema: self
                .schema
                .unwrap_or_else(|| Arc::new(DeclarativeEngine::new())),
            config,
            logger,
            env,
            pending: TaskTracker::new(),
            draining: Mutex::new(()),
        })
    }
}

impl Facade {
    /// Build a facade reading the process environment.
    pub fn new(package: PackageInfo, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::builder(package).overrides(overrides).build()
    }

    pub fn builder(package: PackageInfo) -> FacadeBuilder {
        FacadeBuilder {
            package,
            overrides: ConfigOverrides::default(),
            env: None,
            log_writer: None,
            notifier: None,
            schema: None,
        }
    }

    pub fn package(&self) -> &PackageInfo {
        &self.package
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// True iff the resolved environment name equals `candidate`.
    pub fn is_env(&self, candidate: &str) -> bool {
        self.config.environment == candidate
    }

    pub fn is_test(&self) -> bool {
        self.is_env("test")
    }

    pub fn is_development(&self) -> bool {
        self.is_env("development")
    }

    pub fn is_stage(&self) -> bool {
        self.is_env("stage")
    }

    pub fn is_production(&self) -> bool {
        self.is_env("production")
    }

    /// Raw lookup through the configured environment source.
    pub fn get_env(&self, name: &str) -> Option<String> {
        self.env.get(name)
    }

    pub fn build_response(&self, output: Output) -> Response {
        build_response(output)
    }

    pub fn respond(&self, output: Output, callback: Callback) {
        callback.respond(self.build_response(output));
    }

    /// Fail through a named error constructor.
    pub fn fail_with(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        data: Option<ErrorData>,
        callback: Callback,
    ) {
        self.fail(StructuredError::from_kind(kind, message, data), None, callback);
    }

    /// Turn `err` into a response and settle `callback` with it.
    ///
    /// The callback always receives a formed response. The monitoring
    /// notification runs in the background and is not awaited here; use
    /// [`Facade::drain_pending`] to wait for it.
    pub fn fail(&self, err: impl Into<HandlerError>, fallback: Option<ErrorArgs>, callback: Callback) {
        let error = err
            .into()
            .into_structured(fallback.unwrap_or_else(|| ErrorArgs::status(DEFAULT_ERROR_STATUS)));

        self.notify(&error);

        let mut payload = error.output().payload.clone();
        if let Some(data) = error.data() {
            if !self.is_production() {
                payload.insert("data".to_string(), data.surfaced());
            }
        }
        let headers = error.output().headers.clone();

        self.logger.log(
            LogLevel::Verbose,
            "Fail with error",
            json!({
                "statusCode": error.status_code(),
                "headers": headers,
                "payload": payload,
            }),
        );

        self.respond(
            Output {
                status_code: Some(error.status_code()),
                headers: Some(headers),
                payload: Value::Object(payload),
            },
            callback,
        );
    }

    fn notify(&self, error: &StructuredError) {
        let notifier = Arc::clone(&self.notifier);
        let logger = self.logger.clone();
        let owned = error.clone();
        let task = async move {
            match notifier.notify(&owned).await {
                Ok(notice) => logger.log(
                    LogLevel::Verbose,
                    "[Airbrake] Notice id",
                    json!({"id": notice.id, "url": notice.url}),
                ),
                Err(e) => logger.log(
                    LogLevel::Error,
                    "[Airbrake] Notice error",
                    json!({"error": e.to_string()}),
                ),
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.pending.spawn_on(task, &handle);
            }
            Err(_) => self.logger.log(
                LogLevel::Error,
                "[Airbrake] Notice skipped outside of an async runtime",
                json!({"message": error.message()}),
            ),
        }
    }

    /// Validate `data` against `schema`.
    ///
    /// Rejects with a `badRequest` error carrying the validation report.
    pub async fn schema_validate(&self, data: Value, schema: &Schema) -> Result<Value, StructuredError> {
        self.schema.validate(&data, schema).map_err(|report| {
            StructuredError::from_kind(
                ErrorKind::BadRequest,
                report.message.clone(),
                Some(ErrorData::Validation(report)),
            )
        })
    }

    /// Wait for every notification spawned so far.
    ///
    /// Concurrent drains are serialized so one caller cannot reopen the
    /// tracker while another is still waiting on it.
    pub async fn drain_pending(&self) {
        let _guard = self.draining.lock().await;
        self.pending.close();
        self.pending.wait().await;
        self.pending.reopen();
    }

    /// Build the request lifecycle for `options`.
    pub fn prepare(self: &Arc<Self>, options: LifecycleOptions) -> Lifecycle {
        Lifecycle::new(Arc::clone(self), options)
    }
}

impl fmt::Debug for Facade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facade")
            .field("package", &self.package)
            .field("config", &self.config)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use crate::error::BoxError;
    use crate::monitor::{MonitorError, Notice};
    use crate::test_utils::{test_facade, CapturedLogs, FailingNotifier, RecordingNotifier};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Notifier that finishes only once a permit is released.
    struct GatedNotifier(Arc<Semaphore>);

    #[async_trait]
    impl Notifier for GatedNotifier {
        async fn notify(&self, _error: &StructuredError) -> Result<Notice, MonitorError> {
            if let Ok(permit) = self.0.acquire().await {
                permit.forget();
            }
            Ok(Notice {
                id: "gated".to_string(),
                url: None,
            })
        }
    }

    fn settle(facade: &Facade, err: impl Into<HandlerError>, fallback: Option<ErrorArgs>) -> Response {
        let (callback, mut completion) = Callback::channel();
        facade.fail(err, fallback, callback);
        completion
            .try_settled()
            .expect("fail settles synchronously")
            .unwrap()
    }

    #[test]
    fn environment_queries() {
        let (facade, _) = test_facade(MapEnv::new().with("NODE_ENV", "test"));
        assert!(facade.is_env("test"));
        assert!(facade.is_test());
        assert!(!facade.is_production());
        assert!(!facade.is_stage());
        assert!(!facade.is_development());
    }

    #[test]
    fn get_env_reads_configured_source() {
        let (facade, _) = test_facade(MapEnv::new().with("TABLE_NAME", "orders"));
        assert_eq!(facade.get_env("TABLE_NAME").as_deref(), Some("orders"));
        assert!(facade.get_env("MISSING").is_none());
    }

    #[test]
    fn startup_warns_about_disabled_sinks() {
        let captured = CapturedLogs::default();
        Facade::builder(PackageInfo::new("orders-api", "1.0.0"))
            .env_source(MapEnv::new().with("NODE_ENV", "stage"))
            .log_writer(captured.writer())
            .build()
            .unwrap();

        let messages: Vec<String> = captured
            .lines()
            .iter()
            .map(|line| line["message"].as_str().unwrap_or_default().to_string())
            .collect();
        assert!(messages.contains(&"Online Logger disabled (NODE_ENV stage)".to_string()));
        assert!(messages.contains(&"Airbrake disabled (NODE_ENV stage)".to_string()));
    }

    #[test]
    fn build_fails_on_missing_credentials() {
        let result = Facade::builder(PackageInfo::new("orders-api", "1.0.0"))
            .env_source(MapEnv::new().with("LOGGLY", "true"))
            .log_writer(CapturedLogs::default().writer())
            .build();
        assert!(matches!(result, Err(ConfigError::MissingVariable { .. })));
    }

    #[test]
    fn fail_with_message_uses_default_status() {
        let (facade, _) = test_facade(MapEnv::new().with("NODE_ENV", "test"));
        let response = settle(&facade, "order is locked", None);
        assert_eq!(response.status_code, DEFAULT_ERROR_STATUS);
        assert_eq!(response.json_body().unwrap()["message"], "order is locked");
    }

    #[test]
    fn fail_with_message_uses_fallback_status() {
        let (facade, _) = test_facade(MapEnv::new());
        let response = settle(&facade, "conflict", Some(ErrorArgs::status(409)));
        assert_eq!(response.status_code, 409);
    }

    #[test]
    fn fail_keeps_structured_status_and_headers() {
        let (facade, _) = test_facade(MapEnv::new());
        let err = StructuredError::from_kind(ErrorKind::TooManyRequests, "slow down", None)
            .with_header("Retry-After", "30");
        let response = settle(&facade, err, Some(ErrorArgs::status(500)));
        assert_eq!(response.status_code, 429);
        assert_eq!(response.headers["Retry-After"], "30");
    }

    #[test]
    fn fail_surfaces_data_outside_production() {
        let (facade, _) = test_facade(MapEnv::new().with("NODE_ENV", "development"));
        let err = StructuredError::bad_request("bad").with_data(json!({"field": "id"}));
        let body = settle(&facade, err, None).json_body().unwrap();
        assert_eq!(body["data"], json!({"field": "id"}));
    }

    #[test]
    fn fail_hides_data_in_production() {
        let (facade, _) = test_facade(MapEnv::new().with("NODE_ENV", "production"));
        let err = StructuredError::bad_request("bad").with_data(json!({"field": "id"}));
        let body = settle(&facade, err, None).json_body().unwrap();
        assert!(body.get("data").is_none());
        assert_eq!(body["message"], "bad");
    }

    #[test]
    fn fail_with_named_kind() {
        let (facade, _) = test_facade(MapEnv::new());
        let (callback, mut completion) = Callback::channel();
        facade.fail_with(ErrorKind::NotFound, "no such order", None, callback);
        let response = completion.try_settled().unwrap().unwrap();
        assert_eq!(response.status_code, 404);
        assert_eq!(response.json_body().unwrap()["error"], "Not Found");
    }

    #[test]
    fn fail_logs_output_at_verbose() {
        let (facade, captured) = test_facade(MapEnv::new());
        settle(&facade, "nope", None);
        let line = captured
            .lines()
            .into_iter()
            .find(|line| line["message"] == "Fail with error")
            .expect("failure is logged");
        assert_eq!(line["log_level"], "verbose");
        assert_eq!(line["metadata"]["statusCode"], 400);
    }

    #[tokio::test]
    async fn fail_notifies_monitoring() {
        let notifier = Arc::new(RecordingNotifier::default());
        let facade = Facade::builder(PackageInfo::new("orders-api", "1.0.0"))
            .env_source(MapEnv::new())
            .log_writer(CapturedLogs::default().writer())
            .notifier(notifier.clone())
            .build()
            .unwrap();

        settle(&facade, StructuredError::internal("db down"), None);
        facade.drain_pending().await;

        let notified = notifier.notified();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].message(), "db down");
    }

    #[tokio::test]
    async fn notifier_failure_is_only_logged() {
        let captured = CapturedLogs::default();
        let facade = Facade::builder(PackageInfo::new("orders-api", "1.0.0"))
            .env_source(MapEnv::new())
            .log_writer(captured.writer())
            .notifier(Arc::new(FailingNotifier))
            .build()
            .unwrap();

        let response = settle(&facade, "bad input", None);
        facade.drain_pending().await;

        assert_eq!(response.status_code, 400);
        assert!(captured
            .lines()
            .iter()
            .any(|line| line["message"] == "[Airbrake] Notice error" && line["level"] == "ERROR"));
    }

    #[test]
    fn fail_keeps_boxed_structured_status() {
        let (facade, _) = test_facade(MapEnv::new());
        let boxed: BoxError = Box::new(StructuredError::not_found("no such order"));
        let response = settle(&facade, HandlerError::from(boxed), Some(ErrorArgs::default()));
        assert_eq!(response.status_code, 404);
        assert_eq!(response.json_body().unwrap()["message"], "no such order");
    }

    #[test]
    fn fail_outside_runtime_logs_skipped_notice() {
        let (facade, captured) = test_facade(MapEnv::new());
        let response = settle(&facade, "no runtime", None);
        assert_eq!(response.status_code, 400);
        let line = captured
            .lines()
            .into_iter()
            .find(|line| line["message"] == "[Airbrake] Notice skipped outside of an async runtime")
            .expect("skipped notice is logged");
        assert_eq!(line["metadata"]["message"], "no runtime");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn overlapping_drains_both_finish() {
        let gate = Arc::new(Semaphore::new(0));
        let facade = Arc::new(
            Facade::builder(PackageInfo::new("orders-api", "1.0.0"))
                .env_source(MapEnv::new())
                .log_writer(CapturedLogs::default().writer())
                .notifier(Arc::new(GatedNotifier(Arc::clone(&gate))))
                .build()
                .unwrap(),
        );

        settle(&facade, "first", None);
        let first = tokio::spawn({
            let facade = Arc::clone(&facade);
            async move { facade.drain_pending().await }
        });
        tokio::task::yield_now().await;

        gate.add_permits(1);
        tokio::task::yield_now().await;

        settle(&facade, "second", None);
        let second = tokio::spawn({
            let facade = Arc::clone(&facade);
            async move { facade.drain_pending().await }
        });
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), async {
            first.await.unwrap();
            second.await.unwrap();
        })
        .await
        .expect("both drains finish");
    }

    #[tokio::test]
    async fn schema_validate_rejects_with_bad_request() {
        let (facade, _) = test_facade(MapEnv::new());
        let schema = Schema::object().key("id", Schema::number().required());

        let err = facade
            .schema_validate(json!({"id": "x"}), &schema)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.is_validation_error());

        let value = facade
            .schema_validate(json!({"id": "7"}), &schema)
            .await
            .unwrap();
        assert_eq!(value, json!({"id": 7}));
    }
}
