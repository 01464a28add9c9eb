//! Convenience layer for AWS Lambda HTTP handlers.
//!
//! This crate provides the plumbing shared by every handler of a package:
//!
//! - [`Facade`]: environment-driven [`Config`], [`Logger`], monitoring
//!   [`Notifier`] and response helpers, built once per process
//! - [`Lifecycle`]: body parsing, concurrent event/context validation and
//!   dispatch, converging every failure on [`Facade::fail`]
//! - [`StructuredError`]: HTTP errors with a `{statusCode, error, message}`
//!   payload and optional diagnostic data
//! - [`Schema`] / [`DeclarativeEngine`]: declarative validation of events
//! - [`lambda::run`]: serves a lifecycle on `lambda_runtime`
//!
//! # Testing Support
//!
//! The [`test_utils`] module provides log capture, notifier doubles and mock
//! contexts. Enable the `test-utils` feature to access it from dependent
//! crates.

mod config;
mod env;
mod error;
mod facade;
mod lifecycle;
mod logging;
mod loggly;
mod monitor;
mod response;
mod schema;

pub mod lambda;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{
    AirbrakeConfig, Config, ConfigError, ConfigOverrides, LogglyConfig, PackageInfo,
    DEFAULT_AIRBRAKE_HOST, LIBRARY_TAG,
};
pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use error::{
    BoxError, ErrorArgs, ErrorData, ErrorKind, ErrorOutput, HandlerError, StructuredError,
    UnknownErrorKind, DEFAULT_ERROR_STATUS, INTERNAL_ERROR_MESSAGE,
};
pub use facade::{Facade, FacadeBuilder};
pub use lifecycle::{
    BodyParser, DispatchMode, Invocation, Lifecycle, LifecycleError, LifecycleOptions,
};
pub use logging::{LogLevel, Logger};
pub use monitor::{AirbrakeNotifier, DisabledNotifier, MonitorError, Notice, Notifier, FAKED_NOTICE_ID};
pub use response::{
    build_response, Callback, CallbackHandle, Completion, Output, Response, DEFAULT_SUCCESS_STATUS,
};
pub use schema::{
    DeclarativeEngine, DetailContext, Schema, SchemaEngine, ValidationDetail, ValidationReport,
};
