//! Structured HTTP errors.
//!
//! [`StructuredError`] carries everything needed to render a failure as a
//! response: status, headers and a JSON payload of the form
//! `{"statusCode": 400, "error": "Bad Request", "message": "..."}`, plus
//! optional diagnostic [`ErrorData`].
//!
//! Named constructors are looked up through [`ErrorKind`], which maps each
//! kind onto its HTTP status.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::ValidationReport;

/// Message shown instead of the real one for 5xx errors.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred";

/// Status used when neither the error nor the fallback arguments carry one.
pub const DEFAULT_ERROR_STATUS: u16 = 400;

/// Boxed error type accepted from handler code.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Named error constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthRequired,
    ClientTimeout,
    Conflict,
    ResourceGone,
    LengthRequired,
    PreconditionFailed,
    EntityTooLarge,
    UriTooLong,
    UnsupportedMediaType,
    RangeNotSatisfiable,
    ExpectationFailed,
    Teapot,
    BadData,
    Locked,
    FailedDependency,
    PreconditionRequired,
    TooManyRequests,
    IllegalReasons,
    BadImplementation,
    NotImplemented,
    BadGateway,
    ServerUnavailable,
    GatewayTimeout,
}

/// Lookup table from kind to name and status.
const KINDS: [(ErrorKind, &str, u16); 30] = [
    (ErrorKind::BadRequest, "badRequest", 400),
    (ErrorKind::Unauthorized, "unauthorized", 401),
    (ErrorKind::PaymentRequired, "paymentRequired", 402),
    (ErrorKind::Forbidden, "forbidden", 403),
    (ErrorKind::NotFound, "notFound", 404),
    (ErrorKind::MethodNotAllowed, "methodNotAllowed", 405),
    (ErrorKind::NotAcceptable, "notAcceptable", 406),
    (ErrorKind::ProxyAuthRequired, "proxyAuthRequired", 407),
    (ErrorKind::ClientTimeout, "clientTimeout", 408),
    (ErrorKind::Conflict, "conflict", 409),
    (ErrorKind::ResourceGone, "resourceGone", 410),
    (ErrorKind::LengthRequired, "lengthRequired", 411),
    (ErrorKind::PreconditionFailed, "preconditionFailed", 412),
    (ErrorKind::EntityTooLarge, "entityTooLarge", 413),
    (ErrorKind::UriTooLong, "uriTooLong", 414),
    (ErrorKind::UnsupportedMediaType, "unsupportedMediaType", 415),
    (ErrorKind::RangeNotSatisfiable, "rangeNotSatisfiable", 416),
    (ErrorKind::ExpectationFailed, "expectationFailed", 417),
    (ErrorKind::Teapot, "teapot", 418),
    (ErrorKind::BadData, "badData", 422),
    (ErrorKind::Locked, "locked", 423),
    (ErrorKind::FailedDependency, "failedDependency", 424),
    (ErrorKind::PreconditionRequired, "preconditionRequired", 428),
    (ErrorKind::TooManyRequests, "tooManyRequests", 429),
    (ErrorKind::IllegalReasons, "illegal", 451),
    (ErrorKind::BadImplementation, "badImplementation", 500),
    (ErrorKind::NotImplemented, "notImplemented", 501),
    (ErrorKind::BadGateway, "badGateway", 502),
    (ErrorKind::ServerUnavailable, "serverUnavailable", 503),
    (ErrorKind::GatewayTimeout, "gatewayTimeout", 504),
];

impl ErrorKind {
    fn entry(&self) -> &'static (ErrorKind, &'static str, u16) {
        KINDS
            .iter()
            .find(|(kind, _, _)| kind == self)
            .unwrap_or(&KINDS[0])
    }

    /// Constructor name, e.g. `badRequest`.
    pub fn name(&self) -> &'static str {
        self.entry().1
    }

    pub fn status_code(&self) -> u16 {
        self.entry().2
    }
}

/// Returned when parsing an unknown constructor name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error constructor {0:?}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KINDS
            .iter()
            .find(|(_, name, _)| *name == s)
            .map(|(kind, _, _)| *kind)
            .ok_or_else(|| UnknownErrorKind(s.to_string()))
    }
}

/// Diagnostic data attached to an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorData {
    /// A schema validation report. Only its details reach the response.
    Validation(ValidationReport),
    /// Arbitrary data, surfaced as-is.
    Value(Value),
}

impl ErrorData {
    /// The part of the data that may be shown to callers.
    pub fn surfaced(&self) -> Value {
        match self {
            ErrorData::Validation(report) => {
                serde_json::to_value(&report.details).unwrap_or(Value::Null)
            }
            ErrorData::Value(value) => value.clone(),
        }
    }
}

impl From<Value> for ErrorData {
    fn from(value: Value) -> Self {
        ErrorData::Value(value)
    }
}

impl From<ValidationReport> for ErrorData {
    fn from(report: ValidationReport) -> Self {
        ErrorData::Validation(report)
    }
}

/// Arguments used when upgrading a plain message or native error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorArgs {
    pub status_code: Option<u16>,
    pub data: Option<ErrorData>,
}

impl ErrorArgs {
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<ErrorData>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// The renderable part of a [`StructuredError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOutput {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub payload: Map<String, Value>,
}

/// An error carrying HTTP status, payload and optional diagnostic data.
#[derive(Clone)]
pub struct StructuredError {
    message: String,
    output: ErrorOutput,
    data: Option<ErrorData>,
    source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl StructuredError {
    /// Create an error from a message. Missing status defaults to 400.
    pub fn new(message: impl Into<String>, args: ErrorArgs) -> Self {
        let message = message.into();
        let status = args.status_code.unwrap_or(DEFAULT_ERROR_STATUS);
        Self {
            output: ErrorOutput::for_status(status, &message),
            message,
            data: args.data,
            source: None,
        }
    }

    /// Create an error through a named constructor.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>, data: Option<ErrorData>) -> Self {
        Self::new(
            message,
            ErrorArgs {
                status_code: Some(kind.status_code()),
                data,
            },
        )
    }

    /// Upgrade a native error, keeping it as the source.
    ///
    /// A boxed `StructuredError` is unwrapped and returned unchanged.
    pub fn from_error(error: BoxError, args: ErrorArgs) -> Self {
        match error.downcast::<StructuredError>() {
            Ok(structured) => *structured,
            Err(native) => {
                let mut upgraded = Self::new(native.to_string(), args);
                upgraded.source = Some(Arc::from(native));
                upgraded
            }
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::BadRequest, message, None)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::NotFound, message, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::BadImplementation, message, None)
    }

    /// Attach diagnostic data.
    pub fn with_data(mut self, data: impl Into<ErrorData>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Add a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.output.headers.insert(name.into(), value.into());
        self
    }

    /// The original message, even for 5xx errors.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> u16 {
        self.output.status_code
    }

    pub fn is_server_error(&self) -> bool {
        self.output.status_code >= 500
    }

    pub fn output(&self) -> &ErrorOutput {
        &self.output
    }

    pub fn data(&self) -> Option<&ErrorData> {
        self.data.as_ref()
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self.data, Some(ErrorData::Validation(_)))
    }
}

impl ErrorOutput {
    fn for_status(status: u16, message: &str) -> Self {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown");
        let shown = if status >= 500 {
            INTERNAL_ERROR_MESSAGE
        } else if message.is_empty() {
            reason
        } else {
            message
        };

        let mut payload = Map::new();
        payload.insert("statusCode".to_string(), Value::from(status));
        payload.insert("error".to_string(), Value::from(reason));
        payload.insert("message".to_string(), Value::from(shown));

        Self {
            status_code: status,
            headers: BTreeMap::new(),
            payload,
        }
    }
}

impl fmt::Debug for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredError")
            .field("message", &self.message)
            .field("status_code", &self.output.status_code)
            .field("data", &self.data)
            .finish()
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.output.status_code)
    }
}

impl StdError for StructuredError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// A rejection produced by a lifecycle stage or by handler code.
#[derive(Debug)]
pub enum HandlerError {
    /// A bare message; wrapped with the fallback arguments.
    Message(String),
    /// A native error; upgraded with the fallback arguments.
    Native(BoxError),
    /// Already structured; used unchanged.
    Structured(StructuredError),
}

impl HandlerError {
    pub fn native(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::from(Box::new(error) as BoxError)
    }

    /// Normalize into a [`StructuredError`]. `fallback` applies to messages
    /// and native errors only.
    pub fn into_structured(self, fallback: ErrorArgs) -> StructuredError {
        match self {
            HandlerError::Message(message) => StructuredError::new(message, fallback),
            HandlerError::Native(error) => StructuredError::from_error(error, fallback),
            HandlerError::Structured(error) => error,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Message(message) => f.write_str(message),
            HandlerError::Native(error) => write!(f, "{}", error),
            HandlerError::Structured(error) => write!(f, "{}", error),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::Message(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::Message(message.to_string())
    }
}

impl From<StructuredError> for HandlerError {
    fn from(error: StructuredError) -> Self {
        HandlerError::Structured(error)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::native(error)
    }
}

impl From<BoxError> for HandlerError {
    fn from(error: BoxError) -> Self {
        match error.downcast::<StructuredError>() {
            Ok(structured) => HandlerError::Structured(*structured),
            Err(native) => HandlerError::Native(native),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<StructuredError>() {
            Ok(structured) => HandlerError::Structured(structured),
            Err(other) => HandlerError::Native(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_kind_lookup_by_name() {
        assert_eq!("notFound".parse::<ErrorKind>().unwrap(), ErrorKind::NotFound);
        assert_eq!(ErrorKind::Teapot.status_code(), 418);
        assert_eq!(ErrorKind::BadData.name(), "badData");
        assert!("nope".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_every_kind_has_a_table_entry() {
        for (kind, name, status) in KINDS.iter() {
            assert_eq!(kind.name(), *name);
            assert_eq!(kind.status_code(), *status);
        }
    }

    #[test]
    fn test_payload_shape() {
        let err = StructuredError::not_found("order 7 not found");
        let payload = &err.output().payload;
        assert_eq!(payload["statusCode"], 404);
        assert_eq!(payload["error"], "Not Found");
        assert_eq!(payload["message"], "order 7 not found");
    }

    #[test]
    fn test_server_errors_hide_message() {
        let err = StructuredError::internal("db password rejected");
        assert_eq!(err.output().payload["message"], INTERNAL_ERROR_MESSAGE);
        assert_eq!(err.message(), "db password rejected");
        assert!(err.is_server_error());
    }

    #[test]
    fn test_message_defaults_status_to_400() {
        let err = HandlerError::from("boom").into_structured(ErrorArgs::default());
        assert_eq!(err.status_code(), DEFAULT_ERROR_STATUS);
    }

    #[test]
    fn test_native_error_upgrade_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = HandlerError::native(io).into_structured(ErrorArgs::status(409));
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.message(), "disk full");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_structured_error_ignores_fallback() {
        let err = HandlerError::from(StructuredError::not_found("x"))
            .into_structured(ErrorArgs::status(500));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_anyhow_downcasts_structured_errors() {
        let wrapped = anyhow::Error::new(StructuredError::from_kind(ErrorKind::Conflict, "dup", None));
        match HandlerError::from(wrapped) {
            HandlerError::Structured(err) => assert_eq!(err.status_code(), 409),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_boxed_structured_error_is_not_upgraded() {
        let boxed: BoxError = Box::new(StructuredError::not_found("no such order"));
        let err = HandlerError::from(boxed).into_structured(ErrorArgs::default());
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.output().payload["message"], "no such order");

        let boxed: BoxError = Box::new(StructuredError::not_found("no such order"));
        let err = StructuredError::from_error(boxed, ErrorArgs::status(500));
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.message(), "no such order");
    }

    #[test]
    fn test_value_data_is_surfaced_verbatim() {
        let data = ErrorData::from(json!({"orderId": 7}));
        assert_eq!(data.surfaced(), json!({"orderId": 7}));
    }
}
