//! Response shaping and the completion callback.
//!
//! Handlers produce an [`Output`]; [`build_response`] turns it into the
//! wire-level [`Response`] expected by API Gateway. The [`Callback`] is the
//! single-use completion channel for one invocation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::BoxError;
use crate::lifecycle::LifecycleError;

/// Status used when an [`Output`] does not carry one.
pub const DEFAULT_SUCCESS_STATUS: u16 = 200;

/// Handler output before it is rendered.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub payload: Value,
}

impl Output {
    pub fn ok(payload: impl Into<Value>) -> Self {
        Self {
            status_code: None,
            headers: None,
            payload: payload.into(),
        }
    }

    /// Serialize `payload` into an output.
    pub fn json<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::ok(serde_json::to_value(payload)?))
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }
}

impl From<Value> for Output {
    fn from(payload: Value) -> Self {
        Self::ok(payload)
    }
}

/// Wire-level response: `{statusCode, headers, body}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Response {
    /// Parse the body as JSON.
    pub fn json_body(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Render an [`Output`].
///
/// A string payload becomes the body verbatim; anything else is serialized
/// as JSON.
pub fn build_response(output: Output) -> Response {
    let body = match output.payload {
        Value::String(text) => text,
        other => other.to_string(),
    };
    Response {
        status_code: output.status_code.unwrap_or(DEFAULT_SUCCESS_STATUS),
        headers: output.headers.unwrap_or_default(),
        body,
    }
}

type Settlement = Result<Response, BoxError>;

/// Completion callback for one invocation.
///
/// Consumed by [`Callback::respond`] or [`Callback::error`], so it settles at
/// most once. Dropping it unsettled makes the paired [`Completion`] resolve to
/// [`LifecycleError::CallbackDropped`].
#[derive(Debug)]
pub struct Callback {
    sender: oneshot::Sender<Settlement>,
    wait_for_pending: Arc<AtomicBool>,
}

/// Receiving side of a [`Callback`].
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<Settlement>,
    wait_for_pending: Arc<AtomicBool>,
}

impl Callback {
    /// Create a callback and the completion it settles.
    pub fn channel() -> (Callback, Completion) {
        let (sender, receiver) = oneshot::channel();
        let wait_for_pending = Arc::new(AtomicBool::new(true));
        (
            Callback {
                sender,
                wait_for_pending: Arc::clone(&wait_for_pending),
            },
            Completion {
                receiver,
                wait_for_pending,
            },
        )
    }

    /// Settle with a formed response.
    pub fn respond(self, response: Response) {
        // The receiver is gone only if the caller stopped waiting.
        let _ = self.sender.send(Ok(response));
    }

    /// Settle with a transport-level error.
    pub fn error(self, error: impl Into<BoxError>) {
        let _ = self.sender.send(Err(error.into()));
    }

    /// Whether in-flight background work should finish before the
    /// invocation is reported complete.
    pub fn set_wait_for_pending(&self, wait: bool) {
        self.wait_for_pending.store(wait, Ordering::SeqCst);
    }

    pub fn wait_for_pending(&self) -> bool {
        self.wait_for_pending.load(Ordering::SeqCst)
    }

    /// A handle sharing this callback's flags that cannot settle it.
    pub fn handle(&self) -> CallbackHandle {
        CallbackHandle {
            wait_for_pending: Arc::clone(&self.wait_for_pending),
        }
    }
}

/// Non-settling view of a [`Callback`].
///
/// Handlers that return their output instead of responding get this handle,
/// so they can still adjust the wait-for-pending flag.
#[derive(Debug, Clone)]
pub struct CallbackHandle {
    wait_for_pending: Arc<AtomicBool>,
}

impl CallbackHandle {
    pub fn set_wait_for_pending(&self, wait: bool) {
        self.wait_for_pending.store(wait, Ordering::SeqCst);
    }

    pub fn wait_for_pending(&self) -> bool {
        self.wait_for_pending.load(Ordering::SeqCst)
    }
}

impl Completion {
    /// Wait for the callback to settle.
    pub async fn wait(self) -> Result<Response, LifecycleError> {
        match self.receiver.await {
            Ok(settlement) => settlement.map_err(LifecycleError::Transport),
            Err(_) => Err(LifecycleError::CallbackDropped),
        }
    }

    /// The settled value, if the callback has already been used.
    pub fn try_settled(&mut self) -> Option<Result<Response, LifecycleError>> {
        match self.receiver.try_recv() {
            Ok(settlement) => Some(settlement.map_err(LifecycleError::Transport)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(LifecycleError::CallbackDropped)),
        }
    }

    /// Current value of the wait-for-pending flag.
    pub fn wait_for_pending(&self) -> bool {
        self.wait_for_pending.load(Ordering::SeqCst)
    }

    pub(crate) fn wait_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.wait_for_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_payload_is_used_verbatim() {
        let response = build_response(Output::ok("<h1>hi</h1>"));
        assert_eq!(response.body, "<h1>hi</h1>");
        assert_eq!(response.status_code, 200);
        assert!(response.headers.is_empty());
    }

    #[test]
    fn structured_payload_is_serialized() {
        let payload = json!({"id": 7, "tags": ["a", "b"], "note": null});
        let response = build_response(Output::ok(payload.clone()));
        assert_eq!(response.body, serde_json::to_string(&payload).unwrap());
        assert_eq!(response.json_body().unwrap(), payload);
    }

    #[test]
    fn scalar_payloads_are_serialized() {
        assert_eq!(build_response(Output::ok(42)).body, "42");
        assert_eq!(build_response(Output::ok(true)).body, "true");
        assert_eq!(build_response(Output::ok(Value::Null)).body, "null");
    }

    #[test]
    fn status_and_headers_are_kept() {
        let response = build_response(
            Output::ok(json!({}))
                .with_status(201)
                .with_header("Location", "/orders/7"),
        );
        assert_eq!(response.status_code, 201);
        assert_eq!(response.headers["Location"], "/orders/7");
    }

    #[test]
    fn response_serializes_camel_case() {
        let value = serde_json::to_value(build_response(Output::ok("x"))).unwrap();
        assert_eq!(value, json!({"statusCode": 200, "headers": {}, "body": "x"}));
    }

    #[tokio::test]
    async fn callback_settles_completion() {
        let (callback, completion) = Callback::channel();
        callback.respond(build_response(Output::ok("done")));
        assert_eq!(completion.wait().await.unwrap().body, "done");
    }

    #[tokio::test]
    async fn dropped_callback_is_reported() {
        let (callback, completion) = Callback::channel();
        drop(callback);
        assert!(matches!(
            completion.wait().await,
            Err(LifecycleError::CallbackDropped)
        ));
    }

    #[test]
    fn try_settled_is_empty_until_used() {
        let (callback, mut completion) = Callback::channel();
        assert!(completion.try_settled().is_none());
        callback.error("socket closed");
        assert!(matches!(
            completion.try_settled(),
            Some(Err(LifecycleError::Transport(_)))
        ));
    }

    #[test]
    fn wait_flag_is_shared() {
        let (callback, completion) = Callback::channel();
        assert!(completion.wait_for_pending());
        callback.set_wait_for_pending(false);
        assert!(!completion.wait_for_pending());
    }

    #[test]
    fn handle_shares_flag_without_settling() {
        let (callback, mut completion) = Callback::channel();
        let handle = callback.handle();
        handle.set_wait_for_pending(false);
        assert!(!callback.wait_for_pending());
        assert!(!completion.wait_for_pending());
        assert!(completion.try_settled().is_none());

        drop(handle);
        callback.respond(build_response(Output::ok("still usable")));
        assert_eq!(completion.try_settled().unwrap().unwrap().body, "still usable");
    }
}
