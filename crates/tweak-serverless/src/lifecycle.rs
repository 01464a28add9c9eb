//! Request lifecycle orchestration.
//!
//! A [`Lifecycle`] runs every invocation through the same steps: optional
//! JSON body parsing, concurrent event/context validation, then dispatch to
//! the handler according to its [`DispatchMode`]. Every rejection along the
//! way ends in [`Facade::fail`], so callers always get a formed response.

use std::fmt;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::{BoxError, ErrorArgs, HandlerError};
use crate::facade::Facade;
use crate::logging::LogLevel;
use crate::response::{Callback, CallbackHandle, Output, Response};
use crate::schema::Schema;

/// Errors surfaced by [`Lifecycle::invoke`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The handler dropped the callback without settling it.
    #[error("callback dropped before a response was produced")]
    CallbackDropped,

    /// The dispatch mode hands the invocation back to the caller.
    #[error("invocation deferred to the caller")]
    Deferred,

    /// A handler settled the callback with a transport error.
    #[error("transport error: {0}")]
    Transport(BoxError),
}

type DirectHandler = dyn Fn(Value, Value, Callback) -> BoxFuture<'static, ()> + Send + Sync;
type HandlerResult = Result<Output, HandlerError>;
type RespondAfterHandler =
    dyn Fn(Value, Value, CallbackHandle) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// How the validated invocation reaches the handler.
#[derive(Clone)]
pub enum DispatchMode {
    /// The handler receives the callback and settles it itself.
    Direct(Arc<DirectHandler>),
    /// The handler returns an [`Output`]; the lifecycle responds with it.
    /// The handler gets a [`CallbackHandle`], never the callback itself.
    RespondAfter(Arc<RespondAfterHandler>),
    /// The validated invocation is returned to the caller.
    ExpectPromise,
}

impl DispatchMode {
    pub fn direct<F, Fut>(handler: F) -> Self
    where
        F: Fn(Value, Value, Callback) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        DispatchMode::Direct(Arc::new(move |event, context, callback| {
            handler(event, context, callback).boxed()
        }))
    }

    pub fn respond_after<F, Fut>(handler: F) -> Self
    where
        F: Fn(Value, Value, CallbackHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Output, HandlerError>> + Send + 'static,
    {
        DispatchMode::RespondAfter(Arc::new(move |event, context, callback| {
            handler(event, context, callback).boxed()
        }))
    }
}

impl fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Direct(_) => f.write_str("Direct"),
            DispatchMode::RespondAfter(_) => f.write_str("RespondAfter"),
            DispatchMode::ExpectPromise => f.write_str("ExpectPromise"),
        }
    }
}

/// Request body decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyParser {
    Json,
}

/// Per-handler lifecycle settings.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub dispatch: DispatchMode,
    pub event_schema: Option<Schema>,
    pub context_schema: Option<Schema>,
    pub body_parser: Option<BodyParser>,
    /// Report completion without waiting for background notifications.
    pub forced_response: bool,
}

impl LifecycleOptions {
    pub fn new(dispatch: DispatchMode) -> Self {
        Self {
            dispatch,
            event_schema: None,
            context_schema: None,
            body_parser: None,
            forced_response: false,
        }
    }

    pub fn event_schema(mut self, schema: Schema) -> Self {
        self.event_schema = Some(schema);
        self
    }

    pub fn context_schema(mut self, schema: Schema) -> Self {
        self.context_schema = Some(schema);
        self
    }

    pub fn body_parser(mut self, parser: BodyParser) -> Self {
        self.body_parser = Some(parser);
        self
    }

    pub fn forced_response(mut self, forced: bool) -> Self {
        self.forced_response = forced;
        self
    }
}

/// A validated invocation handed back in [`DispatchMode::ExpectPromise`].
#[derive(Debug)]
pub struct Invocation {
    pub event: Value,
    pub context: Value,
    pub callback: Callback,
}

/// Entry point for one handler.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    facade: Arc<Facade>,
    options: Arc<LifecycleOptions>,
}

impl Lifecycle {
    pub fn new(facade: Arc<Facade>, options: LifecycleOptions) -> Self {
        Self {
            facade,
            options: Arc::new(options),
        }
    }

    pub fn facade(&self) -> &Arc<Facade> {
        &self.facade
    }

    pub fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    /// Run one invocation.
    ///
    /// Returns the validated invocation in [`DispatchMode::ExpectPromise`]
    /// mode, leaving `callback` to the caller; `None` otherwise, or whenever
    /// validation failed and the callback was already settled.
    pub async fn call(&self, event: Value, context: Value, callback: Callback) -> Option<Invocation> {
        callback.set_wait_for_pending(!self.options.forced_response);

        let (event, context) = match self.validate(event, context).await {
            Ok(validated) => validated,
            Err(err) => {
                self.reject(err, callback);
                return None;
            }
        };

        match &self.options.dispatch {
            DispatchMode::ExpectPromise => Some(Invocation {
                event,
                context,
                callback,
            }),
            DispatchMode::RespondAfter(handler) => {
                match handler(event, context, callback.handle()).await {
                    Ok(output) => self.facade.respond(output, callback),
                    Err(err) => self.reject(err, callback),
                }
                None
            }
            DispatchMode::Direct(handler) => {
                handler(event, context, callback).await;
                None
            }
        }
    }

    /// Run one invocation and wait for its response.
    ///
    /// Unless the lifecycle forces the response, background notifications
    /// are drained before returning.
    pub async fn invoke(&self, event: Value, context: Value) -> Result<Response, LifecycleError> {
        let (callback, completion) = Callback::channel();
        let wait_for_pending = completion.wait_flag();

        if self.call(event, context, callback).await.is_some() {
            return Err(LifecycleError::Deferred);
        }

        let result = completion.wait().await;
        if wait_for_pending.load(Ordering::SeqCst) {
            self.facade.drain_pending().await;
        }
        result
    }

    async fn validate(&self, mut event: Value, context: Value) -> Result<(Value, Value), HandlerError> {
        if self.options.body_parser == Some(BodyParser::Json) {
            parse_json_body(&mut event)?;
        }

        let facade = &self.facade;
        let options = &self.options;
        let event_check = async move {
            match &options.event_schema {
                Some(schema) => facade.schema_validate(event, schema).await,
                None => Ok(event),
            }
        };
        let context_check = async move {
            match &options.context_schema {
                Some(schema) => facade.schema_validate(context, schema).await,
                None => Ok(context),
            }
        };

        Ok(futures::try_join!(event_check, context_check)?)
    }

    fn reject(&self, err: HandlerError, callback: Callback) {
        self.facade.logger().log(
            LogLevel::Error,
            "Lifecycle rejected",
            json!({"error": err.to_string()}),
        );
        self.facade.fail(err, Some(ErrorArgs::default()), callback);
    }
}

/// Replace a string `body` with its parsed JSON form.
fn parse_json_body(event: &mut Value) -> Result<(), serde_json::Error> {
    let parsed = match event.get("body") {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)?,
        _ => return Ok(()),
    };
    if let Some(object) = event.as_object_mut() {
        object.insert("body".to_string(), parsed);
    }
    Ok(())
}
