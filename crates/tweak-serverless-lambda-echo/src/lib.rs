//! AWS Lambda function echoing validated messages.
//!
//! Expects an API Gateway proxy event whose JSON body carries a `message`
//! and an optional `repeat` count, and answers with the repeated message.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use tweak_serverless::{
    BodyParser, CallbackHandle, DispatchMode, Facade, HandlerError, Lifecycle, LifecycleOptions,
    Output, Schema,
};

/// Longest accepted message, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 1024;

/// Largest accepted repeat count.
pub const MAX_REPEAT: u32 = 10;

#[derive(Debug, Deserialize)]
struct EchoBody {
    message: String,
    repeat: u32,
}

/// Body of a successful response.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EchoResponse {
    pub message: String,
    pub request_id: String,
}

/// Schema for the incoming event.
pub fn event_schema() -> Schema {
    Schema::object()
        .key(
            "body",
            Schema::object()
                .key(
                    "message",
                    Schema::string()
                        .min_length(1)
                        .max_length(MAX_MESSAGE_LENGTH)
                        .required(),
                )
                .key(
                    "repeat",
                    Schema::number()
                        .integer()
                        .min(1.0)
                        .max(f64::from(MAX_REPEAT))
                        .default(json!(1)),
                )
                .required(),
        )
        .unknown(true)
}

/// Schema for the invocation context.
pub fn context_schema() -> Schema {
    Schema::object()
        .key("requestId", Schema::string().required())
        .unknown(true)
}

/// Lifecycle settings for the echo handler.
pub fn options() -> LifecycleOptions {
    LifecycleOptions::new(DispatchMode::respond_after(echo))
        .event_schema(event_schema())
        .context_schema(context_schema())
        .body_parser(BodyParser::Json)
}

pub fn build_lifecycle(facade: &Arc<Facade>) -> Lifecycle {
    facade.prepare(options())
}

async fn echo(event: Value, context: Value, _callback: CallbackHandle) -> Result<Output, HandlerError> {
    let body: EchoBody = serde_json::from_value(event["body"].clone())?;
    let request_id = context["requestId"].as_str().unwrap_or_default().to_string();

    info!(request_id = %request_id, repeat = body.repeat, "echoing message");

    let message = vec![body.message.as_str(); body.repeat as usize].join(" ");
    Ok(Output::json(&EchoResponse {
        message,
        request_id,
    })?)
}
