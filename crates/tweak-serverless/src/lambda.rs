//! AWS Lambda runtime adapter.

use lambda_runtime::{service_fn, Context, Error, LambdaEvent};
use serde_json::{json, Value};

use crate::lifecycle::Lifecycle;
use crate::response::Response;

/// Serve `lifecycle` on the Lambda runtime until the process is stopped.
pub async fn run(lifecycle: Lifecycle) -> Result<(), Error> {
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let lifecycle = lifecycle.clone();
        async move { handle(&lifecycle, event).await }
    }))
    .await
}

async fn handle(lifecycle: &Lifecycle, event: LambdaEvent<Value>) -> Result<Response, Error> {
    let (payload, context) = event.into_parts();
    let context = context_value(&context);
    Ok(lifecycle.invoke(payload, context).await?)
}

/// The invocation context as seen by context schemas and handlers.
pub fn context_value(context: &Context) -> Value {
    json!({
        "requestId": context.request_id,
        "deadline": context.deadline,
        "invokedFunctionArn": context.invoked_function_arn,
        "xrayTraceId": context.xray_trace_id,
        "functionName": context.env_config.function_name,
    })
}
