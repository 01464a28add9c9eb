//! Remote log shipping to Loggly.
//!
//! Events are converted to JSON on the calling thread and handed to a
//! dedicated shipper thread, which posts them to the Loggly HTTP inputs API
//! with a blocking `reqwest` client. Logging never waits on the network.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use serde_json::Value;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::config::LogglyConfig;
use crate::logging::event_entry;

/// Loggly HTTP inputs endpoint.
const LOGGLY_INPUTS_URL: &str = "https://logs-01.loggly.com/inputs";

/// Targets whose events are never shipped, to keep the shipper's own HTTP
/// traffic out of the stream.
const SKIPPED_TARGETS: [&str; 3] = ["reqwest", "hyper", "rustls"];

/// `tracing` layer forwarding events to Loggly.
pub struct LogglyLayer {
    sender: Sender<Value>,
}

impl LogglyLayer {
    /// Start the shipper thread and return the layer feeding it.
    pub fn spawn(config: &LogglyConfig) -> Self {
        let (sender, receiver) = mpsc::channel();
        let endpoint = endpoint(config);
        let subdomain = config.subdomain.clone();

        if let Err(e) = thread::Builder::new()
            .name("loggly-shipper".to_string())
            .spawn(move || ship(&endpoint, &subdomain, receiver))
        {
            eprintln!("failed to start Loggly shipper: {}", e);
        }

        Self { sender }
    }

    /// Build a layer around an existing channel, without a shipper thread.
    #[cfg(test)]
    fn from_sender(sender: Sender<Value>) -> Self {
        Self { sender }
    }
}

impl<S: Subscriber> Layer<S> for LogglyLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if SKIPPED_TARGETS
            .iter()
            .any(|skipped| target.starts_with(skipped))
        {
            return;
        }

        // The receiver only goes away if the shipper thread died; entries are
        // dropped in that case.
        let _ = self.sender.send(Value::Object(event_entry(event)));
    }
}

fn endpoint(config: &LogglyConfig) -> String {
    format!(
        "{}/{}/tag/{}/",
        LOGGLY_INPUTS_URL,
        config.token,
        config.tags.join(",")
    )
}

fn ship(endpoint: &str, subdomain: &str, receiver: Receiver<Value>) {
    let client = reqwest::blocking::Client::new();
    for entry in receiver {
        let result = client
            .post(endpoint)
            .json(&entry)
            .send()
            .and_then(|response| response.error_for_status());
        if let Err(e) = result {
            // Reporting through tracing would feed the failure back into this
            // layer.
            eprintln!("Loggly ({}) rejected log entry: {}", subdomain, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn config() -> LogglyConfig {
        LogglyConfig {
            token: "abc123".to_string(),
            subdomain: "acme".to_string(),
            tags: vec!["test".to_string(), "orders-api".to_string()],
        }
    }

    #[test]
    fn endpoint_includes_token_and_tags() {
        assert_eq!(
            endpoint(&config()),
            "https://logs-01.loggly.com/inputs/abc123/tag/test,orders-api/"
        );
    }

    #[test]
    fn events_are_converted_to_json_entries() {
        let (sender, receiver) = mpsc::channel();
        let subscriber = tracing_subscriber::registry().with(LogglyLayer::from_sender(sender));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(request_id = "req-1", attempt = 2, "notice failed");
            tracing::info!(target: "reqwest::connect", "skipped");
        });

        let entries: Vec<Value> = receiver.try_iter().collect();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry["message"], "notice failed");
        assert_eq!(entry["request_id"], "req-1");
        assert_eq!(entry["attempt"], 2);
        assert_eq!(entry["level"], "WARN");
        assert!(entry["timestamp"].is_string());
    }

    #[test]
    fn logger_metadata_is_shipped_as_object() {
        let (sender, receiver) = mpsc::channel();
        let subscriber = tracing_subscriber::registry().with(LogglyLayer::from_sender(sender));

        tracing::subscriber::with_default(subscriber, || {
            let metadata = serde_json::json!({"statusCode": 400, "headers": {}});
            tracing::debug!(log_level = "verbose", metadata = %metadata, "Fail with error");
        });

        let entries: Vec<Value> = receiver.try_iter().collect();
        assert_eq!(entries[0]["metadata"]["statusCode"], 400);
        assert_eq!(entries[0]["log_level"], "verbose");
    }
}
