//! Inbound webhook listener.
//!
//! Converts each `POST /webhook` into the engine's message shape —
//! `header` as a name → values multimap, `body` as the parsed JSON
//! tree — and dispatches it to the configured event source. The
//! listener always acknowledges with `202 Accepted`: body and dispatch
//! errors are logged and the message is dropped, so one bad delivery
//! never affects the next.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;

use eventgate_engine::{webhook_message, Dispatcher};

/// Event source webhooks are dispatched to unless configured otherwise.
pub const DEFAULT_EVENT_SOURCE: &str = "default";

#[derive(Clone)]
pub struct ListenerState {
    pub dispatcher: Dispatcher,
    pub event_source: String,
}

pub fn router(state: ListenerState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<ListenerState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let body: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("webhook body is not JSON: {e}");
            return StatusCode::ACCEPTED;
        }
    };

    let message = webhook_message(header_multimap(&headers), body);
    match state
        .dispatcher
        .process_message(message, &state.event_source)
        .await
    {
        Ok(results) => {
            tracing::info!(
                source = %state.event_source,
                triggers = results.len(),
                "webhook dispatched"
            );
        }
        Err(e) => {
            tracing::error!(source = %state.event_source, "webhook dispatch failed: {e}");
        }
    }
    StatusCode::ACCEPTED
}

/// Collect headers into the message multimap, restoring canonical
/// dash-separated capitalization (`x-github-event` →
/// `X-Github-Event`) so trigger programs can match on the names
/// senders document.
fn header_multimap(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();
        if values.is_empty() {
            continue;
        }
        map.entry(canonical_header_name(name.as_str()))
            .or_default()
            .extend(values);
    }
    map
}

fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
