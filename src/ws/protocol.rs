//! Inbound subscription protocol.
//!
//! Turns one client text frame into exactly one [`Reply`]. Nothing a
//! client sends closes the connection; bad input only earns an error.

use chrono::Utc;

use super::messages::{ClientMessage, ErrorReply, PushMessage, Reply};
use super::registry::ConnectionRegistry;
use crate::domain::submission::parse_country_code;
use crate::domain::{ConnectionFilters, ConnectionId};

const ACTIONS: [&str; 3] = ["subscribe", "unsubscribe", "ping"];

/// Handles one text frame from connection `id`.
pub async fn handle_text(text: &str, id: &ConnectionId, registry: &ConnectionRegistry) -> Reply {
    let message = match parse(text) {
        Ok(message) => message,
        Err(reply) => return reply.into(),
    };

    match message {
        ClientMessage::Subscribe { filters } => {
            let filters = match normalize_filters(filters) {
                Ok(filters) => filters,
                Err(reply) => return reply.into(),
            };
            if let Err(e) = registry.update_filters(id, filters.clone()).await {
                tracing::warn!(connection_id = %id, error = %e, "subscribe failed");
                return ErrorReply::new("Subscription temporarily unavailable").into();
            }
            tracing::debug!(connection_id = %id, ?filters, "subscribed");
            PushMessage::Subscribed {
                filters: filters.unwrap_or_default(),
            }
            .into()
        }
        ClientMessage::Unsubscribe => {
            if let Err(e) = registry.update_filters(id, None).await {
                tracing::warn!(connection_id = %id, error = %e, "unsubscribe failed");
                return ErrorReply::new("Subscription temporarily unavailable").into();
            }
            PushMessage::Unsubscribed.into()
        }
        ClientMessage::Ping => {
            if let Err(e) = registry.heartbeat(id).await {
                tracing::warn!(connection_id = %id, error = %e, "heartbeat failed");
            }
            PushMessage::Pong {
                timestamp: Utc::now().timestamp_millis(),
            }
            .into()
        }
    }
}

fn parse(text: &str) -> Result<ClientMessage, ErrorReply> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ErrorReply::new("Invalid JSON"))?;
    let Some(action) = value.get("action").and_then(serde_json::Value::as_str) else {
        return Err(ErrorReply::new("action: action is required"));
    };
    if !ACTIONS.contains(&action) {
        return Err(ErrorReply::new("Unknown action"));
    }
    serde_json::from_value(value).map_err(|e| ErrorReply::new(format!("Invalid message: {e}")))
}

/// Validates and canonicalizes filters. An empty filter is stored as
/// `None` so it matches everything.
fn normalize_filters(
    filters: Option<ConnectionFilters>,
) -> Result<Option<ConnectionFilters>, ErrorReply> {
    let Some(filters) = filters else {
        return Ok(None);
    };
    let country_code = match filters.country_code.as_deref() {
        None => None,
        Some(raw) => Some(parse_country_code(raw).ok_or_else(|| {
            ErrorReply::new("filters.country_code: must be a 2-letter country code")
        })?),
    };
    let filters = ConnectionFilters { country_code };
    Ok((!filters.is_empty()).then_some(filters))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::persistence::testing::{FaultyStore, Op};
    use crate::persistence::{DurableStore, MemoryStore};

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(MemoryStore::new()), 7200)
    }

    fn error_text(reply: &Reply) -> &str {
        let Reply::Error(err) = reply else {
            panic!("expected error reply, got {reply:?}");
        };
        &err.error
    }

    #[tokio::test]
    async fn subscribe_normalizes_and_echoes_filters() {
        let registry = registry();
        let id = ConnectionId::new("c");
        let reply = handle_text(
            r#"{"action":"subscribe","filters":{"country_code":"us"}}"#,
            &id,
            &registry,
        )
        .await;
        let expected = ConnectionFilters {
            country_code: Some("US".to_string()),
        };
        assert_eq!(
            reply,
            Reply::Push(PushMessage::Subscribed {
                filters: expected.clone()
            })
        );
        let Ok(all) = registry.list_all().await else {
            panic!("list failed");
        };
        assert!(all.first().is_some_and(|c| c.filters == Some(expected.clone())));
    }

    #[tokio::test]
    async fn subscribe_without_filters_echoes_empty() {
        let registry = registry();
        let reply = handle_text(r#"{"action":"subscribe"}"#, &ConnectionId::new("c"), &registry).await;
        assert_eq!(
            reply,
            Reply::Push(PushMessage::Subscribed {
                filters: ConnectionFilters::default()
            })
        );
    }

    #[tokio::test]
    async fn unsubscribe_clears_filters() {
        let registry = registry();
        let id = ConnectionId::new("c");
        let _ = registry
            .register(
                &id,
                Some(ConnectionFilters {
                    country_code: Some("DE".to_string()),
                }),
            )
            .await;
        let reply = handle_text(r#"{"action":"unsubscribe"}"#, &id, &registry).await;
        assert_eq!(reply, Reply::Push(PushMessage::Unsubscribed));
        assert!(matches!(
            registry.list_all().await,
            Ok(all) if all.first().is_some_and(|c| c.filters.is_none())
        ));
    }

    #[tokio::test]
    async fn ping_replies_pong() {
        let registry = registry();
        let reply = handle_text(r#"{"action":"ping"}"#, &ConnectionId::new("c"), &registry).await;
        assert!(matches!(
            reply,
            Reply::Push(PushMessage::Pong { timestamp }) if timestamp > 0
        ));
    }

    #[tokio::test]
    async fn bad_input_gets_error_replies() {
        let registry = registry();
        let id = ConnectionId::new("c");
        assert_eq!(error_text(&handle_text("{not json", &id, &registry).await), "Invalid JSON");
        assert_eq!(
            error_text(&handle_text(r#"{"action":"dance"}"#, &id, &registry).await),
            "Unknown action"
        );
        assert!(
            error_text(&handle_text(r#"{"filters":{}}"#, &id, &registry).await)
                .starts_with("action")
        );
        assert!(
            error_text(
                &handle_text(
                    r#"{"action":"subscribe","filters":{"country_code":"USA"}}"#,
                    &id,
                    &registry
                )
                .await
            )
            .starts_with("filters.country_code")
        );
    }

    #[tokio::test]
    async fn store_failure_on_subscribe_is_reported() {
        let store = Arc::new(FaultyStore::new());
        store.fail(Op::UpsertConnection);
        let registry = ConnectionRegistry::new(Arc::clone(&store) as Arc<dyn DurableStore>, 60);
        let reply = handle_text(r#"{"action":"subscribe"}"#, &ConnectionId::new("c"), &registry).await;
        assert!(matches!(reply, Reply::Error(_)));
    }
}
