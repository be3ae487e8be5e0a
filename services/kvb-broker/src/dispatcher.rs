//! Request Dispatch (C5).
//!
//! One envelope in, one envelope out. `execute` is the part that actually
//! talks to a storage adapter and fans out subscription updates; `dispatch`
//! wraps it with request-type parsing and envelope framing, and `handle_batch`
//! reuses `execute` for each sub-operation so BATCH gets identical semantics
//! to a top-level request, including notification fan-out per sub-operation.

use crate::session::SessionHandle;
use crate::state::AppState;
use kvb_protocol::{
    BatchOperation, BatchPayload, BatchResultEntry, DeletePayload, Envelope, GetPayload,
    PongResult, QueryPayload, RequestType, SetPayload, SubscribePayload, Value,
};
use kvb_storage::StorageAdapter;
use std::sync::Arc;
use tracing::warn;

pub async fn dispatch(state: &AppState, session: &Arc<SessionHandle>, envelope: Envelope) -> Envelope {
    let Some(request_type) = RequestType::parse(&envelope.kind) else {
        return Envelope::error(envelope.request_id, format!("unknown request type: {}", envelope.kind));
    };
    let payload = envelope.payload.unwrap_or_default();
    let request_id = envelope.request_id;

    match execute(state, session, request_type, payload).await {
        Ok(data) => Envelope::response(request_type, request_id, data),
        Err(message) => Envelope::error(request_id, message),
    }
}

/// Shared by top-level dispatch and BATCH sub-operations. Subscription
/// fan-out happens here, inside the mutation, not in the caller — so a SET
/// nested in a BATCH still notifies subscribers exactly once, in order.
async fn execute(
    state: &AppState,
    session: &Arc<SessionHandle>,
    request_type: RequestType,
    payload: Value,
) -> Result<Value, String> {
    let adapter = state.adapter_for(&session.platform);
    match request_type {
        RequestType::Get => {
            let p: GetPayload = from_value(payload)?;
            let value = adapter
                .get(&p.collection, &p.key, &p.options)
                .await
                .map_err(|e| e.to_string())?
                .unwrap_or(Value::Null);
            Ok(value)
        }
        RequestType::Set => {
            let p: SetPayload = from_value(payload)?;
            let result = adapter
                .set(&p.collection, &p.key, p.value.clone(), &p.options)
                .await
                .map_err(|e| e.to_string())?;
            state
                .subscriptions
                .notify(&p.collection, &p.key, "SET", Some(p.value), &session.client_id)
                .await;
            to_value(&result)
        }
        RequestType::Delete => {
            let p: DeletePayload = from_value(payload)?;
            let result = adapter
                .delete(&p.collection, &p.key, &p.options)
                .await
                .map_err(|e| e.to_string())?;
            state
                .subscriptions
                .notify(&p.collection, &p.key, "DELETE", None, &session.client_id)
                .await;
            to_value(&result)
        }
        RequestType::Query => {
            let p: QueryPayload = from_value(payload)?;
            let rows = adapter
                .query(&p.collection, &p.predicate, &p.options)
                .await
                .map_err(|e| e.to_string())?;
            to_value(&rows)
        }
        RequestType::Ping => to_value(&PongResult { pong: true }),
        RequestType::Subscribe => {
            let p: SubscribePayload = from_value(payload)?;
            state
                .subscriptions
                .subscribe(&session.client_id, &p.collection, &p.pattern)
                .await;
            Ok(Value::Bool(true))
        }
        RequestType::Unsubscribe => {
            let p: SubscribePayload = from_value(payload)?;
            state
                .subscriptions
                .unsubscribe(&session.client_id, &p.collection, &p.pattern)
                .await
                .map_err(|()| "not subscribed to this collection/pattern".to_owned())?;
            Ok(Value::Bool(true))
        }
        RequestType::Batch => handle_batch(state, session, &adapter, payload).await,
    }
}

async fn handle_batch(
    state: &AppState,
    session: &Arc<SessionHandle>,
    _adapter: &Arc<dyn StorageAdapter>,
    payload: Value,
) -> Result<Value, String> {
    let p: BatchPayload = from_value(payload)?;
    let mut results = Vec::with_capacity(p.operations.len());
    for BatchOperation { id, op_type, payload } in p.operations {
        let Some(sub_type) = RequestType::parse(&op_type) else {
            results.push(BatchResultEntry {
                operation: id,
                result: Value::String(format!("unknown request type: {op_type}")),
            });
            if p.stop_on_error {
                break;
            }
            continue;
        };
        match Box::pin(execute(state, session, sub_type, payload)).await {
            Ok(value) => results.push(BatchResultEntry { operation: id, result: value }),
            Err(message) => {
                warn!(operation = %id, error = %message, "batch sub-operation failed");
                results.push(BatchResultEntry {
                    operation: id,
                    result: Value::String(message),
                });
                if p.stop_on_error {
                    break;
                }
            }
        }
    }
    to_value(&results)
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, String> {
    serde_json::from_value(value.into()).map_err(|e| format!("invalid payload: {e}"))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    let json = serde_json::to_value(value).map_err(|e| format!("internal serialization error: {e}"))?;
    Ok(Value::from(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use kvb_protocol::Platform;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(BrokerConfig {
            port: 0,
            data_dir: dir.path().to_path_buf(),
        })
        .await
        .unwrap();
        (state, dir)
    }

    fn test_session() -> Arc<SessionHandle> {
        let (session, _rx) = SessionHandle::new("c1".to_owned(), Platform::Browser);
        Arc::new(session)
    }

    #[tokio::test]
    async fn ping_responds_with_pong_result_and_echoes_request_id() {
        let (state, _dir) = test_state().await;
        let session = test_session();
        let envelope = Envelope::request(RequestType::Ping, 42, Value::Null);
        let response = dispatch(&state, &session, envelope).await;
        assert_eq!(response.kind, "PING_RESPONSE");
        assert_eq!(response.request_id, Some(42));
        assert_eq!(response.success, Some(true));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_dispatch() {
        let (state, _dir) = test_state().await;
        let session = test_session();

        let set_payload = serde_json::json!({"collection":"cart","key":"u1","value":{"total":1}});
        let set_envelope = Envelope::request(RequestType::Set, 1, Value::from(set_payload));
        let set_response = dispatch(&state, &session, set_envelope).await;
        assert_eq!(set_response.success, Some(true));

        let get_payload = serde_json::json!({"collection":"cart","key":"u1"});
        let get_envelope = Envelope::request(RequestType::Get, 2, Value::from(get_payload));
        let get_response = dispatch(&state, &session, get_envelope).await;
        let data: serde_json::Value = get_response.data.unwrap().into();
        assert_eq!(data["total"], 1);
    }

    #[tokio::test]
    async fn unknown_request_type_returns_an_error_envelope() {
        let (state, _dir) = test_state().await;
        let session = test_session();
        let envelope = Envelope {
            kind: "FROBNICATE".to_owned(),
            request_id: Some(9),
            payload: Some(Value::Null),
            timestamp: 0,
            success: None,
            data: None,
            error: None,
        };
        let response = dispatch(&state, &session, envelope).await;
        assert_eq!(response.success, Some(false));
        assert!(response.error.unwrap().contains("FROBNICATE"));
    }

    #[tokio::test]
    async fn batch_continues_past_a_failing_sub_operation_by_default() {
        let (state, _dir) = test_state().await;
        let session = test_session();

        let batch_payload = serde_json::json!({
            "operations": [
                {"id": "op1", "type": "SET", "payload": {"collection":"cart","key":"u1","value":1}},
                {"id": "op2", "type": "FROBNICATE", "payload": {}},
                {"id": "op3", "type": "GET", "payload": {"collection":"cart","key":"u1"}},
            ]
        });
        let envelope = Envelope::request(RequestType::Batch, 5, Value::from(batch_payload));
        let response = dispatch(&state, &session, envelope).await;
        assert_eq!(response.success, Some(true));
        let data: serde_json::Value = response.data.unwrap().into();
        let entries = data.as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2]["operation"], "op3");
        assert_eq!(entries[2]["result"], 1);
    }

    #[tokio::test]
    async fn batch_stops_after_a_failure_when_stop_on_error_is_set() {
        let (state, _dir) = test_state().await;
        let session = test_session();

        let batch_payload = serde_json::json!({
            "stop_on_error": true,
            "operations": [
                {"id": "op1", "type": "FROBNICATE", "payload": {}},
                {"id": "op2", "type": "PING", "payload": {}},
            ]
        });
        let envelope = Envelope::request(RequestType::Batch, 6, Value::from(batch_payload));
        let response = dispatch(&state, &session, envelope).await;
        let data: serde_json::Value = response.data.unwrap().into();
        let entries = data.as_array().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_without_a_prior_subscribe_fails() {
        let (state, _dir) = test_state().await;
        let session = test_session();
        let payload = serde_json::json!({"collection":"cart","pattern":"u1"});
        let envelope = Envelope::request(RequestType::Unsubscribe, 1, Value::from(payload));
        let response = dispatch(&state, &session, envelope).await;
        assert_eq!(response.success, Some(false));
    }
}
