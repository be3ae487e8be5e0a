//! Integration tests covering echo, set/get, fan-out, wildcard
//! subscriptions, and batch-with-a-failure against a real broker instance.

use kvb_protocol::{Envelope, Notification, RequestType, Value};
use kvb_test_support::{spawn_test_broker, MockBrokerClient};

async fn connect() -> MockBrokerClient {
    let broker = spawn_test_broker().await;
    MockBrokerClient::connect(&broker.ws_url()).await.unwrap()
}

#[tokio::test]
async fn echo_scenario_pings_and_gets_pong_with_matching_request_id() {
    let mut client = connect().await;

    let welcome: Notification = client.recv_as().await.unwrap();
    match welcome {
        Notification::ConnectionEstablished { client_id, .. } => assert!(!client_id.is_empty()),
        other => panic!("expected CONNECTION_ESTABLISHED, got {other:?}"),
    }

    let ping = Envelope::request(RequestType::Ping, 1, Value::Object(Default::default()));
    client.send_envelope(&ping).await.unwrap();

    let response: Envelope = client.recv_as().await.unwrap();
    assert_eq!(response.kind, "PING_RESPONSE");
    assert_eq!(response.request_id, Some(1));
    assert_eq!(response.success, Some(true));
    let data: serde_json::Value = response.data.unwrap().into();
    assert_eq!(data["pong"], true);
}

#[tokio::test]
async fn set_get_scenario_round_trips_and_missing_key_is_null() {
    let mut client = connect().await;
    let _welcome: Notification = client.recv_as().await.unwrap();

    let set_payload = serde_json::json!({"collection":"cart","key":"u1","value":{"items":[],"total":0}});
    client
        .send_envelope(&Envelope::request(RequestType::Set, 1, Value::from(set_payload)))
        .await
        .unwrap();
    let set_response: Envelope = client.recv_as().await.unwrap();
    assert_eq!(set_response.success, Some(true));

    let get_payload = serde_json::json!({"collection":"cart","key":"u1"});
    client
        .send_envelope(&Envelope::request(RequestType::Get, 2, Value::from(get_payload)))
        .await
        .unwrap();
    let get_response: Envelope = client.recv_as().await.unwrap();
    let data: serde_json::Value = get_response.data.unwrap().into();
    assert_eq!(data, serde_json::json!({"items":[],"total":0}));

    let miss_payload = serde_json::json!({"collection":"cart","key":"u2"});
    client
        .send_envelope(&Envelope::request(RequestType::Get, 3, Value::from(miss_payload)))
        .await
        .unwrap();
    let miss_response: Envelope = client.recv_as().await.unwrap();
    let miss_data: serde_json::Value = miss_response.data.unwrap().into();
    assert!(miss_data.is_null());
}

#[tokio::test]
async fn fan_out_scenario_delivers_exactly_one_update_to_the_subscriber_only() {
    let broker = spawn_test_broker().await;
    let mut a = MockBrokerClient::connect(&broker.ws_url()).await.unwrap();
    let mut b = MockBrokerClient::connect(&broker.ws_url()).await.unwrap();
    let _: Notification = a.recv_as().await.unwrap();
    let _: Notification = b.recv_as().await.unwrap();

    let sub_payload = serde_json::json!({"collection":"cart","pattern":"u1"});
    a.send_envelope(&Envelope::request(RequestType::Subscribe, 1, Value::from(sub_payload)))
        .await
        .unwrap();
    let _: Envelope = a.recv_as().await.unwrap();

    let set_payload = serde_json::json!({"collection":"cart","key":"u1","value":{"total":7}});
    b.send_envelope(&Envelope::request(RequestType::Set, 1, Value::from(set_payload)))
        .await
        .unwrap();
    let _: Envelope = b.recv_as().await.unwrap();

    let update: Notification = a.recv_as().await.unwrap();
    match update {
        Notification::SubscriptionUpdate { collection, key, operation, value, .. } => {
            assert_eq!(collection, "cart");
            assert_eq!(key, "u1");
            assert_eq!(operation, "SET");
            let value: serde_json::Value = value.unwrap().into();
            assert_eq!(value, serde_json::json!({"total": 7}));
        }
        other => panic!("expected SUBSCRIPTION_UPDATE, got {other:?}"),
    }

    let ping = Envelope::request(RequestType::Ping, 99, Value::Object(Default::default()));
    b.send_envelope(&ping).await.unwrap();
    let response: Envelope = b.recv_as().await.unwrap();
    assert_eq!(response.kind, "PING_RESPONSE", "B should see no subscription update before its own PING_RESPONSE");
}

#[tokio::test]
async fn wildcard_scenario_sees_ordered_set_then_delete_with_null_value() {
    let broker = spawn_test_broker().await;
    let mut a = MockBrokerClient::connect(&broker.ws_url()).await.unwrap();
    let mut b = MockBrokerClient::connect(&broker.ws_url()).await.unwrap();
    let _: Notification = a.recv_as().await.unwrap();
    let _: Notification = b.recv_as().await.unwrap();

    let sub_payload = serde_json::json!({"collection":"cart","pattern":"*"});
    a.send_envelope(&Envelope::request(RequestType::Subscribe, 1, Value::from(sub_payload)))
        .await
        .unwrap();
    let _: Envelope = a.recv_as().await.unwrap();

    let set_payload = serde_json::json!({"collection":"cart","key":"u1","value":{"total":1}});
    b.send_envelope(&Envelope::request(RequestType::Set, 1, Value::from(set_payload)))
        .await
        .unwrap();
    let _: Envelope = b.recv_as().await.unwrap();

    let delete_payload = serde_json::json!({"collection":"cart","key":"u2"});
    b.send_envelope(&Envelope::request(RequestType::Delete, 2, Value::from(delete_payload)))
        .await
        .unwrap();
    let _: Envelope = b.recv_as().await.unwrap();

    let first: Notification = a.recv_as().await.unwrap();
    let second: Notification = a.recv_as().await.unwrap();
    match (first, second) {
        (
            Notification::SubscriptionUpdate { operation: op1, .. },
            Notification::SubscriptionUpdate { operation: op2, value, .. },
        ) => {
            assert_eq!(op1, "SET");
            assert_eq!(op2, "DELETE");
            assert!(value.is_none());
        }
        other => panic!("unexpected notifications: {other:?}"),
    }
}

#[tokio::test]
async fn batch_with_a_failure_returns_ordered_results_and_continues() {
    let mut client = connect().await;
    let _welcome: Notification = client.recv_as().await.unwrap();

    let batch_payload = serde_json::json!({
        "operations": [
            {"id": "a", "type": "SET", "payload": {"collection":"c","key":"k","value":{"x":1}}},
            {"id": "b", "type": "QUERY", "payload": {"collection":"c","query":{"x":1}}},
        ]
    });
    client
        .send_envelope(&Envelope::request(RequestType::Batch, 1, Value::from(batch_payload)))
        .await
        .unwrap();
    let response: Envelope = client.recv_as().await.unwrap();
    assert_eq!(response.success, Some(true));

    let data: serde_json::Value = response.data.unwrap().into();
    let entries = data.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["operation"], "a");
    assert_eq!(entries[1]["operation"], "b");
    let rows = entries[1]["result"].as_array().unwrap();
    assert_eq!(rows[0]["key"], "k");
    assert_eq!(rows[0]["x"], 1);
}
