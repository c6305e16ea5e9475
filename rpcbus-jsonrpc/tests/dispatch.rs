//! Integration tests that drive the bus through its public interface, the way a transport would.

/// The `testing` module is only compiled for the crate's own unit tests, so pull the same file in
/// here to share the logging setup.
#[path = "../src/testing.rs"]
mod test_helpers;
mod test_service;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rpcbus_jsonrpc::{
    FnMessageHandler, JsonRpcMessage, JsonValue, Message, MessageType, RpcBus, SubscribableChannel,
};
use serde_json::json;
use test_helpers::init_test_logging;
use test_service::{Overdrawn, WithdrawResponse, test_service_bus};
use tokio::sync::mpsc;

type Outbound = mpsc::UnboundedReceiver<Arc<Message<JsonRpcMessage>>>;

/// Stand-in for a transport: feeds requests into the bus and collects whatever comes out.
struct TestTransport {
    bus: RpcBus,
    outbound: Outbound,
}

impl TestTransport {
    fn new(balance: i64) -> (Self, test_service::SharedLedger) {
        init_test_logging();

        let (bus, ledger) = test_service_bus(balance);
        let (tx, outbound) = mpsc::unbounded_channel();
        bus.outbound()
            .subscribe(Arc::new(FnMessageHandler::new(move |message: Arc<Message<JsonRpcMessage>>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(message);
                    Ok(())
                }
            })));

        (Self { bus, outbound }, ledger)
    }

    fn send(&self, session_id: &str, payload: JsonValue) {
        assert!(self.bus.receive(session_id, payload).unwrap());
    }

    async fn next(&mut self) -> Arc<Message<JsonRpcMessage>> {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for an outbound message")
            .expect("outbound channel closed")
    }

    async fn next_json(&mut self) -> JsonValue {
        let message = self.next().await;
        serde_json::to_value(message.payload()).unwrap()
    }

    /// Send a request and wait for the one message it produces.
    async fn call(&mut self, payload: JsonValue) -> JsonValue {
        self.send("session-1", payload);
        self.next_json().await
    }

    async fn assert_quiet(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.outbound.recv()).await;
        assert!(next.is_err(), "unexpected outbound message: {next:?}");
    }
}

#[tokio::test]
async fn request_gets_correlated_response() {
    let (mut transport, _) = TestTransport::new(0);

    transport.send("session-1", json!({"id": 4, "method": "add", "params": {"x": 1, "y": 2}}));
    let response = transport.next().await;

    assert_eq!(serde_json::to_value(response.payload()).unwrap(), json!({"id": 4, "result": 3}));
    let headers = response.headers();
    assert_eq!(headers.session_id(), Some("session-1"));
    assert_eq!(headers.send_message_method(), Some("add"));
    assert_eq!(headers.message_type(), Some(MessageType::Response));
    assert!(headers.message_id().is_some());
}

#[tokio::test]
async fn version_marker_is_echoed() {
    let (mut transport, _) = TestTransport::new(0);

    let response = transport
        .call(json!({"jsonrpc": "2.0", "id": "abc", "method": "add", "params": [2, 3]}))
        .await;
    assert_eq!(response, json!({"jsonrpc": "2.0", "id": "abc", "result": 5}));
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let (mut transport, _) = TestTransport::new(0);

    let response = transport.call(json!({"id": 7, "method": "missing"})).await;
    assert_eq!(
        response,
        json!({"id": 7, "error": {"code": -32601, "message": "Unknown method 'missing'"}})
    );

    // The bus keeps working afterwards
    let response = transport.call(json!({"id": 8, "method": "add", "params": {"x": 2, "y": 2}})).await;
    assert_eq!(response, json!({"id": 8, "result": 4}));
}

#[tokio::test]
async fn invalid_request_is_answered_with_null_id() {
    let (mut transport, _) = TestTransport::new(0);

    let response = transport.call(json!({"id": [1, 2], "method": "add"})).await;
    assert_eq!(response["id"], JsonValue::Null);
    assert_eq!(response["error"]["code"], json!(-32600));
    assert!(response.get("result").is_none());
}

#[tokio::test]
async fn bad_params_are_invalid_params() {
    let (mut transport, _) = TestTransport::new(0);

    let response = transport
        .call(json!({"id": 1, "method": "add", "params": {"x": "one", "y": 2}}))
        .await;
    assert_eq!(response["error"]["code"], json!(-32602));

    let response = transport.call(json!({"id": 2, "method": "add", "params": {"x": 1}})).await;
    assert_eq!(
        response,
        json!({"id": 2, "error": {"code": -32602, "message": "Missing required parameter 'y'"}})
    );
}

#[tokio::test]
async fn explicit_error_code_is_reported() {
    let (mut transport, _) = TestTransport::new(0);

    let response = transport
        .call(json!({"id": 1, "method": "divide", "params": {"x": 1, "y": 0}}))
        .await;
    assert_eq!(
        response,
        json!({"id": 1, "error": {"code": -32000, "message": "division by zero"}})
    );
}

#[tokio::test]
async fn exception_handler_recovers_from_failures() {
    let (mut transport, _) = TestTransport::new(0);

    let response = transport.call(json!({"id": 1, "method": "bank.fail"})).await;
    assert_eq!(response, json!({"id": 1, "result": "boom"}));

    let response = transport.call(json!({"id": 2, "method": "bank.explode"})).await;
    assert_eq!(response, json!({"id": 2, "result": "kaboom"}));
}

#[tokio::test]
async fn most_specific_exception_handler_wins() {
    let (mut transport, ledger) = TestTransport::new(10);

    let response = transport
        .call(json!({"id": 1, "method": "bank.withdraw", "params": {"amount": 4}}))
        .await;
    let withdrawn: WithdrawResponse = serde_json::from_value(response["result"].clone()).unwrap();
    assert_eq!(withdrawn, WithdrawResponse { balance: 6 });

    let response = transport
        .call(json!({"id": 2, "method": "bank.withdraw", "params": {"amount": 100}}))
        .await;
    let overdrawn: Overdrawn = serde_json::from_value(response["result"].clone()).unwrap();
    assert_eq!(
        overdrawn,
        Overdrawn {
            method: "bank.withdraw".to_string(),
            reason: "cannot withdraw 100 from 6".to_string(),
        }
    );
    assert_eq!(ledger.lock().await.balance, 6);

    // Malformed params are not an overdraft, so the catch-all handler gets them
    let response = transport
        .call(json!({"id": 3, "method": "bank.withdraw", "params": {"amount": "lots"}}))
        .await;
    assert!(response["result"].is_string());
}

#[tokio::test]
async fn custom_resolver_supplies_shared_state() {
    let (mut transport, ledger) = TestTransport::new(0);

    for (id, value) in [(1, 5), (2, 7)] {
        transport.call(json!({"id": id, "method": "accumulate", "params": value})).await;
    }

    let response = transport.call(json!({"id": 3, "method": "total"})).await;
    assert_eq!(response, json!({"id": 3, "result": 12}));
    assert_eq!(ledger.lock().await.total, 12);
}

#[tokio::test]
async fn requests_without_id_get_no_response() {
    let (mut transport, ledger) = TestTransport::new(0);

    transport.send("session-1", json!({"method": "accumulate", "params": 3}));
    transport.send("session-1", json!({"method": "missing"}));
    transport.assert_quiet().await;

    assert_eq!(ledger.lock().await.total, 3);
}

#[tokio::test]
async fn handlers_see_their_session() {
    let (mut transport, _) = TestTransport::new(0);

    transport.send("session-42", json!({"id": 1, "method": "whoami"}));
    let response = transport.next().await;
    assert_eq!(response.headers().session_id(), Some("session-42"));
    assert_eq!(
        serde_json::to_value(response.payload()).unwrap(),
        json!({"id": 1, "result": "session-42"})
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_correlated() {
    const REQUESTS: i64 = 99;

    let (mut transport, _) = TestTransport::new(0);

    // Spread over three destinations, each answering with something derived from the id
    let mut expected = HashMap::new();
    for id in 0..REQUESTS {
        let session_id = format!("session-{id}");
        let (request, result) = match id % 3 {
            0 => (
                json!({"id": id, "method": "add", "params": {"x": id, "y": 1000}}),
                json!(id + 1000),
            ),
            1 => (
                json!({"id": id, "method": "divide", "params": [id * 6, 3]}),
                json!(id * 2),
            ),
            _ => (json!({"id": id, "method": "whoami"}), json!(session_id)),
        };
        transport.send(&session_id, request);
        expected.insert(id, result);
    }

    let mut results = HashMap::new();
    for _ in 0..REQUESTS {
        let response = transport.next().await;
        let JsonRpcMessage::Response(response) = response.payload() else {
            panic!("expected a response");
        };
        let id = serde_json::to_value(&response.id).unwrap().as_i64().unwrap();
        results.insert(id, response.result().cloned().unwrap());
    }

    assert_eq!(results, expected);
}

#[tokio::test]
async fn negative_ids_are_correlated() {
    let (mut transport, _) = TestTransport::new(0);

    let response = transport.call(json!({"id": -4, "method": "add", "params": [1, 1]})).await;
    assert_eq!(response, json!({"id": -4, "result": 2}));
}

#[tokio::test]
async fn subscribers_receive_notifications() {
    let (mut transport, _) = TestTransport::new(0);

    transport.send("session-1", json!({"id": 1, "method": "ticks.subscribe"}));
    let ack = transport.next().await;
    assert_eq!(
        serde_json::to_value(ack.payload()).unwrap(),
        json!({"id": 1, "result": "subscribed to ticks.tick"})
    );
    assert_eq!(ack.headers().subscribe_method(), Some("ticks.tick"));
    assert!(transport.bus.subscriptions().is_bound("session-1", "ticks.tick"));

    let sent = transport.bus.template().broadcast("ticks.tick", &json!({"n": 1})).unwrap();
    assert_eq!(sent, 1);

    let notification = transport.next().await;
    assert_eq!(notification.headers().session_id(), Some("session-1"));
    assert_eq!(notification.headers().message_type(), Some(MessageType::Notification));
    assert_eq!(
        serde_json::to_value(notification.payload()).unwrap(),
        json!({"method": "ticks.tick", "params": {"n": 1}})
    );

    assert_eq!(transport.bus.end_session("session-1"), 1);
    assert_eq!(transport.bus.template().broadcast("ticks.tick", &json!({"n": 2})).unwrap(), 0);
    transport.assert_quiet().await;
}

#[tokio::test]
async fn shutdown_delivers_pending_responses() {
    const REQUESTS: u64 = 20;

    let (mut transport, _) = TestTransport::new(0);

    for id in 0..REQUESTS {
        transport.send("session-1", json!({"id": id, "method": "add", "params": [id, id]}));
    }
    transport.bus.shutdown().await;

    let mut received = 0;
    while transport.outbound.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, REQUESTS);
    assert!(transport.bus.receive("session-1", json!({"id": 99, "method": "add"})).is_err());
}
