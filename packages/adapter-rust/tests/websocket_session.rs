//! Duplex sessions against a real websocket relay.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockKernel;
use meshlink_adapter::network::{Session, SessionExit, SessionHandle, SessionState};
use meshlink_adapter::service::default_registry;
use meshlink_adapter::{AdapterConfig, KernelClient};
use meshlink_core::{intents, Envelope};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

fn config(kernel: &MockKernel) -> AdapterConfig {
    let mut config = AdapterConfig::new("rust-adapter");
    config.kernel_ws_url = kernel.ws_url();
    config.kernel_http_url = kernel.http_url();
    config.dispatch.drain_timeout = Duration::from_secs(2);
    config
}

fn start(config: AdapterConfig) -> (SessionHandle, JoinHandle<SessionExit>) {
    let connector = KernelClient::new(&config).duplex_connector().unwrap();
    let registry = Arc::new(default_registry(&config).unwrap());
    let mut session = Session::new(config, registry);
    let handle = session.handle();
    let join = tokio::spawn(async move { session.run(&connector).await.unwrap() });
    (handle, join)
}

async fn wait_listening(handle: &SessionHandle) {
    for _ in 0..500 {
        if handle.state() == SessionState::Listening {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached Listening");
}

fn invoke(trace_id: &str, payload: Value) -> Envelope {
    Envelope::new("8.0", "caller", "rust-adapter", intents::INVOKE, payload).with_trace_id(trace_id)
}

#[tokio::test]
async fn registers_over_websocket_and_answers_invoke() {
    let mut kernel = MockKernel::start().await;
    let (handle, join) = start(config(&kernel));

    let register = kernel.next_message().await;
    assert_eq!(register["intent"], "register_adapter");
    assert_eq!(register["source"], "rust-adapter");
    assert_eq!(register["target"], "kernel");
    assert_eq!(register["payload"]["adapterId"], "rust-adapter");

    let subscribe = kernel.next_message().await;
    assert_eq!(subscribe["intent"], "subscribe");
    assert_eq!(subscribe["payload"]["topic"], "adapter:rust-adapter:execute");
    assert_eq!(kernel.service_ids(), vec!["rust-adapter".to_string()]);

    wait_listening(&handle).await;
    kernel.send(&invoke("ws-1", json!({"task_name": "math.sum", "inputs": [1, 2, 3.5]})));

    let reply = kernel.next_message().await;
    assert_eq!(reply["intent"], "response");
    assert_eq!(reply["target"], "caller");
    assert_eq!(reply["meta"]["trace_id"], "ws-1");
    assert_eq!(reply["payload"]["status"], "ok");
    assert_eq!(reply["payload"]["result"], json!(6.5));
    assert_eq!(reply["payload"]["operation"], "sum");

    handle.shutdown();
    let exit = tokio::time::timeout(Duration::from_secs(5), join).await.unwrap().unwrap();
    assert_eq!(exit, SessionExit::Shutdown);
}

#[tokio::test]
async fn handler_errors_travel_back_as_error_responses() {
    let mut kernel = MockKernel::start().await;
    let (handle, _join) = start(config(&kernel));
    kernel.next_message().await;
    kernel.next_message().await;
    wait_listening(&handle).await;

    kernel.send(&invoke(
        "div-0",
        json!({"task_name": "calc.binary", "a": 1, "b": 0, "op": "/"}),
    ));
    kernel.send(&invoke("unknown", json!({"task_name": "nope.nothing"})));

    let div = kernel.next_message().await;
    assert_eq!(div["meta"]["trace_id"], "div-0");
    assert_eq!(div["payload"]["status"], "error");
    assert_eq!(div["payload"]["error"], "Division by zero");
    assert_eq!(div["payload"]["error_kind"], "ComputationError");

    let unknown = kernel.next_message().await;
    assert_eq!(unknown["meta"]["trace_id"], "unknown");
    assert_eq!(unknown["payload"]["status"], "error");
    assert_eq!(unknown["payload"]["error"], "Unknown task_name: nope.nothing");
    assert_eq!(unknown["payload"]["error_kind"], "ComputationError");

    handle.shutdown();
}

#[tokio::test]
async fn garbage_and_control_frames_are_ignored() {
    let mut kernel = MockKernel::start().await;
    let (handle, _join) = start(config(&kernel));
    kernel.next_message().await;
    kernel.next_message().await;
    wait_listening(&handle).await;

    kernel.send_text("{ definitely not an envelope");
    kernel.send(&Envelope::new(
        "8.0",
        "other-adapter",
        "kernel",
        intents::REGISTER_ADAPTER,
        json!({"adapterId": "other-adapter"}),
    ));
    kernel.send(&invoke("after", json!({"task_name": "echo", "data": "still here"})));

    let reply = kernel.next_message().await;
    assert_eq!(reply["meta"]["trace_id"], "after");
    assert_eq!(reply["payload"]["result"]["data"], "still here");
    assert_eq!(handle.state(), SessionState::Listening);
    handle.shutdown();
}

#[tokio::test]
async fn correlated_request_resolves_on_matching_response() {
    let mut kernel = MockKernel::start().await;
    let (handle, _join) = start(config(&kernel));
    kernel.next_message().await;
    kernel.next_message().await;
    wait_listening(&handle).await;

    let payload = json!({"task_name": "math.sum"});
    let request = Envelope::new("8.0", "rust-adapter", "math-service", intents::INVOKE, payload)
        .with_trace_id("req-42");
    let waiter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request(request, Some(Duration::from_secs(5))).await })
    };

    let sent = kernel.next_message().await;
    assert_eq!(sent["meta"]["trace_id"], "req-42");
    assert_eq!(sent["target"], "math-service");

    let answer = json!({"status": "ok", "result": 3});
    kernel.send(
        &Envelope::new("8.0", "math-service", "rust-adapter", intents::RESPONSE, answer)
            .with_trace_id("req-42"),
    );

    let reply = waiter.await.unwrap().unwrap();
    assert_eq!(reply.source, "math-service");
    assert_eq!(reply.payload["result"], 3);
    assert_eq!(handle.pending_requests(), 0);
    handle.shutdown();
}

#[tokio::test]
async fn kernel_closing_the_socket_ends_the_session() {
    let mut kernel = MockKernel::start().await;
    let (handle, join) = start(config(&kernel));
    kernel.next_message().await;
    kernel.next_message().await;
    wait_listening(&handle).await;

    let request = Envelope::new("8.0", "rust-adapter", "slow", intents::INVOKE, json!({}))
        .with_trace_id("never");
    let waiter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request(request, Some(Duration::from_secs(30))).await })
    };
    kernel.next_message().await;

    kernel.close_connection();

    let exit = tokio::time::timeout(Duration::from_secs(5), join).await.unwrap().unwrap();
    assert!(
        matches!(
            exit,
            SessionExit::PeerClosed | SessionExit::Closed(_) | SessionExit::ReceiveFailed(_)
        ),
        "unexpected exit {exit:?}"
    );
    assert_eq!(handle.state(), SessionState::Disconnected);

    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), meshlink_core::ErrorKind::Transport);
}

#[tokio::test]
async fn connecting_to_a_dead_relay_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = AdapterConfig::new("rust-adapter");
    config.kernel_ws_url = format!("ws://127.0.0.1:{port}/ws");
    config.connection.connect_timeout = Duration::from_secs(2);
    let connector = KernelClient::new(&config).duplex_connector().unwrap();
    let registry = Arc::new(default_registry(&config).unwrap());
    let mut session = Session::new(config, registry);

    assert!(session.run(&connector).await.is_err());
    assert_eq!(session.state(), SessionState::Disconnected);
}
