//! In-process mock kernel for integration tests.
//!
//! - `GET /ws?serviceId=<id>`: records every text frame from the adapter and
//!   forwards whatever the test pushes through [`MockKernel::send`]
//! - `POST /udl`: answers with a `response` envelope echoing the request
//!   payload, or `500` when the payload carries `"fail": true`

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use meshlink_core::Envelope;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

const CLOSE: &str = "__close__";

struct MockState {
    inbox: mpsc::UnboundedSender<Value>,
    outbox: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    service_ids: Mutex<Vec<String>>,
}

pub struct MockKernel {
    addr: SocketAddr,
    inbox: mpsc::UnboundedReceiver<Value>,
    outbox: mpsc::UnboundedSender<String>,
    state: Arc<MockState>,
}

impl MockKernel {
    pub async fn start() -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let state = Arc::new(MockState {
            inbox: inbox_tx,
            outbox: Mutex::new(Some(outbox_rx)),
            service_ids: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/udl", post(udl_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            inbox,
            outbox,
            state,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}/udl", self.addr)
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.state.service_ids.lock().clone()
    }

    /// Next envelope the adapter sent over the websocket.
    pub async fn next_message(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.inbox.recv())
            .await
            .expect("no message from adapter within 5s")
            .expect("mock kernel inbox closed")
    }

    pub fn send(&self, envelope: &Envelope) {
        self.outbox
            .send(serde_json::to_string(envelope).unwrap())
            .unwrap();
    }

    pub fn send_text(&self, text: &str) {
        self.outbox.send(text.to_string()).unwrap();
    }

    /// Closes the websocket from the kernel side.
    pub fn close_connection(&self) {
        self.outbox.send(CLOSE.to_string()).unwrap();
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<MockState>>,
) -> impl IntoResponse {
    if let Some(id) = params.get("serviceId") {
        state.service_ids.lock().push(id.clone());
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<MockState>) {
    let mut outbox = state.outbox.lock().take();

    loop {
        let next_out = async {
            match outbox.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                    let _ = state.inbox.send(value);
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            Some(out) = next_out => {
                if out == CLOSE {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                if socket.send(Message::Text(out.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // hand the outbox back so a reconnecting adapter is served too
    if let Some(rx) = outbox {
        *state.outbox.lock() = Some(rx);
    }
}

async fn udl_handler(Json(request): Json<Value>) -> impl IntoResponse {
    if request["payload"]["fail"] == json!(true) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "kernel exploded").into_response();
    }
    Json(json!({
        "version": request["version"],
        "source": "kernel",
        "target": request["source"],
        "intent": "response",
        "meta": {
            "timestamp": "2026-01-01T00:00:00Z",
            "trace_id": request["meta"]["trace_id"],
        },
        "payload": {"status": "ok", "echo": request["payload"]},
    }))
    .into_response()
}
