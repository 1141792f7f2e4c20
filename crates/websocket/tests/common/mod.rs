//! In-process WebSocket server harness for driving the client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

#[derive(Clone)]
struct HarnessState {
    inbound: mpsc::UnboundedSender<serde_json::Value>,
    outbound: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
    reject_first: Arc<AtomicBool>,
}

pub struct WsHarness {
    pub addr: SocketAddr,
    pub inbound: mpsc::UnboundedReceiver<serde_json::Value>,
    pub outbound: broadcast::Sender<String>,
    pub connections: Arc<AtomicUsize>,
    reject_first: Arc<AtomicBool>,
}

impl WsHarness {
    pub async fn spawn() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));
        let reject_first = Arc::new(AtomicBool::new(false));

        let state = HarnessState {
            inbound: inbound_tx,
            outbound: outbound.clone(),
            connections: connections.clone(),
            reject_first: reject_first.clone(),
        };
        let app = Router::new().route("/", any(ws_route)).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            inbound: inbound_rx,
            outbound,
            connections,
            reject_first,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Make the server drop the first connection right after accepting it.
    pub fn drop_first_connection(&self) {
        self.reject_first.store(true, Ordering::SeqCst);
    }

    /// Send a raw frame to every connected client.
    pub fn send(&self, frame: serde_json::Value) {
        let _ = self.outbound.send(frame.to_string());
    }

    /// Next frame received from the client, with a generous timeout.
    pub async fn recv(&mut self) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("harness channel closed")
    }

    /// Next frame with the given method, skipping others.
    pub async fn recv_method(&mut self, method: &str) -> serde_json::Value {
        loop {
            let frame = self.recv().await;
            if frame["method"] == method {
                return frame;
            }
        }
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<serde_json::Value> {
        tokio::time::timeout(timeout, self.inbound.recv()).await.ok().flatten()
    }
}

async fn ws_route(ws: WebSocketUpgrade, State(state): State<HarnessState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: HarnessState) {
    let index = state.connections.fetch_add(1, Ordering::SeqCst);
    if index == 0 && state.reject_first.load(Ordering::SeqCst) {
        // Simulate a network-errored close.
        return;
    }

    let (mut sink, mut stream) = socket.split();
    let mut outbound = state.outbound.subscribe();

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str(text.as_str()) {
                        let _ = state.inbound.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Err(_)) => return,
                _ => {}
            },
            frame = outbound.recv() => {
                if let Ok(frame) = frame {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
