use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::registry::{ChannelKind, Endpoint};

/// How the fake copilot answers one question.
pub enum Reply {
    /// Send these text frames back, in order.
    Frames(Vec<String>),
    /// Send these payloads back as binary frames, in order.
    Binary(Vec<Vec<u8>>),
    /// Say nothing.
    Silence,
    /// Drop the socket.
    Hangup,
}

#[derive(Clone)]
struct FakeState {
    script: Arc<Mutex<VecDeque<Reply>>>,
    requests: mpsc::UnboundedSender<serde_json::Value>,
    connections: Arc<AtomicUsize>,
}

/// A scripted stand-in for the PiecesOS `/qgpt/stream` endpoint.
/// Replies are consumed one per received question, across reconnects.
pub struct FakeCopilot {
    pub port: u16,
    pub requests: mpsc::UnboundedReceiver<serde_json::Value>,
    pub connections: Arc<AtomicUsize>,
    _shutdown: oneshot::Sender<()>,
}

impl FakeCopilot {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port)
    }

    pub fn ws_url(&self) -> String {
        self.endpoint().ws_url(ChannelKind::Ask)
    }
}

pub async fn spawn_fake_copilot(script: Vec<Reply>) -> FakeCopilot {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));
    let state = FakeState {
        script: Arc::new(Mutex::new(script.into())),
        requests: requests_tx,
        connections: connections.clone(),
    };

    let app = Router::new()
        .route(ChannelKind::Ask.path(), get(upgrade))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    FakeCopilot {
        port,
        requests: requests_rx,
        connections,
        _shutdown: tx,
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<FakeState>) -> Response {
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve(socket, state))
}

async fn serve(mut socket: WebSocket, state: FakeState) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let request = serde_json::from_str(text.as_str()).unwrap_or(serde_json::Value::Null);
        let _ = state.requests.send(request);

        let reply = state.script.lock().await.pop_front().unwrap_or(Reply::Silence);
        match reply {
            Reply::Frames(frames) => {
                for frame in frames {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
            }
            Reply::Binary(payloads) => {
                for payload in payloads {
                    if socket.send(Message::Binary(payload.into())).await.is_err() {
                        return;
                    }
                }
            }
            Reply::Silence => {}
            Reply::Hangup => return,
        }
    }
}

/// A listener that accepts TCP connections and drops them before the
/// WebSocket handshake. Returns its port and the number of accepts.
pub async fn spawn_refusing_listener() -> (u16, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (port, attempts)
}

/// A listener that accepts TCP connections and never answers the
/// WebSocket upgrade, so the handshake hangs.
pub async fn spawn_stalling_listener() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    port
}

/// A port nothing is listening on.
pub fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Build a response frame the way PiecesOS shapes them.
pub fn answer_frame(texts: &[&str], status: Option<&str>, conversation: Option<&str>) -> String {
    let iterable: Vec<serde_json::Value> = texts
        .iter()
        .map(|t| serde_json::json!({ "text": t }))
        .collect();
    let mut frame = serde_json::json!({
        "question": { "answers": { "iterable": iterable } },
        "status": status.unwrap_or("IN-PROGRESS"),
    });
    if let Some(id) = conversation {
        frame["conversation"] = serde_json::Value::String(id.to_string());
    }
    frame.to_string()
}
