//! A managed WebSocket connection to one copilot endpoint.
//!
//! The socket itself lives inside a background task that exists only while
//! the channel is `Connecting` or `Open`. Everything else talks to that task
//! through queues: outbound messages go in through an mpsc sender, inbound
//! text frames come out through whichever [`HandlerGuard`] is registered, and
//! lifecycle transitions are published on a `watch` channel.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::registry::ChannelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl ChannelState {
    /// A connection task is running (or about to).
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

type HandlerSlot = Arc<StdMutex<Option<mpsc::UnboundedSender<String>>>>;

/// Exclusive claim on a channel's inbound frames. Released on drop.
pub struct HandlerGuard {
    slot: HandlerSlot,
    frames: mpsc::UnboundedReceiver<String>,
}

impl HandlerGuard {
    /// Next inbound text frame, in wire order.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Default)]
struct Connection {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

pub struct Channel {
    kind: ChannelKind,
    url: String,
    state: Arc<watch::Sender<ChannelState>>,
    handler: HandlerSlot,
    conn: Mutex<Connection>,
}

impl Channel {
    /// Create an idle channel. Nothing connects until [`Channel::start`].
    pub fn new(kind: ChannelKind, url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            kind,
            url: url.into(),
            state: Arc::new(state),
            handler: Arc::new(StdMutex::new(None)),
            conn: Mutex::new(Connection::default()),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Spawn the connection task unless one is already connecting or open.
    /// Returns as soon as the task is spawned; use [`Channel::wait_open`] to
    /// wait for the handshake.
    pub async fn start(&self) {
        let mut conn = self.conn.lock().await;
        if self.state().is_live() {
            debug!(url = %self.url, state = ?self.state(), "channel already started");
            return;
        }

        // A previous task has already published Closed/Failed; reap it.
        if let Some(task) = conn.task.take() {
            let _ = task.await;
        }

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.state.send_replace(ChannelState::Connecting);
        debug!(url = %self.url, "starting copilot channel");

        let task = tokio::spawn(run_connection(
            self.url.clone(),
            outbound_rx,
            cancel.clone(),
            self.state.clone(),
            self.handler.clone(),
        ));

        *conn = Connection {
            outbound: Some(outbound_tx),
            cancel,
            task: Some(task),
        };
    }

    /// Queue a text message for the socket. Fails unless the channel is open.
    pub async fn send(&self, raw: String) -> Result<(), ChannelError> {
        if self.state() != ChannelState::Open {
            return Err(ChannelError::NotConnected);
        }
        let conn = self.conn.lock().await;
        let outbound = conn.outbound.as_ref().ok_or(ChannelError::NotConnected)?;
        outbound
            .send(Message::Text(raw.into()))
            .map_err(|_| ChannelError::NotConnected)
    }

    /// Shut the connection down and wait for its task to exit.
    /// Closing an idle or already closed channel does nothing.
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        if matches!(self.state(), ChannelState::Idle | ChannelState::Closed) {
            return;
        }

        self.state.send_replace(ChannelState::Closing);
        conn.cancel.cancel();
        conn.outbound = None;
        if let Some(task) = conn.task.take() {
            if let Err(e) = task.await {
                warn!(url = %self.url, error = %e, "connection task did not shut down cleanly");
            }
        }
        self.state.send_replace(ChannelState::Closed);
        info!(url = %self.url, "copilot channel closed");
    }

    pub async fn reconnect(&self) {
        self.close().await;
        self.start().await;
    }

    /// Wait until the channel is open. Fails if it ends up `Failed`, `Closed`
    /// or `Idle` instead, or if `timeout` passes first.
    pub async fn wait_open(&self, timeout: Duration) -> Result<(), ChannelError> {
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| !matches!(s, ChannelState::Connecting | ChannelState::Closing)),
        )
        .await;
        match settled {
            Ok(Ok(state)) if *state == ChannelState::Open => Ok(()),
            _ => Err(ChannelError::NotConnected),
        }
    }

    /// Claim the inbound frame stream. Only one claim may be live at a time.
    pub fn claim_handler(&self) -> Result<HandlerGuard, ChannelError> {
        let mut slot = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(ChannelError::HandlerBusy);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx);
        Ok(HandlerGuard {
            slot: self.handler.clone(),
            frames: rx,
        })
    }
}

/// Owns the socket for one connection attempt and publishes how it ended.
async fn run_connection(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ChannelState>>,
    handler: HandlerSlot,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            state.send_replace(ChannelState::Closed);
            return;
        }
        res = tokio_tungstenite::connect_async(url.as_str()) => res,
    };
    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!(url = %url, error = %e, "copilot channel failed to connect");
            state.send_replace(ChannelState::Failed);
            return;
        }
    };

    info!(url = %url, "copilot channel open");
    state.send_replace(ChannelState::Open);
    let (mut ws_write, mut ws_read) = ws.split();

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(Message::Close(None)).await;
                break ChannelState::Closed;
            }
            Some(msg) = outbound.recv() => {
                if let Err(e) = ws_write.send(msg).await {
                    warn!(url = %url, error = %e, "copilot channel write failed");
                    break ChannelState::Failed;
                }
            }
            frame = ws_read.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(&handler, text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => dispatch(&handler, text),
                    Err(_) => debug!(len = bytes.len(), "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(url = %url, ?frame, "server closed copilot channel");
                    break ChannelState::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "copilot channel read failed");
                    break ChannelState::Failed;
                }
                None => break ChannelState::Closed,
            }
        }
    };

    debug!(url = %url, state = ?end, "copilot channel task exiting");
    state.send_replace(end);
}

fn dispatch(handler: &HandlerSlot, frame: String) {
    let slot = handler.lock().unwrap_or_else(PoisonError::into_inner);
    match slot.as_ref() {
        Some(tx) => {
            if tx.send(frame).is_err() {
                debug!("handler went away, frame dropped");
            }
        }
        None => debug!(len = frame.len(), "no handler registered, frame dropped"),
    }
}
