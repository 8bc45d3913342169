use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelState};
use crate::codec::{StreamRequest, encode_request};
use crate::conversation::ConversationContext;
use crate::error::AskError;
use crate::registry::{ChannelKind, ConnectionRegistry};
use crate::render::RenderSink;
use crate::session::{StreamSession, Step};

pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the channel outlives a single question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskMode {
    /// Close the channel once the answer (or failure) is back.
    SingleShot,
    /// Keep the channel open for the next question.
    Interactive,
}

#[derive(Debug, Clone)]
pub struct AskOptions {
    /// How long to wait for `COMPLETED` after the question is sent.
    pub answer_timeout: Duration,
    /// How long to wait for the socket handshake before sending.
    pub connect_timeout: Duration,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskOutcome {
    pub text: String,
    pub conversation_id: Option<String>,
    /// Malformed frames skipped while streaming.
    pub dropped_frames: usize,
}

/// Asks questions over the shared `Ask` channel and carries the
/// conversation forward between them.
pub struct Copilot {
    registry: Arc<ConnectionRegistry>,
    conversation: ConversationContext,
    options: AskOptions,
    mode: AskMode,
}

impl Copilot {
    pub fn new(registry: Arc<ConnectionRegistry>, options: AskOptions, mode: AskMode) -> Self {
        Self {
            registry,
            conversation: ConversationContext::new(),
            options,
            mode,
        }
    }

    pub fn conversation(&self) -> &ConversationContext {
        &self.conversation
    }

    /// Start a fresh conversation with the next question.
    pub fn new_conversation(&mut self) {
        if let Some(previous) = self.conversation.reset() {
            info!(conversation = %previous, "conversation reset");
        }
    }

    /// Ask a question and wait for the complete answer, rendering fragments
    /// into `sink` as they arrive.
    ///
    /// Fails with [`AskError::Timeout`] if no completion arrives within
    /// `answer_timeout`, and with [`AskError::Cancelled`] as soon as `cancel`
    /// fires. Either way the channel is left closed and the next call
    /// reconnects.
    pub async fn ask(
        &mut self,
        request: StreamRequest,
        sink: &mut dyn RenderSink,
        cancel: &CancellationToken,
    ) -> Result<AskOutcome, AskError> {
        let channel = self.registry.get_or_create(ChannelKind::Ask).await;
        let result = self.exchange(&channel, request, sink, cancel).await;

        let abandoned = matches!(
            result,
            Err(AskError::Timeout(_) | AskError::Cancelled | AskError::Connection(_))
        );
        let busy = matches!(result, Err(AskError::Busy));
        if !busy && (abandoned || self.mode == AskMode::SingleShot) {
            channel.close().await;
        }
        result
    }

    pub async fn shutdown(&self) {
        self.registry.close_all().await;
    }

    async fn exchange(
        &mut self,
        channel: &Channel,
        request: StreamRequest,
        sink: &mut dyn RenderSink,
        cancel: &CancellationToken,
    ) -> Result<AskOutcome, AskError> {
        let mut handler = channel.claim_handler().map_err(|_| AskError::Busy)?;

        let raw = encode_request(&request, self.conversation.current())?;
        debug!(
            model = %request.model_id,
            relevant = request.relevant.len(),
            conversation = ?self.conversation.current(),
            "sending question"
        );

        let mut session = StreamSession::new();
        self.send_with_retry(channel, raw, cancel).await?;
        session.mark_sent();

        let mut channel_state = channel.subscribe_state();
        let deadline = Instant::now() + self.options.answer_timeout;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    session.fail();
                    info!("ask cancelled");
                    return Err(AskError::Cancelled);
                }

                frame = handler.next_frame() => {
                    let Some(frame) = frame else {
                        session.fail();
                        return Err(AskError::Connection("inbound stream ended".into()));
                    };
                    match session.handle_frame(&frame, sink) {
                        Step::Continue => {}
                        Step::Completed => break,
                        Step::Failed(detail) => {
                            warn!(detail = %detail, "copilot failed the question");
                            return Err(AskError::Service(detail));
                        }
                    }
                }

                _ = channel_state.wait_for(|s| matches!(s, ChannelState::Failed | ChannelState::Closed)) => {
                    session.fail();
                    return Err(AskError::Connection(format!(
                        "connection to {} lost before the answer completed",
                        channel.url()
                    )));
                }

                _ = tokio::time::sleep_until(deadline) => {
                    session.time_out();
                    warn!(
                        timeout_secs = self.options.answer_timeout.as_secs(),
                        received = session.text().len(),
                        "no completion before deadline"
                    );
                    return Err(AskError::Timeout(self.options.answer_timeout));
                }
            }
        }

        if let Some(id) = session.conversation_id() {
            self.conversation.set(id);
        }
        if session.dropped_frames() > 0 {
            debug!(dropped = session.dropped_frames(), "answer completed with skipped frames");
        }

        Ok(AskOutcome {
            conversation_id: session.conversation_id().map(str::to_owned),
            dropped_frames: session.dropped_frames(),
            text: session.into_text(),
        })
    }

    /// Send once; if the channel is not open, reconnect and send exactly one
    /// more time. Waiting on the handshake gives way to `cancel`.
    async fn send_with_retry(
        &self,
        channel: &Channel,
        raw: String,
        cancel: &CancellationToken,
    ) -> Result<(), AskError> {
        if channel.state() == ChannelState::Connecting {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AskError::Cancelled),
                _ = channel.wait_open(self.options.connect_timeout) => {}
            }
        }

        if channel.send(raw.clone()).await.is_ok() {
            return Ok(());
        }

        info!(url = %channel.url(), state = ?channel.state(), "channel not open, reconnecting once");
        tokio::select! {
            _ = cancel.cancelled() => return Err(AskError::Cancelled),
            opened = async {
                channel.reconnect().await;
                channel.wait_open(self.options.connect_timeout).await
            } => {
                if let Err(e) = opened {
                    debug!(error = %e, "channel did not open after reconnect");
                }
            }
        }

        channel.send(raw).await.map_err(|e| {
            AskError::Connection(format!("could not reach the copilot at {}: {e}", channel.url()))
        })
    }
}
