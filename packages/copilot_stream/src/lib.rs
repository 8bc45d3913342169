//! # Copilot Stream
//!
//! Client side of the PiecesOS copilot streaming protocol: ask a question over
//! a persistent WebSocket, render the answer as it streams in, and keep
//! follow-up questions in the same conversation.
//!
//! ## Pieces
//!
//! - [`ConnectionRegistry`] hands out one shared [`Channel`] per endpoint kind.
//!   A channel owns its socket in a background task and reports its lifecycle
//!   (`Idle`, `Connecting`, `Open`, `Closing`, `Closed`, `Failed`).
//! - [`codec`] turns questions into wire messages and inbound frames into
//!   [`StreamEvent`]s.
//! - [`StreamSession`] accumulates one answer.
//! - [`Copilot`] drives a session: sends the question (reconnecting once if
//!   the channel is down), waits for completion with a deadline, and
//!   remembers the conversation in a [`ConversationContext`].
//! - [`RenderSink`] receives the text as it grows.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use copilot_stream::{
//!     AskMode, AskOptions, ConnectionRegistry, Copilot, Endpoint, StreamRequest, WriterSink,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), copilot_stream::AskError> {
//! let registry = Arc::new(ConnectionRegistry::new(Endpoint::new("127.0.0.1", 39300)));
//! let mut copilot = Copilot::new(registry, AskOptions::default(), AskMode::Interactive);
//! let mut sink = WriterSink::new(std::io::stdout());
//! let cancel = CancellationToken::new();
//!
//! copilot.ask(StreamRequest::new("What is a lifetime?", "gpt-4o-mini"), &mut sink, &cancel).await?;
//! // Same conversation:
//! copilot.ask(StreamRequest::new("Show an example", "gpt-4o-mini"), &mut sink, &cancel).await?;
//!
//! copilot.new_conversation();
//! copilot.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Only one question may be in flight per channel; a second concurrent
//! `ask` fails with [`AskError::Busy`].

pub mod channel;
pub mod codec;
pub mod conversation;
pub mod copilot;
pub mod error;
pub mod registry;
pub mod render;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use channel::{Channel, ChannelState, HandlerGuard};
pub use codec::{RelevantContext, StreamEvent, StreamRequest, decode_frame, encode_request};
pub use conversation::ConversationContext;
pub use copilot::{AskMode, AskOptions, AskOutcome, Copilot};
pub use error::{AskError, ChannelError, DecodeError};
pub use registry::{ChannelKind, ConnectionRegistry, Endpoint};
pub use render::{NullSink, RecordingSink, RenderSink, WriterSink};
pub use session::{SessionState, Step, StreamSession};
