use tracing::{debug, warn};

use crate::codec::{StreamEvent, decode_frame};
use crate::render::RenderSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Question sent, nothing back yet.
    Awaiting,
    /// At least one fragment received.
    Streaming,
    Completed,
    TimedOut,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Failed)
    }
}

/// What the driver should do after feeding the session an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Completed,
    Failed(String),
}

/// One question/answer exchange.
///
/// Pure bookkeeping: the async driver in [`Copilot`](crate::copilot::Copilot)
/// owns the socket, deadline and cancellation, and feeds frames in here in
/// the order they arrive. Text only ever grows, and a terminal state is final.
#[derive(Debug)]
pub struct StreamSession {
    state: SessionState,
    text: String,
    conversation_id: Option<String>,
    dropped_frames: usize,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            text: String::new(),
            conversation_id: None,
            dropped_frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Frames skipped because they failed to decode.
    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    pub fn mark_sent(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Awaiting;
        }
    }

    /// Decode a raw frame and apply its events. Malformed frames are logged
    /// and counted, never fatal.
    pub fn handle_frame(&mut self, raw: &str, sink: &mut dyn RenderSink) -> Step {
        let events = match decode_frame(raw) {
            Ok(events) => events,
            Err(e) => {
                self.dropped_frames += 1;
                warn!(error = %e, len = raw.len(), "skipping malformed frame");
                return Step::Continue;
            }
        };
        for event in events {
            match self.apply(event, sink) {
                Step::Continue => {}
                terminal => return terminal,
            }
        }
        Step::Continue
    }

    pub fn apply(&mut self, event: StreamEvent, sink: &mut dyn RenderSink) -> Step {
        if self.state.is_terminal() {
            debug!(state = ?self.state, ?event, "ignoring event after session ended");
            return Step::Continue;
        }
        match event {
            StreamEvent::PartialAnswer { text_fragment } => {
                self.state = SessionState::Streaming;
                self.text.push_str(&text_fragment);
                sink.on_fragment(&self.text);
                Step::Continue
            }
            StreamEvent::Completed { conversation_id } => {
                self.state = SessionState::Completed;
                self.conversation_id = conversation_id;
                sink.on_finalize(&self.text);
                Step::Completed
            }
            StreamEvent::Errored { detail } => {
                self.state = SessionState::Failed;
                Step::Failed(detail)
            }
        }
    }

    pub fn time_out(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::TimedOut;
        }
    }

    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
