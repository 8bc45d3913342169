/// The conversation that the next question continues, if any.
///
/// Held by whoever dispatches commands (a single `ask`, or a whole `chat`
/// loop) rather than living in a global. Only one session is in flight at a
/// time, so plain `&mut` access is all the synchronization it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    current: Option<String>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Record the conversation a completed exchange belongs to.
    pub fn set(&mut self, conversation_id: impl Into<String>) {
        self.current = Some(conversation_id.into());
    }

    /// Forget the active conversation; the next question starts a fresh one.
    /// Returns the id that was dropped.
    pub fn reset(&mut self) -> Option<String> {
        self.current.take()
    }
}
