use std::io::Write;

use tracing::debug;

/// Receives answer text as it streams in.
pub trait RenderSink {
    /// Called after every append with the full text received so far.
    fn on_fragment(&mut self, accumulated: &str);

    /// Called exactly once when the answer completes.
    fn on_finalize(&mut self, final_text: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn on_fragment(&mut self, _accumulated: &str) {}
    fn on_finalize(&mut self, _final_text: &str) {}
}

/// Keeps every update it sees.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub updates: Vec<String>,
    pub finalized: Option<String>,
}

impl RenderSink for RecordingSink {
    fn on_fragment(&mut self, accumulated: &str) {
        self.updates.push(accumulated.to_string());
    }

    fn on_finalize(&mut self, final_text: &str) {
        self.finalized = Some(final_text.to_string());
    }
}

/// Writes only the newly arrived suffix, so a terminal shows the answer
/// growing in place.
///
/// The first write error (a closed pipe, say) is logged and everything after
/// it is discarded.
pub struct WriterSink<W: Write> {
    out: W,
    written: usize,
    line_open: bool,
    broken: bool,
}

impl<W: Write> WriterSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            line_open: false,
            broken: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// The output stopped accepting writes.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Terminate a partially printed answer. Does nothing if the last thing
    /// written already ended the line.
    pub fn finish_line(&mut self) {
        if self.line_open {
            self.emit(b"\n");
            self.line_open = false;
        }
    }

    fn emit(&mut self, bytes: &[u8]) {
        if self.broken {
            return;
        }
        if let Err(e) = self.out.write_all(bytes).and_then(|()| self.out.flush()) {
            debug!(error = %e, "render output closed, discarding the rest of the answer");
            self.broken = true;
        }
    }
}

impl<W: Write> RenderSink for WriterSink<W> {
    fn on_fragment(&mut self, accumulated: &str) {
        if let Some(delta) = accumulated.get(self.written..) {
            if !delta.is_empty() {
                self.emit(delta.as_bytes());
                self.line_open = true;
            }
        }
        self.written = accumulated.len();
    }

    fn on_finalize(&mut self, final_text: &str) {
        self.on_fragment(final_text);
        self.emit(b"\n");
        self.line_open = false;
    }
}
