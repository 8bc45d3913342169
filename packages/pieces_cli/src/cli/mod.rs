pub mod pieces_os;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use copilot_stream::{
    AskError, AskMode, AskOptions, ConnectionRegistry, Copilot, Endpoint, NullSink,
    RelevantContext, StreamRequest, WriterSink,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::FileConfig;
use pieces_os::PiecesOsError;

/// Files and saved snippets attached to a question as relevant context.
#[derive(Debug, Default, Clone)]
pub struct Materials {
    pub files: Vec<PathBuf>,
    pub snippets: Vec<String>,
}

impl Materials {
    pub fn into_relevant(self) -> Result<RelevantContext> {
        let mut relevant = RelevantContext::new();
        for file in self.files {
            let path = std::fs::canonicalize(&file)
                .with_context(|| format!("Cannot attach {}", file.display()))?;
            relevant.push(serde_json::json!({ "file": path.to_string_lossy() }));
        }
        for snippet in self.snippets {
            relevant.push(serde_json::json!({ "asset": snippet }));
        }
        Ok(relevant)
    }
}

/// Cancels its token on Ctrl-C until dropped.
struct InterruptGuard {
    token: CancellationToken,
    watcher: JoinHandle<()>,
}

impl InterruptGuard {
    fn arm() -> Self {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received, cancelling ask");
                cancel.cancel();
            }
        });
        Self { token, watcher }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

async fn connect(file: &FileConfig, mode: AskMode) -> Result<Copilot> {
    let endpoint = pieces_os::discover(&file.pieces).await?;
    info!(base_url = %endpoint.base_url(), "using PiecesOS");
    Ok(copilot_for(endpoint, file.ask.ask_options(), mode))
}

fn copilot_for(endpoint: Endpoint, options: AskOptions, mode: AskMode) -> Copilot {
    let registry = Arc::new(ConnectionRegistry::new(endpoint));
    Copilot::new(registry, options, mode)
}

/// Single-shot ask: stream the answer to stdout, then close the channel.
pub async fn ask_command(
    file: &FileConfig,
    query: String,
    model: Option<String>,
    materials: Materials,
    stream: bool,
) -> Result<()> {
    let relevant = materials.into_relevant()?;
    let model = model.unwrap_or_else(|| file.ask.model.clone());
    let mut copilot = connect(file, AskMode::SingleShot).await?;

    let request = StreamRequest::new(query, model).with_relevant(relevant);
    let interrupt = InterruptGuard::arm();
    let result = if stream {
        let mut sink = WriterSink::new(std::io::stdout());
        let result = copilot.ask(request, &mut sink, interrupt.token()).await;
        sink.finish_line();
        result
    } else {
        copilot.ask(request, &mut NullSink, interrupt.token()).await
    };
    copilot.shutdown().await;

    let outcome = result.map_err(describe).context("Ask failed")?;
    if !stream {
        println!("{}", outcome.text);
    }
    if outcome.dropped_frames > 0 {
        debug!(dropped = outcome.dropped_frames, "skipped malformed frames");
    }
    Ok(())
}

/// Attach a hint to failures that mean PiecesOS stopped answering.
fn describe(err: AskError) -> anyhow::Error {
    if err.is_connection_class() {
        anyhow::anyhow!("{err} (is PiecesOS still running? try `pieces status`)")
    } else {
        err.into()
    }
}

/// Interactive chat on stdin: the channel and conversation persist between
/// questions.
pub async fn chat_command(file: &FileConfig, model: Option<String>) -> Result<()> {
    let model = model.unwrap_or_else(|| file.ask.model.clone());
    let mut copilot = connect(file, AskMode::Interactive).await?;

    eprintln!("Chatting with {model}. /new starts over, /exit quits.");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let result = chat_loop(&mut copilot, &model, stdin, &mut stdout).await;
    copilot.shutdown().await;
    result
}

async fn chat_loop<R, W>(copilot: &mut Copilot, model: &str, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            writeln!(out)?;
            return Ok(());
        };

        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => return Ok(()),
            "/new" => {
                if copilot.conversation().is_active() {
                    copilot.new_conversation();
                    writeln!(out, "Started a new conversation.")?;
                } else {
                    writeln!(out, "No active conversation.")?;
                }
            }
            "/conversation" => match copilot.conversation().current() {
                Some(id) => writeln!(out, "{id}")?,
                None => writeln!(out, "No active conversation.")?,
            },
            query => {
                let request = StreamRequest::new(query, model);
                let interrupt = InterruptGuard::arm();
                let mut sink = WriterSink::new(&mut *out);
                if let Err(e) = copilot.ask(request, &mut sink, interrupt.token()).await {
                    sink.finish_line();
                    eprintln!("[pieces: {:#}]", describe(e));
                }
            }
        }
    }
}

/// Report where PiecesOS is listening.
pub async fn status_command(file: &FileConfig) -> Result<()> {
    match pieces_os::discover(&file.pieces).await {
        Ok(endpoint) => {
            println!("PiecesOS is running at {}", endpoint.base_url());
            Ok(())
        }
        Err(PiecesOsError::Unavailable) => anyhow::bail!("PiecesOS is not running"),
        Err(e) => Err(e.into()),
    }
}
