//! CLI channel: interactive terminal chat.
//!
//! Reads lines from stdin (or any async reader), writes responses to stdout.
//! Used by `opsclaw chat`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use opsclaw_core::channel::{ChannelAdapter, NormalizedMessage};
use opsclaw_core::error::ChannelError;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EXIT_COMMANDS: [&str; 5] = ["exit", "quit", "/exit", "/quit", ":q"];

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel {
    sender_id: String,
    connected: AtomicBool,
    shutdown: Mutex<CancellationToken>,
}

impl CliChannel {
    /// `sender_id` identifies the local operator, e.g. the OS user name.
    pub fn new(sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            connected: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Start a listener task on stdin.
    pub fn listen_stdin(&self) -> mpsc::Receiver<NormalizedMessage> {
        self.listen(BufReader::new(io::stdin()))
    }

    /// Start a listener task that turns each non-empty line into a message.
    ///
    /// The stream ends on EOF, an exit command, or [`disconnect`].
    ///
    /// [`disconnect`]: ChannelAdapter::disconnect
    pub fn listen<R>(&self, reader: R) -> mpsc::Receiver<NormalizedMessage>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(32);
        let token = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let sender_id = self.sender_id.clone();

        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                let line = tokio::select! {
                    _ = token.cancelled() => {
                        debug!("CLI listener cancelled");
                        break;
                    }
                    line = lines.next_line() => line,
                };

                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if EXIT_COMMANDS.contains(&line) {
                            break;
                        }
                        let msg = NormalizedMessage::new("cli", sender_id.as_str(), line);
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    // EOF (Ctrl+D)
                    Ok(None) => break,
                    Err(e) => {
                        warn!("CLI input failed: {e}");
                        break;
                    }
                }
            }
        });

        rx
    }
}

#[async_trait]
impl ChannelAdapter for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    /// `{"text": "..."}` from the local operator.
    async fn receive_message(&self, raw: serde_json::Value) -> Option<NormalizedMessage> {
        let text = raw.get("text")?.as_str()?.trim();
        if text.is_empty() {
            return None;
        }
        Some(NormalizedMessage::new("cli", self.sender_id.as_str(), text))
    }

    async fn send_response(&self, _message: &NormalizedMessage, text: &str) -> Result<(), ChannelError> {
        println!("{text}");
        Ok(())
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        let mut token = self.shutdown.lock().unwrap_or_else(|e| e.into_inner());
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(sender = %self.sender_id, "CLI channel connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
