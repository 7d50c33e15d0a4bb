// src/platforms/console.rs - JSON-lines event source and action printer for local runs

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::bot::actions::ActionExecutor;
use crate::platforms::EventSource;
use crate::types::{ChatEvent, CommandEvent, ModerationAction};

/// Events read ahead of the moderator before the reader waits
pub const EVENT_BUFFER: usize = 1024;

/// Reads one JSON-encoded `ChatEvent` per line. Blank lines and lines
/// starting with `#` are skipped; malformed lines are logged and dropped.
/// Every other line is delivered, in input order; the reader pauses while
/// the channel is full. The receiver sees the channel close at EOF.
pub struct ConsoleSource<R> {
    // Only touched from `connect`; the lock makes the source Sync for any reader.
    reader: Mutex<Option<R>>,
    event_sender: Option<mpsc::Sender<ChatEvent>>,
    event_receiver: Option<mpsc::Receiver<ChatEvent>>,
    reader_task: Option<JoinHandle<()>>,
    is_connected: Arc<RwLock<bool>>,
}

impl ConsoleSource<tokio::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> ConsoleSource<R> {
    pub fn new(reader: R) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            reader: Mutex::new(Some(reader)),
            event_sender: Some(tx),
            event_receiver: Some(rx),
            reader_task: None,
            is_connected: Arc::new(RwLock::new(false)),
        }
    }

    /// Parse one input line; `None` for lines that carry no event
    pub fn parse_line(line: &str) -> Option<ChatEvent> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Ignoring malformed event line ({}): {}", e, line);
                None
            }
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> EventSource for ConsoleSource<R> {
    async fn connect(&mut self) -> Result<()> {
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .context("console source already connected")?;
        let sender = self.event_sender.take().context("console source already connected")?;

        *self.is_connected.write().await = true;
        let is_connected = Arc::clone(&self.is_connected);

        self.reader_task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            info!("Console event reader started");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = Self::parse_line(&line) else {
                            continue;
                        };
                        if sender.send(event).await.is_err() {
                            debug!("Event receiver dropped, stopping console reader");
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        break;
                    }
                }
            }

            *is_connected.write().await = false;
        }));

        Ok(())
    }

    fn platform_name(&self) -> &str {
        "console"
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ChatEvent>> {
        self.event_receiver.take()
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.event_sender = None;
        *self.is_connected.write().await = false;
        info!("Console source disconnected");
        Ok(())
    }
}

/// Prints every action as one JSON line on stdout
#[derive(Debug, Default)]
pub struct ConsoleActionPrinter;

#[async_trait]
impl ActionExecutor for ConsoleActionPrinter {
    async fn execute(&self, action: &ModerationAction) -> Result<()> {
        let line = serde_json::to_string(action).context("failed to encode action")?;
        println!("{}", line);
        Ok(())
    }

    async fn reply(&self, command: &CommandEvent, text: &str) -> Result<()> {
        println!("[{}] {}", command.name, text);
        Ok(())
    }
}
