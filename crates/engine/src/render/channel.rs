//! Outward delivery surface for rendered tables.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, Stdout, stdout};
use tokio::sync::Mutex as AsyncMutex;

/// Errors raised by an output channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel rejected the update: {message}")]
    Rejected { message: String },
}

/// Where a session's output goes.
#[async_trait]
pub trait OutputChannel: Send + Sync {
    /// Announce the session (e.g. `Collecting USD/RUB rates...`).
    async fn open(&self, header: &str) -> Result<(), ChannelError>;

    /// Replace the displayed table with `text`.
    async fn publish(&self, text: &str) -> Result<(), ChannelError>;

    /// Send a side artifact with a caption.
    async fn attach_artifact(&self, path: &Path, caption: &str) -> Result<(), ChannelError>;

    /// Final message once every source has answered.
    async fn close(&self, footer: &str) -> Result<(), ChannelError>;
}

/// Writes every update to standard output.
pub struct StdoutChannel {
    prefix: Option<String>,
    out: AsyncMutex<Stdout>,
}

impl StdoutChannel {
    pub fn new() -> Self {
        Self {
            prefix: None,
            out: AsyncMutex::new(stdout()),
        }
    }

    /// Tag each block, e.g. with the requester when several sessions share stdout.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            out: AsyncMutex::new(stdout()),
        }
    }

    async fn write_block(&self, text: &str) -> Result<(), ChannelError> {
        let block = match &self.prefix {
            Some(prefix) => text.lines().map(|line| format!("[{prefix}] {line}\n")).collect::<String>(),
            None => format!("{text}\n"),
        };
        let mut out = self.out.lock().await;
        out.write_all(block.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }
}

impl Default for StdoutChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputChannel for StdoutChannel {
    async fn open(&self, header: &str) -> Result<(), ChannelError> {
        self.write_block(header).await
    }

    async fn publish(&self, text: &str) -> Result<(), ChannelError> {
        self.write_block(text).await
    }

    async fn attach_artifact(&self, path: &Path, caption: &str) -> Result<(), ChannelError> {
        self.write_block(&format!("{caption}: {}", path.display())).await
    }

    async fn close(&self, footer: &str) -> Result<(), ChannelError> {
        self.write_block(footer).await
    }
}

/// Something a [`RecordingChannel`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened(String),
    Published(String),
    Artifact { path: PathBuf, caption: String },
    Closed(String),
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<ChannelEvent>>,
    fail_next_publish: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().expect("channel events lock poisoned").clone()
    }

    /// Texts of successful publishes, in order.
    pub fn published(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChannelEvent::Published(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Make the next publish fail once.
    pub fn fail_next_publish(&self) {
        self.fail_next_publish.store(true, Ordering::SeqCst);
    }

    fn record(&self, event: ChannelEvent) {
        self.events.lock().expect("channel events lock poisoned").push(event);
    }
}

#[async_trait]
impl OutputChannel for RecordingChannel {
    async fn open(&self, header: &str) -> Result<(), ChannelError> {
        self.record(ChannelEvent::Opened(header.to_string()));
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<(), ChannelError> {
        if self.fail_next_publish.swap(false, Ordering::SeqCst) {
            return Err(ChannelError::Rejected {
                message: "simulated failure".to_string(),
            });
        }
        self.record(ChannelEvent::Published(text.to_string()));
        Ok(())
    }

    async fn attach_artifact(&self, path: &Path, caption: &str) -> Result<(), ChannelError> {
        self.record(ChannelEvent::Artifact {
            path: path.to_path_buf(),
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn close(&self, footer: &str) -> Result<(), ChannelError> {
        self.record(ChannelEvent::Closed(footer.to_string()));
        Ok(())
    }
}
