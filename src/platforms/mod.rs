use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::ChatEvent;

pub mod console;

/// Interface every chat event source implements
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Start delivering events
    async fn connect(&mut self) -> Result<()>;

    /// Platform identifier (e.g. "console")
    fn platform_name(&self) -> &str;

    /// Check if the source is still delivering events
    async fn is_connected(&self) -> bool;

    /// Hand out the receiving end of the event channel. The channel is
    /// bounded, so a slow consumer holds the source back instead of losing
    /// events. Returns `None` once taken.
    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ChatEvent>>;

    /// Stop delivering events
    async fn disconnect(&mut self) -> Result<()>;
}
