//! # Automod
//!
//! Rule-based automoderation for chat communities. Inbound messages and
//! member joins are checked against a hot-reloadable rule file; offending
//! messages are deleted with a warning and join bursts raise a raid alert.
//!
//! ## Features
//!
//! - **Ordered rule evaluation**: bad words, blocked links, mass mentions,
//!   excessive caps, blocked file types and spam, first match wins
//! - **Sliding-window tracking**: exact per-user message and per-guild join counts
//! - **Hot reload**: YAML, JSON or TOML rule files swapped in atomically
//! - **Pluggable platforms**: event sources and action executors are traits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use automod::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(ConfigurationManager::new("config/automod_config.yaml"));
//!     config.initialize().await?;
//!
//!     let moderator = Arc::new(AutoModerator::new(config, Arc::new(ConsoleActionPrinter)));
//!
//!     let mut source = ConsoleSource::stdin();
//!     let receivers = source.take_event_receiver().into_iter().collect();
//!     source.connect().await?;
//!
//!     for handle in moderator.start(receivers) {
//!         handle.await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod config;
pub mod platforms;
pub mod bot;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::{AutoModerator, EventOutcome};
    pub use crate::bot::actions::{ActionExecutor, ChannelActionExecutor};
    pub use crate::bot::moderation::RuleEngine;
    pub use crate::bot::window::{WindowKey, WindowTracker};
    pub use crate::config::{ConfigChangeEvent, ConfigError, ConfigurationManager, RuleSet};
    pub use crate::platforms::{
        EventSource,
        console::{ConsoleActionPrinter, ConsoleSource},
    };
    pub use crate::types::{
        ChatEvent, CommandEvent, MemberJoinEvent, MessageEvent, ModerationAction, RuleKind, Verdict,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
