// src/bot/actions.rs - Moderation actions and the executor seam to the platform

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::mpsc;

use crate::config::RaidRule;
use crate::types::{CommandEvent, MessageEvent, ModerationAction, RuleKind, Verdict};

/// Applies actions on the chat platform (delete, warn, alert moderators).
/// Called only after a verdict is final, never while rules are evaluated.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ModerationAction) -> Result<()>;

    /// Deliver a command reply to whoever issued the command
    async fn reply(&self, command: &CommandEvent, text: &str) -> Result<()> {
        info!("Reply to {} for '{}': {}", command.invoker_id, command.name, text);
        Ok(())
    }
}

impl ModerationAction {
    /// Remove `message` and warn its author with the rule's warning text
    pub fn delete_and_warn(message: &MessageEvent, rule: RuleKind) -> Self {
        let warning = rule.warning().unwrap_or("your message was removed.");
        ModerationAction::DeleteAndWarn {
            message: message.reference(),
            verdict: Verdict::fired(rule),
            warning: format!("<@{}>, {}", message.author_id, warning),
        }
    }

    /// Tell the guild's moderators that joins exceeded the raid limit
    pub fn raid_alert(guild_id: u64, rule: &RaidRule) -> Self {
        ModerationAction::RaidAlert {
            guild_id,
            verdict: Verdict::fired(RuleKind::Raid),
            alert: format!(
                "Raid alert: More than {} members have joined within {} seconds.",
                rule.max_joins, rule.window_seconds
            ),
        }
    }
}

/// Forwards every action over an mpsc channel to whoever owns the platform
/// connection.
pub struct ChannelActionExecutor {
    sender: mpsc::Sender<ModerationAction>,
}

impl ChannelActionExecutor {
    pub fn new(sender: mpsc::Sender<ModerationAction>) -> Self {
        Self { sender }
    }

    /// Executor plus the receiving end, with room for `buffer` pending actions
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ModerationAction>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl ActionExecutor for ChannelActionExecutor {
    async fn execute(&self, action: &ModerationAction) -> Result<()> {
        debug!("Forwarding action for {:?}", action.verdict().rule_name);
        self.sender
            .send(action.clone())
            .await
            .context("action receiver has been dropped")
    }
}
