// src/types/mod.rs - Event, verdict and action types shared by every layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// A chat message as delivered by an event source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub message_id: u64,
    #[serde(default)]
    pub channel_id: u64,
    #[serde(default)]
    pub guild_id: u64,
    pub author_id: u64,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    #[serde(default)]
    pub mention_ids: Vec<u64>,
    #[serde(default)]
    pub attachment_filenames: Vec<String>,
}

impl MessageEvent {
    pub fn new(author_id: u64, content: impl Into<String>) -> Self {
        Self {
            author_id,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_mentions(mut self, mention_ids: Vec<u64>) -> Self {
        self.mention_ids = mention_ids;
        self
    }

    pub fn with_attachments<S: Into<String>>(mut self, filenames: Vec<S>) -> Self {
        self.attachment_filenames = filenames.into_iter().map(Into::into).collect();
        self
    }

    pub fn reference(&self) -> MessageRef {
        MessageRef {
            message_id: self.message_id,
            channel_id: self.channel_id,
            author_id: self.author_id,
        }
    }
}

/// A member joined a guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberJoinEvent {
    pub guild_id: u64,
    #[serde(default)]
    pub member_id: u64,
}

/// Moderator command issued through the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub name: String,
    pub invoker_id: u64,
    #[serde(default)]
    pub is_admin: bool,
}

/// Everything an event source can deliver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Message(MessageEvent),
    MemberJoin(MemberJoinEvent),
    Command(CommandEvent),
}

/// The rules the engine knows about. Message rules are listed in
/// evaluation order; `Raid` only applies to member joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    BadWord,
    BlockedLink,
    MassMention,
    ExcessiveCaps,
    BlockedFiletype,
    Spam,
    Raid,
}

impl RuleKind {
    pub const ALL: [RuleKind; 7] = [
        RuleKind::BadWord,
        RuleKind::BlockedLink,
        RuleKind::MassMention,
        RuleKind::ExcessiveCaps,
        RuleKind::BlockedFiletype,
        RuleKind::Spam,
        RuleKind::Raid,
    ];

    /// Look a rule up by its configuration key
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|rule| rule.name() == name)
    }

    /// Configuration key of the rule block
    pub fn name(self) -> &'static str {
        match self {
            RuleKind::BadWord => "badword_rule",
            RuleKind::BlockedLink => "link_blocking_rule",
            RuleKind::MassMention => "mass_mention_rule",
            RuleKind::ExcessiveCaps => "caps_rule",
            RuleKind::BlockedFiletype => "attachment_rule",
            RuleKind::Spam => "spam_rule",
            RuleKind::Raid => "raid_rule",
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            RuleKind::BadWord => "Bad Word",
            RuleKind::BlockedLink => "Blocked Link",
            RuleKind::MassMention => "Mass Mention",
            RuleKind::ExcessiveCaps => "Excessive Caps",
            RuleKind::BlockedFiletype => "Blocked Filetype",
            RuleKind::Spam => "Spam",
            RuleKind::Raid => "Raid",
        }
    }

    /// Text sent to the author after their message was removed. `None`
    /// for the raid rule, which alerts moderators instead of warning anyone.
    pub fn warning(self) -> Option<&'static str> {
        match self {
            RuleKind::BadWord => Some("please refrain from using inappropriate language."),
            RuleKind::BlockedLink => Some("posting that kind of link is not allowed."),
            RuleKind::MassMention => Some("you mentioned too many people at once."),
            RuleKind::ExcessiveCaps => Some("please avoid excessive use of caps."),
            RuleKind::BlockedFiletype => Some("that file type is not allowed."),
            RuleKind::Spam => Some("you're sending messages too quickly. Please slow down."),
            RuleKind::Raid => None,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of evaluating one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub matched: bool,
    pub rule_name: Option<&'static str>,
    pub reason: Option<&'static str>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            matched: false,
            rule_name: None,
            reason: None,
        }
    }

    pub fn fired(rule: RuleKind) -> Self {
        Self {
            matched: true,
            rule_name: Some(rule.name()),
            reason: Some(rule.reason()),
        }
    }
}

/// Identifies the message a delete/warn action applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
}

/// Corrective actions handed to the platform
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModerationAction {
    /// Remove the message and warn its author in the same channel
    DeleteAndWarn {
        message: MessageRef,
        verdict: Verdict,
        warning: String,
    },
    /// Notify the guild's moderators; nobody is punished
    RaidAlert {
        guild_id: u64,
        verdict: Verdict,
        alert: String,
    },
}

impl ModerationAction {
    pub fn verdict(&self) -> &Verdict {
        match self {
            ModerationAction::DeleteAndWarn { verdict, .. } => verdict,
            ModerationAction::RaidAlert { verdict, .. } => verdict,
        }
    }
}
