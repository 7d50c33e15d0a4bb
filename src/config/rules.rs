// src/config/rules.rs - Rule set schema, defaults and validation

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;

use super::ConfigError;

/// Longest window a spam or raid rule may track
pub const MAX_WINDOW_SECONDS: u64 = 7 * 24 * 60 * 60;

pub const DEFAULT_MAX_MENTIONS: u64 = 5;
pub const DEFAULT_MAX_CAPS_RATIO: f64 = 0.7;
pub const DEFAULT_CAPS_MIN_LENGTH: u64 = 10;
pub const DEFAULT_SPAM_INTERVAL: u64 = 10;
pub const DEFAULT_SPAM_THRESHOLD: u64 = 5;
pub const DEFAULT_JOIN_WINDOW: u64 = 10;
pub const DEFAULT_MAX_JOINS: u64 = 5;

/// The active, validated moderation configuration. A missing block means
/// the rule is disabled. Instances are never mutated once published.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleSet {
    #[serde(rename = "badword_rule", skip_serializing_if = "Option::is_none")]
    pub bad_word: Option<BadWordRule>,
    #[serde(rename = "link_blocking_rule", skip_serializing_if = "Option::is_none")]
    pub link_block: Option<LinkBlockRule>,
    #[serde(rename = "mass_mention_rule", skip_serializing_if = "Option::is_none")]
    pub mass_mention: Option<MassMentionRule>,
    #[serde(rename = "caps_rule", skip_serializing_if = "Option::is_none")]
    pub caps: Option<CapsRule>,
    #[serde(rename = "attachment_rule", skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRule>,
    #[serde(rename = "spam_rule", skip_serializing_if = "Option::is_none")]
    pub spam: Option<SpamRule>,
    #[serde(rename = "raid_rule", skip_serializing_if = "Option::is_none")]
    pub raid: Option<RaidRule>,
}

/// Words are stored lower-cased
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadWordRule {
    #[serde(rename = "bad_words")]
    pub words: BTreeSet<String>,
}

/// Substrings are matched case-sensitively, exactly as authored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkBlockRule {
    #[serde(rename = "blocked_links")]
    pub blocked_substrings: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MassMentionRule {
    pub max_mentions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapsRule {
    #[serde(rename = "max_caps_ratio")]
    pub max_ratio: f64,
    pub min_length: u64,
}

/// Extensions are stored lower-cased
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentRule {
    #[serde(rename = "blocked_filetypes")]
    pub blocked_extensions: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpamRule {
    #[serde(rename = "spam_interval")]
    pub window_seconds: u64,
    #[serde(rename = "spam_threshold")]
    pub max_messages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaidRule {
    #[serde(rename = "join_window")]
    pub window_seconds: u64,
    pub max_joins: u64,
}

// On-disk shape. Numbers are signed so negative values reach validation
// instead of failing deserialization.

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RuleSetFile {
    badword_rule: Option<BadWordBlock>,
    link_blocking_rule: Option<LinkBlock>,
    mass_mention_rule: Option<MassMentionBlock>,
    caps_rule: Option<CapsBlock>,
    attachment_rule: Option<AttachmentBlock>,
    spam_rule: Option<SpamBlock>,
    raid_rule: Option<RaidBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct BadWordBlock {
    bad_words: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkBlock {
    blocked_links: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct MassMentionBlock {
    max_mentions: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct CapsBlock {
    max_caps_ratio: Option<f64>,
    min_length: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct AttachmentBlock {
    blocked_filetypes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct SpamBlock {
    spam_interval: Option<i64>,
    spam_threshold: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RaidBlock {
    join_window: Option<i64>,
    max_joins: Option<i64>,
}

impl TryFrom<RuleSetFile> for RuleSet {
    type Error = ConfigError;

    fn try_from(file: RuleSetFile) -> Result<Self, Self::Error> {
        // A block without any recognised setting (`badword_rule: {}`) leaves
        // the rule disabled.
        let bad_word = match file.badword_rule {
            Some(BadWordBlock { bad_words: Some(words) }) => Some(BadWordRule {
                words: normalized_set("badword_rule.bad_words", words, true)?,
            }),
            Some(_) => unconfigured("badword_rule"),
            None => None,
        };

        let link_block = match file.link_blocking_rule {
            Some(LinkBlock { blocked_links: Some(links) }) => Some(LinkBlockRule {
                blocked_substrings: normalized_set("link_blocking_rule.blocked_links", links, false)?,
            }),
            Some(_) => unconfigured("link_blocking_rule"),
            None => None,
        };

        let mass_mention = match file.mass_mention_rule {
            Some(MassMentionBlock { max_mentions: None }) => unconfigured("mass_mention_rule"),
            None => None,
            Some(block) => Some(MassMentionRule {
                max_mentions: non_negative("mass_mention_rule.max_mentions", block.max_mentions, DEFAULT_MAX_MENTIONS)?,
            }),
        };

        let caps = match file.caps_rule {
            Some(CapsBlock { max_caps_ratio: None, min_length: None }) => unconfigured("caps_rule"),
            None => None,
            Some(block) => Some(CapsRule {
                max_ratio: block.max_caps_ratio.unwrap_or(DEFAULT_MAX_CAPS_RATIO),
                min_length: non_negative("caps_rule.min_length", block.min_length, DEFAULT_CAPS_MIN_LENGTH)?,
            }),
        };

        let attachment = match file.attachment_rule {
            Some(AttachmentBlock { blocked_filetypes: Some(types) }) => Some(AttachmentRule {
                blocked_extensions: normalized_set("attachment_rule.blocked_filetypes", types, true)?,
            }),
            Some(_) => unconfigured("attachment_rule"),
            None => None,
        };

        let spam = match file.spam_rule {
            Some(SpamBlock { spam_interval: None, spam_threshold: None }) => unconfigured("spam_rule"),
            None => None,
            Some(block) => Some(SpamRule {
                window_seconds: non_negative("spam_rule.spam_interval", block.spam_interval, DEFAULT_SPAM_INTERVAL)?,
                max_messages: non_negative("spam_rule.spam_threshold", block.spam_threshold, DEFAULT_SPAM_THRESHOLD)?,
            }),
        };

        let raid = match file.raid_rule {
            Some(RaidBlock { join_window: None, max_joins: None }) => unconfigured("raid_rule"),
            None => None,
            Some(block) => Some(RaidRule {
                window_seconds: non_negative("raid_rule.join_window", block.join_window, DEFAULT_JOIN_WINDOW)?,
                max_joins: non_negative("raid_rule.max_joins", block.max_joins, DEFAULT_MAX_JOINS)?,
            }),
        };

        let rules = RuleSet {
            bad_word,
            link_block,
            mass_mention,
            caps,
            attachment,
            spam,
            raid,
        };
        rules.validate()?;
        Ok(rules)
    }
}

fn unconfigured<T>(section: &str) -> Option<T> {
    warn!("{} has no recognised settings, rule stays disabled", section);
    None
}

fn non_negative(field: &str, value: Option<i64>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => u64::try_from(v)
            .map_err(|_| ConfigError::Validation(format!("{} must not be negative (got {})", field, v))),
    }
}

fn normalized_set(field: &str, values: Vec<String>, lowercase: bool) -> Result<BTreeSet<String>, ConfigError> {
    values
        .into_iter()
        .map(|value| {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} contains an empty entry", field)));
            }
            // Case-folded entries are also trimmed; the rest match verbatim.
            Ok(if lowercase { value.trim().to_lowercase() } else { value })
        })
        .collect()
}

fn check_window(field: &str, seconds: u64) -> Result<(), ConfigError> {
    if seconds > MAX_WINDOW_SECONDS {
        return Err(ConfigError::Validation(format!(
            "{} must be at most {} seconds (got {})",
            field, MAX_WINDOW_SECONDS, seconds
        )));
    }
    Ok(())
}

fn check_entries<'a>(field: &str, mut entries: impl Iterator<Item = &'a String>) -> Result<(), ConfigError> {
    if entries.any(|entry| entry.trim().is_empty()) {
        return Err(ConfigError::Validation(format!("{} contains an empty entry", field)));
    }
    Ok(())
}

fn join_or_disabled<'a>(values: impl Iterator<Item = &'a String>) -> String {
    let joined: Vec<&str> = values.map(String::as_str).collect();
    if joined.is_empty() {
        "(none)".to_string()
    } else {
        joined.join(", ")
    }
}

impl RuleSet {
    /// The rules shipped in a freshly created configuration file
    pub fn starter() -> Self {
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();

        Self {
            bad_word: Some(BadWordRule { words: set(&["badword1", "badword2"]) }),
            link_block: Some(LinkBlockRule { blocked_substrings: set(&["discord.gg", "bit.ly"]) }),
            mass_mention: Some(MassMentionRule { max_mentions: DEFAULT_MAX_MENTIONS }),
            caps: Some(CapsRule {
                max_ratio: DEFAULT_MAX_CAPS_RATIO,
                min_length: DEFAULT_CAPS_MIN_LENGTH,
            }),
            attachment: Some(AttachmentRule { blocked_extensions: set(&[".exe", ".bat", ".js"]) }),
            spam: Some(SpamRule {
                window_seconds: DEFAULT_SPAM_INTERVAL,
                max_messages: DEFAULT_SPAM_THRESHOLD,
            }),
            raid: Some(RaidRule {
                window_seconds: DEFAULT_JOIN_WINDOW,
                max_joins: DEFAULT_MAX_JOINS,
            }),
        }
    }

    /// Check semantic constraints. Rule sets built in code go through this
    /// before they are saved; parsed ones before they are published.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(rule) = &self.bad_word {
            check_entries("badword_rule.bad_words", rule.words.iter())?;
        }
        if let Some(rule) = &self.link_block {
            check_entries("link_blocking_rule.blocked_links", rule.blocked_substrings.iter())?;
        }
        if let Some(rule) = &self.attachment {
            check_entries("attachment_rule.blocked_filetypes", rule.blocked_extensions.iter())?;
        }

        if let Some(rule) = &self.caps {
            if !(0.0..=1.0).contains(&rule.max_ratio) {
                return Err(ConfigError::Validation(format!(
                    "caps_rule.max_caps_ratio must be between 0.0 and 1.0 (got {})",
                    rule.max_ratio
                )));
            }
        }

        if let Some(rule) = &self.spam {
            check_window("spam_rule.spam_interval", rule.window_seconds)?;
            if rule.max_messages == 0 {
                return Err(ConfigError::Validation(
                    "spam_rule.spam_threshold must be at least 1".to_string(),
                ));
            }
        }

        if let Some(rule) = &self.raid {
            check_window("raid_rule.join_window", rule.window_seconds)?;
        }

        Ok(())
    }

    /// Number of enabled rule blocks
    pub fn enabled_count(&self) -> usize {
        [
            self.bad_word.is_some(),
            self.link_block.is_some(),
            self.mass_mention.is_some(),
            self.caps.is_some(),
            self.attachment.is_some(),
            self.spam.is_some(),
            self.raid.is_some(),
        ]
        .iter()
        .filter(|enabled| **enabled)
        .count()
    }

    /// Human-readable overview for the status command
    pub fn summary(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "**Bad Words:** {}",
            self.bad_word.as_ref().map_or("disabled".to_string(), |r| join_or_disabled(r.words.iter()))
        );
        let _ = writeln!(
            out,
            "**Blocked Links:** {}",
            self.link_block
                .as_ref()
                .map_or("disabled".to_string(), |r| join_or_disabled(r.blocked_substrings.iter()))
        );
        let _ = writeln!(
            out,
            "**Max Mentions:** {}",
            self.mass_mention.as_ref().map_or("disabled".to_string(), |r| r.max_mentions.to_string())
        );
        let _ = writeln!(
            out,
            "**Max Caps Ratio:** {}",
            self.caps.as_ref().map_or("disabled".to_string(), |r| {
                format!("{} (messages of {}+ characters)", r.max_ratio, r.min_length)
            })
        );
        let _ = writeln!(
            out,
            "**Blocked Filetypes:** {}",
            self.attachment
                .as_ref()
                .map_or("disabled".to_string(), |r| join_or_disabled(r.blocked_extensions.iter()))
        );
        let _ = writeln!(
            out,
            "**Spam Settings:** {}",
            self.spam.as_ref().map_or("disabled".to_string(), |r| {
                format!("Max {} messages every {} seconds", r.max_messages, r.window_seconds)
            })
        );
        let _ = write!(
            out,
            "**Anti-Raid:** {}",
            self.raid.as_ref().map_or("disabled".to_string(), |r| {
                format!("More than {} joins in {} seconds triggers an alert.", r.max_joins, r.window_seconds)
            })
        );

        out
    }
}
