// src/bot/moderation.rs - Rule evaluation in fixed priority order

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::bot::window::{WindowKey, WindowTracker};
use crate::config::{AttachmentRule, BadWordRule, CapsRule, LinkBlockRule, RuleSet};
use crate::types::{MemberJoinEvent, MessageEvent, RuleKind, Verdict};

/// Message rules in evaluation order. The first rule that matches decides
/// the verdict and later rules are not consulted.
pub const MESSAGE_RULE_ORDER: [RuleKind; 6] = [
    RuleKind::BadWord,
    RuleKind::BlockedLink,
    RuleKind::MassMention,
    RuleKind::ExcessiveCaps,
    RuleKind::BlockedFiletype,
    RuleKind::Spam,
];

/// Evaluates events against a rule snapshot. Holds the window logs used by
/// the spam and raid rules; everything else is stateless.
pub struct RuleEngine {
    tracker: WindowTracker<WindowKey>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            tracker: WindowTracker::new(),
        }
    }

    pub fn tracker(&self) -> &WindowTracker<WindowKey> {
        &self.tracker
    }

    /// Check a message against every enabled message rule
    pub fn evaluate_message(&self, rules: &RuleSet, message: &MessageEvent, now: DateTime<Utc>) -> Verdict {
        for rule in MESSAGE_RULE_ORDER {
            if self.violates(rule, rules, message, now) {
                info!(
                    "Message {} from {} flagged by {}: {}",
                    message.message_id,
                    message.author_id,
                    rule.name(),
                    rule.reason()
                );
                return Verdict::fired(rule);
            }
        }

        Verdict::pass()
    }

    /// Count a member join towards the guild's raid window
    pub fn evaluate_join(&self, rules: &RuleSet, event: &MemberJoinEvent, now: DateTime<Utc>) -> Verdict {
        let Some(raid) = &rules.raid else {
            return Verdict::pass();
        };

        let joins = self
            .tracker
            .record_and_count(WindowKey::joins(event.guild_id), now, raid.window_seconds);

        if joins as u64 > raid.max_joins {
            warn!(
                "Possible raid in guild {}: {} joins within {} seconds",
                event.guild_id, joins, raid.window_seconds
            );
            Verdict::fired(RuleKind::Raid)
        } else {
            Verdict::pass()
        }
    }

    fn violates(&self, rule: RuleKind, rules: &RuleSet, message: &MessageEvent, now: DateTime<Utc>) -> bool {
        match rule {
            RuleKind::BadWord => rules
                .bad_word
                .as_ref()
                .is_some_and(|r| contains_bad_word(&message.content, r)),
            RuleKind::BlockedLink => rules
                .link_block
                .as_ref()
                .is_some_and(|r| contains_blocked_link(&message.content, r)),
            RuleKind::MassMention => rules
                .mass_mention
                .as_ref()
                .is_some_and(|r| message.mention_ids.len() as u64 > r.max_mentions),
            RuleKind::ExcessiveCaps => rules
                .caps
                .as_ref()
                .is_some_and(|r| is_excessive_caps(&message.content, r)),
            RuleKind::BlockedFiletype => rules
                .attachment
                .as_ref()
                .is_some_and(|r| has_blocked_attachment(&message.attachment_filenames, r)),
            RuleKind::Spam => rules.spam.as_ref().is_some_and(|r| {
                let recent = self
                    .tracker
                    .record_and_count(WindowKey::messages(message.author_id), now, r.window_seconds);
                debug!("User {} has {} messages in the last {}s", message.author_id, recent, r.window_seconds);
                recent as u64 >= r.max_messages
            }),
            RuleKind::Raid => false,
        }
    }
}

/// Share of uppercase characters over all characters, spaces included.
/// `None` for empty content.
pub fn caps_ratio(content: &str) -> Option<f64> {
    let length = content.chars().count();
    if length == 0 {
        return None;
    }

    let uppercase = content.chars().filter(|c| c.is_uppercase()).count();
    Some(uppercase as f64 / length as f64)
}

fn contains_bad_word(content: &str, rule: &BadWordRule) -> bool {
    if rule.words.is_empty() {
        return false;
    }

    let lowered = content.to_lowercase();
    rule.words.iter().any(|word| lowered.contains(word.as_str()))
}

fn contains_blocked_link(content: &str, rule: &LinkBlockRule) -> bool {
    rule.blocked_substrings
        .iter()
        .any(|link| content.contains(link.as_str()))
}

fn is_excessive_caps(content: &str, rule: &CapsRule) -> bool {
    if (content.chars().count() as u64) < rule.min_length {
        return false;
    }

    caps_ratio(content).is_some_and(|ratio| ratio > rule.max_ratio)
}

fn has_blocked_attachment(filenames: &[String], rule: &AttachmentRule) -> bool {
    filenames.iter().any(|filename| {
        let lowered = filename.to_lowercase();
        rule.blocked_extensions
            .iter()
            .any(|ext| lowered.ends_with(ext.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MassMentionRule, RaidRule, SpamRule};
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn bad_words(words: &[&str]) -> RuleSet {
        RuleSet {
            bad_word: Some(BadWordRule { words: set(words) }),
            ..Default::default()
        }
    }

    fn spam(window_seconds: u64, max_messages: u64) -> Option<SpamRule> {
        Some(SpamRule { window_seconds, max_messages })
    }

    #[test]
    fn test_rule_order_is_fixed() {
        let names: Vec<_> = MESSAGE_RULE_ORDER.iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec![
                "badword_rule",
                "link_blocking_rule",
                "mass_mention_rule",
                "caps_rule",
                "attachment_rule",
                "spam_rule"
            ]
        );
    }

    #[test]
    fn test_bad_word_case_insensitive() {
        let engine = RuleEngine::new();
        let rules = bad_words(&["spam"]);

        let verdict = engine.evaluate_message(&rules, &MessageEvent::new(1, "buy spam now"), at(0));
        assert!(verdict.matched);
        assert_eq!(verdict.reason, Some("Bad Word"));

        let verdict = engine.evaluate_message(&rules, &MessageEvent::new(1, "BUY SPAM NOW"), at(0));
        assert_eq!(verdict.reason, Some("Bad Word"));

        assert!(!engine.evaluate_message(&rules, &MessageEvent::new(1, "hello"), at(0)).matched);
    }

    #[test]
    fn test_blocked_link_case_sensitive() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            link_block: Some(LinkBlockRule { blocked_substrings: set(&["discord.gg"]) }),
            ..Default::default()
        };

        let verdict = engine.evaluate_message(&rules, &MessageEvent::new(1, "join discord.gg/abc"), at(0));
        assert_eq!(verdict.reason, Some("Blocked Link"));

        let verdict = engine.evaluate_message(&rules, &MessageEvent::new(1, "join DISCORD.GG/abc"), at(0));
        assert!(!verdict.matched);
    }

    #[test]
    fn test_mass_mention_threshold() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            mass_mention: Some(MassMentionRule { max_mentions: 2 }),
            ..Default::default()
        };

        let at_limit = MessageEvent::new(1, "hi").with_mentions(vec![10, 11]);
        assert!(!engine.evaluate_message(&rules, &at_limit, at(0)).matched);

        let over = MessageEvent::new(1, "hi").with_mentions(vec![10, 11, 12]);
        assert_eq!(engine.evaluate_message(&rules, &over, at(0)).reason, Some("Mass Mention"));
    }

    #[test]
    fn test_caps_ratio_counts_every_character() {
        // 12 characters, 10 uppercase; spaces count towards the length
        assert_eq!(caps_ratio("THIS IS LOUD"), Some(10.0 / 12.0));
        assert_eq!(caps_ratio(""), None);

        let engine = RuleEngine::new();
        let rules = RuleSet {
            caps: Some(CapsRule { max_ratio: 0.7, min_length: 5 }),
            ..Default::default()
        };
        let verdict = engine.evaluate_message(&rules, &MessageEvent::new(1, "THIS IS LOUD"), at(0));
        assert_eq!(verdict.reason, Some("Excessive Caps"));
    }

    #[test]
    fn test_caps_min_length_boundary() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            caps: Some(CapsRule { max_ratio: 0.5, min_length: 5 }),
            ..Default::default()
        };

        // exactly min_length is evaluated
        assert!(engine.evaluate_message(&rules, &MessageEvent::new(1, "LOUDD"), at(0)).matched);
        // one shorter is skipped whatever the ratio
        assert!(!engine.evaluate_message(&rules, &MessageEvent::new(1, "LOUD"), at(0)).matched);
    }

    #[test]
    fn test_caps_ratio_must_exceed_threshold() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            caps: Some(CapsRule { max_ratio: 0.5, min_length: 1 }),
            ..Default::default()
        };

        assert!(!engine.evaluate_message(&rules, &MessageEvent::new(1, "ABcd"), at(0)).matched);
        assert!(engine.evaluate_message(&rules, &MessageEvent::new(1, "ABCd"), at(0)).matched);
    }

    #[test]
    fn test_empty_content_skips_caps_rule() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            caps: Some(CapsRule { max_ratio: 0.0, min_length: 0 }),
            ..Default::default()
        };

        assert!(!engine.evaluate_message(&rules, &MessageEvent::new(1, ""), at(0)).matched);
    }

    #[test]
    fn test_blocked_attachment_extension() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            attachment: Some(AttachmentRule { blocked_extensions: set(&[".exe"]) }),
            ..Default::default()
        };

        let msg = MessageEvent::new(1, "File attached").with_attachments(vec!["notes.txt", "Setup.EXE"]);
        assert_eq!(engine.evaluate_message(&rules, &msg, at(0)).reason, Some("Blocked Filetype"));

        let msg = MessageEvent::new(1, "File attached").with_attachments(vec!["exe.txt"]);
        assert!(!engine.evaluate_message(&rules, &msg, at(0)).matched);
    }

    #[test]
    fn test_spam_window() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            spam: spam(10, 3),
            ..Default::default()
        };
        let msg = MessageEvent::new(99, "hello");

        assert!(!engine.evaluate_message(&rules, &msg, at(0)).matched);
        assert!(!engine.evaluate_message(&rules, &msg, at(1)).matched);
        let third = engine.evaluate_message(&rules, &msg, at(2));
        assert!(third.matched);
        assert_eq!(third.reason, Some("Spam"));

        // the window has emptied by t=15
        assert!(!engine.evaluate_message(&rules, &msg, at(15)).matched);
    }

    #[test]
    fn test_first_match_wins_and_skips_spam_tracking() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            spam: spam(10, 1),
            ..bad_words(&["spam"])
        };

        let verdict = engine.evaluate_message(&rules, &MessageEvent::new(5, "spam spam"), at(0));
        assert_eq!(verdict.reason, Some("Bad Word"));
        assert_eq!(verdict.rule_name, Some("badword_rule"));
        assert_eq!(engine.tracker().tracked_keys(), 0);
    }

    #[test]
    fn test_earlier_rule_beats_later_rule() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            link_block: Some(LinkBlockRule { blocked_substrings: set(&["bit.ly"]) }),
            caps: Some(CapsRule { max_ratio: 0.1, min_length: 1 }),
            ..Default::default()
        };

        let verdict = engine.evaluate_message(&rules, &MessageEvent::new(1, "GO TO bit.ly NOW"), at(0));
        assert_eq!(verdict.reason, Some("Blocked Link"));
    }

    #[test]
    fn test_no_rules_no_verdict() {
        let engine = RuleEngine::new();
        let msg = MessageEvent::new(1, "ANYTHING discord.gg")
            .with_mentions(vec![1, 2, 3, 4, 5, 6, 7, 8])
            .with_attachments(vec!["virus.exe"]);

        assert_eq!(engine.evaluate_message(&RuleSet::default(), &msg, at(0)), Verdict::pass());
    }

    #[test]
    fn test_raid_alert_after_max_joins() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            raid: Some(RaidRule { window_seconds: 10, max_joins: 5 }),
            ..Default::default()
        };
        let join = MemberJoinEvent { guild_id: 3, member_id: 0 };

        for t in 0..5 {
            assert!(!engine.evaluate_join(&rules, &join, at(t)).matched, "join at t={}", t);
        }
        let sixth = engine.evaluate_join(&rules, &join, at(5));
        assert!(sixth.matched);
        assert_eq!(sixth.reason, Some("Raid"));
    }

    #[test]
    fn test_spaced_joins_never_alert() {
        let engine = RuleEngine::new();
        let rules = RuleSet {
            raid: Some(RaidRule { window_seconds: 10, max_joins: 5 }),
            ..Default::default()
        };
        let join = MemberJoinEvent { guild_id: 3, member_id: 0 };

        for i in 0..50 {
            assert!(!engine.evaluate_join(&rules, &join, at(i * 11)).matched);
        }
    }

    #[test]
    fn test_raid_disabled_without_rule() {
        let engine = RuleEngine::new();
        let join = MemberJoinEvent { guild_id: 3, member_id: 0 };

        for _ in 0..20 {
            assert!(!engine.evaluate_join(&RuleSet::default(), &join, at(0)).matched);
        }
        assert_eq!(engine.tracker().tracked_keys(), 0);
    }
}
