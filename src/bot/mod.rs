// src/bot/mod.rs - Automoderator runtime: routes events through the rule engine

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::config::{ConfigurationManager, RuleSet};
use crate::types::{ChatEvent, CommandEvent, MemberJoinEvent, MessageEvent, ModerationAction, RuleKind, Verdict};

pub mod actions;
pub mod commands;
pub mod moderation;
pub mod window;

use actions::ActionExecutor;
use commands::ModCommands;
use moderation::RuleEngine;

/// What happened to one event
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Not evaluated (bot author)
    Ignored,
    /// Evaluated, no rule fired
    Passed,
    /// A rule fired and the action was handed to the executor
    Actioned(ModerationAction),
    /// A moderator command produced a reply
    Replied(String),
}

#[derive(Debug, Default)]
struct ModerationStats {
    events_processed: u64,
    messages_ignored: u64,
    rule_hits: HashMap<&'static str, u64>,
    commands_handled: u64,
}

/// Owns the rule store, the engine and the executor. One instance serves
/// every event source; events are evaluated concurrently.
pub struct AutoModerator {
    config_manager: Arc<ConfigurationManager>,
    engine: RuleEngine,
    executor: Arc<dyn ActionExecutor>,
    commands: ModCommands,
    stats: RwLock<ModerationStats>,
}

impl AutoModerator {
    pub fn new(config_manager: Arc<ConfigurationManager>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            commands: ModCommands::new(Arc::clone(&config_manager)),
            config_manager,
            engine: RuleEngine::new(),
            executor,
            stats: RwLock::new(ModerationStats::default()),
        }
    }

    pub fn config_manager(&self) -> &Arc<ConfigurationManager> {
        &self.config_manager
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Evaluate one event against the current rules and apply the result
    pub async fn handle_event(&self, event: ChatEvent) -> Result<EventOutcome> {
        self.handle_event_at(event, Utc::now()).await
    }

    /// Same as `handle_event` with an explicit arrival time
    pub async fn handle_event_at(&self, event: ChatEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        self.stats.write().await.events_processed += 1;

        match event {
            ChatEvent::Message(message) => self.handle_message(&message, now).await,
            ChatEvent::MemberJoin(join) => self.handle_join(&join, now).await,
            ChatEvent::Command(command) => self.handle_command(&command).await,
        }
    }

    async fn handle_message(&self, message: &MessageEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        if message.author_is_bot {
            debug!("Skipping message {} from bot {}", message.message_id, message.author_id);
            self.stats.write().await.messages_ignored += 1;
            return Ok(EventOutcome::Ignored);
        }

        // One snapshot per event; a concurrent reload cannot change rules mid-evaluation.
        let rules = self.config_manager.get_active_ruleset();
        let verdict = self.engine.evaluate_message(&rules, message, now);

        let Some(rule) = Self::fired_rule(&verdict) else {
            return Ok(EventOutcome::Passed);
        };

        self.record_hit(rule).await;
        let action = ModerationAction::delete_and_warn(message, rule);
        self.executor.execute(&action).await?;
        Ok(EventOutcome::Actioned(action))
    }

    async fn handle_join(&self, join: &MemberJoinEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        let rules = self.config_manager.get_active_ruleset();
        let verdict = self.engine.evaluate_join(&rules, join, now);

        let (Some(rule), Some(raid)) = (Self::fired_rule(&verdict), rules.raid.as_ref()) else {
            return Ok(EventOutcome::Passed);
        };

        self.record_hit(rule).await;
        let action = ModerationAction::raid_alert(join.guild_id, raid);
        self.executor.execute(&action).await?;
        Ok(EventOutcome::Actioned(action))
    }

    async fn handle_command(&self, command: &CommandEvent) -> Result<EventOutcome> {
        match self.commands.process_command(command).await {
            Some(reply) => {
                self.stats.write().await.commands_handled += 1;
                self.executor.reply(command, &reply).await?;
                Ok(EventOutcome::Replied(reply))
            }
            None => Ok(EventOutcome::Ignored),
        }
    }

    fn fired_rule(verdict: &Verdict) -> Option<RuleKind> {
        if !verdict.matched {
            return None;
        }
        verdict.rule_name.and_then(RuleKind::from_name)
    }

    async fn record_hit(&self, rule: RuleKind) {
        *self.stats.write().await.rule_hits.entry(rule.name()).or_insert(0) += 1;
    }

    /// Spawn one processing task per event receiver. Each task handles its
    /// source's events one at a time, in arrival order, until the source
    /// closes.
    pub fn start(self: &Arc<Self>, receivers: Vec<mpsc::Receiver<ChatEvent>>) -> Vec<JoinHandle<()>> {
        receivers
            .into_iter()
            .map(|mut receiver| {
                let moderator = Arc::clone(self);
                tokio::spawn(async move {
                    while let Some(event) = receiver.recv().await {
                        if let Err(e) = moderator.handle_event(event).await {
                            error!("Failed to handle event: {:#}", e);
                        }
                    }
                    info!("Event source closed, stopping processor");
                })
            })
            .collect()
    }

    /// Periodically drop window logs that can no longer affect a verdict
    pub fn start_maintenance(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let moderator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;
                moderator.sweep_idle_logs(Utc::now());
            }
        })
    }

    /// Evict logs idle for longer than the longest configured window
    pub fn sweep_idle_logs(&self, now: DateTime<Utc>) -> usize {
        let retention = Self::retention_seconds(&self.config_manager.get_active_ruleset());
        let evicted = self.engine.tracker().evict_idle(now, retention);
        debug!("Evicted {} idle window logs (retention {}s)", evicted, retention);
        evicted
    }

    fn retention_seconds(rules: &RuleSet) -> u64 {
        let spam = rules.spam.as_ref().map_or(0, |r| r.window_seconds);
        let raid = rules.raid.as_ref().map_or(0, |r| r.window_seconds);
        spam.max(raid)
    }

    /// Counters as JSON values, keyed by statistic name
    pub async fn get_stats(&self) -> HashMap<String, serde_json::Value> {
        let stats = self.stats.read().await;
        let mut result = HashMap::new();

        let rule_hits: serde_json::Map<String, serde_json::Value> = stats
            .rule_hits
            .iter()
            .map(|(name, hits)| (name.to_string(), serde_json::Value::from(*hits)))
            .collect();

        result.insert("events_processed".to_string(), serde_json::Value::from(stats.events_processed));
        result.insert("messages_ignored".to_string(), serde_json::Value::from(stats.messages_ignored));
        result.insert("commands_handled".to_string(), serde_json::Value::from(stats.commands_handled));
        result.insert("rule_hits".to_string(), serde_json::Value::Object(rule_hits));
        result.insert(
            "tracked_window_logs".to_string(),
            serde_json::Value::from(self.engine.tracker().tracked_keys()),
        );
        result.insert(
            "enabled_rules".to_string(),
            serde_json::Value::from(self.config_manager.get_active_ruleset().enabled_count()),
        );

        result
    }
}
