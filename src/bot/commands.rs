// src/bot/commands.rs - Moderator commands for inspecting and reloading rules

use log::{debug, info, warn};
use std::sync::Arc;

use crate::config::ConfigurationManager;
use crate::types::CommandEvent;

pub const STATUS_COMMAND: &str = "automod_status";
pub const RELOAD_COMMAND: &str = "reload_automod";

pub struct ModCommands {
    config_manager: Arc<ConfigurationManager>,
}

impl ModCommands {
    pub fn new(config_manager: Arc<ConfigurationManager>) -> Self {
        Self { config_manager }
    }

    /// Handle a command and return the reply, or `None` for commands that
    /// are not ours. Failures are reported in the reply text.
    pub async fn process_command(&self, command: &CommandEvent) -> Option<String> {
        let name = command
            .name
            .trim()
            .trim_start_matches(['/', '!'])
            .to_lowercase();

        debug!("Processing command '{}' from user {}", name, command.invoker_id);

        match name.as_str() {
            STATUS_COMMAND => Some(self.status()),
            RELOAD_COMMAND => Some(self.reload(command).await),
            _ => {
                debug!("Unknown command: {}", name);
                None
            }
        }
    }

    fn status(&self) -> String {
        let rules = self.config_manager.get_active_ruleset();
        format!(
            "Automoderation status ({} of 7 rules enabled):\n{}",
            rules.enabled_count(),
            rules.summary()
        )
    }

    async fn reload(&self, command: &CommandEvent) -> String {
        if !command.is_admin {
            warn!("User {} attempted to reload the automod config without permission", command.invoker_id);
            return "You need administrator permissions to reload the automoderation config.".to_string();
        }

        match self.config_manager.reload().await {
            Ok(()) => {
                info!("Automod config reloaded by {}", command.invoker_id);
                "Automoderation config reloaded.".to_string()
            }
            Err(e) => format!("Failed to reload automoderation config: {}", e),
        }
    }
}
