// src/config/mod.rs - Rule configuration store with atomic reload and hot-reload

use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock as StdRwLock};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{sleep, Duration};

pub mod rules;

pub use rules::{
    AttachmentRule, BadWordRule, CapsRule, LinkBlockRule, MassMentionRule, RaidRule, RuleSet, SpamRule,
};
use rules::RuleSetFile;

/// Quiet period after a file change before the rules are re-read
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("failed to watch configuration: {0}")]
    Watch(#[from] notify::Error),
}

impl ConfigError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Serialization formats accepted for the rule file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            other => Err(ConfigError::UnsupportedFormat(format!(
                "'{}' ({})",
                other,
                path.display()
            ))),
        }
    }

    /// Parse and validate a rule set. `origin` names the source in errors.
    pub fn parse(self, content: &str, origin: &str) -> Result<RuleSet, ConfigError> {
        // An empty file configures nothing.
        if content.trim().is_empty() {
            return Ok(RuleSet::default());
        }

        // A null document (`~`, `null`) configures nothing, like an empty one.
        let parsed: Result<RuleSetFile, String> = match self {
            ConfigFormat::Yaml => serde_yaml::from_str::<Option<RuleSetFile>>(content)
                .map(Option::unwrap_or_default)
                .map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str::<Option<RuleSetFile>>(content)
                .map(Option::unwrap_or_default)
                .map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        };

        let file = parsed.map_err(|message| ConfigError::Parse {
            origin: origin.to_string(),
            message,
        })?;

        RuleSet::try_from(file)
    }

    pub fn render(self, rules: &RuleSet) -> Result<String, ConfigError> {
        match self {
            ConfigFormat::Yaml => serde_yaml::to_string(rules).map_err(|e| ConfigError::Serialize(e.to_string())),
            ConfigFormat::Json => {
                serde_json::to_string_pretty(rules).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
            ConfigFormat::Toml => toml::to_string_pretty(rules).map_err(|e| ConfigError::Serialize(e.to_string())),
        }
    }
}

/// Events broadcast when the active rules change or a reload fails
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChangeEvent {
    RulesReloaded { file: String },
    ValidationError { file: String, error: String },
}

/// Holds the active rule set and keeps it in sync with the rule file.
///
/// Readers get an `Arc<RuleSet>` snapshot; reloads build a complete new
/// rule set and swap the pointer, so an evaluation sees either the old or
/// the new rules, never a mix.
#[derive(Clone)]
pub struct ConfigurationManager {
    config_path: PathBuf,
    active: Arc<StdRwLock<Arc<RuleSet>>>,

    /// Kept alive for as long as the manager exists
    watchers: Arc<Mutex<Vec<RecommendedWatcher>>>,

    change_notifier: broadcast::Sender<ConfigChangeEvent>,
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        let (tx, _) = broadcast::channel(100);

        Self {
            config_path: config_path.as_ref().to_path_buf(),
            active: Arc::new(StdRwLock::new(Arc::new(RuleSet::default()))),
            watchers: Arc::new(Mutex::new(Vec::new())),
            change_notifier: tx,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the rule file (creating a starter file when none exists) and
    /// start watching it for changes.
    ///
    /// A file that fails to load leaves every rule disabled until it is
    /// fixed; the failure is logged, not returned, so the bot keeps running.
    pub async fn initialize(&self) -> Result<(), ConfigError> {
        ConfigFormat::from_path(&self.config_path)?;

        if !self.config_path.exists() {
            self.create_default_config().await?;
        } else if let Err(e) = self.reload().await {
            warn!("Starting with all rules disabled until the configuration is fixed: {}", e);
        }

        self.setup_file_watcher().await?;

        info!("Configuration manager initialized for {}", self.config_path.display());
        Ok(())
    }

    /// Current rule snapshot. Never waits on a reload in progress for
    /// longer than a pointer copy.
    pub fn get_active_ruleset(&self) -> Arc<RuleSet> {
        Self::snapshot(&self.active)
    }

    /// Re-read the configured rule file
    pub async fn reload(&self) -> Result<(), ConfigError> {
        Self::reload_into(&self.config_path, &self.active, &self.change_notifier).await
    }

    /// Replace the active rules with the contents of `path`
    pub async fn reload_from<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        Self::reload_into(path.as_ref(), &self.active, &self.change_notifier).await
    }

    /// Parse a rule file without publishing it
    pub async fn load_file(path: &Path) -> Result<RuleSet, ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::io(path, e))?;

        format.parse(&content, &path.display().to_string())
    }

    /// Validate, back up the current file, write `rules` and publish them
    pub async fn save_ruleset(&self, rules: RuleSet) -> Result<(), ConfigError> {
        rules.validate()?;

        let format = ConfigFormat::from_path(&self.config_path)?;
        let content = format.render(&rules)?;
        // Publish exactly what a later reload of the written file would see.
        let rules = format.parse(&content, &self.file_label())?;

        if self.config_path.exists() {
            self.create_backup().await?;
        }

        self.write_config(&content).await?;
        Self::publish(&self.active, rules);

        let _ = self.change_notifier.send(ConfigChangeEvent::RulesReloaded {
            file: self.file_label(),
        });
        info!("Saved rule configuration to {}", self.config_path.display());
        Ok(())
    }

    /// Subscribe to configuration change events
    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_notifier.subscribe()
    }

    /// Archive the current rule file into `backups/` next to it
    pub async fn create_backup(&self) -> Result<PathBuf, ConfigError> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::fs::File;
        use tar::Builder;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let backup_dir = self.config_dir().join("backups");

        if !backup_dir.exists() {
            fs::create_dir_all(&backup_dir)
                .await
                .map_err(|e| ConfigError::io(&backup_dir, e))?;
        }

        let stem = self
            .config_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("automod_config");
        let backup_path = backup_dir.join(format!("{}_backup_{}.tar.gz", stem, timestamp));

        let backup_file = File::create(&backup_path).map_err(|e| ConfigError::io(&backup_path, e))?;
        let encoder = GzEncoder::new(backup_file, Compression::default());
        let mut archive = Builder::new(encoder);

        if let Some(file_name) = self.config_path.file_name() {
            archive
                .append_path_with_name(&self.config_path, file_name)
                .map_err(|e| ConfigError::io(&self.config_path, e))?;
        }

        archive
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(|e| ConfigError::io(&backup_path, e))?;

        info!("Created configuration backup: {}", backup_path.display());
        Ok(backup_path)
    }

    async fn create_default_config(&self) -> Result<(), ConfigError> {
        let rules = RuleSet::starter();
        let content = ConfigFormat::from_path(&self.config_path)?.render(&rules)?;

        self.write_config(&content).await?;
        Self::publish(&self.active, rules);

        info!("Created default rule configuration: {}", self.config_path.display());
        Ok(())
    }

    async fn write_config(&self, content: &str) -> Result<(), ConfigError> {
        let dir = self.config_dir();
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(&dir).await.map_err(|e| ConfigError::io(&dir, e))?;
        }

        fs::write(&self.config_path, content)
            .await
            .map_err(|e| ConfigError::io(&self.config_path, e))
    }

    fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn file_label(&self) -> String {
        self.config_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string()
    }

    fn snapshot(active: &StdRwLock<Arc<RuleSet>>) -> Arc<RuleSet> {
        // The guarded value is a single pointer, so a poisoned lock still
        // holds a complete rule set.
        match active.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    fn publish(active: &StdRwLock<Arc<RuleSet>>, rules: RuleSet) {
        let rules = Arc::new(rules);
        match active.write() {
            Ok(mut guard) => *guard = rules,
            Err(poisoned) => *poisoned.into_inner() = rules,
        }
    }

    async fn reload_into(
        path: &Path,
        active: &StdRwLock<Arc<RuleSet>>,
        notifier: &broadcast::Sender<ConfigChangeEvent>,
    ) -> Result<(), ConfigError> {
        let file = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        match Self::load_file(path).await {
            Ok(rules) => {
                let enabled = rules.enabled_count();
                Self::publish(active, rules);
                info!("Automod rules loaded from {} ({} rules enabled)", path.display(), enabled);
                let _ = notifier.send(ConfigChangeEvent::RulesReloaded { file });
                Ok(())
            }
            Err(e) => {
                error!("Failed to load automod config, keeping previous rules: {}", e);
                let _ = notifier.send(ConfigChangeEvent::ValidationError {
                    file,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Watch the rule file's directory and reload on changes to the file
    async fn setup_file_watcher(&self) -> Result<(), ConfigError> {
        let config_path = self.config_path.clone();
        let watch_dir = match self.config_dir() {
            dir if dir.as_os_str().is_empty() => PathBuf::from("."),
            dir => dir,
        };
        let file_name = match config_path.file_name() {
            Some(name) => name.to_os_string(),
            None => return Ok(()),
        };

        let active = self.active.clone();
        let change_notifier = self.change_notifier.clone();

        let (tx, mut rx) = mpsc::channel::<Event>(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if let Err(e) = tx.blocking_send(event) {
                    debug!("Dropped file watch event: {}", e);
                }
            }
            Err(e) => error!("File watch error: {}", e),
        })?;

        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
        self.watchers.lock().await.push(watcher);

        tokio::spawn(async move {
            let touches_config = |event: &Event| {
                matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()))
            };

            while let Some(event) = rx.recv().await {
                debug!("File watch event: {:?} {:?}", event.kind, event.paths);
                if !touches_config(&event) {
                    continue;
                }

                // Editors often write in several steps; wait for the file to settle.
                sleep(RELOAD_DEBOUNCE).await;
                while rx.try_recv().is_ok() {}

                info!("Rule configuration file changed, reloading...");
                // Failures are logged and broadcast inside reload_into.
                let _ = Self::reload_into(&config_path, &active, &change_notifier).await;
            }
            debug!("Configuration watcher stopped");
        });

        info!("File watcher set up for hot-reloading {}", self.config_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FULL_CONFIG: &str = r#"
badword_rule:
  bad_words: [badword1, badword2]
link_blocking_rule:
  blocked_links: [discord.gg, bit.ly]
mass_mention_rule:
  max_mentions: 2
caps_rule:
  max_caps_ratio: 0.7
  min_length: 5
attachment_rule:
  blocked_filetypes: [.exe]
spam_rule:
  spam_interval: 2
  spam_threshold: 3
"#;

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFormat::from_path(Path::new("a/rules.yaml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("rules.YML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("rules.json")).unwrap(), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("rules.toml")).unwrap(), ConfigFormat::Toml);
        assert!(matches!(
            ConfigFormat::from_path(Path::new("rules.ini")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parse_error_is_distinct_from_validation_error() {
        let parse_err = ConfigFormat::Yaml.parse("badword_rule: [unclosed", "inline").unwrap_err();
        assert!(matches!(parse_err, ConfigError::Parse { .. }));

        let validation_err = ConfigFormat::Yaml
            .parse("caps_rule:\n  max_caps_ratio: 3.0\n", "inline")
            .unwrap_err();
        assert!(matches!(validation_err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_empty_document_configures_nothing() {
        let rules = ConfigFormat::Yaml.parse("   \n", "inline").unwrap();
        assert_eq!(rules, RuleSet::default());
    }

    #[test]
    fn test_null_document_configures_nothing() {
        for content in ["~\n", "null\n", "---\n~\n"] {
            let rules = ConfigFormat::Yaml.parse(content, "inline").unwrap();
            assert_eq!(rules, RuleSet::default(), "yaml {:?}", content);
        }
        let rules = ConfigFormat::Json.parse("null", "inline").unwrap();
        assert_eq!(rules, RuleSet::default());

        // Anything else that is not a mapping is still a parse error
        assert!(matches!(
            ConfigFormat::Yaml.parse("- badword_rule\n", "inline"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_render_round_trips_through_every_format() {
        let rules = ConfigFormat::Yaml.parse(FULL_CONFIG, "inline").unwrap();

        for format in [ConfigFormat::Yaml, ConfigFormat::Json, ConfigFormat::Toml] {
            let rendered = format.render(&rules).unwrap();
            let reparsed = format.parse(&rendered, "rendered").unwrap();
            assert_eq!(reparsed, rules, "format {:?}", format);
        }
    }

    #[tokio::test]
    async fn test_initialize_creates_default_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config").join("automod_config.yaml");
        let manager = ConfigurationManager::new(&path);

        manager.initialize().await.unwrap();

        assert!(path.exists());
        assert_eq!(*manager.get_active_ruleset(), RuleSet::starter());
    }

    #[tokio::test]
    async fn test_reload_replaces_rules_wholesale() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("automod_config.yaml");
        std::fs::write(&path, FULL_CONFIG).unwrap();

        let manager = ConfigurationManager::new(&path);
        manager.reload().await.unwrap();
        assert_eq!(manager.get_active_ruleset().enabled_count(), 6);

        std::fs::write(&path, "spam_rule:\n  spam_interval: 10\n  spam_threshold: 3\n").unwrap();
        manager.reload().await.unwrap();

        let rules = manager.get_active_ruleset();
        assert!(rules.bad_word.is_none());
        assert_eq!(rules.spam.as_ref().unwrap().max_messages, 3);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_rules() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("automod_config.yaml");
        std::fs::write(&path, FULL_CONFIG).unwrap();

        let manager = ConfigurationManager::new(&path);
        manager.reload().await.unwrap();
        let before = manager.get_active_ruleset();
        let mut changes = manager.subscribe_to_changes();

        std::fs::write(&path, "mass_mention_rule:\n  max_mentions: -4\n").unwrap();
        let err = manager.reload().await.unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert_eq!(manager.get_active_ruleset(), before);

        match changes.recv().await.unwrap() {
            ConfigChangeEvent::ValidationError { file, .. } => assert_eq!(file, "automod_config.yaml"),
            other => panic!("unexpected event {:?}", other),
        }

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(manager.reload().await.unwrap_err(), ConfigError::Io { .. }));
        assert_eq!(manager.get_active_ruleset(), before);
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("automod_config.yaml");
        std::fs::write(&path, FULL_CONFIG).unwrap();

        let manager = ConfigurationManager::new(&path);
        manager.reload().await.unwrap();
        let first = manager.get_active_ruleset();
        manager.reload().await.unwrap();
        let second = manager.get_active_ruleset();

        assert_eq!(first, second);
        // Snapshots are replaced, not mutated in place.
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_save_ruleset_backs_up_and_publishes() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("automod_config.yaml");
        std::fs::write(&path, FULL_CONFIG).unwrap();

        let manager = ConfigurationManager::new(&path);
        manager.reload().await.unwrap();

        let mut rules = (*manager.get_active_ruleset()).clone();
        rules.mass_mention = Some(MassMentionRule { max_mentions: 9 });
        manager.save_ruleset(rules.clone()).await.unwrap();

        assert_eq!(*manager.get_active_ruleset(), rules);
        assert_eq!(ConfigurationManager::load_file(&path).await.unwrap(), rules);

        let backups: Vec<_> = std::fs::read_dir(temp_dir.path().join("backups"))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .collect();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].file_name().to_string_lossy().ends_with(".tar.gz"));
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_rules() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("automod_config.yaml");
        let manager = ConfigurationManager::new(&path);

        let mut rules = RuleSet::starter();
        rules.caps = Some(CapsRule {
            max_ratio: 2.0,
            min_length: 10,
        });

        assert!(matches!(
            manager.save_ruleset(rules).await.unwrap_err(),
            ConfigError::Validation(_)
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_watcher_reloads_on_file_change() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("automod_config.yaml");
        std::fs::write(&path, "badword_rule:\n  bad_words: [before]\n").unwrap();

        let manager = ConfigurationManager::new(&path);
        manager.initialize().await.unwrap();
        let mut changes = manager.subscribe_to_changes();

        fs::write(&path, "badword_rule:\n  bad_words: [after]\n").await.unwrap();

        let reloaded = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match changes.recv().await {
                    Ok(ConfigChangeEvent::RulesReloaded { file }) => return file,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("change channel closed: {}", e),
                }
            }
        })
        .await
        .expect("no reload after the rule file changed");

        assert_eq!(reloaded, "automod_config.yaml");
        let rules = manager.get_active_ruleset();
        let words = &rules.bad_word.as_ref().unwrap().words;
        assert!(words.contains("after"));
        assert!(!words.contains("before"));
    }

    #[tokio::test]
    async fn test_json_config_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("rules.json");
        std::fs::write(&path, r#"{"raid_rule": {"join_window": 30, "max_joins": 8}}"#).unwrap();

        let manager = ConfigurationManager::new(&path);
        manager.reload().await.unwrap();

        let raid = manager.get_active_ruleset().raid.clone().unwrap();
        assert_eq!(raid.window_seconds, 30);
        assert_eq!(raid.max_joins, 8);
    }
}
