// Daemon configuration: the queue document and where it comes from

use anyhow::{bail, Context, Result};
use eventbus_core::domain::QueueDescriptor;
use serde::Deserialize;
use std::collections::HashSet;

/// Inline YAML queue document (takes precedence over the file)
pub const CONFIG_YML_ENV: &str = "EVENTBUS_YML";
pub const CONFIG_PATH_ENV: &str = "EVENTBUS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "eventbus.yaml";
pub const RECONNECT_DELAY_ENV: &str = "EVENTBUS_RECONNECT_DELAY_MS";

/// Top-level YAML document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub queues: Vec<QueueDescriptor>,
}

impl ServerConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(doc: &str) -> Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(doc).context("Invalid queue configuration document")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the inline document if given, else from `path` (`~` expanded)
    pub fn load(inline: Option<&str>, path: &str) -> Result<Self> {
        if let Some(doc) = inline.filter(|doc| !doc.trim().is_empty()) {
            return Self::from_yaml(doc).with_context(|| format!("Loading {}", CONFIG_YML_ENV));
        }

        let path = shellexpand::tilde(path).into_owned();
        let doc = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config file {} (set {} or {})",
                path, CONFIG_YML_ENV, CONFIG_PATH_ENV
            )
        })?;
        Self::from_yaml(&doc).with_context(|| format!("Loading {}", path))
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for queue in &self.queues {
            queue
                .validate()
                .with_context(|| format!("Queue {:?} is misconfigured", queue.name))?;
            if !seen.insert(queue.name.as_str()) {
                bail!("Queue {} is configured more than once", queue.name);
            }
        }
        Ok(())
    }

    pub fn subscribed_queues(&self) -> usize {
        self.queues.iter().filter(|q| q.is_subscribed()).count()
    }
}
