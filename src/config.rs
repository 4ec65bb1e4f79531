use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::rows::RowFormat;
use crate::sync::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "stockroom.yaml";
pub const DEFAULT_AGENT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_AGENT_MODEL: &str = "mixtral-8x7b-32768";

/// Runtime settings: YAML file first, then environment overrides.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data_dir: PathBuf,
    pub row_format: RowFormat,
    pub sync: SyncConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            row_format: RowFormat::Csv,
            sync: SyncConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 50,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_AGENT_ENDPOINT.to_string(),
            model: DEFAULT_AGENT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load `path` (or `stockroom.yaml` when it exists) and apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        cfg.apply_env(|key| env::var(key).ok())?;
        debug!(data_dir = %cfg.data_dir.display(), row_format = %cfg.row_format, "config loaded");
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {:?}", path))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STOCKROOM_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STOCKROOM_ROW_FORMAT") {
            self.row_format = v.parse().context("STOCKROOM_ROW_FORMAT")?;
        }
        if let Some(v) = lookup("STOCKROOM_AGENT_ENDPOINT") {
            self.agent.endpoint = v;
        }
        if let Some(v) = lookup("STOCKROOM_AGENT_MODEL") {
            self.agent.model = v;
        }
        if let Some(v) = lookup("GROQ_API_KEY") {
            self.agent.api_key = Some(v);
        }
        if let Some(v) = lookup("STOCKROOM_AGENT_TIMEOUT_SECS") {
            self.agent.timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("STOCKROOM_AGENT_TIMEOUT_SECS=`{}`", v))?;
        }
        Ok(())
    }

    pub fn schema_path(&self) -> PathBuf {
        self.data_dir.join("columns.json")
    }

    pub fn categories_path(&self) -> PathBuf {
        self.data_dir.join("category.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(".sync_journal.json")
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("user.csv")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync.max_attempts,
            backoff: Duration::from_millis(self.sync.backoff_ms),
        }
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }
}
