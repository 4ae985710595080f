use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::cache::DEFAULT_FLUSH_EVERY;
use crate::existence::{
    CheckOptions, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_THRESHOLD, DEFAULT_EXISTENCE_WORKERS,
    UnresolvedPolicy,
};
use crate::generate::{DEFAULT_COLLAPSIBLE_THRESHOLD, GeneratorOptions};
use crate::sync::{DEFAULT_CONTENT_WORKERS, SyncOptions};

pub const DEFAULT_USER_AGENT: &str = "realmwiki/0.2";
pub const DEFAULT_EDIT_SUMMARY: &str = "Edited by Spongybot! :D";
pub const DEFAULT_EXISTENCE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONTENT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RealmWikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub edit_summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub collapsible_threshold: Option<i32>,
    pub batch_threshold: Option<usize>,
    pub batch_size: Option<usize>,
    pub existence_workers: Option<usize>,
    pub content_workers: Option<usize>,
    pub existence_timeout_ms: Option<u64>,
    pub content_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub unresolved: Option<String>,
    pub cache_flush_every: Option<usize>,
}

impl RealmWikiConfig {
    /// env REALMWIKI_API_URL > config > None.
    pub fn api_url(&self) -> Option<String> {
        env_override("REALMWIKI_API_URL").or_else(|| {
            self.wiki
                .api_url
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        })
    }

    /// env REALMWIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("REALMWIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// env REALMWIKI_EDIT_SUMMARY > config > DEFAULT_EDIT_SUMMARY.
    pub fn edit_summary(&self) -> String {
        env_override("REALMWIKI_EDIT_SUMMARY")
            .or_else(|| self.wiki.edit_summary.clone())
            .unwrap_or_else(|| DEFAULT_EDIT_SUMMARY.to_string())
    }

    pub fn collapsible_threshold(&self) -> i32 {
        self.sync
            .collapsible_threshold
            .unwrap_or(DEFAULT_COLLAPSIBLE_THRESHOLD)
    }

    pub fn existence_timeout_ms(&self) -> u64 {
        self.sync
            .existence_timeout_ms
            .unwrap_or(DEFAULT_EXISTENCE_TIMEOUT_MS)
    }

    pub fn content_timeout_ms(&self) -> u64 {
        self.sync
            .content_timeout_ms
            .unwrap_or(DEFAULT_CONTENT_TIMEOUT_MS)
    }

    pub fn write_timeout_ms(&self) -> u64 {
        self.sync.write_timeout_ms.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS)
    }

    pub fn cache_flush_every(&self) -> usize {
        self.sync.cache_flush_every.unwrap_or(DEFAULT_FLUSH_EVERY)
    }

    pub fn unresolved_policy(&self) -> Result<UnresolvedPolicy> {
        match self.sync.unresolved.as_deref() {
            Some(value) => value
                .parse()
                .context("invalid [sync].unresolved in config"),
            None => Ok(UnresolvedPolicy::default()),
        }
    }

    pub fn check_options(&self) -> Result<CheckOptions> {
        Ok(CheckOptions {
            batch_threshold: self.sync.batch_threshold.unwrap_or(DEFAULT_BATCH_THRESHOLD),
            batch_size: self.sync.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
            workers: self
                .sync
                .existence_workers
                .unwrap_or(DEFAULT_EXISTENCE_WORKERS)
                .max(1),
            unresolved: self.unresolved_policy()?,
            force_recheck: false,
        })
    }

    pub fn sync_options(&self) -> Result<SyncOptions> {
        Ok(SyncOptions {
            generator: GeneratorOptions {
                collapsible_threshold: self.collapsible_threshold(),
            },
            check: self.check_options()?,
            content_workers: self
                .sync
                .content_workers
                .unwrap_or(DEFAULT_CONTENT_WORKERS)
                .max(1),
            edit_summary: self.edit_summary(),
        })
    }
}

/// Load and parse a RealmWikiConfig from a TOML file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<RealmWikiConfig> {
    if !config_path.exists() {
        return Ok(RealmWikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: RealmWikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct WikiConfigPatch {
    pub set_api_url: Option<String>,
    pub set_edit_summary: Option<String>,
}

/// Update selected keys under `[wiki]` while preserving all other config sections
/// and keys. Returns `true` when a write occurred.
pub fn patch_wiki_config(config_path: &Path, patch: &WikiConfigPatch) -> Result<bool> {
    if patch.set_api_url.is_none() && patch.set_edit_summary.is_none() {
        return Ok(false);
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;
    let wiki_entry = root_table
        .entry("wiki".to_string())
        .or_insert_with(|| Value::Table(Default::default()));
    let wiki_table = wiki_entry
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[wiki] must be a table in {}", config_path.display()))?;

    if let Some(api_url) = &patch.set_api_url {
        wiki_table.insert("api_url".to_string(), Value::String(api_url.clone()));
    }
    if let Some(summary) = &patch.set_edit_summary {
        wiki_table.insert("edit_summary".to_string(), Value::String(summary.clone()));
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
