use crate::error::ReorgError;
use crate::reorg::paths::ReorgPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn csv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "hosting".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorganizeConfig {
    pub target_collections: Vec<String>,
    pub drift_collection: String,
    pub identity_fields: Vec<String>,
    pub marker_version: String,
    pub api_required_fields: Vec<String>,
    pub sample_size: usize,
}

impl Default for ReorganizeConfig {
    fn default() -> Self {
        Self {
            target_collections: csv(&["plans", "categories", "pages", "settings"]),
            drift_collection: "plans".to_string(),
            identity_fields: csv(&["name", "type", "sub_type"]),
            marker_version: "2.0".to_string(),
            api_required_fields: csv(&["id", "name", "type", "price"]),
            sample_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub keep: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { keep: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_reported: usize,
    pub schema_path: Option<PathBuf>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_reported: 50,
            schema_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReorgConfig {
    pub store: StoreConfig,
    pub reorganize: ReorganizeConfig,
    pub backup: BackupConfig,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReorgConfig {
    store: Option<StoreConfig>,
    reorganize: Option<ReorganizeConfig>,
    backup: Option<BackupConfig>,
    validation: Option<ValidationConfig>,
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn env_or_path(var: &str, fallback: Option<PathBuf>) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => fallback,
    }
}

fn invalid(message: &str) -> anyhow::Error {
    ReorgError::InvalidConfig(message.to_string()).into()
}

pub fn validate(cfg: &ReorgConfig) -> Result<()> {
    if cfg.store.database.trim().is_empty() {
        return Err(invalid("store database cannot be empty"));
    }
    if cfg.reorganize.target_collections.is_empty() {
        return Err(invalid("target collections cannot be empty"));
    }
    if !cfg
        .reorganize
        .target_collections
        .contains(&cfg.reorganize.drift_collection)
    {
        return Err(invalid(&format!(
            "drift collection `{}` must be one of the target collections",
            cfg.reorganize.drift_collection
        )));
    }
    if cfg.reorganize.identity_fields.is_empty() {
        return Err(invalid("identity fields cannot be empty"));
    }
    if cfg.reorganize.sample_size == 0 {
        return Err(invalid("sample size must be >= 1"));
    }
    if cfg.backup.keep == 0 {
        return Err(invalid("backup keep must be >= 1"));
    }
    Ok(())
}

pub fn resolve_config_path(paths: &ReorgPaths) -> PathBuf {
    if let Ok(custom) = env::var("REORG_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    paths.reorg_home.join("reorg.toml")
}

fn merge_file_config(base: &mut ReorgConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: PartialReorgConfig = toml::from_str(&raw).map_err(|err| {
        ReorgError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(store) = parsed.store {
        base.store = store;
    }
    if let Some(reorganize) = parsed.reorganize {
        base.reorganize = reorganize;
    }
    if let Some(backup) = parsed.backup {
        base.backup = backup;
    }
    if let Some(validation) = parsed.validation {
        base.validation = validation;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut ReorgConfig) {
    cfg.store.database = env_or_string("REORG_DATABASE", &cfg.store.database);
    cfg.reorganize.target_collections =
        env_or_csv("REORG_TARGET_COLLECTIONS", &cfg.reorganize.target_collections);
    cfg.reorganize.drift_collection =
        env_or_string("REORG_DRIFT_COLLECTION", &cfg.reorganize.drift_collection);
    cfg.reorganize.identity_fields =
        env_or_csv("REORG_IDENTITY_FIELDS", &cfg.reorganize.identity_fields);
    cfg.backup.keep = env_or_usize("REORG_BACKUP_KEEP", cfg.backup.keep);
    cfg.validation.max_reported = env_or_usize("REORG_MAX_REPORTED", cfg.validation.max_reported);
    cfg.validation.schema_path =
        env_or_path("REORG_SCHEMA_PATH", cfg.validation.schema_path.take());
}

pub fn load_config_from(path: &Path) -> Result<ReorgConfig> {
    let mut cfg = ReorgConfig::default();
    merge_file_config(&mut cfg, path)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

pub fn load_config(paths: &ReorgPaths) -> Result<ReorgConfig> {
    load_config_from(&resolve_config_path(paths))
}
