pub mod analyze;
pub mod backup;
pub mod cleanup;
pub mod dedupe;
pub mod emergency_restore;
pub mod list_backups;
pub mod migrate;
pub mod reorganize;
pub mod restore;
pub mod status;
pub mod validate;
pub mod verify;

use anyhow::Result;
use serde::Serialize;

use crate::reorg::config::{ReorgConfig, load_config};
use crate::reorg::paths::{ReorgPaths, resolve_paths};
use crate::reorg::schema::{SchemaDescription, load_schema_file, plan_schema};
use crate::reorg::store::json_dir::JsonDirStore;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
            data: None,
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// Structured payload, printed only under `--json`.
    pub fn attach(&mut self, data: &impl Serialize) -> Result<()> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(())
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// Everything a store-facing command needs, resolved from env and config.
pub struct Session {
    pub paths: ReorgPaths,
    pub config: ReorgConfig,
    pub store: JsonDirStore,
    pub schema: SchemaDescription,
}

pub fn open_session() -> Result<Session> {
    let paths = resolve_paths()?;
    let config = load_config(&paths)?;
    let store = JsonDirStore::open(&paths.store_dir, &config.store.database);
    let schema = match &config.validation.schema_path {
        Some(path) => load_schema_file(path)?,
        None => plan_schema(),
    };
    Ok(Session {
        paths,
        config,
        store,
        schema,
    })
}

pub fn build_id() -> &'static str {
    env!("BUILD_UUID")
}
