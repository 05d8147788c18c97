use anyhow::Result;
use std::env;

use crate::commands::{CommandReport, build_id, open_session};
use crate::reorg::config::resolve_config_path;
use crate::reorg::marker::read_marker;
use crate::reorg::store::DocumentStore;

include!(concat!(env!("OUT_DIR"), "/reorg_env_allowlist.rs"));

/// `REORG_*` variables this binary reads that are set in the environment.
pub fn env_overrides() -> Vec<String> {
    GENERATED_REORG_ENV_ALLOWLIST
        .iter()
        .filter(|key| env::var_os(key).is_some())
        .map(|key| (*key).to_string())
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let session = open_session()?;
    let paths = &session.paths;
    let config = &session.config;
    let mut report = CommandReport::new("status");

    report.detail(format!("reorg_home={}", paths.reorg_home.display()));
    report.detail(format!("store_dir={}", paths.store_dir.display()));
    report.detail(format!("backups_dir={}", paths.backups_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("config_path={}", resolve_config_path(paths).display()));
    report.detail(format!("build_id={}", build_id()));
    report.detail(format!("database={}", config.store.database));
    report.detail(format!(
        "target_collections={}",
        config.reorganize.target_collections.join(",")
    ));
    report.detail(format!("drift_collection={}", config.reorganize.drift_collection));
    report.detail(format!("backup_keep={}", config.backup.keep));

    let overrides = env_overrides();
    if overrides.is_empty() {
        report.detail("env_overrides=none");
    } else {
        report.detail(format!("env_overrides={}", overrides.join(",")));
    }

    if !paths.backups_dir.exists() {
        report.detail("backups_dir=missing (created by the first backup)");
    }

    if let Err(err) = session.store.ping() {
        report.issue(format!("store unreachable: {err:#}"));
        return Ok(report);
    }
    match read_marker(&session.store)? {
        Some(marker) => {
            report.detail(format!(
                "marker=present version={} completed_at={} build_id={}",
                marker.version,
                marker.completed_at_display(),
                marker.build_id
            ));
            report.attach(&marker.to_json())?;
        }
        None => report.detail("marker=absent"),
    }

    Ok(report)
}
