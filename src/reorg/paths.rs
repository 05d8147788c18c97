use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ReorgPaths {
    pub reorg_home: PathBuf,
    pub store_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub logs_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<ReorgPaths> {
    let reorg_home = match env::var("REORG_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".plan-reorg"),
    };

    let store_dir = env_or_default_path("REORG_STORE_DIR", reorg_home.join("store"));
    let backups_dir = env_or_default_path("REORG_BACKUP_DIR", reorg_home.join("backups"));
    let logs_dir = env_or_default_path("REORG_LOGS_DIR", reorg_home.join("logs"));

    Ok(ReorgPaths {
        reorg_home,
        store_dir,
        backups_dir,
        logs_dir,
    })
}

#[cfg(test)]
pub fn test_paths(root: &std::path::Path) -> ReorgPaths {
    ReorgPaths {
        reorg_home: root.join("reorg"),
        store_dir: root.join("reorg/store"),
        backups_dir: root.join("reorg/backups"),
        logs_dir: root.join("reorg/logs"),
    }
}
