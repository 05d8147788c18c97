use anyhow::Result;

use crate::commands::CommandReport;
use crate::reorg::audit;
use crate::reorg::config::load_config;
use crate::reorg::paths::resolve_paths;
use crate::reorg::snapshot::cleanup;

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    /// Falls back to `[backup] keep`.
    pub keep: Option<usize>,
    pub collection: Option<String>,
}

pub fn run(opts: &CleanupOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let config = load_config(&paths)?;
    let keep = opts.keep.unwrap_or(config.backup.keep);
    let mut report = CommandReport::new("cleanup");

    if keep == 0 {
        report.issue("refusing to keep zero archives; use --keep 1 or more");
        return Ok(report);
    }

    let deleted = cleanup(&paths.backups_dir, keep, opts.collection.as_deref())?;
    report.detail(format!("keep={keep}"));
    report.detail(format!("deleted={deleted}"));
    audit::append_event(
        &paths,
        "cleanup",
        "ok",
        &format!(
            "keep={keep} deleted={deleted} collection={}",
            opts.collection.as_deref().unwrap_or("*")
        ),
    )?;
    Ok(report)
}
