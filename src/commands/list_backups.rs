use anyhow::Result;

use crate::commands::CommandReport;
use crate::reorg::paths::resolve_paths;
use crate::reorg::snapshot::list;

#[derive(Debug, Clone, Default)]
pub struct ListBackupsOptions {
    pub collection: Option<String>,
}

pub fn run(opts: &ListBackupsOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("list-backups");

    let archives = list(&paths.backups_dir, opts.collection.as_deref())?;
    report.detail(format!("archives={}", archives.len()));
    for archive in &archives {
        if archive.readable {
            report.detail(format!(
                "{} collection={} documents={} created_at={} size={}",
                archive.file_name,
                archive.collection.as_deref().unwrap_or("?"),
                archive.document_count.unwrap_or_default(),
                archive.created_at.as_deref().unwrap_or("?"),
                archive.size_bytes
            ));
        } else {
            report.detail(format!(
                "{} unreadable: {}",
                archive.file_name,
                archive.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    report.attach(&archives)?;
    Ok(report)
}
