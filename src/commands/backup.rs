use anyhow::Result;

use crate::commands::{CommandReport, open_session};
use crate::reorg::audit;
use crate::reorg::snapshot::{ManifestEntry, backup, backup_many};
use crate::reorg::store::DocumentStore;

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Empty means every target collection, with a manifest.
    pub collections: Vec<String>,
}

pub fn run(opts: &BackupOptions) -> Result<CommandReport> {
    let session = open_session()?;
    session.store.ping()?;
    let paths = &session.paths;
    let mut report = CommandReport::new("backup");

    if opts.collections.is_empty() {
        let outcome = backup_many(
            &session.store,
            &paths.backups_dir,
            &session.config.reorganize.target_collections,
        )?;
        for (collection, entry) in &outcome.manifest.collections {
            match entry {
                ManifestEntry::Archived(archived) => report.detail(format!(
                    "{collection}: {} documents -> {}",
                    archived.metadata.document_count, archived.archive_path
                )),
                ManifestEntry::Failed(failed) => {
                    report.issue(format!("{collection}: {}", failed.error))
                }
            }
        }
        report.detail(format!("manifest={}", outcome.manifest_path.display()));
        audit::append_event(
            paths,
            "backup",
            if outcome.manifest.all_succeeded() { "ok" } else { "partial" },
            &format!(
                "successful={} total={}",
                outcome.manifest.successful_backups, outcome.manifest.total_collections
            ),
        )?;
        report.attach(&outcome.manifest)?;
        return Ok(report);
    }

    for collection in &opts.collections {
        match backup(&session.store, &paths.backups_dir, collection, None) {
            Ok(out) => report.detail(format!(
                "{collection}: {} documents -> {}",
                out.metadata.document_count,
                out.archive_path.display()
            )),
            Err(err) => report.issue(format!("{collection}: {err:#}")),
        }
    }
    audit::append_event(
        paths,
        "backup",
        if report.ok { "ok" } else { "partial" },
        &format!("collections={}", opts.collections.join(",")),
    )?;
    Ok(report)
}
