use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, open_session};
use crate::reorg::audit;
use crate::reorg::restore::{RestoreMode, restore};
use crate::reorg::store::DocumentStore;

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub archive: PathBuf,
    pub collection: Option<String>,
    pub mode: String,
}

pub fn run(opts: &RestoreOptions) -> Result<CommandReport> {
    // Parsed first so a bad mode never touches the store.
    let mode: RestoreMode = opts.mode.parse()?;
    let mut session = open_session()?;
    session.store.ping()?;
    let mut report = CommandReport::new("restore");

    let result = restore(
        &mut session.store,
        &opts.archive,
        opts.collection.as_deref(),
        mode,
    )?;
    report.detail(format!("collection={}", result.collection));
    report.detail(format!("mode={}", result.mode));
    report.detail(format!("documents_restored={}", result.documents_restored));
    report.detail(format!("inserted={} updated={}", result.inserted, result.updated));
    report.detail(format!("final_count={}", result.final_count));
    audit::append_event(
        &session.paths,
        "restore",
        "ok",
        &format!(
            "archive={} collection={} mode={} restored={}",
            result.archive_path, result.collection, result.mode, result.documents_restored
        ),
    )?;
    report.attach(&result)?;
    Ok(report)
}
