use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, open_session};
use crate::reorg::orchestrator::emergency_restore;

#[derive(Debug, Clone)]
pub struct EmergencyRestoreOptions {
    pub manifest: PathBuf,
}

pub fn run(opts: &EmergencyRestoreOptions) -> Result<CommandReport> {
    let mut session = open_session()?;
    let mut report = CommandReport::new("emergency-restore");

    let outcome = emergency_restore(&mut session.store, &session.paths, &opts.manifest)?;
    for entry in &outcome.collections {
        if entry.status == "restored" {
            report.detail(format!("{}: restored {}", entry.collection, entry.detail));
        } else {
            report.issue(format!("{}: {}", entry.collection, entry.detail));
        }
    }
    report.detail(format!(
        "successful={} failed={}",
        outcome.successful, outcome.failed
    ));
    report.detail(format!("marker_removed={}", outcome.marker_removed));
    report.attach(&outcome)?;
    Ok(report)
}
