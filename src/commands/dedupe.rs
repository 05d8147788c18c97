use anyhow::Result;

use crate::commands::{CommandReport, open_session};
use crate::reorg::audit;
use crate::reorg::dedupe::remove;
use crate::reorg::store::DocumentStore;

#[derive(Debug, Clone, Default)]
pub struct DedupeOptions {
    pub dry_run: bool,
}

pub fn run(opts: &DedupeOptions) -> Result<CommandReport> {
    let mut session = open_session()?;
    session.store.ping()?;
    let settings = &session.config.reorganize;
    let mut report = CommandReport::new("dedupe");

    let outcome = remove(
        &mut session.store,
        &settings.drift_collection,
        &settings.identity_fields,
        opts.dry_run,
    )?;
    let verb = if opts.dry_run { "would remove" } else { "removed" };
    report.detail(format!("duplicate_groups={}", outcome.duplicate_groups));
    for group in &outcome.groups {
        report.detail(format!(
            "keep {} {verb} [{}]",
            group.survivor,
            group.removed.join(", ")
        ));
    }
    for err in &outcome.errors {
        report.issue(err.clone());
    }
    if !opts.dry_run {
        audit::append_event(
            &session.paths,
            "deduplicate",
            if outcome.success() { "ok" } else { "partial" },
            &format!(
                "groups={} removed={}",
                outcome.duplicate_groups, outcome.documents_removed
            ),
        )?;
    }
    report.attach(&outcome)?;
    Ok(report)
}
