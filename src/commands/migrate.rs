use anyhow::Result;

use crate::commands::{CommandReport, open_session};
use crate::reorg::audit;
use crate::reorg::migrate::{MigrationOptions, migrate_collection};
use crate::reorg::store::DocumentStore;

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    pub dry_run: bool,
    pub preserve_data_only: bool,
}

pub fn run(opts: &MigrateOptions) -> Result<CommandReport> {
    let mut session = open_session()?;
    session.store.ping()?;
    let collection = session.config.reorganize.drift_collection.clone();
    let mut report = CommandReport::new("migrate");

    let outcome = migrate_collection(
        &mut session.store,
        &collection,
        &session.schema,
        MigrationOptions {
            dry_run: opts.dry_run,
            preserve_data_only: opts.preserve_data_only,
            max_reported: session.config.validation.max_reported,
        },
    )?;

    report.detail(format!(
        "total={} changed={} unchanged={} written={}",
        outcome.total_documents, outcome.changed, outcome.unchanged, outcome.written
    ));
    for diff in &outcome.diffs {
        let fields = diff
            .changes
            .iter()
            .map(|change| change.field.as_str())
            .collect::<Vec<_>>()
            .join(",");
        report.detail(format!("{}: {fields}", diff.document));
    }
    if outcome.diffs_truncated {
        report.detail("diff listing truncated");
    }
    for conflict in &outcome.conflicts {
        report.detail(format!(
            "conflict {}: {}={} kept over {}={}",
            conflict.document,
            conflict.conflict.canonical_field,
            conflict.conflict.canonical_value,
            conflict.conflict.legacy_field,
            conflict.conflict.legacy_value
        ));
    }
    for failure in &outcome.coercion_failures {
        report.detail(format!("coercion: {failure}"));
    }
    for err in &outcome.errors {
        report.issue(err.clone());
    }
    if let Some(validation) = &outcome.validation
        && validation.invalid_documents > 0
    {
        report.issue(format!(
            "{} of {} documents still fail validation",
            validation.invalid_documents, validation.total_documents
        ));
    }

    if !opts.dry_run {
        audit::append_event(
            &session.paths,
            "migrate",
            if outcome.success { "ok" } else { "partial" },
            &format!(
                "changed={} written={} write_errors={}",
                outcome.changed, outcome.written, outcome.write_errors
            ),
        )?;
    }
    report.attach(&outcome)?;
    Ok(report)
}
