use anyhow::Result;

use crate::commands::{CommandReport, build_id, open_session};
use crate::reorg::orchestrator::{ReorgContext, ReorgOptions, RunState, reorganize};

#[derive(Debug, Clone, Default)]
pub struct ReorganizeOptions {
    pub force: bool,
    pub dry_run: bool,
}

pub fn run(opts: &ReorganizeOptions) -> Result<CommandReport> {
    let mut session = open_session()?;
    let mut report = CommandReport::new("reorganize");

    let ctx = ReorgContext {
        paths: &session.paths,
        config: &session.config,
        schema: &session.schema,
        build_id: build_id(),
    };
    let outcome = reorganize(
        &mut session.store,
        &ctx,
        ReorgOptions {
            force: opts.force,
            dry_run: opts.dry_run,
        },
    )?;

    if outcome.already_reorganized {
        report.detail(format!(
            "already reorganized at {}; pass --force to run again",
            outcome.completed_at.as_deref().unwrap_or("unknown")
        ));
        report.attach(&outcome)?;
        return Ok(report);
    }

    report.detail(format!("stage_reached={}", outcome.stage_reached.as_str()));
    if let Some(manifest) = &outcome.manifest_path {
        report.detail(format!("manifest={manifest}"));
    }
    if let Some(analysis) = &outcome.analysis {
        for line in &analysis.recommendations {
            report.detail(format!("analysis: {line}"));
        }
    }
    if let Some(dedupe) = &outcome.dedupe {
        report.detail(format!(
            "dedupe: groups={} removed={}{}",
            dedupe.duplicate_groups,
            dedupe.documents_removed,
            if dedupe.dry_run { " (dry run)" } else { "" }
        ));
    }
    if let Some(migration) = &outcome.migration {
        report.detail(format!(
            "migrate: changed={} written={} write_errors={}{}",
            migration.changed,
            migration.written,
            migration.write_errors,
            if migration.dry_run { " (dry run)" } else { "" }
        ));
    }
    if let Some(validation) = &outcome.validation {
        report.detail(format!(
            "validate: {}/{} valid",
            validation.valid_documents, validation.total_documents
        ));
    }
    for failure in &outcome.backup_failures {
        report.issue(format!("backup failed: {failure}"));
    }
    if outcome.state == RunState::Failed {
        report.issue(format!(
            "reorganization failed at {}: {}",
            outcome.stage_reached.as_str(),
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    } else if !opts.dry_run {
        report.detail(format!(
            "completed_at={}",
            outcome.completed_at.as_deref().unwrap_or("unknown")
        ));
    }

    report.attach(&outcome)?;
    Ok(report)
}
