use anyhow::{Result, bail};
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::reorg::paths::resolve_paths;
use crate::reorg::snapshot::{VerificationReport, list, verify};

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub archive: Option<PathBuf>,
    pub all: bool,
}

fn record(report: &mut CommandReport, result: &VerificationReport) {
    if result.is_valid {
        report.detail(format!(
            "{}: ok ({} documents)",
            result.archive_path,
            result.actual_document_count.unwrap_or_default()
        ));
    } else {
        report.issue(format!(
            "{}: {}",
            result.archive_path,
            result.verification_errors.join("; ")
        ));
    }
}

pub fn run(opts: &VerifyOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("verify");

    let targets = match (&opts.archive, opts.all) {
        (Some(path), false) => vec![path.clone()],
        (None, true) => {
            let paths = resolve_paths()?;
            list(&paths.backups_dir, None)?
                .into_iter()
                .map(|summary| PathBuf::from(summary.archive_path))
                .collect()
        }
        _ => bail!("pass exactly one of <ARCHIVE> or --all"),
    };

    let results = targets.iter().map(|path| verify(path)).collect::<Vec<_>>();
    for result in &results {
        record(&mut report, result);
    }
    if results.is_empty() {
        report.detail("no archives found");
    }
    report.attach(&results)?;
    Ok(report)
}
