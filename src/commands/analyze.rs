use anyhow::Result;

use crate::commands::{CommandReport, open_session};
use crate::reorg::analysis::{AnalysisInput, analyze};
use crate::reorg::store::DocumentStore;

pub fn run() -> Result<CommandReport> {
    let session = open_session()?;
    session.store.ping()?;
    let settings = &session.config.reorganize;
    let mut report = CommandReport::new("analyze");

    let analysis = analyze(
        &session.store,
        &AnalysisInput {
            targets: &settings.target_collections,
            drift_collection: &settings.drift_collection,
            identity_fields: &settings.identity_fields,
            schema: &session.schema,
            sample_size: settings.sample_size,
        },
    )?;

    report.detail(format!("database={}", analysis.database));
    for (collection, count) in &analysis.collection_counts {
        report.detail(format!("count.{collection}={count}"));
    }
    report.detail(format!(
        "sampled={} from {}",
        analysis.sampled_documents, analysis.drift_collection
    ));
    for (field, count) in &analysis.legacy_field_usage {
        report.detail(format!("legacy.{field}={count}"));
    }
    for line in &analysis.recommendations {
        report.detail(format!("recommendation: {line}"));
    }
    report.attach(&analysis)?;
    Ok(report)
}
