use anyhow::Result;
use serde::Serialize;

use crate::commands::{CommandReport, open_session};
use crate::reorg::schema::{
    ApiCompatibilityReport, CollectionValidationReport, api_compatibility, validate_collection,
};
use crate::reorg::store::DocumentStore;

#[derive(Serialize)]
struct ValidateData<'a> {
    validation: &'a CollectionValidationReport,
    api: &'a ApiCompatibilityReport,
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Defaults to the drift collection.
    pub collection: Option<String>,
}

pub fn run(opts: &ValidateOptions) -> Result<CommandReport> {
    let session = open_session()?;
    session.store.ping()?;
    let collection = opts
        .collection
        .clone()
        .unwrap_or_else(|| session.config.reorganize.drift_collection.clone());
    let max_reported = session.config.validation.max_reported;
    let mut report = CommandReport::new("validate");

    let validation = validate_collection(&session.store, &collection, &session.schema, max_reported)?;
    let api = api_compatibility(
        &session.store,
        &collection,
        &session.config.reorganize.api_required_fields,
        max_reported,
    )?;

    report.detail(format!(
        "{collection}: {}/{} valid ({}%)",
        validation.valid_documents, validation.total_documents, validation.valid_percentage
    ));
    for (document, errors) in &validation.errors_by_document {
        report.issue(format!("{document}: {}", errors.join("; ")));
    }
    if validation.truncated {
        report.detail(format!(
            "showing {} of {} invalid documents",
            validation.errors_by_document.len(),
            validation.invalid_documents
        ));
    }
    if api.compatible {
        report.detail("api_compatible=true");
    } else {
        for (document, missing) in &api.missing_by_document {
            report.issue(format!("{document}: api fields missing {}", missing.join(",")));
        }
    }

    report.attach(&ValidateData {
        validation: &validation,
        api: &api,
    })?;
    Ok(report)
}
