use std::io::Write;

use serde::Serialize;

use super::catalog::ProgramCatalog;
use super::checklist::ChecklistSummary;
use super::domain::ApplicationRecord;
use super::progress::compute_progress;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("application {application_id} references unknown program {program_id}")]
    UnknownProgram {
        application_id: String,
        program_id: String,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct ProgressRow<'a> {
    application_id: &'a str,
    program_id: &'a str,
    office_context: &'static str,
    status: &'static str,
    borrower_id: &'a str,
    broker_id: &'a str,
    overall_percent: String,
    next_incomplete_section: &'a str,
    outstanding_documents: String,
    history_entries: usize,
    updated_at: String,
}

/// Writes one CSV row per application with its derived progress, for reporting tools.
pub fn write_progress_csv<W: Write>(
    writer: W,
    catalog: &ProgramCatalog,
    records: &[ApplicationRecord],
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for record in records {
        let program = catalog
            .resolve(record.program_id())
            .ok_or_else(|| ExportError::UnknownProgram {
                application_id: record.application_id().0.clone(),
                program_id: record.program_id().0.clone(),
            })?;
        let progress = compute_progress(record, program);
        let checklist = ChecklistSummary::from_documents(&program.checklist, record.documents());

        csv_writer.serialize(ProgressRow {
            application_id: &record.application_id().0,
            program_id: &record.program_id().0,
            office_context: record.office_context.label(),
            status: record.status().label(),
            borrower_id: &record.borrower_id,
            broker_id: record.broker_id.as_deref().unwrap_or_default(),
            overall_percent: format!("{:.1}", progress.overall_percent),
            next_incomplete_section: progress.next_incomplete_section.as_deref().unwrap_or_default(),
            outstanding_documents: checklist.outstanding_required.join(";"),
            history_entries: record.history().len(),
            updated_at: record.updated_at().to_rfc3339(),
        })?;
    }

    csv_writer.flush()?;
    Ok(())
}
