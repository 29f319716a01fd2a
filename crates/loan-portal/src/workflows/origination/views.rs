use chrono::{DateTime, Utc};
use serde::Serialize;

use super::catalog::LoanProgram;
use super::checklist::ChecklistSummary;
use super::domain::{ApplicationId, ApplicationRecord, ApplicationStatus, OfficeContext, ProgramId};
use super::office::OfficeRoute;
use super::progress::{compute_progress, ProgressSnapshot};

/// Where the wizard sends the viewer next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Navigation {
    #[serde(flatten)]
    pub route: OfficeRoute,
    /// First incomplete wizard step, or `None` once every group is filled.
    pub next_step_path: Option<String>,
}

impl Navigation {
    pub fn new(office: OfficeContext, application_id: &ApplicationId, progress: &ProgressSnapshot) -> Self {
        let route = OfficeRoute::for_application(office, application_id);
        let next_step_path = progress
            .next_incomplete_section
            .as_deref()
            .map(|section| route.wizard_path(application_id, section));
        Self {
            route,
            next_step_path,
        }
    }
}

/// Record plus everything derived from it for a single viewer.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationView {
    pub application: ApplicationRecord,
    pub progress: ProgressSnapshot,
    pub checklist: ChecklistSummary,
    pub navigation: Navigation,
}

impl ApplicationView {
    pub fn build(record: ApplicationRecord, program: &LoanProgram, viewer: OfficeContext) -> Self {
        let progress = compute_progress(&record, program);
        let checklist = ChecklistSummary::from_documents(&program.checklist, record.documents());
        let navigation = Navigation::new(viewer, record.application_id(), &progress);
        Self {
            application: record,
            progress,
            checklist,
            navigation,
        }
    }
}

/// Dashboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationSummary {
    pub application_id: ApplicationId,
    pub program_id: ProgramId,
    pub program_name: String,
    pub status: ApplicationStatus,
    pub borrower_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    pub overall_percent: f64,
    pub next_incomplete_section: Option<String>,
    pub next_step_path: Option<String>,
    pub outstanding_documents: usize,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationSummary {
    pub fn build(record: &ApplicationRecord, program: &LoanProgram, viewer: OfficeContext) -> Self {
        let progress = compute_progress(record, program);
        let checklist = ChecklistSummary::from_documents(&program.checklist, record.documents());
        let navigation = Navigation::new(viewer, record.application_id(), &progress);

        Self {
            application_id: record.application_id().clone(),
            program_id: record.program_id().clone(),
            program_name: program.name.clone(),
            status: record.status(),
            borrower_id: record.borrower_id.clone(),
            broker_id: record.broker_id.clone(),
            overall_percent: progress.overall_percent,
            next_incomplete_section: progress.next_incomplete_section,
            next_step_path: navigation.next_step_path,
            outstanding_documents: checklist.outstanding_required.len(),
            updated_at: record.updated_at(),
        }
    }
}
