use std::cmp::Reverse;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::access::{AccessDecision, AccessPolicy, Action, Resource};
use super::catalog::{DocumentGate, LoanProgram, ProgramCatalog};
use super::checklist::{ChecklistError, ChecklistSummary, DocumentStatus, FileRef, ReviewDecision};
use super::domain::{
    Actor, ActorRole, ApplicationFilter, ApplicationId, ApplicationRecord, ApplicationStatus,
    FieldPatch, HistoryAction, HistoryEntry, OfficeContext, ProgramId, RecordUpdate,
    RequiredFields, NOTES_SECTION,
};
use super::export::{write_progress_csv, ExportError};
use super::extension::ExtensionError;
use super::progress::{compute_progress, is_present, ProgressSnapshot};
use super::retry::{with_retry, RetryPolicy};
use super::store::{ApplicationStore, StoreError};
use super::views::{ApplicationSummary, ApplicationView};

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_application_id() -> ApplicationId {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("loan-{id:06}"))
}

/// Hands out history sequence numbers in acceptance order.
///
/// Sequences are microsecond timestamps bumped past the previous value, so they stay unique and
/// increasing across restarts as long as the wall clock does not run backwards.
#[derive(Debug, Default)]
struct HistoryClock {
    last: AtomicU64,
}

impl HistoryClock {
    fn tick(&self) -> (u64, DateTime<Utc>) {
        let now = Utc::now();
        let micros = u64::try_from(now.timestamp_micros()).unwrap_or_default();
        let previous = match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(micros.max(last + 1))
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        (micros.max(previous + 1), now)
    }
}

/// Loan application workflow: creation, section writes, status and document transitions.
pub struct LoanApplicationService<S, P> {
    catalog: Arc<ProgramCatalog>,
    store: Arc<S>,
    access: Arc<P>,
    retry: RetryPolicy,
    clock: HistoryClock,
}

impl<S, P> LoanApplicationService<S, P>
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    pub fn new(catalog: Arc<ProgramCatalog>, store: Arc<S>, access: Arc<P>) -> Self {
        Self::with_retry_policy(catalog, store, access, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        catalog: Arc<ProgramCatalog>,
        store: Arc<S>,
        access: Arc<P>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            store,
            access,
            retry,
            clock: HistoryClock::default(),
        }
    }

    pub fn catalog(&self) -> &ProgramCatalog {
        &self.catalog
    }

    /// Active program lookup.
    pub fn program(&self, program_id: &ProgramId) -> Result<&LoanProgram, OriginationError> {
        self.catalog
            .get(program_id)
            .map_err(|_| OriginationError::InvalidProgram(program_id.0.clone()))
    }

    /// Starts a draft for `program_id`. Borrower linkage follows the actor's office: borrowers
    /// apply for themselves, brokers and workforce staff name the borrower, and broker-originated
    /// applications carry the broker's id.
    pub async fn create_application(
        &self,
        program_id: &ProgramId,
        actor: &Actor,
        borrower_id: Option<String>,
    ) -> Result<ApplicationRecord, OriginationError> {
        let program = self.program(program_id)?;
        self.authorize(actor, &Action::CreateApplication, &Resource::Program(program))?;

        let borrower_id = borrower_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        let (borrower_id, broker_id) = match actor.office_context {
            OfficeContext::Borrower => match borrower_id {
                Some(other) if other != actor.id => {
                    return Err(OriginationError::Validation(
                        "borrowers can only start applications for themselves".to_string(),
                    ))
                }
                _ => (actor.id.clone(), None),
            },
            OfficeContext::Broker => (
                require_borrower(borrower_id)?,
                Some(actor.id.clone()),
            ),
            OfficeContext::Workforce => (require_borrower(borrower_id)?, None),
        };

        let entry = self.entry(
            actor,
            HistoryAction::Created {
                program_id: program.id.clone(),
            },
        );
        let record = ApplicationRecord::new(
            next_application_id(),
            program.id.clone(),
            actor.office_context,
            borrower_id,
            broker_id,
            program.checklist.iter().map(DocumentStatus::from_template),
            entry,
        );

        let store = self.store.as_ref();
        let candidate = record.clone();
        match with_retry(&self.retry, "insert", move || store.insert(candidate.clone())).await {
            Ok(()) => {}
            Err(StoreError::Conflict) => self.confirm_insert(&record).await?,
            Err(error) => return Err(store_error(record.application_id(), error)),
        }

        info!(
            application_id = %record.application_id().0,
            program = %program.id.0,
            office = actor.office_context.label(),
            "application created"
        );
        Ok(record)
    }

    pub async fn get(&self, application_id: &ApplicationId) -> Result<ApplicationRecord, OriginationError> {
        let store = self.store.as_ref();
        with_retry(&self.retry, "fetch", move || store.fetch(application_id))
            .await
            .map_err(|error| store_error(application_id, error))?
            .ok_or_else(|| OriginationError::application_not_found(application_id))
    }

    /// Record, progress, checklist and navigation as seen from the actor's office.
    pub async fn view(
        &self,
        application_id: &ApplicationId,
        actor: &Actor,
    ) -> Result<ApplicationView, OriginationError> {
        let record = self.get(application_id).await?;
        self.authorize(actor, &Action::ViewApplication, &Resource::Application(&record))?;
        self.view_of(record, actor)
    }

    /// View of a record the actor already holds, such as the result of a write. No store read.
    pub fn view_of(
        &self,
        record: ApplicationRecord,
        actor: &Actor,
    ) -> Result<ApplicationView, OriginationError> {
        let program = self.program_for(&record)?;
        Ok(ApplicationView::build(record, program, actor.office_context))
    }

    pub async fn progress(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ProgressSnapshot, OriginationError> {
        let record = self.get(application_id).await?;
        let program = self.program_for(&record)?;
        Ok(compute_progress(&record, program))
    }

    /// Writes one section. Other sections are never touched.
    pub async fn update_section(
        &self,
        application_id: &ApplicationId,
        section: &str,
        payload: Value,
        actor: &Actor,
    ) -> Result<ApplicationRecord, OriginationError> {
        let record = self.get(application_id).await?;
        let program = self.program_for(&record)?;

        if !program.accepts_section(section) {
            return Err(OriginationError::InvalidSection {
                section: section.to_string(),
                program_id: program.id.0.clone(),
            });
        }

        let kind = program.field_group(section).map(|group| group.kind);
        self.authorize(
            actor,
            &Action::EditSection { section, kind },
            &Resource::Application(&record),
        )?;
        ensure_open(&record)?;
        validate_payload(program, section, &payload)?;
        let while_status = completeness_hold(&record, program, section, &payload)?;

        let update = RecordUpdate {
            patch: FieldPatch::Section {
                key: section.to_string(),
                payload,
                while_status,
            },
            entry: self.entry(
                actor,
                HistoryAction::SectionUpdated {
                    section: section.to_string(),
                },
            ),
        };
        let updated = self.apply(application_id, update).await?;

        debug!(application_id = %application_id.0, section, actor = %actor.id, "section updated");
        Ok(updated)
    }

    /// Moves the application along its status machine.
    pub async fn transition_status(
        &self,
        application_id: &ApplicationId,
        next: ApplicationStatus,
        actor: &Actor,
    ) -> Result<ApplicationRecord, OriginationError> {
        let record = self.get(application_id).await?;
        let program = self.program_for(&record)?;
        self.authorize(
            actor,
            &Action::TransitionStatus { to: next },
            &Resource::Application(&record),
        )?;

        let current = record.status();
        if !current.can_transition_to(next) {
            return Err(OriginationError::InvalidTransition(format!(
                "application {} cannot move from {} to {}",
                application_id.0,
                current.label(),
                next.label()
            )));
        }

        let complete = if next == ApplicationStatus::Submitted {
            ensure_submittable(&record, program)?;
            program.submission_fields()
        } else {
            RequiredFields::new()
        };

        let update = RecordUpdate {
            patch: FieldPatch::Status {
                expected: current,
                next,
                complete,
            },
            entry: self.entry(actor, HistoryAction::StatusChanged { from: current, to: next }),
        };
        let updated = self.apply(application_id, update).await?;

        info!(
            application_id = %application_id.0,
            from = current.label(),
            to = next.label(),
            actor = %actor.id,
            "application status changed"
        );
        Ok(updated)
    }

    /// Records an uploaded file against a checklist entry, moving it to pending review.
    pub async fn upload_document(
        &self,
        application_id: &ApplicationId,
        document_type: &str,
        file_ref: FileRef,
        actor: &Actor,
    ) -> Result<ApplicationRecord, OriginationError> {
        let record = self.get(application_id).await?;
        self.authorize(
            actor,
            &Action::UploadDocument { document_type },
            &Resource::Application(&record),
        )?;
        ensure_open(&record)?;

        let current = document_on(&record, document_type)?;
        let next = current.uploaded(file_ref)?;
        let update = RecordUpdate {
            entry: self.entry(
                actor,
                HistoryAction::DocumentUploaded {
                    document_type: document_type.to_string(),
                    version: next.version,
                },
            ),
            patch: FieldPatch::Document {
                expected: current.state,
                status: next,
            },
        };
        let updated = self.apply(application_id, update).await?;

        debug!(application_id = %application_id.0, document_type, actor = %actor.id, "document uploaded");
        Ok(updated)
    }

    /// Approves or rejects a pending document. Workforce and admin actors only.
    pub async fn review_document(
        &self,
        application_id: &ApplicationId,
        document_type: &str,
        decision: ReviewDecision,
        actor: &Actor,
    ) -> Result<ApplicationRecord, OriginationError> {
        let record = self.get(application_id).await?;
        self.authorize(
            actor,
            &Action::ReviewDocument { document_type },
            &Resource::Application(&record),
        )?;
        ensure_open(&record)?;

        let current = document_on(&record, document_type)?;
        let (sequence, timestamp) = self.clock.tick();
        let next = current.reviewed(&decision, actor, timestamp)?;
        let update = RecordUpdate {
            entry: HistoryEntry {
                sequence,
                timestamp,
                actor: actor.reference(),
                action: HistoryAction::DocumentReviewed {
                    document_type: document_type.to_string(),
                    outcome: next.state,
                },
            },
            patch: FieldPatch::Document {
                expected: current.state,
                status: next,
            },
        };
        let updated = self.apply(application_id, update).await?;

        info!(
            application_id = %application_id.0,
            document_type,
            outcome = decision.outcome().label(),
            reviewer = %actor.id,
            "document reviewed"
        );
        Ok(updated)
    }

    /// Dashboard rows visible to `actor`, most recently updated first.
    pub async fn applications_for(
        &self,
        actor: &Actor,
    ) -> Result<Vec<ApplicationSummary>, OriginationError> {
        let records = self.visible_records(actor).await?;
        let mut summaries = records
            .iter()
            .filter_map(|record| {
                self.catalog
                    .resolve(record.program_id())
                    .map(|program| ApplicationSummary::build(record, program, actor.office_context))
            })
            .collect::<Vec<_>>();
        summaries.sort_by_key(|summary| Reverse(summary.updated_at));
        Ok(summaries)
    }

    /// CSV progress report over every application. Staff only.
    pub async fn export_progress<W: Write>(
        &self,
        actor: &Actor,
        writer: W,
    ) -> Result<usize, OriginationError> {
        self.authorize(actor, &Action::ExportReport, &Resource::Portfolio)?;
        let mut records = self.visible_records(actor).await?;
        records.sort_by(|a, b| a.application_id().cmp(b.application_id()));
        write_progress_csv(writer, &self.catalog, &records)?;
        Ok(records.len())
    }

    /// Settles an insert that reported a conflict. A retried insert whose first attempt landed
    /// finds its own record, recognised by the creation entry's sequence.
    async fn confirm_insert(&self, record: &ApplicationRecord) -> Result<(), OriginationError> {
        let stored = self.get(record.application_id()).await?;
        let created = |record: &ApplicationRecord| {
            record.history().entries().first().map(|entry| entry.sequence)
        };
        if created(&stored) == created(record) {
            debug!(application_id = %record.application_id().0, "insert already landed");
            return Ok(());
        }
        Err(store_error(record.application_id(), StoreError::Conflict))
    }

    async fn visible_records(&self, actor: &Actor) -> Result<Vec<ApplicationRecord>, OriginationError> {
        let filter = match actor.role {
            ActorRole::Borrower => ApplicationFilter::Borrower(actor.id.clone()),
            ActorRole::Broker => ApplicationFilter::Broker(actor.id.clone()),
            ActorRole::Workforce | ActorRole::Admin => ApplicationFilter::All,
        };
        let store = self.store.as_ref();
        let filter = &filter;
        with_retry(&self.retry, "list", move || store.list(filter))
            .await
            .map_err(|error| OriginationError::TransientIo(error.to_string()))
    }

    async fn apply(
        &self,
        application_id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, OriginationError> {
        let store = self.store.as_ref();
        with_retry(&self.retry, "apply", move || {
            store.apply(application_id, update.clone())
        })
        .await
        .map_err(|error| store_error(application_id, error))
    }

    fn program_for(&self, record: &ApplicationRecord) -> Result<&LoanProgram, OriginationError> {
        self.catalog
            .resolve(record.program_id())
            .ok_or_else(|| OriginationError::InvalidProgram(record.program_id().0.clone()))
    }

    fn authorize(
        &self,
        actor: &Actor,
        action: &Action<'_>,
        resource: &Resource<'_>,
    ) -> Result<(), OriginationError> {
        match self.access.authorize(actor, action, resource) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(reason) => Err(OriginationError::Forbidden(reason)),
        }
    }

    fn entry(&self, actor: &Actor, action: HistoryAction) -> HistoryEntry {
        let (sequence, timestamp) = self.clock.tick();
        HistoryEntry {
            sequence,
            timestamp,
            actor: actor.reference(),
            action,
        }
    }
}

fn require_borrower(borrower_id: Option<String>) -> Result<String, OriginationError> {
    borrower_id.ok_or_else(|| {
        OriginationError::Validation(
            "a borrower id is required when applying on a borrower's behalf".to_string(),
        )
    })
}

fn ensure_open(record: &ApplicationRecord) -> Result<(), OriginationError> {
    if record.status().is_terminal() {
        return Err(OriginationError::InvalidTransition(format!(
            "application {} is {} and can no longer change",
            record.application_id().0,
            record.status().label()
        )));
    }
    Ok(())
}

fn document_on<'a>(
    record: &'a ApplicationRecord,
    document_type: &str,
) -> Result<&'a DocumentStatus, OriginationError> {
    record
        .document(document_type)
        .ok_or_else(|| OriginationError::NotFound {
            entity: "document",
            id: format!("{document_type} on application {}", record.application_id().0),
        })
}

fn validate_payload(
    program: &LoanProgram,
    section: &str,
    payload: &Value,
) -> Result<(), OriginationError> {
    if section == NOTES_SECTION {
        return match payload {
            Value::Null => Err(OriginationError::Validation(
                "notes cannot be null".to_string(),
            )),
            _ => Ok(()),
        };
    }

    if !payload.is_object() {
        return Err(OriginationError::Validation(format!(
            "section {section} must be a JSON object"
        )));
    }

    if let Some(extension) = program.extension {
        if extension.section_key() == section {
            extension.parse(payload)?;
        }
    }

    Ok(())
}

/// Once submitted, a required group may be rewritten but never left incomplete. Writes that leave
/// one incomplete are held to the draft status, checked again when the write lands.
fn completeness_hold(
    record: &ApplicationRecord,
    program: &LoanProgram,
    section: &str,
    payload: &Value,
) -> Result<Option<ApplicationStatus>, OriginationError> {
    let Some(group) = program.field_group(section).filter(|group| !group.optional) else {
        return Ok(None);
    };
    let leaves_gap = group
        .required_fields
        .iter()
        .any(|field| !is_present(payload.get(field.as_str())));
    if !leaves_gap {
        return Ok(None);
    }
    if record.status() != ApplicationStatus::Draft {
        return Err(OriginationError::InvalidTransition(format!(
            "section {section} must stay complete while application {} is {}",
            record.application_id().0,
            record.status().label()
        )));
    }
    Ok(Some(ApplicationStatus::Draft))
}

fn ensure_submittable(
    record: &ApplicationRecord,
    program: &LoanProgram,
) -> Result<(), OriginationError> {
    let progress = compute_progress(record, program);
    if !progress.required_sections_complete {
        let pending = progress
            .sections
            .iter()
            .filter(|section| !section.optional && !section.is_complete())
            .map(|section| section.section.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(OriginationError::InvalidTransition(format!(
            "application is {:.1}% complete; incomplete sections: {pending}",
            progress.overall_percent
        )));
    }

    let checklist = ChecklistSummary::from_documents(&program.checklist, record.documents());
    let blocking = match program.submission.documents {
        DocumentGate::NotRequired => Vec::new(),
        DocumentGate::RequiredUploaded => checklist.missing_required,
        DocumentGate::RequiredApproved => checklist.outstanding_required,
    };
    if !blocking.is_empty() {
        return Err(OriginationError::InvalidTransition(format!(
            "required documents outstanding: {}",
            blocking.join(", ")
        )));
    }

    Ok(())
}

fn store_error(application_id: &ApplicationId, error: StoreError) -> OriginationError {
    match error {
        StoreError::NotFound => OriginationError::application_not_found(application_id),
        StoreError::Conflict => OriginationError::InvalidTransition(format!(
            "application {} already exists",
            application_id.0
        )),
        StoreError::PatchRejected(rejection) => {
            OriginationError::InvalidTransition(rejection.to_string())
        }
        StoreError::Unavailable(_) | StoreError::Timeout => {
            OriginationError::TransientIo(error.to_string())
        }
    }
}

/// Error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidProgram,
    InvalidSection,
    InvalidTransition,
    Forbidden,
    Validation,
    TransientIo,
    Internal,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidProgram => "invalid_program",
            Self::InvalidSection => "invalid_section",
            Self::InvalidTransition => "invalid_transition",
            Self::Forbidden => "forbidden",
            Self::Validation => "validation_error",
            Self::TransientIo => "transient_io",
            Self::Internal => "internal",
        }
    }

    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientIo)
    }
}

/// Error raised by the loan application service.
#[derive(Debug, thiserror::Error)]
pub enum OriginationError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("loan program {0} is unknown or retired")]
    InvalidProgram(String),
    #[error("section {section} is not part of program {program_id}")]
    InvalidSection { section: String, program_id: String },
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("persistence unavailable: {0}")]
    TransientIo(String),
    #[error("report output failed: {0}")]
    Report(String),
}

impl OriginationError {
    fn application_not_found(application_id: &ApplicationId) -> Self {
        Self::NotFound {
            entity: "application",
            id: application_id.0.clone(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidProgram(_) => ErrorKind::InvalidProgram,
            Self::InvalidSection { .. } => ErrorKind::InvalidSection,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Validation(_) => ErrorKind::Validation,
            Self::TransientIo(_) => ErrorKind::TransientIo,
            Self::Report(_) => ErrorKind::Internal,
        }
    }
}

impl From<ChecklistError> for OriginationError {
    fn from(error: ChecklistError) -> Self {
        match error {
            ChecklistError::InvalidTransition { .. } => Self::InvalidTransition(error.to_string()),
            ChecklistError::ReviewerNotPermitted { .. } => Self::Forbidden(error.to_string()),
            ChecklistError::MissingFile(_) => Self::Validation(error.to_string()),
        }
    }
}

impl From<ExtensionError> for OriginationError {
    fn from(error: ExtensionError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<ExportError> for OriginationError {
    fn from(error: ExportError) -> Self {
        match error {
            ExportError::UnknownProgram { program_id, .. } => Self::InvalidProgram(program_id),
            ExportError::Csv(_) | ExportError::Io(_) => Self::Report(error.to_string()),
        }
    }
}
