//! Loan application origination across the borrower, broker and workforce offices.
//!
//! A [`ProgramCatalog`] describes each loan program's wizard sections and document checklist.
//! [`LoanApplicationService`] owns the application lifecycle on top of an [`ApplicationStore`]
//! and an [`AccessPolicy`]; progress, checklist summaries and navigation are always derived from
//! the stored record, never persisted.

pub mod access;
pub mod catalog;
pub mod checklist;
pub mod domain;
pub mod export;
pub mod extension;
pub mod office;
pub mod progress;
pub mod retry;
pub mod router;
pub mod service;
pub mod store;
pub mod views;

#[cfg(test)]
mod tests;

pub use access::{AccessDecision, AccessPolicy, Action, OfficeAccessPolicy, Resource};
pub use catalog::{
    CatalogError, ChecklistItem, DocumentGate, FieldGroup, LoanProgram, ProgramCatalog,
    ProgramCategory, SectionKind, SubmissionPolicy,
};
pub use checklist::{
    ChecklistError, ChecklistSummary, DocumentState, DocumentStatus, FileRef, ReviewDecision,
};
pub use domain::{
    Actor, ActorRef, ActorRole, ApplicationFilter, ApplicationId, ApplicationRecord,
    ApplicationStatus, FieldPatch, HistoryAction, HistoryEntry, HistoryLog, OfficeContext,
    PatchOutcome, PatchRejection, ProgramId, RecordUpdate, RequiredFields, NOTES_SECTION,
};
pub use export::{write_progress_csv, ExportError};
pub use extension::{ExtensionError, ExtensionKind, ProgramExtension};
pub use office::{resolve_context, OfficeRoute, RouteSource, RoutingError};
pub use progress::{compute_progress, ProgressSnapshot, SectionProgress};
pub use retry::{with_retry, RetryPolicy};
pub use router::application_router;
pub use service::{ErrorKind, LoanApplicationService, OriginationError};
pub use store::{ApplicationStore, StoreError};
pub use views::{ApplicationSummary, ApplicationView, Navigation};
