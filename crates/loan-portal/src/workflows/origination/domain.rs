use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::checklist::{DocumentState, DocumentStatus};
use super::progress::is_present;

/// Section key reserved for freeform notes. Always writable, never scored.
pub const NOTES_SECTION: &str = "notes";

/// Required field keys per section key.
pub type RequiredFields = BTreeMap<String, Vec<String>>;

/// Identifier wrapper for loan applications.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Catalog key for a loan program, e.g. `DSCR`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramId(pub String);

impl ProgramId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

/// Originating channel of an application, and the office an actor works in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfficeContext {
    Borrower,
    Broker,
    Workforce,
}

impl OfficeContext {
    pub const fn ordered() -> [Self; 3] {
        [Self::Borrower, Self::Broker, Self::Workforce]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Borrower => "borrower",
            Self::Broker => "broker",
            Self::Workforce => "workforce",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Borrower,
    Broker,
    Workforce,
    Admin,
}

impl ActorRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Borrower => "borrower",
            Self::Broker => "broker",
            Self::Workforce => "workforce",
            Self::Admin => "admin",
        }
    }

    /// The only office a role may act from.
    pub const fn home_office(self) -> OfficeContext {
        match self {
            Self::Borrower => OfficeContext::Borrower,
            Self::Broker => OfficeContext::Broker,
            Self::Workforce | Self::Admin => OfficeContext::Workforce,
        }
    }

    pub const fn is_staff(self) -> bool {
        matches!(self, Self::Workforce | Self::Admin)
    }
}

/// Caller descriptor supplied by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
    pub office_context: OfficeContext,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
            office_context: role.home_office(),
        }
    }

    pub fn reference(&self) -> ActorRef {
        ActorRef {
            id: self.id.clone(),
            role: self.role,
        }
    }
}

/// Actor identity as captured in audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: String,
    pub role: ActorRole,
}

/// Application lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Declined,
    Funded,
    Cancelled,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Funded => "funded",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Funded | Self::Declined | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use ApplicationStatus::*;

        matches!(
            (self, next),
            (Draft, Submitted)
                | (Submitted, UnderReview)
                | (UnderReview, Approved)
                | (UnderReview, Declined)
                | (Approved, Funded)
                | (Draft | Submitted | UnderReview, Cancelled)
        )
    }
}

/// Audited operation kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryAction {
    Created {
        program_id: ProgramId,
    },
    SectionUpdated {
        section: String,
    },
    StatusChanged {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    DocumentUploaded {
        document_type: String,
        version: u32,
    },
    DocumentReviewed {
        document_type: String,
        outcome: DocumentState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Acceptance order assigned by the service.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: ActorRef,
    pub action: HistoryAction,
}

/// Append-only audit log ordered by acceptance sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.entries
            .binary_search_by_key(&sequence, |entry| entry.sequence)
            .is_ok()
    }

    /// Inserts by sequence so late writes still land in acceptance order.
    /// Returns `false` when the sequence is already recorded.
    fn append(&mut self, entry: HistoryEntry) -> bool {
        match self
            .entries
            .binary_search_by_key(&entry.sequence, |existing| existing.sequence)
        {
            Ok(_) => false,
            Err(position) => {
                self.entries.insert(position, entry);
                true
            }
        }
    }
}

/// Persisted loan application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    application_id: ApplicationId,
    program_id: ProgramId,
    pub office_context: OfficeContext,
    pub borrower_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
    status: ApplicationStatus,
    sections: BTreeMap<String, Value>,
    documents: BTreeMap<String, DocumentStatus>,
    history: HistoryLog,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApplicationRecord {
    /// New draft carrying the creation entry and one `not_submitted` slot per checklist item.
    pub fn new(
        application_id: ApplicationId,
        program_id: ProgramId,
        office_context: OfficeContext,
        borrower_id: String,
        broker_id: Option<String>,
        documents: impl IntoIterator<Item = DocumentStatus>,
        created: HistoryEntry,
    ) -> Self {
        let timestamp = created.timestamp;
        let mut history = HistoryLog::default();
        history.append(created);

        Self {
            application_id,
            program_id,
            office_context,
            borrower_id,
            broker_id,
            status: ApplicationStatus::Draft,
            sections: BTreeMap::new(),
            documents: documents
                .into_iter()
                .map(|document| (document.document_type.clone(), document))
                .collect(),
            history,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn application_id(&self) -> &ApplicationId {
        &self.application_id
    }

    pub fn program_id(&self) -> &ProgramId {
        &self.program_id
    }

    pub fn status(&self) -> ApplicationStatus {
        self.status
    }

    pub fn sections(&self) -> &BTreeMap<String, Value> {
        &self.sections
    }

    pub fn section(&self, key: &str) -> Option<&Value> {
        self.sections.get(key)
    }

    pub fn documents(&self) -> &BTreeMap<String, DocumentStatus> {
        &self.documents
    }

    pub fn document(&self, document_type: &str) -> Option<&DocumentStatus> {
        self.documents.get(document_type)
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_owned_by(&self, actor_id: &str) -> bool {
        self.borrower_id == actor_id
    }

    pub fn is_brokered_by(&self, actor_id: &str) -> bool {
        self.broker_id.as_deref() == Some(actor_id)
    }

    /// Applies one field patch together with the history entry documenting it.
    ///
    /// Only the patched field changes. An update whose sequence is already in the
    /// history is treated as applied, which keeps store-level retries idempotent.
    pub fn apply(&mut self, update: RecordUpdate) -> Result<PatchOutcome, PatchRejection> {
        let RecordUpdate { patch, entry } = update;

        if self.history.contains(entry.sequence) {
            return Ok(PatchOutcome::AlreadyApplied);
        }

        match patch {
            FieldPatch::Section {
                key,
                payload,
                while_status,
            } => {
                if let Some(expected) = while_status {
                    if self.status != expected {
                        return Err(PatchRejection::StatusChanged {
                            expected,
                            found: self.status,
                        });
                    }
                }
                self.sections.insert(key, payload);
            }
            FieldPatch::Document { expected, status } => {
                let current = self
                    .documents
                    .get(&status.document_type)
                    .map(|document| document.state)
                    .ok_or_else(|| PatchRejection::UnknownDocument(status.document_type.clone()))?;
                if current != expected {
                    return Err(PatchRejection::DocumentChanged {
                        document_type: status.document_type,
                        expected,
                        found: current,
                    });
                }
                self.documents.insert(status.document_type.clone(), status);
            }
            FieldPatch::Status {
                expected,
                next,
                complete,
            } => {
                if self.status != expected {
                    return Err(PatchRejection::StatusChanged {
                        expected,
                        found: self.status,
                    });
                }
                let incomplete = self.incomplete_sections(&complete);
                if !incomplete.is_empty() {
                    return Err(PatchRejection::IncompleteSections(incomplete));
                }
                self.status = next;
            }
        }

        if entry.timestamp > self.updated_at {
            self.updated_at = entry.timestamp;
        }
        self.history.append(entry);

        Ok(PatchOutcome::Applied)
    }

    /// Sections of `required` with at least one field absent, in key order.
    pub fn incomplete_sections(&self, required: &RequiredFields) -> Vec<String> {
        required
            .iter()
            .filter(|(key, fields)| {
                let payload = self.sections.get(key.as_str());
                fields
                    .iter()
                    .any(|field| !is_present(payload.and_then(|value| value.get(field.as_str()))))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Single-field write against one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldPatch {
    Section {
        key: String,
        payload: Value,
        /// Status the application must still be in when the write lands.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        while_status: Option<ApplicationStatus>,
    },
    Document {
        expected: DocumentState,
        status: DocumentStatus,
    },
    Status {
        expected: ApplicationStatus,
        next: ApplicationStatus,
        /// Fields that must all be present when the status changes.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        complete: RequiredFields,
    },
}

/// A field patch plus its audit entry; persisted together or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub patch: FieldPatch,
    pub entry: HistoryEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    AlreadyApplied,
}

/// Guard failures detected while applying a patch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchRejection {
    #[error("application status changed (expected {}, found {})", .expected.label(), .found.label())]
    StatusChanged {
        expected: ApplicationStatus,
        found: ApplicationStatus,
    },
    #[error("document {document_type} changed (expected {}, found {})", .expected.label(), .found.label())]
    DocumentChanged {
        document_type: String,
        expected: DocumentState,
        found: DocumentState,
    },
    #[error("document {0} is not on the checklist")]
    UnknownDocument(String),
    #[error("required sections incomplete: {}", .0.join(", "))]
    IncompleteSections(Vec<String>),
}

/// Dashboard query understood by stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationFilter {
    All,
    Borrower(String),
    Broker(String),
}

impl ApplicationFilter {
    pub fn matches(&self, record: &ApplicationRecord) -> bool {
        match self {
            ApplicationFilter::All => true,
            ApplicationFilter::Borrower(id) => record.is_owned_by(id),
            ApplicationFilter::Broker(id) => record.is_brokered_by(id),
        }
    }
}
