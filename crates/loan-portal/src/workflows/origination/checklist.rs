//! Per-document review lifecycle keyed by the program's checklist template.
//!
//! `not_submitted -> pending_review` happens on upload, `pending_review -> approved | rejected`
//! only through a staff review, and `rejected -> pending_review` on resubmission. An approved
//! document is final for its version.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::ChecklistItem;
use super::domain::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    NotSubmitted,
    PendingReview,
    Approved,
    Rejected,
}

impl DocumentState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotSubmitted => "not_submitted",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub const fn accepts_upload(self) -> bool {
        matches!(self, Self::NotSubmitted | Self::Rejected)
    }
}

/// Opaque pointer into the external file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ReviewDecision {
    pub const fn outcome(&self) -> DocumentState {
        match self {
            ReviewDecision::Approve => DocumentState::Approved,
            ReviewDecision::Reject { .. } => DocumentState::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub document_type: String,
    pub label: String,
    pub required: bool,
    pub state: DocumentState,
    /// Bumped on every upload.
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl DocumentStatus {
    pub fn from_template(item: &ChecklistItem) -> Self {
        Self {
            document_type: item.document_type.clone(),
            label: item.label.clone(),
            required: item.required,
            state: DocumentState::NotSubmitted,
            version: 0,
            file_ref: None,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
        }
    }

    /// Next status after a file lands in storage.
    pub fn uploaded(&self, file_ref: FileRef) -> Result<Self, ChecklistError> {
        if !self.state.accepts_upload() {
            return Err(ChecklistError::InvalidTransition {
                document_type: self.document_type.clone(),
                from: self.state,
                to: DocumentState::PendingReview,
            });
        }
        if file_ref.0.trim().is_empty() {
            return Err(ChecklistError::MissingFile(self.document_type.clone()));
        }

        Ok(Self {
            state: DocumentState::PendingReview,
            version: self.version + 1,
            file_ref: Some(file_ref),
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            ..self.clone()
        })
    }

    /// Next status after a staff review. Owners may never review their own documents.
    pub fn reviewed(
        &self,
        decision: &ReviewDecision,
        reviewer: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Self, ChecklistError> {
        if !reviewer.role.is_staff() {
            return Err(ChecklistError::ReviewerNotPermitted {
                document_type: self.document_type.clone(),
                actor_id: reviewer.id.clone(),
            });
        }

        let outcome = decision.outcome();
        if self.state != DocumentState::PendingReview {
            return Err(ChecklistError::InvalidTransition {
                document_type: self.document_type.clone(),
                from: self.state,
                to: outcome,
            });
        }
        if self.file_ref.is_none() {
            return Err(ChecklistError::MissingFile(self.document_type.clone()));
        }

        let rejection_reason = match decision {
            ReviewDecision::Approve => None,
            ReviewDecision::Reject { reason } => reason.clone(),
        };

        Ok(Self {
            state: outcome,
            reviewed_by: Some(reviewer.id.clone()),
            reviewed_at: Some(at),
            rejection_reason,
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecklistError {
    #[error("document {document_type} cannot move from {} to {}", .from.label(), .to.label())]
    InvalidTransition {
        document_type: String,
        from: DocumentState,
        to: DocumentState,
    },
    #[error("actor {actor_id} may not review document {document_type}")]
    ReviewerNotPermitted {
        document_type: String,
        actor_id: String,
    },
    #[error("document {0} has no stored file")]
    MissingFile(String),
}

/// Rollup of an application's checklist for dashboards and the submission gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChecklistSummary {
    pub total: usize,
    pub required: usize,
    pub not_submitted: usize,
    pub pending_review: usize,
    pub approved: usize,
    pub rejected: usize,
    /// Required document types not yet approved, in checklist order.
    pub outstanding_required: Vec<String>,
    /// Required document types with no file awaiting or passing review.
    pub missing_required: Vec<String>,
}

impl ChecklistSummary {
    pub fn from_documents(
        template: &[ChecklistItem],
        documents: &BTreeMap<String, DocumentStatus>,
    ) -> Self {
        let mut summary = ChecklistSummary::default();

        for item in template {
            let state = documents
                .get(&item.document_type)
                .map(|document| document.state)
                .unwrap_or(DocumentState::NotSubmitted);

            summary.total += 1;
            if item.required {
                summary.required += 1;
            }
            match state {
                DocumentState::NotSubmitted => summary.not_submitted += 1,
                DocumentState::PendingReview => summary.pending_review += 1,
                DocumentState::Approved => summary.approved += 1,
                DocumentState::Rejected => summary.rejected += 1,
            }
            if item.required && state != DocumentState::Approved {
                summary.outstanding_required.push(item.document_type.clone());
            }
            if item.required && state.accepts_upload() {
                summary.missing_required.push(item.document_type.clone());
            }
        }

        summary
    }
}
