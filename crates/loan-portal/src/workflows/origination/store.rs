use async_trait::async_trait;

use super::domain::{
    ApplicationFilter, ApplicationId, ApplicationRecord, PatchRejection, RecordUpdate,
};

/// Document-persistence collaborator.
///
/// `apply` must write only the field named by the update's patch together with its history
/// entry, so concurrent writers on different sections or documents never clobber each other.
/// Implementations can delegate to [`ApplicationRecord::apply`], which also makes re-applying an
/// already recorded update a no-op.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError>;

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError>;

    async fn apply(
        &self,
        id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError>;

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    PatchRejected(#[from] PatchRejection),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out")]
    Timeout,
}

impl StoreError {
    /// Failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout)
    }
}
