use async_trait::async_trait;
use loan_portal::config::CatalogConfig;
use loan_portal::error::AppError;
use loan_portal::workflows::origination::{
    ApplicationFilter, ApplicationId, ApplicationRecord, ApplicationStore, PatchOutcome,
    ProgramCatalog, RecordUpdate, StoreError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local application store. Patches go through [`ApplicationRecord::apply`], so only the
/// named field changes and replays are ignored.
#[derive(Default, Clone)]
pub(crate) struct InMemoryApplicationStore {
    records: Arc<Mutex<HashMap<ApplicationId, ApplicationRecord>>>,
}

impl InMemoryApplicationStore {
    fn guard(&self) -> Result<MutexGuard<'_, HashMap<ApplicationId, ApplicationRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("application store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        let mut guard = self.guard()?;
        if guard.contains_key(record.application_id()) {
            return Err(StoreError::Conflict);
        }
        guard.insert(record.application_id().clone(), record);
        Ok(())
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.guard()?.get(id).cloned())
    }

    async fn apply(
        &self,
        id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError> {
        let mut guard = self.guard()?;
        let record = guard.get_mut(id).ok_or(StoreError::NotFound)?;
        if record.apply(update)? == PatchOutcome::AlreadyApplied {
            debug!(application_id = %id.0, "replayed update ignored");
        }
        Ok(record.clone())
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(self
            .guard()?
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }
}

/// Built-in programs unless a JSON catalog file is configured.
pub(crate) fn load_catalog(config: &CatalogConfig) -> Result<ProgramCatalog, AppError> {
    match &config.path {
        Some(path) => {
            let file = File::open(path)?;
            let catalog = ProgramCatalog::from_json_reader(BufReader::new(file))?;
            info!(path = %path.display(), programs = catalog.programs().len(), "loaded program catalog");
            Ok(catalog)
        }
        None => Ok(ProgramCatalog::standard()),
    }
}
