use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::workflows::origination::{
    Actor, ActorRole, ApplicationFilter, ApplicationId, ApplicationRecord, ApplicationStore,
    DocumentStatus, FileRef, HistoryAction, HistoryEntry, LoanApplicationService, LoanProgram,
    OfficeAccessPolicy, OfficeContext, ProgramCatalog, ProgramId, RecordUpdate, RetryPolicy,
    StoreError,
};

pub(super) const BORROWER_ID: &str = "borrower-1";
pub(super) const BROKER_ID: &str = "broker-7";

pub(super) fn borrower() -> Actor {
    Actor::new(BORROWER_ID, ActorRole::Borrower)
}

pub(super) fn other_borrower() -> Actor {
    Actor::new("borrower-2", ActorRole::Borrower)
}

pub(super) fn broker() -> Actor {
    Actor::new(BROKER_ID, ActorRole::Broker)
}

pub(super) fn other_broker() -> Actor {
    Actor::new("broker-9", ActorRole::Broker)
}

pub(super) fn workforce() -> Actor {
    Actor::new("underwriter-3", ActorRole::Workforce)
}

pub(super) fn admin() -> Actor {
    Actor::new("admin-1", ActorRole::Admin)
}

pub(super) fn program(id: &str) -> LoanProgram {
    ProgramCatalog::standard()
        .resolve(&ProgramId::new(id))
        .cloned()
        .expect("program in standard catalog")
}

pub(super) fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        attempt_timeout: Duration::from_secs(1),
    }
}

pub(super) type MemoryService = LoanApplicationService<MemoryStore, OfficeAccessPolicy>;

pub(super) fn build_service() -> (MemoryService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    (service_with_store(store.clone()), store)
}

pub(super) fn service_with_store<S>(store: Arc<S>) -> LoanApplicationService<S, OfficeAccessPolicy>
where
    S: ApplicationStore + 'static,
{
    LoanApplicationService::with_retry_policy(
        Arc::new(ProgramCatalog::standard()),
        store,
        Arc::new(OfficeAccessPolicy),
        fast_retry(2),
    )
}

/// Draft started by the broker on behalf of [`BORROWER_ID`].
pub(super) async fn brokered_draft<S>(
    service: &LoanApplicationService<S, OfficeAccessPolicy>,
    program_id: &str,
) -> ApplicationRecord
where
    S: ApplicationStore + 'static,
{
    service
        .create_application(
            &ProgramId::new(program_id),
            &broker(),
            Some(BORROWER_ID.to_string()),
        )
        .await
        .expect("draft created")
}

/// Plausible value for a wizard field; typed to satisfy the program extension payloads.
pub(super) fn field_value(field: &str) -> Value {
    match field {
        "fullName" => json!("Dana Whitfield"),
        "email" => json!("dana@example.com"),
        "liquidAssets" => json!(250000),
        "totalLiabilities" => json!(40000),
        "creditScore" => json!(741),
        "propertyAddress" => json!("18 Harbor Way, Portland ME"),
        "propertyType" => json!("single_family"),
        "estimatedValue" => json!(420000),
        "businessName" => json!("Whitfield Holdings LLC"),
        "entityType" => json!("llc"),
        "ein" => json!("12-3456789"),
        "yearsInBusiness" => json!(6),
        "annualRevenue" => json!(1200000),
        "netIncome" => json!(180000),
        "loanAmount" => json!(300000),
        "loanPurpose" => json!("working capital"),
        "monthlyRent" => json!(3200),
        "purchasePrice" => json!(310000),
        "rehabBudget" => json!(65000),
        "afterRepairValue" => json!(450000),
        "exitStrategy" => json!("sale"),
        "landCost" => json!(120000),
        "constructionBudget" => json!(400000),
        "drawSchedule" => json!([
            { "description": "Foundation", "amount": 100000.0 },
            { "description": "Framing", "amount": 150000.0 }
        ]),
        "builderName" => json!("Coastline Builders"),
        "projectedCompletion" => json!("2027-06-30"),
        "termMonths" => json!(18),
        "vendorName" => json!("Acme Machine Tools"),
        "equipmentDescription" => json!("5-axis CNC mill"),
        "contractAmount" => json!(900000),
        "awardingAgency" => json!("County DOT"),
        "mobilizationAmount" => json!(90000),
        "employer" => json!("Harbor Logistics"),
        "annualIncome" => json!(145000),
        "acreage" => json!(12.5),
        "zoning" => json!("AG-1"),
        "intendedUse" => json!("vineyard"),
        _ => json!("provided"),
    }
}

pub(super) fn filled_payload(program: &LoanProgram, section: &str) -> Value {
    let group = program.field_group(section).expect("group exists");
    let fields = group
        .required_fields
        .iter()
        .map(|field| (field.clone(), field_value(field)))
        .collect::<Map<String, Value>>();
    Value::Object(fields)
}

/// Fills every field group as the broker.
pub(super) async fn fill_all_sections<S>(
    service: &LoanApplicationService<S, OfficeAccessPolicy>,
    application_id: &ApplicationId,
    program: &LoanProgram,
) where
    S: ApplicationStore + 'static,
{
    for group in &program.field_groups {
        service
            .update_section(
                application_id,
                &group.key,
                filled_payload(program, &group.key),
                &broker(),
            )
            .await
            .expect("section saved");
    }
}

pub(super) async fn upload_required<S>(
    service: &LoanApplicationService<S, OfficeAccessPolicy>,
    application_id: &ApplicationId,
    program: &LoanProgram,
) where
    S: ApplicationStore + 'static,
{
    for item in program.checklist.iter().filter(|item| item.required) {
        service
            .upload_document(
                application_id,
                &item.document_type,
                FileRef(format!("uploads/{}/{}.pdf", application_id.0, item.document_type)),
                &broker(),
            )
            .await
            .expect("document uploaded");
    }
}

/// In-memory draft built without the service, for pure progress and checklist checks.
pub(super) fn draft_record(program: &LoanProgram) -> ApplicationRecord {
    ApplicationRecord::new(
        ApplicationId("loan-test".to_string()),
        program.id.clone(),
        OfficeContext::Broker,
        BORROWER_ID.to_string(),
        Some(BROKER_ID.to_string()),
        program.checklist.iter().map(DocumentStatus::from_template),
        HistoryEntry {
            sequence: 1,
            timestamp: Utc::now(),
            actor: broker().reference(),
            action: HistoryAction::Created {
                program_id: program.id.clone(),
            },
        },
    )
}

#[derive(Default)]
pub(super) struct MemoryStore {
    records: Mutex<BTreeMap<ApplicationId, ApplicationRecord>>,
}

impl MemoryStore {
    pub(super) fn len(&self) -> usize {
        self.records.lock().expect("lock").len()
    }

    pub(super) fn snapshot(&self, id: &ApplicationId) -> Option<ApplicationRecord> {
        self.records.lock().expect("lock").get(id).cloned()
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("lock");
        if records.contains_key(record.application_id()) {
            return Err(StoreError::Conflict);
        }
        records.insert(record.application_id().clone(), record);
        Ok(())
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.records.lock().expect("lock").get(id).cloned())
    }

    async fn apply(
        &self,
        id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError> {
        let mut records = self.records.lock().expect("lock");
        let record = records.get_mut(id).ok_or(StoreError::NotFound)?;
        record.apply(update)?;
        Ok(record.clone())
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .expect("lock")
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }
}

/// Fails the first `failures` calls of any kind, then behaves like [`MemoryStore`].
pub(super) struct FlakyStore {
    pub(super) inner: MemoryStore,
    failures: AtomicU32,
    pub(super) calls: AtomicU32,
}

impl FlakyStore {
    pub(super) fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryStore::default(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    fn trip(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ApplicationStore for FlakyStore {
    async fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.insert(record).await
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        self.trip()?;
        self.inner.fetch(id).await
    }

    async fn apply(
        &self,
        id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError> {
        self.trip()?;
        self.inner.apply(id, update).await
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.trip()?;
        self.inner.list(filter).await
    }
}

/// Persists every patch but drops the acknowledgement of the first one.
#[derive(Default)]
pub(super) struct LostAckStore {
    pub(super) inner: MemoryStore,
    dropped: AtomicU32,
}

#[async_trait]
impl ApplicationStore for LostAckStore {
    async fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        self.inner.insert(record).await
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        self.inner.fetch(id).await
    }

    async fn apply(
        &self,
        id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError> {
        let record = self.inner.apply(id, update).await?;
        if self.dropped.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StoreError::Timeout);
        }
        Ok(record)
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.inner.list(filter).await
    }
}

/// Persists the first insert but reports it as timed out.
#[derive(Default)]
pub(super) struct LostInsertAckStore {
    pub(super) inner: MemoryStore,
    dropped: AtomicU32,
}

#[async_trait]
impl ApplicationStore for LostInsertAckStore {
    async fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        self.inner.insert(record).await?;
        if self.dropped.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StoreError::Timeout);
        }
        Ok(())
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        self.inner.fetch(id).await
    }

    async fn apply(
        &self,
        id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError> {
        self.inner.apply(id, update).await
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.inner.list(filter).await
    }
}

/// Yields to the scheduler before every read and write, so joined callers interleave.
#[derive(Default)]
pub(super) struct InterleavingStore {
    pub(super) inner: MemoryStore,
}

#[async_trait]
impl ApplicationStore for InterleavingStore {
    async fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        self.inner.insert(record).await
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.fetch(id).await
    }

    async fn apply(
        &self,
        id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError> {
        tokio::task::yield_now().await;
        self.inner.apply(id, update).await
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.inner.list(filter).await
    }
}

/// Serves `reads` fetches, then reports the store as down for reads. Writes keep working.
pub(super) struct ReadBudgetStore {
    pub(super) inner: MemoryStore,
    reads: AtomicU32,
}

impl ReadBudgetStore {
    pub(super) fn with_reads(reads: u32) -> Self {
        Self {
            inner: MemoryStore::default(),
            reads: AtomicU32::new(reads),
        }
    }
}

#[async_trait]
impl ApplicationStore for ReadBudgetStore {
    async fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        self.inner.insert(record).await
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        self.reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .map_err(|_| StoreError::Unavailable("read replica down".to_string()))?;
        self.inner.fetch(id).await
    }

    async fn apply(
        &self,
        id: &ApplicationId,
        update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError> {
        self.inner.apply(id, update).await
    }

    async fn list(&self, filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.inner.list(filter).await
    }
}

pub(super) struct UnavailableStore;

#[async_trait]
impl ApplicationStore for UnavailableStore {
    async fn insert(&self, _record: ApplicationRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("primary down".to_string()))
    }

    async fn fetch(&self, _id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        Err(StoreError::Unavailable("primary down".to_string()))
    }

    async fn apply(
        &self,
        _id: &ApplicationId,
        _update: RecordUpdate,
    ) -> Result<ApplicationRecord, StoreError> {
        Err(StoreError::Unavailable("primary down".to_string()))
    }

    async fn list(&self, _filter: &ApplicationFilter) -> Result<Vec<ApplicationRecord>, StoreError> {
        Err(StoreError::Unavailable("primary down".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}
