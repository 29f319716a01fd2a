use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;

use super::common::*;
use crate::workflows::origination::{
    ApplicationStatus, DocumentState, ErrorKind, FileRef, HistoryAction, OfficeContext,
    OriginationError, ProgramId, ReviewDecision, NOTES_SECTION,
};

#[tokio::test]
async fn creating_an_application_starts_a_draft_with_the_checklist() {
    let (service, store) = build_service();
    let record = brokered_draft(&service, "DSCR").await;

    assert_eq!(record.status(), ApplicationStatus::Draft);
    assert_eq!(record.office_context, OfficeContext::Broker);
    assert_eq!(record.borrower_id, BORROWER_ID);
    assert_eq!(record.broker_id.as_deref(), Some(BROKER_ID));
    assert_eq!(record.documents().len(), 4);
    assert!(record
        .documents()
        .values()
        .all(|document| document.state == DocumentState::NotSubmitted));
    assert_eq!(record.history().len(), 1);
    assert!(record.application_id().0.starts_with("loan-"));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn unknown_program_persists_nothing() {
    let (service, store) = build_service();
    let error = service
        .create_application(&ProgramId::new("FOO"), &borrower(), None)
        .await
        .expect_err("unknown program");

    assert_eq!(error.kind(), ErrorKind::InvalidProgram);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn retired_programs_do_not_accept_new_applications() {
    let (service, store) = build_service();
    let error = service
        .create_application(&ProgramId::new("STATED_INCOME"), &borrower(), None)
        .await
        .expect_err("retired program");

    assert!(matches!(error, OriginationError::InvalidProgram(ref id) if id == "STATED_INCOME"));
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn borrower_linkage_follows_the_office() {
    let (service, _) = build_service();
    let dscr = ProgramId::new("DSCR");

    let own = service
        .create_application(&dscr, &borrower(), None)
        .await
        .expect("borrower applies for themselves");
    assert_eq!(own.borrower_id, BORROWER_ID);
    assert!(own.broker_id.is_none());

    let error = service
        .create_application(&dscr, &borrower(), Some("borrower-2".to_string()))
        .await
        .expect_err("cannot apply for someone else");
    assert_eq!(error.kind(), ErrorKind::Validation);

    let error = service
        .create_application(&dscr, &broker(), Some("  ".to_string()))
        .await
        .expect_err("broker must name a borrower");
    assert_eq!(error.kind(), ErrorKind::Validation);

    let staff = service
        .create_application(&dscr, &workforce(), Some("borrower-5".to_string()))
        .await
        .expect("workforce originates on behalf of a borrower");
    assert_eq!(staff.office_context, OfficeContext::Workforce);
    assert!(staff.broker_id.is_none());
}

#[tokio::test]
async fn dscr_progress_reports_partial_completion() {
    let (service, _) = build_service();
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    service
        .update_section(id, "personalContact", filled_payload(&dscr, "personalContact"), &broker())
        .await
        .expect("contact saved");
    service
        .update_section(
            id,
            "propertyInfo",
            json!({ "propertyAddress": "18 Harbor Way", "propertyType": "", "estimatedValue": null }),
            &borrower(),
        )
        .await
        .expect("property saved");

    let progress = service.progress(id).await.expect("progress");
    assert!((progress.overall_percent - 300.0 / 7.0).abs() < 1e-9);
    assert_eq!(progress.next_incomplete_section.as_deref(), Some("propertyInfo"));
    assert_eq!(progress.percent_for("personalContact"), Some(100.0));
    assert_eq!(progress.percent_for("dscrInfo"), Some(0.0));
}

#[tokio::test]
async fn section_writes_touch_only_their_section() {
    let (service, store) = build_service();
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    let after_property = service
        .update_section(id, "propertyInfo", filled_payload(&dscr, "propertyInfo"), &broker())
        .await
        .expect("property saved");
    assert_eq!(after_property.history().len(), 2);

    let after_contact = service
        .update_section(id, "personalContact", json!({ "fullName": "Dana" }), &borrower())
        .await
        .expect("contact saved");
    assert_eq!(after_contact.history().len(), 3);
    assert_eq!(
        after_contact.section("propertyInfo"),
        after_property.section("propertyInfo")
    );
    assert_eq!(after_contact.documents(), record.documents());
    assert_eq!(after_contact.status(), ApplicationStatus::Draft);

    let stored = store.snapshot(id).expect("persisted");
    assert_eq!(stored, after_contact);
    assert!(matches!(
        stored.history().last().map(|entry| &entry.action),
        Some(HistoryAction::SectionUpdated { section }) if section == "personalContact"
    ));
}

#[tokio::test]
async fn history_stays_in_acceptance_order() {
    let (service, _) = build_service();
    let record = brokered_draft(&service, "LAND").await;
    let id = record.application_id();

    for section in ["landInfo", "propertyInfo", NOTES_SECTION] {
        service
            .update_section(id, section, json!({ "touched": true }), &broker())
            .await
            .expect("section saved");
    }

    let stored = service.get(id).await.expect("stored");
    let sequences = stored
        .history()
        .entries()
        .iter()
        .map(|entry| entry.sequence)
        .collect::<Vec<_>>();
    assert_eq!(sequences.len(), 4);
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn unknown_sections_are_rejected() {
    let (service, store) = build_service();
    let record = brokered_draft(&service, "DSCR").await;

    let error = service
        .update_section(record.application_id(), "fixAndFlipInfo", json!({}), &broker())
        .await
        .expect_err("not a DSCR section");
    assert!(matches!(
        error,
        OriginationError::InvalidSection { ref section, ref program_id }
            if section == "fixAndFlipInfo" && program_id == "DSCR"
    ));
    assert_eq!(
        store.snapshot(record.application_id()).map(|stored| stored.history().len()),
        Some(1)
    );
}

#[tokio::test]
async fn notes_are_saved_but_never_scored() {
    let (service, _) = build_service();
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();
    let before = service.progress(id).await.expect("progress");

    let updated = service
        .update_section(id, NOTES_SECTION, json!("Borrower prefers email contact"), &broker())
        .await
        .expect("notes saved");
    assert_eq!(
        updated.section(NOTES_SECTION),
        Some(&json!("Borrower prefers email contact"))
    );
    assert_eq!(service.progress(id).await.expect("progress"), before);

    let error = service
        .update_section(id, NOTES_SECTION, serde_json::Value::Null, &broker())
        .await
        .expect_err("null notes");
    assert_eq!(error.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn extension_sections_are_validated() {
    let (service, _) = build_service();
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    let error = service
        .update_section(id, "dscrInfo", json!({ "monthlyRent": "lots" }), &broker())
        .await
        .expect_err("rent must be numeric");
    assert_eq!(error.kind(), ErrorKind::Validation);

    let error = service
        .update_section(id, "propertyInfo", json!(["18 Harbor Way"]), &broker())
        .await
        .expect_err("sections are objects");
    assert_eq!(error.kind(), ErrorKind::Validation);

    service
        .update_section(id, "dscrInfo", json!({ "monthlyRent": 3200, "loanAmount": "" }), &broker())
        .await
        .expect("partial extension payload saved");
}

#[tokio::test]
async fn staff_cannot_edit_borrower_private_sections() {
    let (service, _) = build_service();
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    let error = service
        .update_section(id, "personalContact", filled_payload(&dscr, "personalContact"), &workforce())
        .await
        .expect_err("personal section");
    assert_eq!(error.kind(), ErrorKind::Forbidden);

    service
        .update_section(id, "propertyInfo", filled_payload(&dscr, "propertyInfo"), &workforce())
        .await
        .expect("staff may correct property details");
}

#[tokio::test]
async fn outsiders_cannot_see_or_touch_an_application() {
    let (service, _) = build_service();
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    for outsider in [other_borrower(), other_broker()] {
        let error = service.view(id, &outsider).await.expect_err("not a participant");
        assert_eq!(error.kind(), ErrorKind::Forbidden);

        let error = service
            .update_section(id, "propertyInfo", json!({}), &outsider)
            .await
            .expect_err("not a participant");
        assert_eq!(error.kind(), ErrorKind::Forbidden);
    }

    let mut misplaced = borrower();
    misplaced.office_context = OfficeContext::Workforce;
    let error = service.view(id, &misplaced).await.expect_err("wrong office");
    assert_eq!(error.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn missing_applications_are_not_found() {
    let (service, _) = build_service();
    let error = service
        .view(&crate::workflows::origination::ApplicationId("loan-missing".to_string()), &admin())
        .await
        .expect_err("missing");
    assert!(matches!(error, OriginationError::NotFound { entity: "application", .. }));
}

#[tokio::test]
async fn submission_requires_every_required_section() {
    let (service, _) = build_service();
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    service
        .update_section(id, "personalContact", filled_payload(&dscr, "personalContact"), &broker())
        .await
        .expect("contact saved");
    let error = service
        .transition_status(id, ApplicationStatus::Submitted, &broker())
        .await
        .expect_err("incomplete");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    fill_all_sections(&service, id, &dscr).await;
    let submitted = service
        .transition_status(id, ApplicationStatus::Submitted, &borrower())
        .await
        .expect("complete DSCR application submits without documents");
    assert_eq!(submitted.status(), ApplicationStatus::Submitted);
    assert!(matches!(
        submitted.history().last().map(|entry| &entry.action),
        Some(HistoryAction::StatusChanged {
            from: ApplicationStatus::Draft,
            to: ApplicationStatus::Submitted
        })
    ));
}

#[tokio::test]
async fn optional_groups_do_not_block_submission() {
    let (service, _) = build_service();
    let land = program("LAND");
    let record = brokered_draft(&service, "LAND").await;
    let id = record.application_id();

    for group in land.field_groups.iter().filter(|group| !group.optional) {
        service
            .update_section(id, &group.key, filled_payload(&land, &group.key), &broker())
            .await
            .expect("section saved");
    }

    let submitted = service
        .transition_status(id, ApplicationStatus::Submitted, &broker())
        .await
        .expect("optional site history skipped");
    assert_eq!(submitted.status(), ApplicationStatus::Submitted);
}

#[tokio::test]
async fn uploaded_document_gate_blocks_until_files_land() {
    let (service, _) = build_service();
    let flip = program("FIX_AND_FLIP");
    let record = brokered_draft(&service, "FIX_AND_FLIP").await;
    let id = record.application_id();
    fill_all_sections(&service, id, &flip).await;

    let error = service
        .transition_status(id, ApplicationStatus::Submitted, &broker())
        .await
        .expect_err("documents missing");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);
    assert!(error.to_string().contains("scope_of_work"));

    upload_required(&service, id, &flip).await;
    let submitted = service
        .transition_status(id, ApplicationStatus::Submitted, &broker())
        .await
        .expect("pending review is enough");
    assert_eq!(submitted.status(), ApplicationStatus::Submitted);
}

#[tokio::test]
async fn approved_document_gate_requires_reviews() {
    let (service, _) = build_service();
    let sba = program("SBA_7A");
    let record = brokered_draft(&service, "SBA_7A").await;
    let id = record.application_id();
    fill_all_sections(&service, id, &sba).await;
    upload_required(&service, id, &sba).await;

    let error = service
        .transition_status(id, ApplicationStatus::Submitted, &broker())
        .await
        .expect_err("documents pending review");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    for item in sba.checklist.iter().filter(|item| item.required) {
        service
            .review_document(id, &item.document_type, ReviewDecision::Approve, &workforce())
            .await
            .expect("approved");
    }

    let submitted = service
        .transition_status(id, ApplicationStatus::Submitted, &broker())
        .await
        .expect("all required documents approved");
    assert_eq!(submitted.status(), ApplicationStatus::Submitted);
}

#[tokio::test]
async fn only_staff_review_documents() {
    let (service, _) = build_service();
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    service
        .upload_document(id, "government_id", FileRef("uploads/id.pdf".to_string()), &borrower())
        .await
        .expect("uploaded");

    let error = service
        .review_document(id, "government_id", ReviewDecision::Approve, &borrower())
        .await
        .expect_err("borrowers cannot review");
    assert_eq!(error.kind(), ErrorKind::Forbidden);

    let reviewed = service
        .review_document(id, "government_id", ReviewDecision::Approve, &workforce())
        .await
        .expect("workforce approves");
    let document = reviewed.document("government_id").expect("document");
    assert_eq!(document.state, DocumentState::Approved);
    assert_eq!(document.reviewed_by.as_deref(), Some("underwriter-3"));
    assert!(document.reviewed_at.is_some());
    assert_eq!(reviewed.history().len(), 3);
}

#[tokio::test]
async fn rejected_documents_can_be_replaced() {
    let (service, _) = build_service();
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    service
        .upload_document(id, "lease_agreements", FileRef("uploads/lease-v1.pdf".to_string()), &broker())
        .await
        .expect("first upload");
    let rejected = service
        .review_document(
            id,
            "lease_agreements",
            ReviewDecision::Reject {
                reason: Some("unsigned".to_string()),
            },
            &admin(),
        )
        .await
        .expect("rejected");
    let document = rejected.document("lease_agreements").expect("document");
    assert_eq!(document.state, DocumentState::Rejected);
    assert_eq!(document.rejection_reason.as_deref(), Some("unsigned"));

    let replaced = service
        .upload_document(id, "lease_agreements", FileRef("uploads/lease-v2.pdf".to_string()), &broker())
        .await
        .expect("replacement upload");
    let document = replaced.document("lease_agreements").expect("document");
    assert_eq!(document.state, DocumentState::PendingReview);
    assert_eq!(document.version, 2);
    assert!(document.rejection_reason.is_none());
}

#[tokio::test]
async fn document_transitions_follow_the_checklist_machine() {
    let (service, _) = build_service();
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();

    let error = service
        .review_document(id, "purchase_contract", ReviewDecision::Approve, &workforce())
        .await
        .expect_err("nothing uploaded");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    service
        .upload_document(id, "purchase_contract", FileRef("uploads/psa.pdf".to_string()), &broker())
        .await
        .expect("uploaded");
    let error = service
        .upload_document(id, "purchase_contract", FileRef("uploads/psa-2.pdf".to_string()), &broker())
        .await
        .expect_err("already pending review");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    let error = service
        .upload_document(id, "insurance_quote", FileRef("  ".to_string()), &broker())
        .await
        .expect_err("blank file reference");
    assert_eq!(error.kind(), ErrorKind::Validation);

    let error = service
        .upload_document(id, "tax_returns", FileRef("uploads/tax.pdf".to_string()), &broker())
        .await
        .expect_err("not on the checklist");
    assert!(matches!(error, OriginationError::NotFound { entity: "document", .. }));
}

#[tokio::test]
async fn lifecycle_runs_to_funding_and_then_freezes() {
    let (service, _) = build_service();
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();
    fill_all_sections(&service, id, &dscr).await;

    service
        .transition_status(id, ApplicationStatus::Submitted, &broker())
        .await
        .expect("submitted");

    let error = service
        .transition_status(id, ApplicationStatus::UnderReview, &broker())
        .await
        .expect_err("brokers do not underwrite");
    assert_eq!(error.kind(), ErrorKind::Forbidden);

    for next in [
        ApplicationStatus::UnderReview,
        ApplicationStatus::Approved,
        ApplicationStatus::Funded,
    ] {
        let updated = service
            .transition_status(id, next, &workforce())
            .await
            .expect("staff transition");
        assert_eq!(updated.status(), next);
    }

    let error = service
        .transition_status(id, ApplicationStatus::Cancelled, &broker())
        .await
        .expect_err("funded is terminal");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    let error = service
        .update_section(id, "propertyInfo", json!({}), &broker())
        .await
        .expect_err("terminal applications are frozen");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);
}

#[tokio::test]
async fn skipping_states_is_rejected() {
    let (service, _) = build_service();
    let record = brokered_draft(&service, "DSCR").await;

    let error = service
        .transition_status(record.application_id(), ApplicationStatus::Approved, &workforce())
        .await
        .expect_err("draft cannot be approved");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    let cancelled = service
        .transition_status(record.application_id(), ApplicationStatus::Cancelled, &borrower())
        .await
        .expect("borrower withdraws");
    assert_eq!(cancelled.status(), ApplicationStatus::Cancelled);
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let store = Arc::new(FlakyStore::failing(2));
    let service = service_with_store(store.clone());

    let record = brokered_draft(&service, "BRIDGE").await;
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.inner.len(), 1);
    assert_eq!(record.status(), ApplicationStatus::Draft);
}

#[tokio::test]
async fn exhausted_retries_surface_transient_io() {
    let service = service_with_store(Arc::new(UnavailableStore));
    let error = service
        .create_application(&ProgramId::new("DSCR"), &borrower(), None)
        .await
        .expect_err("store down");

    assert_eq!(error.kind(), ErrorKind::TransientIo);
    assert!(error.kind().is_retryable());
}

#[tokio::test]
async fn retried_writes_are_recorded_once() {
    let store = Arc::new(LostAckStore::default());
    let service = service_with_store(store.clone());
    let record = brokered_draft(&service, "DSCR").await;

    let updated = service
        .update_section(record.application_id(), "propertyInfo", json!({ "propertyType": "duplex" }), &broker())
        .await
        .expect("retry succeeds");

    assert_eq!(updated.history().len(), 2);
    assert_eq!(
        store.inner.snapshot(record.application_id()).map(|stored| stored.history().len()),
        Some(2)
    );
}

#[tokio::test]
async fn dashboards_are_scoped_to_the_actor() {
    let (service, _) = build_service();
    let brokered = brokered_draft(&service, "DSCR").await;
    let direct = service
        .create_application(&ProgramId::new("LAND"), &other_borrower(), None)
        .await
        .expect("direct application");

    service
        .update_section(brokered.application_id(), NOTES_SECTION, json!("call back"), &broker())
        .await
        .expect("touch brokered application");

    let mine = service.applications_for(&borrower()).await.expect("borrower dashboard");
    assert_eq!(mine.len(), 1);
    assert_eq!(&mine[0].application_id, brokered.application_id());
    assert_eq!(
        mine[0].next_step_path.as_deref(),
        Some(format!("/dashboard/applications/{}/personalContact", brokered.application_id().0).as_str())
    );

    let brokered_view = service.applications_for(&broker()).await.expect("broker dashboard");
    assert_eq!(brokered_view.len(), 1);
    assert_eq!(brokered_view[0].outstanding_documents, 3);

    let everything = service.applications_for(&workforce()).await.expect("workforce dashboard");
    let ids = everything
        .iter()
        .map(|summary| summary.application_id.clone())
        .collect::<Vec<_>>();
    assert!(ids.contains(brokered.application_id()));
    assert!(ids.contains(direct.application_id()));
    assert!(everything
        .windows(2)
        .all(|pair| pair[0].updated_at >= pair[1].updated_at));
}

#[tokio::test]
async fn progress_export_is_for_staff() {
    let (service, _) = build_service();
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    fill_all_sections(&service, record.application_id(), &dscr).await;

    let error = service
        .export_progress(&borrower(), Vec::new())
        .await
        .expect_err("borrowers cannot export");
    assert_eq!(error.kind(), ErrorKind::Forbidden);

    let mut buffer = Vec::new();
    let rows = service
        .export_progress(&workforce(), &mut buffer)
        .await
        .expect("export");
    assert_eq!(rows, 1);

    let csv = String::from_utf8(buffer).expect("utf8");
    let mut lines = csv.lines();
    assert!(lines
        .next()
        .expect("header")
        .starts_with("application_id,program_id,office_context,status"));
    let row = lines.next().expect("row");
    assert!(row.starts_with(&format!("{},DSCR,broker,draft", record.application_id().0)));
    assert!(row.contains(",100.0,"));
    assert!(row.contains("government_id;purchase_contract;lease_agreements"));
}

struct ClosedPipe;

impl std::io::Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "report consumer went away"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "report consumer went away"))
    }
}

#[tokio::test]
async fn report_output_failures_are_not_store_outages() {
    let (service, _) = build_service();
    brokered_draft(&service, "DSCR").await;

    let error = service
        .export_progress(&workforce(), ClosedPipe)
        .await
        .expect_err("writer closed");

    assert_eq!(error.kind(), ErrorKind::Internal);
    assert!(!error.kind().is_retryable());
}

#[tokio::test]
async fn lost_insert_acknowledgement_still_creates_once() {
    let store = Arc::new(LostInsertAckStore::default());
    let service = service_with_store(store.clone());

    let record = service
        .create_application(&ProgramId::new("DSCR"), &borrower(), None)
        .await
        .expect("create settles on the landed insert");

    assert_eq!(store.inner.len(), 1);
    assert_eq!(store.inner.snapshot(record.application_id()), Some(record));
}

#[tokio::test]
async fn submitted_applications_keep_required_sections_complete() {
    let (service, store) = build_service();
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();
    fill_all_sections(&service, id, &dscr).await;
    service
        .transition_status(id, ApplicationStatus::Submitted, &broker())
        .await
        .expect("submitted");

    let error = service
        .update_section(id, "personalContact", json!({}), &borrower())
        .await
        .expect_err("blanking a submitted section");
    assert_eq!(error.kind(), ErrorKind::InvalidTransition);

    let stored = store.snapshot(id).expect("persisted");
    assert_eq!(stored.status(), ApplicationStatus::Submitted);
    assert_eq!(stored.section("personalContact"), Some(&filled_payload(&dscr, "personalContact")));
    assert_eq!(service.progress(id).await.expect("progress").overall_percent, 100.0);

    let mut corrected = filled_payload(&dscr, "personalContact");
    corrected["email"] = json!("dana.whitfield@example.com");
    service
        .update_section(id, "personalContact", corrected, &borrower())
        .await
        .expect("complete corrections are accepted");
    service
        .update_section(id, NOTES_SECTION, json!("moved to underwriting queue"), &broker())
        .await
        .expect("notes stay writable");
}

#[tokio::test]
async fn blanking_write_racing_submission_never_leaves_it_incomplete() {
    let store = Arc::new(InterleavingStore::default());
    let service = service_with_store(store.clone());
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();
    fill_all_sections(&service, id, &dscr).await;

    let (borrower_actor, broker_actor) = (borrower(), broker());
    let (blanked, submitted) = tokio::join!(
        service.update_section(id, "personalContact", json!({}), &borrower_actor),
        service.transition_status(id, ApplicationStatus::Submitted, &broker_actor),
    );

    assert!(blanked.is_ok() != submitted.is_ok(), "exactly one write lands");
    let stored = store.inner.snapshot(id).expect("persisted");
    let progress = service.progress(id).await.expect("progress");
    assert!(stored.status() == ApplicationStatus::Draft || progress.required_sections_complete);
}

#[tokio::test]
async fn concurrent_writes_to_one_application_all_survive() {
    let store = Arc::new(InterleavingStore::default());
    let service = service_with_store(store.clone());
    let dscr = program("DSCR");
    let record = brokered_draft(&service, "DSCR").await;
    let id = record.application_id();
    service
        .upload_document(id, "government_id", FileRef("uploads/id.pdf".to_string()), &borrower())
        .await
        .expect("uploaded");

    let (borrower_actor, broker_actor, workforce_actor) = (borrower(), broker(), workforce());
    let (contact, property, review) = tokio::join!(
        service.update_section(id, "personalContact", filled_payload(&dscr, "personalContact"), &borrower_actor),
        service.update_section(id, "propertyInfo", filled_payload(&dscr, "propertyInfo"), &broker_actor),
        service.review_document(id, "government_id", ReviewDecision::Approve, &workforce_actor),
    );
    contact.expect("contact saved");
    property.expect("property saved");
    review.expect("document reviewed");

    let stored = store.inner.snapshot(id).expect("persisted");
    assert_eq!(stored.section("personalContact"), Some(&filled_payload(&dscr, "personalContact")));
    assert_eq!(stored.section("propertyInfo"), Some(&filled_payload(&dscr, "propertyInfo")));
    assert_eq!(
        stored.document("government_id").map(|document| document.state),
        Some(DocumentState::Approved)
    );
    assert_eq!(stored.history().len(), 5);
    let actions = stored
        .history()
        .entries()
        .iter()
        .map(|entry| &entry.action)
        .collect::<Vec<_>>();
    assert!(actions.iter().any(|action| matches!(action, HistoryAction::SectionUpdated { section } if section == "personalContact")));
    assert!(actions.iter().any(|action| matches!(action, HistoryAction::SectionUpdated { section } if section == "propertyInfo")));
    assert!(actions.iter().any(|action| matches!(action, HistoryAction::DocumentReviewed { .. })));
}
