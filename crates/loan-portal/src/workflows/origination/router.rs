use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::access::AccessPolicy;
use super::checklist::{FileRef, ReviewDecision};
use super::domain::{
    Actor, ActorRole, ApplicationId, ApplicationRecord, ApplicationStatus, ProgramId,
};
use super::office::{resolve_context, RouteSource};
use super::service::{ErrorKind, LoanApplicationService, OriginationError};
use super::store::ApplicationStore;

/// Caller id header set by the authentication layer in front of this router.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
/// Optional office path the request was made from; must agree with the actor's role.
pub const OFFICE_PATH_HEADER: &str = "x-office-path";

type Service<S, P> = Arc<LoanApplicationService<S, P>>;

/// Router exposing the loan application workflow over HTTP.
pub fn application_router<S, P>(service: Service<S, P>) -> Router
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    Router::new()
        .route("/api/v1/programs", get(list_programs_handler::<S, P>))
        .route(
            "/api/v1/programs/:program_id",
            get(program_handler::<S, P>),
        )
        .route(
            "/api/v1/applications",
            post(create_handler::<S, P>).get(dashboard_handler::<S, P>),
        )
        .route(
            "/api/v1/applications/:application_id",
            get(view_handler::<S, P>),
        )
        .route(
            "/api/v1/applications/:application_id/progress",
            get(progress_handler::<S, P>),
        )
        .route(
            "/api/v1/applications/:application_id/sections/:section",
            put(update_section_handler::<S, P>),
        )
        .route(
            "/api/v1/applications/:application_id/status",
            post(transition_handler::<S, P>),
        )
        .route(
            "/api/v1/applications/:application_id/documents/:document_type",
            put(upload_handler::<S, P>),
        )
        .route(
            "/api/v1/applications/:application_id/documents/:document_type/review",
            post(review_handler::<S, P>),
        )
        .route("/api/v1/offices/resolve", get(resolve_office_handler))
        .route(
            "/api/v1/reports/progress.csv",
            get(export_handler::<S, P>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateApplicationRequest {
    pub program_id: ProgramId,
    #[serde(default)]
    pub borrower_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusRequest {
    pub status: ApplicationStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadRequest {
    pub file_ref: FileRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolveQuery {
    pub path: String,
}

pub(crate) async fn list_programs_handler<S, P>(State(service): State<Service<S, P>>) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let programs = service.catalog().active().collect::<Vec<_>>();
    (StatusCode::OK, axum::Json(programs)).into_response()
}

pub(crate) async fn program_handler<S, P>(
    State(service): State<Service<S, P>>,
    Path(program_id): Path<String>,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    match service.program(&ProgramId(program_id)) {
        Ok(program) => (StatusCode::OK, axum::Json(program)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<CreateApplicationRequest>,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    let created = match service
        .create_application(&request.program_id, &actor, request.borrower_id)
        .await
    {
        Ok(record) => record,
        Err(error) => return error_response(error),
    };

    match service.view(created.application_id(), &actor).await {
        Ok(view) => (StatusCode::CREATED, axum::Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn dashboard_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match service.applications_for(&actor).await {
        Ok(summaries) => (StatusCode::OK, axum::Json(summaries)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn view_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match service.view(&ApplicationId(application_id), &actor).await {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn progress_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    match service.view(&ApplicationId(application_id), &actor).await {
        Ok(view) => (StatusCode::OK, axum::Json(view.progress)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn update_section_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
    Path((application_id, section)): Path<(String, String)>,
    axum::Json(payload): axum::Json<Value>,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    let id = ApplicationId(application_id);
    match service.update_section(&id, &section, payload, &actor).await {
        Ok(record) => written_response(&service, record, &actor),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn transition_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<StatusRequest>,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    let id = ApplicationId(application_id);
    match service.transition_status(&id, request.status, &actor).await {
        Ok(record) => written_response(&service, record, &actor),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn upload_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
    Path((application_id, document_type)): Path<(String, String)>,
    axum::Json(request): axum::Json<UploadRequest>,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    let id = ApplicationId(application_id);
    match service
        .upload_document(&id, &document_type, request.file_ref, &actor)
        .await
    {
        Ok(record) => written_response(&service, record, &actor),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn review_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
    Path((application_id, document_type)): Path<(String, String)>,
    axum::Json(decision): axum::Json<ReviewDecision>,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    let id = ApplicationId(application_id);
    match service
        .review_document(&id, &document_type, decision, &actor)
        .await
    {
        Ok(record) => written_response(&service, record, &actor),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn resolve_office_handler(Query(query): Query<ResolveQuery>) -> Response {
    match resolve_context(RouteSource::Path(&query.path)) {
        Ok(route) => (StatusCode::OK, axum::Json(route)).into_response(),
        Err(error) => error_body(StatusCode::NOT_FOUND, "not_found", error.to_string()),
    }
}

pub(crate) async fn export_handler<S, P>(
    State(service): State<Service<S, P>>,
    headers: HeaderMap,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };

    let mut buffer = Vec::new();
    match service.export_progress(&actor, &mut buffer).await {
        Ok(_) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

/// Responds with the record a write returned, so a committed write never reports a read failure.
fn written_response<S, P>(
    service: &LoanApplicationService<S, P>,
    record: ApplicationRecord,
    actor: &Actor,
) -> Response
where
    S: ApplicationStore + 'static,
    P: AccessPolicy + 'static,
{
    match service.view_of(record, actor) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

/// Builds the caller from identity headers, optionally pinning the office it is acting from.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let id = header_value(headers, ACTOR_ID_HEADER)
        .ok_or_else(|| unauthenticated(format!("missing {ACTOR_ID_HEADER} header")))?;
    let role = header_value(headers, ACTOR_ROLE_HEADER)
        .ok_or_else(|| unauthenticated(format!("missing {ACTOR_ROLE_HEADER} header")))?;
    let role: ActorRole = serde_json::from_value(Value::String(role.to_ascii_lowercase()))
        .map_err(|_| unauthenticated(format!("unknown actor role {role}")))?;

    let mut actor = Actor::new(id, role);
    if let Some(path) = header_value(headers, OFFICE_PATH_HEADER) {
        let route = resolve_context(RouteSource::Path(&path)).map_err(|error| {
            error_body(StatusCode::BAD_REQUEST, "invalid_office", error.to_string())
        })?;
        actor.office_context = route.office_context;
    }
    Ok(actor)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn unauthenticated(message: String) -> Response {
    error_body(StatusCode::UNAUTHORIZED, "unauthenticated", message)
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound | ErrorKind::InvalidProgram => StatusCode::NOT_FOUND,
        ErrorKind::InvalidSection => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TransientIo => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: OriginationError) -> Response {
    let kind = error.kind();
    error_body(status_for(kind), kind.label(), error.to_string())
}

fn error_body(status: StatusCode, kind: &str, message: String) -> Response {
    let payload = json!({
        "error": {
            "kind": kind,
            "message": message,
        },
    });
    (status, axum::Json(payload)).into_response()
}
