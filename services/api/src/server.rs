use crate::cli::ServeArgs;
use crate::infra::{load_catalog, AppState, InMemoryApplicationStore};
use crate::routes::with_application_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use loan_portal::config::AppConfig;
use loan_portal::error::AppError;
use loan_portal::telemetry;
use loan_portal::workflows::origination::{LoanApplicationService, OfficeAccessPolicy};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let catalog = Arc::new(load_catalog(&config.catalog)?);
    let store = Arc::new(InMemoryApplicationStore::default());
    let application_service = Arc::new(LoanApplicationService::with_retry_policy(
        catalog,
        store,
        Arc::new(OfficeAccessPolicy),
        config.store.retry_policy(),
    ));

    let app = with_application_routes(application_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, retries = config.store.retry_attempts, "loan portal ready");

    axum::serve(listener, app).await?;
    Ok(())
}
