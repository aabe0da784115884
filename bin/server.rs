// Accounts Tracker - Web Server
// REST API with Axum over the company store

use accounts_tracker::registry::DEFAULT_BASE_URL;
use accounts_tracker::{
    default_cutoff, export_companies, export_workbook, CompaniesHouseClient, Company, CompanyStore,
    DatabaseStats, Event, KpiCounts, ReconciliationEngine, ReconciliationReport, RegistryClient, RegistryConfig,
    TrackerError, DATE_FORMAT, DEFAULT_CONCURRENCY,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{Local, NaiveDate};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

#[derive(Parser, Debug)]
#[command(name = "accounts-server", version, about = "HTTP API for the accounts tracker")]
struct ServerArgs {
    #[arg(long, env = "ACCOUNTS_DB", default_value = "client_data.db")]
    db: PathBuf,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Companies House API key (reconcile is disabled without one)
    #[arg(long, env = "COMPANIES_HOUSE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "COMPANIES_HOUSE_URL", default_value = DEFAULT_BASE_URL)]
    registry_url: String,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<CompanyStore>>,
    registry: Option<Arc<dyn RegistryClient>>,
    concurrency: usize,
}

/// API Response wrapper
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let status = match &err {
            TrackerError::Validation(_) => StatusCode::BAD_REQUEST,
            TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackerError::Transient(_) => StatusCode::BAD_GATEWAY,
            TrackerError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Request failed: {}", err);
        }
        ApiError::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            success: false,
            data: (),
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportParams {
    search: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KpiParams {
    cutoff: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReconcileRequest {
    #[serde(default)]
    numbers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CompanyDetail {
    company: Company,
    history: Vec<Event>,
}

#[derive(Debug, Serialize)]
struct KpiResponse {
    cutoff: NaiveDate,
    today: NaiveDate,
    counts: KpiCounts,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/companies?search= - Current view ordered by deadline
async fn list_companies(State(state): State<AppState>, Query(params): Query<SearchParams>) -> ApiResult<Vec<Company>> {
    let store = state.store.lock().await;
    Ok(Json(ApiResponse::ok(store.view(params.search.as_deref())?)))
}

/// GET /api/companies/:number - One company with its audit history
async fn get_company(State(state): State<AppState>, Path(number): Path<String>) -> ApiResult<CompanyDetail> {
    let store = state.store.lock().await;
    let company = store.get(&number)?;
    let history = store.events_for(&number)?;
    Ok(Json(ApiResponse::ok(CompanyDetail { company, history })))
}

/// PUT /api/companies/:number/status
async fn update_status(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Company> {
    let store = state.store.lock().await;
    if !store.set_internal_status(&number, &update.status)? {
        return Err(ApiError::new(StatusCode::NOT_FOUND, format!("company {} is not tracked", number)));
    }
    Ok(Json(ApiResponse::ok(store.get(&number)?)))
}

/// GET /api/kpis?cutoff=YYYY-MM-DD
async fn get_kpis(State(state): State<AppState>, Query(params): Query<KpiParams>) -> ApiResult<KpiResponse> {
    let cutoff = match params.cutoff.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid cutoff '{}', expected YYYY-MM-DD", raw)))?,
        None => default_cutoff(),
    };
    let today = Local::now().date_naive();

    let store = state.store.lock().await;
    let counts = KpiCounts::compute(&store.list_all()?, cutoff, today);
    Ok(Json(ApiResponse::ok(KpiResponse { cutoff, today, counts })))
}

/// GET /api/stats
async fn get_stats(State(state): State<AppState>) -> ApiResult<DatabaseStats> {
    let store = state.store.lock().await;
    Ok(Json(ApiResponse::ok(store.stats()?)))
}

/// POST /api/reconcile - Refresh deadlines (all companies when no numbers given)
async fn reconcile(State(state): State<AppState>, body: Option<Json<ReconcileRequest>>) -> ApiResult<ReconciliationReport> {
    let registry = state
        .registry
        .clone()
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "registry is not configured"))?;
    let requested = body.map(|Json(req)| req.numbers).unwrap_or_default();
    let store = state.store.clone();
    let engine = ReconciliationEngine::with_concurrency(state.concurrency);

    let numbers = if requested.is_empty() {
        store.lock().await.numbers()?
    } else {
        requested
    };

    // The lock is taken per write-through, so reads keep flowing while lookups are in flight
    let report = tokio::task::spawn_blocking(move || {
        engine.reconcile_with(registry.as_ref(), &numbers, |number, deadline, filed| {
            store.blocking_lock().record_resolution(number, deadline, filed)
        })
    })
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("reconcile task failed: {}", e)))?;

    log::info!("API reconcile: {}", report.summary());
    Ok(Json(ApiResponse::ok(report)))
}

/// GET /api/export?search=&format=xlsx - Current view as CSV (default) or workbook
async fn export_view(State(state): State<AppState>, Query(params): Query<ExportParams>) -> Result<Response, ApiError> {
    let companies = state.store.lock().await.view(params.search.as_deref())?;

    let (content_type, filename, body) = match params.format.as_deref() {
        None | Some("csv") => {
            let mut body = Vec::new();
            export_companies(&companies, &mut body)?;
            ("text/csv; charset=utf-8", "companies.csv", body)
        }
        Some("xlsx") => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "companies.xlsx",
            export_workbook(&companies)?,
        ),
        Some(other) => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("unknown export format '{}', expected csv or xlsx", other),
            ))
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        body,
    )
        .into_response())
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/companies", get(list_companies))
        .route("/companies/:number", get(get_company))
        .route("/companies/:number/status", put(update_status))
        .route("/kpis", get(get_kpis))
        .route("/stats", get(get_stats))
        .route("/reconcile", post(reconcile))
        .route("/export", get(export_view))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

fn build_registry(args: &ServerArgs) -> anyhow::Result<Option<Arc<dyn RegistryClient>>> {
    let Some(key) = args.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        log::warn!("No Companies House API key configured; POST /api/reconcile is disabled");
        return Ok(None);
    };
    let config = RegistryConfig::new(key)?
        .with_base_url(args.registry_url.as_str())
        .with_timeout(Duration::from_secs(args.timeout_secs));
    Ok(Some(Arc::new(CompaniesHouseClient::new(config)?)))
}

fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let args = ServerArgs::parse();

    println!("🌐 Accounts Tracker - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = CompanyStore::open(&args.db)?;
    println!("✓ Database opened: {}", args.db.display());

    // The blocking HTTP client must be built outside the async runtime
    let registry = build_registry(&args)?;

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
        registry,
        concurrency: args.concurrency,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let addr = format!("0.0.0.0:{}", args.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        println!("\n🚀 Server running on http://localhost:{}", args.port);
        println!("   API: http://localhost:{}/api/companies", args.port);
        println!("\n   Press Ctrl+C to stop\n");

        axum::serve(listener, router(state)).await?;
        Ok::<(), anyhow::Error>(())
    })
}
