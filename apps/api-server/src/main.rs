//! api-server — HTTP API for the job board data layer.
//!
//! Exposes the generic admin CRUD over every registered entity plus the job
//! board routes, backed by the facade in `domain::backend`:
//! - Storage: SQLite (default) with a one-way fallback to the seeded
//!   in-memory mock when the database is unreachable, or the mock only.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string) for the admin frontend.
//!
//! Once the facade has fallen back, every response is served from the
//! in-memory dataset: it is not authoritative and writes are lost on restart.
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! cargo run -p api-server
//!
//! # in-memory only
//! BACKEND_MODE=mock cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.
//!

mod config;
mod hasher;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::http::HeaderValue;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use domain::adapters::memory_store::InMemoryStore;
use domain::adapters::mock_repo::MockRepository;
use domain::backend::Backend;
use domain::handlers::PasswordHashField;
use domain::schema::{SchemaError, SchemaRegistry};
use domain::{catalog, CoreError, CrudRepository, JobBoardRepository, PageRequest, Payload};
use serde::Deserialize;
use serde_json::json;
use sqlite_adapter::SqliteRepo;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type JobBoardBackend = Backend<SqliteRepo>;

#[derive(Clone)]
struct AppState {
    backend: Arc<JobBoardBackend>,
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_degraded_mode();

    let registry = match build_registry() {
        Ok(r) => r,
        Err(e) => {
            error!(err = %e, "invalid entity schema");
            std::process::exit(1);
        }
    };
    let backend = build_backend(&cfg, registry).await;
    info!(backend = backend.mode().as_str(), "repository backend selected");
    let state = AppState {
        backend: Arc::new(backend),
    };

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = app(state)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin.clone()]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(%addr, "api-server listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = %e, "server error");
        std::process::exit(1);
    }
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

fn build_registry() -> Result<Arc<SchemaRegistry>, SchemaError> {
    let password = Arc::new(PasswordHashField::new(hasher::SaltedSha256, "password_hash"));
    catalog::job_board(password).map(Arc::new)
}

// Construct the facade from config. A database that cannot be opened, or
// fails the first ping, starts the process on the mock.
async fn build_backend(cfg: &config::Config, registry: Arc<SchemaRegistry>) -> JobBoardBackend {
    let mock = MockRepository::new(registry.clone(), Arc::new(InMemoryStore::job_board()));
    match cfg.backend {
        config::BackendChoice::Mock => Backend::mock_only(mock),
        config::BackendChoice::Structured => {
            if let Some(dir) = cfg.db_path.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    warn!(dir = %dir.display(), err = %e, "could not create database directory");
                }
            }
            match SqliteRepo::new(&cfg.db_path, registry) {
                Ok(repo) => {
                    let backend = Backend::new(repo, mock);
                    backend.check_connectivity().await;
                    backend
                }
                Err(e) => {
                    warn!(path = %cfg.db_path.display(), err = %e, "failed to open sqlite database, using mock backend");
                    Backend::mock_only(mock)
                }
            }
        }
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/admin/meta", get(admin_meta))
        .route("/api/admin/:entity", get(list_records).post(create_record))
        .route(
            "/api/admin/:entity/:id",
            get(get_record)
                .patch(update_record)
                .put(update_record)
                .delete(delete_record),
        )
        .route("/api/jobs", get(open_jobs))
        .route("/api/users/:user_id/applications/summary", get(application_summary))
        .route("/api/companies/resolve", post(resolve_company))
        .route("/api/companies/:company_id/applications", get(company_applications))
        .route(
            "/api/companies/:company_id/applications/:application_id/status",
            patch(set_application_status),
        )
        .with_state(state)
}

/// `CoreError` as an HTTP response. Internal details are logged, never sent.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            CoreError::Validation(messages) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(http_common::json_validation_error(&messages)),
            )
                .into_response(),
            CoreError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(http_common::json_error_with_message("not_found", &what)),
            )
                .into_response(),
            CoreError::Forbidden(why) => {
                warn!(reason = %why, "forbidden");
                (
                    StatusCode::FORBIDDEN,
                    Json(http_common::json_error_with_message("forbidden", &why)),
                )
                    .into_response()
            }
            e @ (CoreError::BackendUnavailable(_) | CoreError::Internal(_)) => {
                error!(err = ?e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(http_common::json_err("internal")),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult = Result<Response, ApiError>;

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response()
}

fn bad_body(rejection: JsonRejection) -> Response {
    warn!(err = %rejection, "rejected request body");
    (
        StatusCode::BAD_REQUEST,
        Json(http_common::json_error_with_message("bad_request", &rejection.body_text())),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "backend": state.backend.mode()}))
}

async fn admin_meta(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"entities": state.backend.registry().metadata()}))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    page: Option<String>,
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    sort: Option<String>,
}

async fn list_records(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(q): Query<ListQuery>,
) -> ApiResult {
    let mut request = PageRequest::new(
        http_common::parse_int_param(q.page.as_deref()),
        http_common::parse_int_param(q.limit.as_deref()),
    );
    request.search = http_common::non_blank(q.q.as_deref());
    request.sort = http_common::non_blank(q.sort.as_deref());

    let result = state.backend.list(&entity, &request).await?;
    Ok(Json(json!({
        "page": request.page,
        "limit": request.limit,
        "total": result.total,
        "has_more": result.has_more,
        "rows": result.items,
        "sort": result.sort.to_string(),
    }))
    .into_response())
}

async fn get_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> ApiResult {
    state.backend.registry().require(&entity)?;
    let Some(id) = http_common::parse_id(&id) else {
        return Ok(not_found());
    };
    match state.backend.find_by_id(&entity, id).await? {
        Some(row) => Ok(Json(json!({ "row": row })).into_response()),
        None => Ok(not_found()),
    }
}

async fn create_record(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    body: Result<Json<Payload>, JsonRejection>,
) -> ApiResult {
    state.backend.registry().require(&entity)?;
    let Json(payload) = match body {
        Ok(b) => b,
        Err(rejection) => return Ok(bad_body(rejection)),
    };
    let row = state.backend.create(&entity, &payload).await?;
    info!(entity = %entity, "record created");
    Ok((StatusCode::CREATED, Json(json!({ "row": row }))).into_response())
}

async fn update_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    body: Result<Json<Payload>, JsonRejection>,
) -> ApiResult {
    state.backend.registry().require(&entity)?;
    let Some(id) = http_common::parse_id(&id) else {
        return Ok(not_found());
    };
    let Json(payload) = match body {
        Ok(b) => b,
        Err(rejection) => return Ok(bad_body(rejection)),
    };
    match state.backend.update(&entity, id, &payload).await? {
        Some(row) => Ok(Json(json!({ "row": row })).into_response()),
        None => Ok(not_found()),
    }
}

async fn delete_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> ApiResult {
    state.backend.registry().require(&entity)?;
    let Some(id) = http_common::parse_id(&id) else {
        return Ok(not_found());
    };
    if state.backend.remove(&entity, id).await? {
        info!(entity = %entity, id, "record deleted");
        Ok(Json(json!({ "success": true })).into_response())
    } else {
        Ok(not_found())
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: Option<String>,
}

async fn open_jobs(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> ApiResult {
    let search = http_common::non_blank(q.q.as_deref());
    let jobs = state.backend.list_open_jobs(search.as_deref()).await?;
    Ok(Json(json!({ "jobs": jobs })).into_response())
}

async fn application_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult {
    let Some(user_id) = http_common::parse_id(&user_id) else {
        return Ok(not_found());
    };
    let counts = state.backend.application_status_counts(user_id).await?;
    Ok(Json(json!({ "user_id": user_id, "counts": counts })).into_response())
}

async fn company_applications(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult {
    let Some(company_id) = http_common::parse_id(&company_id) else {
        return Ok(not_found());
    };
    let applications = state.backend.list_company_applications(company_id).await?;
    Ok(Json(json!({ "applications": applications })).into_response())
}

#[derive(Deserialize)]
struct StatusReq {
    status: String,
}

async fn set_application_status(
    State(state): State<AppState>,
    Path((company_id, application_id)): Path<(String, String)>,
    body: Result<Json<StatusReq>, JsonRejection>,
) -> ApiResult {
    let (Some(company_id), Some(application_id)) = (
        http_common::parse_id(&company_id),
        http_common::parse_id(&application_id),
    ) else {
        return Ok(not_found());
    };
    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => return Ok(bad_body(rejection)),
    };
    let row = state
        .backend
        .set_application_status(application_id, company_id, &req.status)
        .await?;
    info!(application_id, company_id, status = %req.status, "application status changed");
    Ok(Json(json!({ "row": row })).into_response())
}

#[derive(Deserialize)]
struct ResolveCompanyReq {
    #[serde(default)]
    company_name: String,
}

async fn resolve_company(
    State(state): State<AppState>,
    body: Result<Json<ResolveCompanyReq>, JsonRejection>,
) -> ApiResult {
    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => return Ok(bad_body(rejection)),
    };
    let row = state.backend.find_or_create_company(&req.company_name).await?;
    Ok(Json(json!({ "row": row })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn mock_app() -> Router {
        let registry = build_registry().unwrap();
        let mock = MockRepository::new(registry, Arc::new(InMemoryStore::job_board()));
        app(AppState {
            backend: Arc::new(Backend::mock_only(mock)),
        })
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_backend() {
        let router = mock_app();
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "backend": "mock"}));
    }

    #[tokio::test]
    async fn meta_hides_password_handlers() {
        let router = mock_app();
        let (status, body) = call(&router, "GET", "/api/admin/meta", None).await;
        assert_eq!(status, StatusCode::OK);
        let entities = body["entities"].as_array().unwrap();
        assert_eq!(entities.len(), 4);
        assert!(!body.to_string().contains("password-hash"));
    }

    #[tokio::test]
    async fn list_search_and_clamping() {
        let router = mock_app();
        let (status, body) = call(&router, "GET", "/api/admin/companies?q=tech", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["rows"][0]["company_name"], "TechNova");
        assert_eq!(body["sort"], "company_name:ASC,company_id:ASC");

        let (_, body) = call(&router, "GET", "/api/admin/jobs?page=0&limit=abc&sort=salary:asc", None).await;
        assert_eq!(body["page"], 1);
        assert_eq!(body["limit"], 10);
        assert_eq!(body["sort"], "salary:ASC");

        let (status, _) = call(&router, "GET", "/api/admin/invoices", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn crud_flow() {
        let router = mock_app();
        let (status, body) = call(&router, "POST", "/api/admin/companies", Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"]["message"].as_str().unwrap().contains("Nom de l'entreprise"));

        let (status, body) = call(
            &router,
            "POST",
            "/api/admin/companies",
            Some(json!({"company_name": "Atelier Nord", "city": " Lille "})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["row"]["company_id"].as_i64().unwrap();
        assert_eq!(body["row"]["city"], "Lille");

        let uri = format!("/api/admin/companies/{id}");
        let (status, body) = call(&router, "PATCH", &uri, Some(json!({"industry": "Textile"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row"]["industry"], "Textile");
        assert_eq!(body["row"]["company_name"], "Atelier Nord");

        let (status, body) = call(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        let (status, _) = call(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&router, "GET", "/api/admin/companies/abc", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_user_hashes_password() {
        let router = mock_app();
        let (status, body) = call(
            &router,
            "POST",
            "/api/admin/users",
            Some(json!({
                "first_name": "Eva", "last_name": "Roux", "email": "eva@mail.example",
                "role": "candidate", "password": "s3cret"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["row"].get("password").is_none());
        assert!(body["row"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn job_board_routes() {
        let router = mock_app();
        let (status, body) = call(&router, "GET", "/api/jobs?q=rust", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"][0]["company_name"], "TechNova");

        let (_, body) = call(&router, "GET", "/api/users/3/applications/summary", None).await;
        assert_eq!(body["counts"], json!({"interview": 1, "pending": 1}));

        let (_, body) = call(&router, "GET", "/api/companies/1/applications", None).await;
        assert_eq!(body["applications"].as_array().map(Vec::len), Some(2));

        let (status, _) = call(
            &router,
            "PATCH",
            "/api/companies/2/applications/1/status",
            Some(json!({"status": "accepted"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = call(
            &router,
            "PATCH",
            "/api/companies/1/applications/1/status",
            Some(json!({"status": "accepted"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row"]["status"], "accepted");

        let (status, body) = call(
            &router,
            "POST",
            "/api/companies/resolve",
            Some(json!({"company_name": "technova"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row"]["company_id"], 1);
    }

    #[tokio::test]
    async fn structured_backend_serves_database() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config::Config::from_vars(|key| match key {
            "DB_PATH" => Some(dir.path().join("jobs.db").display().to_string()),
            _ => None,
        })
        .unwrap();
        let backend = build_backend(&cfg, build_registry().unwrap()).await;
        assert_eq!(backend.mode(), domain::backend::BackendMode::Structured);
        let router = app(AppState {
            backend: Arc::new(backend),
        });

        let (_, body) = call(&router, "GET", "/api/admin/companies", None).await;
        assert_eq!(body["total"], 0);
        let (status, _) = call(
            &router,
            "POST",
            "/api/admin/companies",
            Some(json!({"company_name": "TechNova"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(body["backend"], "structured");
    }

    #[tokio::test]
    async fn unopenable_database_starts_on_mock() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let cfg = config::Config::from_vars(|key| match key {
            "DB_PATH" => Some(blocker.join("jobs.db").display().to_string()),
            _ => None,
        })
        .unwrap();
        let backend = build_backend(&cfg, build_registry().unwrap()).await;
        assert_eq!(backend.mode(), domain::backend::BackendMode::Mock);
    }
}
