use std::{sync::Arc, time::Instant};

use axum::{
    extract::{Path, Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use refbook_core::{Refbook, RefbookElement};

use crate::{
    auth::{auth_middleware, CallerIdentity},
    config::AuthConfig,
    query::{QueryContext, QueryError, QueryService},
    requests::{
        CheckElementParams, CheckElementRequest, ElementsParams, ListElementsRequest,
        ListRefbooksRequest, RefbooksParams, RequestError,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QueryService>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: Arc<QueryService>) -> Self {
        Self { service, metrics: None }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody {
            success: false,
            error: self.message,
        })).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::RefbookNotFound(_) | QueryError::VersionNotFound { .. } => ApiError::not_found(err.to_string()),
            QueryError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure while serving query");
                ApiError::internal("storage failure")
            }
        }
    }
}

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct RefbookSummary {
    pub id: i64,
    pub code: String,
    pub name: String,
}

impl From<Refbook> for RefbookSummary {
    fn from(r: Refbook) -> Self {
        Self {
            id: r.id,
            code: r.code.to_string(),
            name: r.name.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ElementEntry {
    pub code: String,
    pub value: String,
}

impl From<RefbookElement> for ElementEntry {
    fn from(e: RefbookElement) -> Self {
        Self {
            code: e.code.to_string(),
            value: e.value.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefbooksResponse {
    pub refbooks: Vec<RefbookSummary>,
}

#[derive(Debug, Serialize)]
pub struct ElementsResponse {
    pub elements: Vec<ElementEntry>,
}

#[derive(Debug, Serialize)]
pub struct CheckElementResponse {
    pub valid: bool,
}

pub fn create_router(state: AppState, auth: AuthConfig) -> Router {
    let refbooks = Router::new()
        .route("/refbooks", get(list_refbooks))
        .route("/refbooks/:id/elements", get(list_elements))
        .route("/refbooks/:id/check_element", get(check_element))
        .route_layer(middleware::from_fn(auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .merge(refbooks)
        .layer(middleware::from_fn(track_requests))
        .layer(Extension(Arc::new(auth)))
        .with_state(state)
}

// Store access is blocking, so every query runs off the async workers.
async fn run_query<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, QueryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("query task failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn list_refbooks(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(params): Query<RefbooksParams>,
) -> ApiResult<Json<RefbooksResponse>> {
    let request = ListRefbooksRequest::try_from(params)?;
    tracing::debug!(caller = %caller.name, date = ?request.date, "List refbooks");

    let service = state.service.clone();
    let refbooks = run_query(move || service.list_refbooks(request.date)).await?;

    Ok(Json(RefbooksResponse {
        refbooks: refbooks.into_iter().map(Into::into).collect(),
    }))
}

async fn list_elements(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Query(params): Query<ElementsParams>,
) -> ApiResult<Json<ElementsResponse>> {
    let request = ListElementsRequest::parse(&id, params)?;
    tracing::debug!(caller = %caller.name, refbook_id = request.refbook_id, version = ?request.version, "List elements");

    let service = state.service.clone();
    let context = QueryContext::today();
    let elements = run_query(move || {
        service.list_elements(&context, request.refbook_id, request.version.as_deref())
    }).await?;

    Ok(Json(ElementsResponse {
        elements: elements.into_iter().map(Into::into).collect(),
    }))
}

async fn check_element(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Query(params): Query<CheckElementParams>,
) -> ApiResult<Json<CheckElementResponse>> {
    let request = CheckElementRequest::parse(&id, params)?;
    tracing::debug!(caller = %caller.name, refbook_id = request.refbook_id, code = %request.code, version = ?request.version, "Check element");

    let service = state.service.clone();
    let context = QueryContext::today();
    let valid = run_query(move || {
        service.check_element(&context, request.refbook_id, &request.code, &request.value, request.version.as_deref())
    }).await?;

    Ok(Json(CheckElementResponse { valid }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    match state.metrics {
        Some(ref handle) => handle.render(),
        None => String::new(),
    }
}

async fn track_requests<B>(req: Request<B>, next: Next<B>) -> Response {
    let method = req.method().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::increment_counter!("refbook_http_requests_total", "method" => method.clone(), "status" => status);
    metrics::histogram!("refbook_http_request_duration_seconds", start.elapsed().as_secs_f64(), "method" => method);
    response
}
