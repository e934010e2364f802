use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use playwatch_protocol::{error_codes, ApiError, BackupCreated, SessionKilled};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthOutcome, Authenticator};
use crate::error::EngineError;
use crate::scheduler::Scheduler;

/// Shared state accessible by handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub auth: Arc<dyn Authenticator>,
}

/// Build the axum router for the admin surface.
///
/// `/api/admin/*` needs an admin principal, `/api/items/*` any principal.
/// `/health` and the retired `/setup` redirects are open.
pub fn build_router(scheduler: Arc<Scheduler>, auth: impl Authenticator) -> Router {
    let state = AppState {
        scheduler,
        auth: Arc::new(auth),
    };

    let admin = Router::new()
        .route("/api/admin/backups", post(create_backup).get(list_backups))
        .route("/api/admin/backups/export", get(export_backup))
        .route("/api/admin/backups/{name}", delete(delete_backup))
        .route("/api/admin/sync", post(run_sync))
        .route("/api/admin/sessions/{id}/kill", post(kill_session))
        .route("/api/admin/jobs", get(job_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let authenticated = Router::new()
        .route("/api/items/{id}/image", get(item_image))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_principal,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/setup", get(setup_redirect))
        .route("/setup/{*rest}", get(setup_redirect))
        .merge(admin)
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── auth middleware ──────────────────────────────────────────────────

async fn require_admin(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match state.auth.authenticate(req.headers()) {
        AuthOutcome::Authenticated(principal) if principal.is_admin() => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        AuthOutcome::Authenticated(principal) => {
            tracing::warn!(principal = %principal.name, path = %req.uri().path(), "admin route denied");
            reject(StatusCode::FORBIDDEN, error_codes::FORBIDDEN, "admin role required")
        }
        AuthOutcome::Rejected(reason) => {
            tracing::debug!(%reason, path = %req.uri().path(), "unauthenticated request");
            reject(StatusCode::UNAUTHORIZED, error_codes::UNAUTHORIZED, &reason)
        }
    }
}

async fn require_principal(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match state.auth.authenticate(req.headers()) {
        AuthOutcome::Authenticated(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        AuthOutcome::Rejected(reason) => {
            reject(StatusCode::UNAUTHORIZED, error_codes::UNAUTHORIZED, &reason)
        }
    }
}

fn reject(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ApiError {
            error: code.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

// ── errors ───────────────────────────────────────────────────────────

/// [`EngineError`] rendered as an HTTP error body.
pub(crate) struct ApiErrorResponse(EngineError);

impl From<EngineError> for ApiErrorResponse {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EngineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, error_codes::INVALID_INPUT),
            EngineError::SessionNotFound(_) => (StatusCode::NOT_FOUND, error_codes::SESSION_NOT_FOUND),
            EngineError::ConcurrentRunRejected(_) => {
                (StatusCode::CONFLICT, error_codes::CONCURRENT_RUN_REJECTED)
            }
            EngineError::StoreFailure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, error_codes::STORE_FAILURE)
            }
            EngineError::UpstreamUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, error_codes::UPSTREAM_UNAVAILABLE)
            }
        };
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }
        reject(status, code, &self.0.to_string())
    }
}

type ApiResult<T> = Result<T, ApiErrorResponse>;

// ── handlers ─────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn setup_redirect() -> Redirect {
    Redirect::permanent("/")
}

async fn create_backup(State(state): State<AppState>) -> ApiResult<Json<BackupCreated>> {
    let file_name = state.scheduler.trigger_backup().await?;
    Ok(Json(BackupCreated { file_name }))
}

async fn list_backups(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.scheduler.list_backups().await?))
}

async fn delete_backup(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete_backup(name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export_backup(State(state): State<AppState>) -> ApiResult<Response> {
    let doc = state.scheduler.export_backup().await?;
    let bytes = doc
        .to_json_pretty()
        .map_err(|e| EngineError::store(format!("encode export: {e}")))?;
    let disposition = format!(
        "attachment; filename=\"playwatch-export-{}.json\"",
        doc.export_date.format("%Y-%m-%dT%H-%M-%S")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn run_sync(State(state): State<AppState>) -> ApiResult<Response> {
    let report = state.scheduler.trigger_sync().await?;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(report)).into_response())
}

async fn kill_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionKilled>> {
    state.scheduler.kill_session(&session_id).await?;
    Ok(Json(SessionKilled { session_id }))
}

async fn job_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.job_status())
}

async fn item_image(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<Response> {
    let image = state.scheduler.fetch_item_image(&item_id).await?;
    Ok(([(header::CONTENT_TYPE, image.content_type)], image.bytes).into_response())
}
