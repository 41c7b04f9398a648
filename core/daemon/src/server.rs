//! HTTP routes for the browser client.
//!
//! Event endpoints accept POST only and answer with the shared
//! [`ApiResponse`] envelope. Any other GET falls through to the static client
//! directory.

use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use formtrace_protocol::{
    ErrorInfo, EventKind, Response as ApiResponse, SessionKey, MAX_REQUEST_BYTES,
};
use serde::Deserialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::IngestError;
use crate::ingest::Ingestor;
use crate::store::SessionRecord;

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<Ingestor>,
}

pub fn build_app(state: AppState, client_dir: &Path) -> Router {
    Router::new()
        .route(
            EventKind::Open.path(),
            post(open_session).fallback(method_not_allowed),
        )
        .route(
            EventKind::Resize.path(),
            post(report_resize).fallback(method_not_allowed),
        )
        .route(
            EventKind::Paste.path(),
            post(report_paste).fallback(method_not_allowed),
        )
        .route(
            EventKind::Complete.path(),
            post(report_completion).fallback(method_not_allowed),
        )
        .route("/health", get(health))
        .route("/session", get(get_session))
        .fallback_service(ServeDir::new(client_dir))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type EventBody = Result<Bytes, BytesRejection>;

async fn open_session(State(state): State<AppState>, body: EventBody) -> Response {
    ingest_event(&state, EventKind::Open, body)
}

async fn report_resize(State(state): State<AppState>, body: EventBody) -> Response {
    ingest_event(&state, EventKind::Resize, body)
}

async fn report_paste(State(state): State<AppState>, body: EventBody) -> Response {
    ingest_event(&state, EventKind::Paste, body)
}

async fn report_completion(State(state): State<AppState>, body: EventBody) -> Response {
    ingest_event(&state, EventKind::Complete, body)
}

// Body rejections (over the size limit, client hung up) go through the same
// drop path as payloads that fail validation.
fn ingest_event(state: &AppState, kind: EventKind, body: EventBody) -> Response {
    let result = body
        .map_err(body_rejection)
        .and_then(|body| state.ingest.handle(kind, &body));
    match result {
        Ok(record) => record_response(&record),
        Err(err) => {
            warn!(
                event = kind.as_str(),
                code = err.code(),
                error = %err,
                "Dropped event"
            );
            error_response(&err)
        }
    }
}

async fn method_not_allowed(method: Method, uri: Uri) -> Response {
    let err = IngestError::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    };
    warn!(method = %method, path = %uri.path(), "Only POST requests are accepted");
    error_response(&err)
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(rename = "websiteURL")]
    website_url: String,
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn get_session(
    State(state): State<AppState>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(
                    "missing_field",
                    format!("websiteURL and sessionId are required: {}", rejection),
                )),
            )
                .into_response();
        }
    };

    let key = SessionKey::new(query.website_url, query.session_id);
    match state.ingest.store().get(&key) {
        Ok(record) => record_response(&record),
        Err(err) => error_response(&IngestError::from(err)),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let store = state.ingest.store();
    let data = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "paste_policy": state.ingest.paste_policy().as_str(),
        "websites": store.website_count(),
        "sessions": store.session_count(),
    });
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

fn record_response(record: &SessionRecord) -> Response {
    match serde_json::to_value(record) {
        Ok(value) => (StatusCode::OK, Json(ApiResponse::ok(value))).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(
                "serialization_error",
                format!("Failed to serialize session record: {}", err),
            )),
        )
            .into_response(),
    }
}

fn body_rejection(rejection: BytesRejection) -> IngestError {
    let info = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ErrorInfo::new(
            "request_too_large",
            format!("request exceeded maximum size of {} bytes", MAX_REQUEST_BYTES),
        )
    } else {
        ErrorInfo::new(
            "invalid_body",
            format!("failed to read request body: {}", rejection.body_text()),
        )
    };
    IngestError::BadRequest(info)
}

fn error_response(err: &IngestError) -> Response {
    let status = match err {
        IngestError::BadRequest(info) if info.code == "request_too_large" => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        IngestError::BadRequest(_) => StatusCode::BAD_REQUEST,
        IngestError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        IngestError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
    };
    (
        status,
        Json(ApiResponse::error_with_info(err.to_error_info())),
    )
        .into_response()
}
