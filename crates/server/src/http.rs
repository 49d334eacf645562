use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::extract::rejection::FormRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Datelike;
use folio_auth::{AdminCredential, SessionRegistry};
use folio_store::{DocumentStore, StoreError, UploadStore};
use serde::{Deserialize, Serialize};

use crate::config::{ServerConfig, StartupError};
use crate::mail::{ContactMessage, ContactRelay};
use crate::rate_limit::ContactThrottle;

mod assets;
mod dashboard;
mod session;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    store: DocumentStore,
    uploads: UploadStore,
    credential: AdminCredential,
    sessions: SessionRegistry,
    relay: ContactRelay,
    contact_throttle: ContactThrottle,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: ServerConfig) -> Result<Router, StartupError> {
    let credential = AdminCredential::new(&config.admin_username, &config.admin_password_hash)
        .map_err(|err| StartupError {
            code: err.code,
            message: err.message,
        })?;

    let relay = ContactRelay::new(&config.mail).map_err(|err| StartupError {
        code: "ERR_INVALID_CONFIG",
        message: format!("failed to initialize mail relay client: {}", err),
    })?;
    if relay.is_configured() {
        tracing::info!(transport = relay.kind(), "contact relay ready");
    } else {
        tracing::warn!("no mail transport configured; contact messages will not be delivered");
    }

    let store = DocumentStore::new(
        config.data_file.clone(),
        Duration::from_millis(config.store_io_timeout_ms),
    );
    let uploads = UploadStore::new(config.static_dir.clone(), &config.upload_dir)
        .with_io_timeout(Duration::from_millis(config.store_io_timeout_ms))
        .with_protected_path(config.data_file.clone());

    tokio::fs::create_dir_all(uploads.directory())
        .await
        .map_err(|err| StartupError {
            code: "ERR_STORE_UNAVAILABLE",
            message: format!(
                "failed to create upload directory {}: {}",
                uploads.directory().display(),
                err
            ),
        })?;

    // Seeds the data file on first start and fails fast on an unusable path.
    store.load().await.map_err(|err| StartupError {
        code: err.code(),
        message: format!("failed to load profile document: {}", err),
    })?;

    let sessions = SessionRegistry::new(
        Duration::from_secs(config.session_ttl_secs),
        config.session_max_active,
    );
    let contact_throttle = ContactThrottle::new(
        Duration::from_secs(config.contact_rate_limit_window_secs.max(1)),
        config.contact_rate_limit_per_window,
        16_384,
    );
    let max_upload_bytes = config.max_upload_bytes;

    let state = AppState {
        config,
        store,
        uploads,
        credential,
        sessions,
        relay,
        contact_throttle,
    };

    Ok(Router::new()
        .route("/", get(home))
        .route("/contact", post(contact))
        .route("/login", get(session::login_page).post(session::login))
        .route("/logout", get(session::logout))
        .route("/dashboard", get(dashboard::show).post(dashboard::submit))
        .route(
            "/api/profile",
            get(dashboard::get_profile).put(dashboard::put_profile),
        )
        .route("/static/{*path}", get(assets::static_file))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state))
}

fn observed(route: &str, method: &str, started: Instant, response: Response) -> Response {
    crate::metrics::observe_http_request(
        route,
        method,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let data_file_ready = tokio::fs::metadata(state.store.path())
        .await
        .is_ok_and(|meta| meta.is_file());
    checks.insert("data_file", data_file_ready);

    let uploads_ready = tokio::fs::metadata(state.uploads.directory())
        .await
        .is_ok_and(|meta| meta.is_dir() && !meta.permissions().readonly());
    checks.insert("upload_dir", uploads_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if state.config.metrics_require_auth
        && let Err(err) = session::require_admin_api(&state, &headers).await
    {
        return err.into_response();
    }

    crate::metrics::set_active_sessions(state.sessions.active().await);

    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn home(State(state): State<AppState>) -> Response {
    let started = Instant::now();

    let response = match state.store.load().await {
        Ok(document) => html_page(crate::render::home_page(
            &document,
            chrono::Utc::now().year(),
        )),
        Err(err) => store_page_error(&err),
    };

    observed("/", "GET", started, response)
}

#[derive(Debug, Default, Deserialize)]
struct ContactForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    user_email: String,
    #[serde(default)]
    message: String,
}

/// Always answers with the same redirect; delivery happens in the background.
async fn contact(
    State(state): State<AppState>,
    form: Result<Form<ContactForm>, FormRejection>,
) -> Response {
    let started = Instant::now();

    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "contact.rejected");
            ContactForm::default()
        }
    };

    if form.user_email.trim().is_empty() && form.message.trim().is_empty() {
        crate::metrics::observe_contact_delivery("empty");
    } else if !state.contact_throttle.admit(&form.user_email) {
        tracing::warn!("contact.throttled");
        crate::metrics::observe_contact_delivery("throttled");
    } else {
        match state.store.load().await {
            Ok(document) => {
                let message = ContactMessage {
                    sender_name: form.name.trim().to_string(),
                    sender_email: form.user_email.trim().to_string(),
                    message: form.message,
                };
                let _ = state.relay.dispatch(message, document.contact_email);
            }
            Err(err) => {
                tracing::warn!(code = err.code(), error = %err, "contact.document_unavailable");
                crate::metrics::observe_contact_delivery("store_error");
            }
        }
    }

    observed(
        "/contact",
        "POST",
        started,
        Redirect::to("/#contact").into_response(),
    )
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}

fn store_error_status(err: &StoreError) -> (StatusCode, bool) {
    match err {
        StoreError::InvalidFilename(_) => (StatusCode::BAD_REQUEST, false),
        StoreError::Timeout => (StatusCode::GATEWAY_TIMEOUT, true),
        StoreError::Io { .. } => (StatusCode::SERVICE_UNAVAILABLE, true),
        StoreError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, false),
    }
}

fn store_api_error(err: &StoreError) -> ApiError {
    let (status, retryable) = store_error_status(err);
    json_error(status, err.code(), err.to_string(), retryable)
}

fn html_page(rendered: askama::Result<String>) -> Response {
    match rendered {
        Ok(body) => Html(body).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "page.render_failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn store_page_error(err: &StoreError) -> Response {
    tracing::error!(code = err.code(), error = %err, "document.unavailable");
    match err {
        StoreError::InvalidFilename(_) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "The profile could not be loaded or saved.",
        )
            .into_response(),
    }
}
