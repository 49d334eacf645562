use std::time::Instant;

use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use folio_auth::{AdminIdentity, expired_session_cookie, session_cookie, session_token};
use serde::Deserialize;

use super::{ApiError, AppState, html_page, json_error, observed};

#[derive(Debug, Default, Deserialize)]
pub(super) struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub(super) async fn login_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.sessions.authenticate(&headers).await.is_ok() {
        return Redirect::to("/dashboard").into_response();
    }
    html_page(crate::render::login_page(None))
}

pub(super) async fn login(
    State(state): State<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let started = Instant::now();
    let form = form.map(|Form(form)| form).unwrap_or_default();

    let credential = state.credential.clone();
    let verified = tokio::task::spawn_blocking(move || {
        credential.verify(&form.username, &form.password)
    })
    .await
    .unwrap_or(false);

    let response = if verified {
        let issued = state.sessions.issue(state.credential.username()).await;
        crate::metrics::observe_login("success");
        tracing::info!(session_id = %issued.identity.session_id, "admin.login");

        let cookie = session_cookie(&issued.token, issued.max_age, state.config.cookie_secure);
        ([(header::SET_COOKIE, cookie)], Redirect::to("/dashboard")).into_response()
    } else {
        crate::metrics::observe_login("rejected");
        tracing::warn!("admin.login_rejected");
        let mut response =
            html_page(crate::render::login_page(Some("Invalid username or password.")));
        if response.status() == StatusCode::OK {
            *response.status_mut() = StatusCode::UNAUTHORIZED;
        }
        response
    };

    observed("/login", "POST", started, response)
}

pub(super) async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers)
        && state.sessions.revoke(&token).await
    {
        tracing::info!("admin.logout");
    }

    (
        [(
            header::SET_COOKIE,
            expired_session_cookie(state.config.cookie_secure),
        )],
        Redirect::to("/login"),
    )
        .into_response()
}

/// Page routes send anonymous visitors to the login form.
pub(super) async fn require_admin_page(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AdminIdentity, Response> {
    state
        .sessions
        .authenticate(headers)
        .await
        .map_err(|_| Redirect::to("/login").into_response())
}

pub(super) async fn require_admin_api(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AdminIdentity, ApiError> {
    state
        .sessions
        .authenticate(headers)
        .await
        .map_err(|err| json_error(StatusCode::UNAUTHORIZED, err.code, err.message, false))
}
