use std::time::Instant;

use axum::Json;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use folio_contracts::{EditBatch, ProfileDocument};
use folio_editor::{FormFields, ImageUpload, edit_batch_from_form, fields, submit_edit};
use folio_store::StoreError;
use tracing::Instrument;
use ulid::Ulid;

use super::session::{require_admin_api, require_admin_page};
use super::{
    ApiError, AppState, html_page, json_error, observed, store_api_error, store_page_error,
};

pub(super) async fn show(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let started = Instant::now();

    let response = match require_admin_page(&state, &headers).await {
        Err(redirect) => redirect,
        Ok(admin) => match state.store.load().await {
            Ok(document) => {
                let failure = state.relay.last_failure().await;
                html_page(crate::render::dashboard_page(
                    &document,
                    &admin,
                    failure.as_ref(),
                ))
            }
            Err(err) => store_page_error(&err),
        },
    };

    observed("/dashboard", "GET", started, response)
}

pub(super) async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let started = Instant::now();

    let admin = match require_admin_page(&state, &headers).await {
        Ok(admin) => admin,
        Err(redirect) => return observed("/dashboard", "POST", started, redirect),
    };

    let submission = match multipart {
        Ok(multipart) => read_submission(multipart).await.map_err(|err| err.to_string()),
        Err(rejection) => Err(rejection.to_string()),
    };
    let (form, image) = match submission {
        Ok(parts) => parts,
        Err(message) => {
            tracing::warn!(error = %message, "dashboard.bad_submission");
            let response = (StatusCode::BAD_REQUEST, message).into_response();
            return observed("/dashboard", "POST", started, response);
        }
    };

    let has_image = image.as_ref().is_some_and(ImageUpload::is_present);
    let result = save_edit(&state, &admin, edit_batch_from_form(&form), image).await;
    if has_image {
        crate::metrics::observe_upload(if result.is_ok() { "ok" } else { "error" });
    }

    let response = match result {
        Ok(_) => Redirect::to("/dashboard").into_response(),
        Err(err) => store_page_error(&err),
    };
    observed("/dashboard", "POST", started, response)
}

pub(super) async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<ProfileDocument>), ApiError> {
    require_admin_api(&state, &headers).await?;

    let document = state
        .store
        .load()
        .await
        .map_err(|err| store_api_error(&err))?;

    let mut resp_headers = HeaderMap::new();
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", document.fingerprint())) {
        resp_headers.insert(header::ETAG, etag);
    }
    Ok((resp_headers, Json(document)))
}

pub(super) async fn put_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<EditBatch>, JsonRejection>,
) -> Result<Json<ProfileDocument>, ApiError> {
    let started = Instant::now();

    let result: Result<Json<ProfileDocument>, ApiError> = async {
        let admin = require_admin_api(&state, &headers).await?;
        let Json(batch) = req.map_err(|rejection| {
            json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_JSON",
                rejection.body_text(),
                false,
            )
        })?;

        save_edit(&state, &admin, batch, None)
            .await
            .map(Json)
            .map_err(|err| store_api_error(&err))
    }
    .await;

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(
        "/api/profile",
        "PUT",
        status.as_u16(),
        started.elapsed(),
    );
    result
}

async fn save_edit(
    state: &AppState,
    admin: &folio_auth::AdminIdentity,
    batch: EditBatch,
    image: Option<ImageUpload>,
) -> Result<ProfileDocument, StoreError> {
    let span = tracing::info_span!(
        "dashboard.submit",
        request_id = %Ulid::new(),
        session_id = %admin.session_id,
        fingerprint = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let result = submit_edit(&state.store, &state.uploads, batch, image).await;

        let outcome = match &result {
            Ok(document) => {
                tracing::Span::current().record("fingerprint", document.fingerprint().as_str());
                "ok"
            }
            Err(err) => {
                tracing::warn!(code = err.code(), error = %err, "dashboard.save_failed");
                err.code()
            }
        };
        crate::metrics::observe_document_save(outcome);
        tracing::Span::current().record("latency_ms", started.elapsed().as_millis() as u64);
        tracing::Span::current().record("outcome", outcome);

        result
    }
    .instrument(span)
    .await
}

/// Splits a multipart body into text fields and the optional image part.
async fn read_submission(
    mut multipart: Multipart,
) -> Result<(FormFields, Option<ImageUpload>), MultipartError> {
    let mut form = FormFields::new();
    let mut image = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == fields::IMAGE {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            image = Some(ImageUpload {
                filename,
                bytes: bytes.to_vec(),
            });
        } else {
            form.push(name, field.text().await?);
        }
    }

    Ok((form, image))
}
