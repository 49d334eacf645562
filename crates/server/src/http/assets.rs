use std::path::{Component, Path as FsPath};
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::{AppState, observed};

pub(super) async fn static_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Response {
    let started = Instant::now();
    let response = match resolve(&state, &path) {
        Some(full) => match tokio::fs::read(&full).await {
            Ok(bytes) => {
                let uploaded = FsPath::new(&path).starts_with(&state.config.upload_dir);
                let (content_type, attachment) = served_as(&full, uploaded);
                let mut headers = HeaderMap::new();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
                headers.insert(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                );
                if attachment {
                    headers.insert(
                        header::CONTENT_DISPOSITION,
                        HeaderValue::from_static("attachment"),
                    );
                }
                (headers, bytes).into_response()
            }
            Err(_) => StatusCode::NOT_FOUND.into_response(),
        },
        None => StatusCode::NOT_FOUND.into_response(),
    };
    observed("/static/{*path}", "GET", started, response)
}

/// Content type and whether to force a download. Uploaded files that a
/// browser would run as a document or script are handed out as opaque bytes.
fn served_as(path: &FsPath, uploaded: bool) -> (&'static str, bool) {
    let content_type = content_type_for(path);
    if uploaded && is_active_content(content_type) {
        ("application/octet-stream", true)
    } else {
        (content_type, false)
    }
}

fn is_active_content(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    matches!(
        mime,
        "text/html" | "image/svg+xml" | "text/javascript" | "application/xml" | "text/xml"
    )
}

/// Maps a request path onto the static root. Hidden files (including the
/// store's temp files) and the data file itself are never served.
fn resolve(state: &AppState, rel: &str) -> Option<std::path::PathBuf> {
    let rel = FsPath::new(rel);
    if !is_safe_rel_path(rel) {
        return None;
    }

    let full = state.config.static_dir.join(rel);
    if full.as_path() == state.store.path() {
        return None;
    }
    Some(full)
}

fn is_safe_rel_path(path: &FsPath) -> bool {
    let mut components = path.components().peekable();
    components.peek().is_some()
        && components.all(|c| match c {
            Component::Normal(part) => !part.to_string_lossy().starts_with('.'),
            Component::CurDir
            | Component::ParentDir
            | Component::RootDir
            | Component::Prefix(_) => false,
        })
}

fn content_type_for(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
