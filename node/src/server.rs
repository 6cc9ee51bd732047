// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::errors::RetrievalError;
use crate::retrieval::Retriever;
use axum::{
    body::Body,
    extract::{Path, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use ferry_kernel::config::SNIFF_LEN;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub type SharedRetriever = Arc<Retriever>;

pub fn build_router(retriever: SharedRetriever) -> Router {
    Router::new()
        .route("/ipfs/*path", get(fetch_path))
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(retriever)
}

/// Streams the content at `<root>/<path>`. Errors raised before the first
/// byte become a status code; later ones abort the body.
async fn fetch_path(
    State(retriever): State<SharedRetriever>,
    Path(path): Path<String>,
) -> Result<Response, RetrievalError> {
    let fetched = retriever.fetch(&path).await?;
    let mut body = fetched.body;

    let mut head: Vec<Bytes> = Vec::new();
    let mut head_len = 0;
    while head_len < SNIFF_LEN {
        match body.next().await {
            Some(chunk) => {
                let chunk = chunk?;
                head_len += chunk.len();
                head.push(chunk);
            }
            None => break,
        }
    }
    let sniffed: Vec<u8> = head.iter().flat_map(|c| c.iter().copied()).take(SNIFF_LEN).collect();
    let content_type = content_type_for(&fetched.name, &sniffed);

    let rest = stream::iter(head.into_iter().map(Ok::<_, RetrievalError>)).chain(body);
    Ok(([(CONTENT_TYPE, content_type)], Body::from_stream(rest)).into_response())
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}

async fn healthz() -> &'static str {
    "ok"
}

/// Picks a content type from the file extension, falling back to sniffing.
pub fn content_type_for(name: &str, head: &[u8]) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    let by_ext = match ext.as_deref() {
        Some("html" | "htm") => Some("text/html; charset=utf-8"),
        Some("txt" | "md") => Some("text/plain; charset=utf-8"),
        Some("css") => Some("text/css"),
        Some("js") => Some("application/javascript"),
        Some("json") => Some("application/json"),
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("svg") => Some("image/svg+xml"),
        Some("pdf") => Some("application/pdf"),
        Some("wasm") => Some("application/wasm"),
        Some("mp4") => Some("video/mp4"),
        _ => None,
    };
    by_ext.unwrap_or_else(|| sniff(head))
}

fn sniff(head: &[u8]) -> &'static str {
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if head.starts_with(&[0xff, 0xd8, 0xff]) {
        return "image/jpeg";
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    // The sniff window may cut a multi-byte character in half.
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => match std::str::from_utf8(&head[..e.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return "application/octet-stream",
        },
        Err(_) => return "application/octet-stream",
    };
    let trimmed = text.trim_start();
    let lower = trimmed.get(..14).unwrap_or(trimmed).to_ascii_lowercase();
    if lower.starts_with("<!doctype html") || lower.starts_with("<html") {
        return "text/html; charset=utf-8";
    }
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
    {
        return "application/json";
    }
    if head.is_empty() || head.iter().any(|&b| b < 0x09) {
        return "application/octet-stream";
    }
    "text/plain; charset=utf-8"
}
