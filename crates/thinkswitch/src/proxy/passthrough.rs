//! Verbatim forwarding for every route the proxy does not rewrite
//!
//! The request body is read once and sent unchanged; the backend's response
//! is streamed back without buffering so downloads and event streams on
//! other routes behave exactly as they would against the backend directly.

use axum::{
    body::Body,
    extract::Request,
    http::Response,
};
use url::Url;

use super::error::ProxyError;
use super::stats::ProxyStats;
use super::upstream::{UpstreamClient, response_headers};

/// Build the backend URL for a request path and query
///
/// The backend base path and the request path are joined with exactly one
/// slash. Query strings from both sides are kept, base first, joined by `&`.
pub fn backend_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    url.set_path(&join_path(base.path(), path));

    let base_query = base.query().filter(|q| !q.is_empty());
    let query = query.filter(|q| !q.is_empty());
    let merged = match (base_query, query) {
        (Some(a), Some(b)) => Some(format!("{a}&{b}")),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    };
    url.set_query(merged.as_deref());
    url.set_fragment(None);
    url
}

fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Forward `request` unchanged and stream the backend's answer back
pub async fn forward_passthrough(
    upstream: &UpstreamClient,
    stats: &ProxyStats,
    request: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::Internal(format!("failed to read request body: {e}")))?;

    tracing::debug!(
        method = %parts.method,
        path = parts.uri.path(),
        "Forwarding request unchanged"
    );

    let response = upstream
        .send(
            parts.method,
            parts.uri.path(),
            parts.uri.query(),
            &parts.headers,
            body,
        )
        .await?;
    stats.record_proxied();

    let status = response.status();
    let headers = response_headers(response.headers(), false);

    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    Ok(out)
}
