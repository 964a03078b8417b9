//! `GET /v1/models` enrichment
//!
//! The backend lists the one model it serves. Clients should instead see the
//! virtual names, so the served entry is cloned once per virtual model with
//! only the `id` changed.

use axum::{
    body::Body,
    extract::Request,
    http::{Response, header},
};
use bytes::Bytes;
use serde_json::Value;

use crate::registry::ModelRegistry;

use super::error::ProxyError;
use super::stats::ProxyStats;
use super::upstream::{UpstreamClient, response_headers};

/// Fetch the backend listing and answer with the virtual models
pub async fn list_models(
    upstream: &UpstreamClient,
    registry: &ModelRegistry,
    stats: &ProxyStats,
    request: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let (parts, _) = request.into_parts();

    // The listing is parsed on the way back, so ask for it uncompressed
    let mut headers = parts.headers;
    headers.remove(header::ACCEPT_ENCODING);

    let response = upstream
        .send(
            parts.method,
            parts.uri.path(),
            parts.uri.query(),
            &headers,
            Bytes::new(),
        )
        .await?;
    stats.record_proxied();

    let status = response.status();
    let backend_headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::Internal(format!("failed to read models response: {e}")))?;

    let (headers, body) = match enrich_models(&body, registry)? {
        Some(enriched) => (response_headers(&backend_headers, true), Bytes::from(enriched)),
        None => (response_headers(&backend_headers, false), body),
    };

    let mut out = Response::new(Body::from(body));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    Ok(out)
}

/// Rewrite a models listing for the registry
///
/// Returns `Ok(None)` when the body should be passed through unchanged (not
/// a JSON object, or no `data` entries), and `BackendUnavailable` when the
/// backend does not list the served model.
pub fn enrich_models(body: &[u8], registry: &ModelRegistry) -> Result<Option<Vec<u8>>, ProxyError> {
    let Ok(Value::Object(mut envelope)) = serde_json::from_slice::<Value>(body) else {
        tracing::debug!("Models response is not a JSON object, passing through");
        return Ok(None);
    };

    let served = registry.served_model();
    let template = match envelope.get("data") {
        Some(Value::Array(entries)) if !entries.is_empty() => entries
            .iter()
            .find(|entry| entry.get("id").and_then(Value::as_str) == Some(served))
            .cloned()
            .ok_or_else(|| {
                ProxyError::BackendUnavailable(format!(
                    "backend does not list served model '{served}'"
                ))
            })?,
        _ => {
            tracing::debug!("Models response has no data entries, passing through");
            return Ok(None);
        }
    };

    let data: Vec<Value> = registry
        .models()
        .iter()
        .map(|model| {
            let mut entry = template.clone();
            if let Some(fields) = entry.as_object_mut() {
                fields.insert("id".to_string(), Value::String(model.name.clone()));
            }
            entry
        })
        .collect();
    tracing::debug!(count = data.len(), "Listing virtual models");
    envelope.insert("data".to_string(), Value::Array(data));

    serde_json::to_vec(&envelope)
        .map(Some)
        .map_err(|e| ProxyError::Internal(format!("failed to serialize models listing: {e}")))
}
