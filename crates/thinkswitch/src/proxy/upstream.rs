//! Backend dispatch
//!
//! One pooled `reqwest` client talks to the single configured backend.
//! Transport failures are classified into the proxy error taxonomy: a refused
//! connection means the backend is down (502), anything else is ours (500).

use axum::http::{HeaderMap, Method, header};
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use url::Url;

use crate::error::{Result, ThinkswitchError};

use super::error::ProxyError;
use super::passthrough::backend_url;

/// Hop-by-hop headers that should not be forwarded in either direction
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

/// Client for the one backend every request goes to
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: Url,
}

impl UpstreamClient {
    /// Build the pooled client
    ///
    /// Only connecting is bounded; a generation may legitimately run for
    /// minutes, so there is no total request timeout.
    pub fn new(base_url: Url, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ThinkswitchError::Proxy(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// Forward a request to the backend at `path`/`query`
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: impl Into<reqwest::Body>,
    ) -> std::result::Result<reqwest::Response, ProxyError> {
        let url = backend_url(&self.base_url, path, query);
        tracing::debug!(%method, %url, "Sending request to backend");

        self.client
            .request(method, url)
            .headers(forward_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))
    }
}

/// Request headers to send upstream
///
/// Multi-valued headers are kept as-is. Hop-by-hop headers are dropped, and
/// so is `Content-Length`, which the client recomputes from the new body.
pub fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) || name == header::CONTENT_LENGTH {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// Response headers to hand back to the client
///
/// Set `body_rewritten` when the body may differ from the backend's, so the
/// stale `Content-Length` is dropped and recomputed on the way out.
pub fn response_headers(headers: &HeaderMap, body_rewritten: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) || (body_rewritten && name == header::CONTENT_LENGTH) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Map a transport failure onto the proxy error taxonomy
///
/// Walks the source chain looking for a refused connection; the message is
/// only ever logged.
pub fn classify_transport_error(error: &(dyn StdError + 'static)) -> ProxyError {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return ProxyError::BackendUnavailable(error.to_string());
            }
        }
        current = err.source();
    }
    ProxyError::Internal(format!("upstream request failed: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "error sending request")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_connection_refused_is_backend_unavailable() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            classify_transport_error(&err),
            ProxyError::BackendUnavailable(_)
        ));
    }

    #[test]
    fn test_nested_connection_refused_is_found() {
        let err = Wrapped(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(
            classify_transport_error(&err),
            ProxyError::BackendUnavailable(_)
        ));
    }

    #[test]
    fn test_other_transport_errors_are_internal() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::TimedOut,
            io::ErrorKind::BrokenPipe,
        ] {
            let err = Wrapped(io::Error::new(kind, "boom"));
            assert!(matches!(classify_transport_error(&err), ProxyError::Internal(_)));
        }
    }

    #[test]
    fn test_forward_headers_strips_hop_by_hop_and_length() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("proxy:9000"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-length", HeaderValue::from_static("42"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.append("x-tag", HeaderValue::from_static("b"));

        let forwarded = forward_headers(&headers);
        assert!(forwarded.get("host").is_none());
        assert!(forwarded.get("connection").is_none());
        assert!(forwarded.get("content-length").is_none());
        assert_eq!(forwarded.get("authorization").unwrap(), "Bearer t");
        let tags: Vec<_> = forwarded.get_all("x-tag").iter().collect();
        assert_eq!(tags, ["a", "b"]);
    }

    #[test]
    fn test_response_headers_content_length_handling() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("10"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let rewritten = response_headers(&headers, true);
        assert!(rewritten.get("content-length").is_none());
        assert!(rewritten.get("transfer-encoding").is_none());
        assert_eq!(rewritten.get("content-type").unwrap(), "application/json");

        let untouched = response_headers(&headers, false);
        assert_eq!(untouched.get("content-length").unwrap(), "10");
    }
}
