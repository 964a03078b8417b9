mod error;
mod models;
mod passthrough;
mod rectify;
mod server;
mod stats;
mod streaming;
mod transform;
mod upstream;

pub use error::{ProxyError, error_response, handle_proxy_error};
pub use models::{enrich_models, list_models};
pub use passthrough::{backend_url, forward_passthrough};
pub use rectify::ResponseRectifier;
pub use server::{AppState, ProxyServer, create_router, serve_with_grace};
pub use stats::ProxyStats;
pub use streaming::{ReframeStream, SseReframer, rewrite_event};
pub use transform::{RequestTransformer, SamplingPolicy, TransformedRequest};
pub use upstream::{UpstreamClient, classify_transport_error, forward_headers, response_headers};
