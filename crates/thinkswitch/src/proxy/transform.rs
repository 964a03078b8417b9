//! Request rewriting for the completion routes
//!
//! Resolves the virtual model named in the body, applies its sampling
//! profile, pins `chat_template_kwargs.enable_thinking` and swaps the model
//! name for the one the backend actually serves. Every other field is left
//! exactly where the client put it.

use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::registry::{ModelRegistry, SamplingProfile, VirtualModel};

use super::error::ProxyError;
use super::stats::ProxyStats;

/// How client-supplied sampling values are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingPolicy {
    /// Only set keys the client left out
    #[default]
    Fill,
    /// Always overwrite with the profile value
    Enforce,
}

/// A request body ready for the backend
#[derive(Debug, Clone)]
pub struct TransformedRequest {
    /// Serialized outgoing body
    pub body: Bytes,
    /// The virtual model the client asked for
    pub model: VirtualModel,
    /// The client's own `stream` flag, selecting the response path
    pub stream: bool,
}

/// Rewrites completion request bodies against a [`ModelRegistry`]
#[derive(Debug, Clone)]
pub struct RequestTransformer {
    registry: Arc<ModelRegistry>,
    policy: SamplingPolicy,
    stats: Arc<ProxyStats>,
}

impl RequestTransformer {
    pub fn new(registry: Arc<ModelRegistry>, policy: SamplingPolicy, stats: Arc<ProxyStats>) -> Self {
        Self {
            registry,
            policy,
            stats,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Rewrite a raw request body
    ///
    /// # Errors
    /// * `MalformedBody` - body is not a JSON object, or `chat_template_kwargs`
    ///   is present but not an object
    /// * `UnknownModel` - `model` is missing, not a string, or not registered
    /// * `Internal` - the rewritten body could not be serialized
    pub fn transform(&self, body: &[u8]) -> Result<TransformedRequest, ProxyError> {
        let mut value: Value = serde_json::from_slice(body)
            .map_err(|e| ProxyError::MalformedBody(format!("body is not valid JSON: {e}")))?;
        let data = value
            .as_object_mut()
            .ok_or_else(|| ProxyError::MalformedBody("body is not a JSON object".to_string()))?;

        let model = self.resolve(data)?.clone();
        tracing::info!(
            kind = model.kind.as_str(),
            virtual_model = %model.name,
            "Model matched"
        );

        let stream = data.get("stream").and_then(Value::as_bool).unwrap_or(false);

        apply_sampling_params(data, &model.profile, self.policy);
        set_enable_thinking(data, model.thinking)?;
        data.insert(
            "model".to_string(),
            Value::String(self.registry.served_model().to_string()),
        );

        let body = serde_json::to_vec(&value)
            .map_err(|e| ProxyError::Internal(format!("failed to serialize request body: {e}")))?;
        tracing::trace!(body = %String::from_utf8_lossy(&body), "Rewrote request body");

        self.stats.record_modified();

        Ok(TransformedRequest {
            body: Bytes::from(body),
            model,
            stream,
        })
    }

    fn resolve(&self, data: &Map<String, Value>) -> Result<&VirtualModel, ProxyError> {
        let name = match data.get("model") {
            Some(Value::String(name)) => name,
            Some(_) => {
                return Err(ProxyError::UnknownModel(
                    "model field is not a string".to_string(),
                ));
            }
            None => return Err(ProxyError::UnknownModel("missing model field".to_string())),
        };
        self.registry
            .lookup(name)
            .ok_or_else(|| ProxyError::UnknownModel(format!("unsupported model '{name}'")))
    }
}

fn apply_sampling_params(
    data: &mut Map<String, Value>,
    profile: &SamplingProfile,
    policy: SamplingPolicy,
) {
    for (key, default) in profile.entries() {
        match (data.get(key), policy) {
            (Some(current), SamplingPolicy::Fill) => {
                tracing::debug!(
                    key,
                    value = %current,
                    default_value = %default,
                    "Key already set in request, not modifying"
                );
            }
            (Some(current), SamplingPolicy::Enforce) => {
                if *current != default {
                    tracing::debug!(
                        key,
                        value = %current,
                        enforced_value = %default,
                        "Overriding client sampling value"
                    );
                }
                data.insert(key.to_string(), default);
            }
            (None, _) => {
                data.insert(key.to_string(), default);
            }
        }
    }
}

fn set_enable_thinking(data: &mut Map<String, Value>, thinking: bool) -> Result<(), ProxyError> {
    match data.get_mut("chat_template_kwargs") {
        Some(Value::Object(kwargs)) => {
            kwargs.insert("enable_thinking".to_string(), Value::Bool(thinking));
        }
        Some(_) => {
            return Err(ProxyError::MalformedBody(
                "chat_template_kwargs is not an object".to_string(),
            ));
        }
        None => {
            let mut kwargs = Map::new();
            kwargs.insert("enable_thinking".to_string(), Value::Bool(thinking));
            data.insert("chat_template_kwargs".to_string(), Value::Object(kwargs));
        }
    }
    Ok(())
}
