//! Virtual model registry
//!
//! Maps the client-facing model names to a sampling profile and a thinking
//! toggle. Built once from configuration and never mutated afterwards.

mod profile;

pub use profile::{SAMPLING_KEYS, SamplingProfile};

use std::collections::HashMap;

use crate::config::ModelsConfig;
use crate::error::{Result, ThinkswitchError};

/// The four generation flavours a virtual model can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    ThinkingGeneral,
    ThinkingCoding,
    InstructGeneral,
    InstructReasoning,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::ThinkingGeneral,
        ModelKind::ThinkingCoding,
        ModelKind::InstructGeneral,
        ModelKind::InstructReasoning,
    ];

    pub fn thinking(self) -> bool {
        matches!(self, ModelKind::ThinkingGeneral | ModelKind::ThinkingCoding)
    }

    pub fn profile(self) -> SamplingProfile {
        match self {
            ModelKind::ThinkingGeneral => SamplingProfile::THINKING_GENERAL,
            ModelKind::ThinkingCoding => SamplingProfile::THINKING_CODING,
            ModelKind::InstructGeneral => SamplingProfile::INSTRUCT_GENERAL,
            ModelKind::InstructReasoning => SamplingProfile::INSTRUCT_REASONING,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::ThinkingGeneral => "thinking_general",
            ModelKind::ThinkingCoding => "thinking_coding",
            ModelKind::InstructGeneral => "instruct_general",
            ModelKind::InstructReasoning => "instruct_reasoning",
        }
    }
}

/// A client-facing model name bound to its generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualModel {
    pub name: String,
    pub kind: ModelKind,
    pub profile: SamplingProfile,
    pub thinking: bool,
}

impl VirtualModel {
    pub fn new(name: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            profile: kind.profile(),
            thinking: kind.thinking(),
        }
    }
}

/// Immutable lookup table from virtual name to [`VirtualModel`]
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    served_model: String,
    models: Vec<VirtualModel>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    /// Build a registry, rejecting empty or colliding names
    pub fn new(
        served_model: impl Into<String>,
        models: impl IntoIterator<Item = VirtualModel>,
    ) -> Result<Self> {
        let served_model = served_model.into();
        if served_model.is_empty() {
            return Err(ThinkswitchError::Config(
                "served model name cannot be empty".to_string(),
            ));
        }

        let models: Vec<VirtualModel> = models.into_iter().collect();
        let mut index = HashMap::with_capacity(models.len());
        for (i, model) in models.iter().enumerate() {
            if model.name.is_empty() {
                return Err(ThinkswitchError::Config(format!(
                    "{} model name cannot be empty",
                    model.kind.as_str()
                )));
            }
            if model.name == served_model {
                return Err(ThinkswitchError::Config(format!(
                    "virtual model '{}' cannot reuse the served model name",
                    model.name
                )));
            }
            if index.insert(model.name.clone(), i).is_some() {
                return Err(ThinkswitchError::Config(format!(
                    "virtual model name '{}' is configured more than once",
                    model.name
                )));
            }
        }

        Ok(Self {
            served_model,
            models,
            index,
        })
    }

    /// Build the four-way registry from the `[models]` section
    pub fn from_config(config: &ModelsConfig) -> Result<Self> {
        let names = [
            &config.thinking_general,
            &config.thinking_coding,
            &config.instruct_general,
            &config.instruct_reasoning,
        ];
        let models = ModelKind::ALL
            .into_iter()
            .zip(names)
            .map(|(kind, name)| VirtualModel::new(name.clone(), kind));
        Self::new(config.served_model.clone(), models)
    }

    /// Exact, case-sensitive lookup
    pub fn lookup(&self, name: &str) -> Option<&VirtualModel> {
        self.index.get(name).map(|&i| &self.models[i])
    }

    pub fn served_model(&self) -> &str {
        &self.served_model
    }

    /// Registered models in configuration order
    pub fn models(&self) -> &[VirtualModel] {
        &self.models
    }
}
