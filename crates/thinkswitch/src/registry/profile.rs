//! Sampling profiles for the two generation modes

use serde_json::Value;

/// Request keys every outgoing body must carry
pub const SAMPLING_KEYS: [&str; 6] = [
    "temperature",
    "top_p",
    "top_k",
    "min_p",
    "presence_penalty",
    "repetition_penalty",
];

/// Fixed sampling defaults applied to a request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingProfile {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: i64,
    pub min_p: f64,
    pub presence_penalty: f64,
    pub repetition_penalty: f64,
}

impl SamplingProfile {
    /// Thinking mode for general tasks
    pub const THINKING_GENERAL: Self = Self {
        temperature: 1.0,
        top_p: 0.95,
        top_k: 20,
        min_p: 0.0,
        presence_penalty: 1.5,
        repetition_penalty: 1.0,
    };

    /// Thinking mode for precise coding tasks
    pub const THINKING_CODING: Self = Self {
        temperature: 0.6,
        top_p: 0.95,
        top_k: 20,
        min_p: 0.0,
        presence_penalty: 0.0,
        repetition_penalty: 1.0,
    };

    /// Instant mode for general tasks
    pub const INSTRUCT_GENERAL: Self = Self {
        temperature: 0.7,
        top_p: 0.8,
        top_k: 20,
        min_p: 0.0,
        presence_penalty: 1.5,
        repetition_penalty: 1.0,
    };

    /// Instant mode for reasoning tasks
    pub const INSTRUCT_REASONING: Self = Self {
        temperature: 1.0,
        top_p: 0.95,
        top_k: 20,
        min_p: 0.0,
        presence_penalty: 1.5,
        repetition_penalty: 1.0,
    };

    /// The profile as JSON values, in `SAMPLING_KEYS` order
    pub fn entries(&self) -> [(&'static str, Value); 6] {
        [
            (SAMPLING_KEYS[0], Value::from(self.temperature)),
            (SAMPLING_KEYS[1], Value::from(self.top_p)),
            (SAMPLING_KEYS[2], Value::from(self.top_k)),
            (SAMPLING_KEYS[3], Value::from(self.min_p)),
            (SAMPLING_KEYS[4], Value::from(self.presence_penalty)),
            (SAMPLING_KEYS[5], Value::from(self.repetition_penalty)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_follow_key_order() {
        let entries = SamplingProfile::THINKING_CODING.entries();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, SAMPLING_KEYS);
    }

    #[test]
    fn test_top_k_serializes_as_integer() {
        let entries = SamplingProfile::INSTRUCT_GENERAL.entries();
        assert_eq!(entries[2].1, serde_json::json!(20));
        assert!(entries[2].1.is_i64());
    }

    #[test]
    fn test_instant_profile_values() {
        let entries = SamplingProfile::INSTRUCT_GENERAL.entries();
        assert_eq!(entries[0].1, serde_json::json!(0.7));
        assert_eq!(entries[1].1, serde_json::json!(0.8));
        assert_eq!(entries[4].1, serde_json::json!(1.5));
    }
}
