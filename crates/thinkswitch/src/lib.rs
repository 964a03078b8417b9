//! Thinkswitch - model-routing proxy for a single Qwen3.5 backend
//!
//! Clients pick one of four virtual model names; each name selects a
//! sampling profile and whether the chat template runs in thinking mode.
//! Requests are rewritten for the one model the backend actually serves,
//! and responses are relabelled with the name the client asked for.

pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;

pub use error::ThinkswitchError;
