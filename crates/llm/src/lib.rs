//! taraflow generation-endpoint infrastructure adapter.
//!
//! Implements the [`pipeline::provider::LlmProvider`] trait over any
//! OpenAI-compatible chat-completion endpoint. All HTTP transport, request
//! formatting, response salvage, token-bucket admission, retry/backoff and
//! timeout management live here; orchestration code sees only the port.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Additional backends are added as new
//! [`backend::ChatBackend`] implementations without any changes to the
//! `pipeline` crate.

pub mod backend;
pub mod client;
pub mod openai;
pub mod pacer;
pub mod rate_limit;

pub use backend::ChatBackend;
pub use client::{ResilientClient, RetrySettings};
pub use openai::{EndpointConfig, OpenAiChatBackend};
pub use pacer::{Pacer, TokioPacer};
pub use rate_limit::RateLimiter;
