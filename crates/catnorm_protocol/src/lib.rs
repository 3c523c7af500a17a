//! Wire types shared across the catalog normalizer.
//!
//! Mirrors the split the teacher workspace uses for its own protocol crate:
//! canonical enums and ids in [`types`], event envelopes in [`events`], the
//! external LLM chat-completion schema in [`llm`], the persisted
//! configuration document in [`config`], and header-free constants in
//! [`defaults`].

pub mod cancel;
pub mod config;
pub mod defaults;
pub mod events;
pub mod llm;
pub mod metrics;
pub mod types;

pub use cancel::CancellationToken;
pub use events::{Event, EventPayload, EventType};
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmErrorKind, NormalizationReply};
pub use metrics::{Metrics, MetricsSnapshot, METRICS};
pub use types::{
    DuplicateGroupType, ProcessingLevel, ProjectType, SessionStatus, Stage, StageOutcome,
};
