//! Event bus envelope and payloads (§4.9).
//!
//! Kept separate from the stage/session types so `catnorm_events` (the bus
//! itself) can depend only on wire shapes, not on the crates that produce
//! them.

use crate::types::Stage;
use catnorm_ids::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminant for [`Event`]. Non-exhaustive in the specification; kept
/// as a closed enum here because every event this core emits is listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StageStarted,
    StageProgress,
    StageCompleted,
    DatabaseStarted,
    DatabaseStopped,
    DatabaseCompleted,
    NormalizationStopped,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StageStarted => "stage_started",
            EventType::StageProgress => "stage_progress",
            EventType::StageCompleted => "stage_completed",
            EventType::DatabaseStarted => "database_started",
            EventType::DatabaseStopped => "database_stopped",
            EventType::DatabaseCompleted => "database_completed",
            EventType::NormalizationStopped => "normalization_stopped",
            EventType::Error => "error",
        }
    }
}

/// Structured payload carried by an [`Event`]. The variant always matches
/// the envelope's `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    StageStarted {
        stage: Stage,
        version: i64,
    },
    StageProgress {
        stage: Stage,
        processed: u64,
        total: u64,
        progress_percent: f64,
    },
    StageCompleted {
        stage: Stage,
        version: i64,
        rows_in: u64,
        rows_out: u64,
        rows_failed: u64,
    },
    DatabaseStarted,
    DatabaseStopped {
        reason: String,
    },
    DatabaseCompleted,
    NormalizationStopped {
        processed: u64,
        total: u64,
        progress_percent: f64,
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Event envelope pushed onto the bus. `timestamp` is monotone per
/// `session_id` across every subscriber that receives it (§4.9, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(session_id: SessionId, payload: EventPayload) -> Self {
        let event_type = match &payload {
            EventPayload::StageStarted { .. } => EventType::StageStarted,
            EventPayload::StageProgress { .. } => EventType::StageProgress,
            EventPayload::StageCompleted { .. } => EventType::StageCompleted,
            EventPayload::DatabaseStarted => EventType::DatabaseStarted,
            EventPayload::DatabaseStopped { .. } => EventType::DatabaseStopped,
            EventPayload::DatabaseCompleted => EventType::DatabaseCompleted,
            EventPayload::NormalizationStopped { .. } => EventType::NormalizationStopped,
            EventPayload::Error { .. } => EventType::Error,
        };
        Self {
            event_type,
            timestamp: Utc::now(),
            session_id,
            payload,
        }
    }

    /// Render as the two-line `event: <type>` / `data: <json>` shape the
    /// external transport layer streams to clients (§6).
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        let data = serde_json::to_string(&self)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.event_type.as_str(), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_payload() {
        let event = Event::new(
            SessionId::new(),
            EventPayload::StageStarted {
                stage: Stage::Preprocess,
                version: 1,
            },
        );
        assert_eq!(event.event_type, EventType::StageStarted);
    }

    #[test]
    fn sse_rendering_contains_event_line() {
        let event = Event::new(SessionId::new(), EventPayload::DatabaseCompleted);
        let rendered = event.to_sse().unwrap();
        assert!(rendered.starts_with("event: database_completed\n"));
        assert!(rendered.contains("data: "));
    }
}
