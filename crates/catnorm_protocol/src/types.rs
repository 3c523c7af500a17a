//! Canonical enums shared across the workspace.
//!
//! Use these everywhere instead of re-deriving ad-hoc string tags; they are
//! the single source of truth for how pipeline concepts are named on the
//! wire and in the database `CHECK` constraints (see `catnorm_state`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Project-level catalog kind. Drives which attribute extraction and
/// completeness metrics apply (§3, §4.10 of the specification).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Nomenclature,
    Counterparty,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Nomenclature => "nomenclature",
            ProjectType::Counterparty => "counterparty",
        }
    }

    pub const ALL: [ProjectType; 2] = [ProjectType::Nomenclature, ProjectType::Counterparty];
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nomenclature" => Ok(ProjectType::Nomenclature),
            "counterparty" => Ok(ProjectType::Counterparty),
            other => Err(format!("unknown project type: {other}")),
        }
    }
}

/// One of the four ordered pipeline transforms (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocess,
    Patterns,
    Ai,
    Categorize,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [
        Stage::Preprocess,
        Stage::Patterns,
        Stage::Ai,
        Stage::Categorize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::Patterns => "patterns",
            Stage::Ai => "ai",
            Stage::Categorize => "categorize",
        }
    }

    /// The stage that directly precedes this one, if any.
    pub fn previous(&self) -> Option<Stage> {
        let idx = Self::ORDER.iter().position(|s| s == self)?;
        if idx == 0 {
            None
        } else {
            Some(Self::ORDER[idx - 1])
        }
    }

    /// The stage that directly follows this one, if any.
    pub fn next(&self) -> Option<Stage> {
        let idx = Self::ORDER.iter().position(|s| s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preprocess" => Ok(Stage::Preprocess),
            "patterns" => Ok(Stage::Patterns),
            "ai" => Ok(Stage::Ai),
            "categorize" => Ok(Stage::Categorize),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Provenance tag on a normalized item (§3, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingLevel {
    Basic,
    AiEnhanced,
    Benchmark,
}

impl ProcessingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingLevel::Basic => "basic",
            ProcessingLevel::AiEnhanced => "ai_enhanced",
            ProcessingLevel::Benchmark => "benchmark",
        }
    }

    /// Rank used by the master-record quality score (§4.3): higher is better.
    /// `benchmark > ai_enhanced > basic`.
    pub fn rank(&self) -> u8 {
        match self {
            ProcessingLevel::Basic => 0,
            ProcessingLevel::AiEnhanced => 1,
            ProcessingLevel::Benchmark => 2,
        }
    }

    /// Rank normalized to `[0, 1]` for the master-record scoring formula.
    pub fn normalized_rank(&self) -> f64 {
        self.rank() as f64 / 2.0
    }
}

impl fmt::Display for ProcessingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(ProcessingLevel::Basic),
            "ai_enhanced" => Ok(ProcessingLevel::AiEnhanced),
            "benchmark" => Ok(ProcessingLevel::Benchmark),
            other => Err(format!("unknown processing level: {other}")),
        }
    }
}

/// Session lifecycle state (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Stopped,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Pending,
        SessionStatus::Running,
        SessionStatus::Stopped,
        SessionStatus::Completed,
        SessionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Validates the transition table of §4.6. Resume is handled by the
    /// caller (it re-enters `running` from `stopped`/`failed`), so this
    /// only encodes the forward-progress edges.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (*self, next),
            (Pending, Running)
                | (Running, Stopped)
                | (Running, Completed)
                | (Running, Failed)
                | (Stopped, Running)
                | (Failed, Running)
                | (Stopped, Pending) // revert_to rewinds a stopped session to pending
                | (Failed, Pending)
                | (Completed, Pending)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "stopped" => Ok(SessionStatus::Stopped),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Kind of a duplicate group, per the three analyzer passes (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateGroupType {
    Exact,
    Fuzzy,
    Semantic,
}

impl DuplicateGroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateGroupType::Exact => "exact",
            DuplicateGroupType::Fuzzy => "fuzzy",
            DuplicateGroupType::Semantic => "semantic",
        }
    }
}

impl fmt::Display for DuplicateGroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage run within a session's history (§3, "stage history").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub version: i64,
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_failed: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_total() {
        assert_eq!(Stage::Preprocess.next(), Some(Stage::Patterns));
        assert_eq!(Stage::Categorize.next(), None);
        assert_eq!(Stage::Ai.previous(), Some(Stage::Patterns));
        assert_eq!(Stage::Preprocess.previous(), None);
    }

    #[test]
    fn processing_level_ranks_benchmark_highest() {
        assert!(ProcessingLevel::Benchmark.rank() > ProcessingLevel::AiEnhanced.rank());
        assert!(ProcessingLevel::AiEnhanced.rank() > ProcessingLevel::Basic.rank());
    }

    #[test]
    fn session_status_rejects_skipping_running() {
        assert!(!SessionStatus::Pending.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Pending.can_transition_to(SessionStatus::Running));
    }

    #[test]
    fn stage_roundtrips_through_str() {
        for stage in Stage::ORDER {
            let parsed: Stage = stage.to_string().parse().unwrap();
            assert_eq!(parsed, stage);
        }
    }
}
