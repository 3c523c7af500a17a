//! Row types returned by the repositories in this crate.
//!
//! Parsed by hand from `sqlx::sqlite::SqliteRow` rather than `#[derive(FromRow)]`
//! since several columns hold a `catnorm_protocol` enum serialized as its
//! `Display`/`FromStr` string form, mirroring the teacher's own
//! `row_to_session`-style manual conversion.

use catnorm_db::{DbError, DbTimestamp, Result};
use catnorm_ids::{
    BenchmarkId, CatalogItemId, ClientId, NormalizedItemId, ProjectId, SessionId, SourceDatabaseId,
};
use catnorm_protocol::{ProcessingLevel, ProjectType, SessionStatus, Stage};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::collections::HashMap;
use std::str::FromStr;

fn parse_timestamp(raw: &str) -> Result<DbTimestamp> {
    DbTimestamp::from_rfc3339(raw).map_err(|e| DbError::InvalidState(e.to_string()))
}

fn parse_field<T: FromStr>(column: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| DbError::InvalidState(format!("invalid {column} {raw:?}: {e}")))
}

#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub country: Option<String>,
    pub created_at: DbTimestamp,
}

impl Client {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let id: String = row.try_get("id")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            id: parse_field("client id", &id)?,
            name: row.try_get("name")?,
            country: row.try_get("country")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: ProjectId,
    pub client_id: ClientId,
    pub name: String,
    pub project_type: ProjectType,
    pub created_at: DbTimestamp,
}

impl Project {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let id: String = row.try_get("id")?;
        let client_id: String = row.try_get("client_id")?;
        let project_type: String = row.try_get("project_type")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            id: parse_field("project id", &id)?,
            client_id: parse_field("client id", &client_id)?,
            name: row.try_get("name")?,
            project_type: parse_field("project type", &project_type)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

/// SourceDatabase lifecycle: pending, bound, active, inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDatabaseStatus {
    Pending,
    Bound,
    Active,
    Inactive,
}

impl SourceDatabaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDatabaseStatus::Pending => "pending",
            SourceDatabaseStatus::Bound => "bound",
            SourceDatabaseStatus::Active => "active",
            SourceDatabaseStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for SourceDatabaseStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SourceDatabaseStatus::Pending),
            "bound" => Ok(SourceDatabaseStatus::Bound),
            "active" => Ok(SourceDatabaseStatus::Active),
            "inactive" => Ok(SourceDatabaseStatus::Inactive),
            other => Err(format!("unknown source database status: {other}")),
        }
    }
}

impl std::fmt::Display for SourceDatabaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SourceDatabase {
    pub id: SourceDatabaseId,
    pub project_id: ProjectId,
    pub display_name: String,
    pub path: String,
    pub database_type: ProjectType,
    pub status: SourceDatabaseStatus,
    pub file_size: u64,
    pub created_at: DbTimestamp,
}

impl SourceDatabase {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let id: String = row.try_get("id")?;
        let project_id: String = row.try_get("project_id")?;
        let database_type: String = row.try_get("database_type")?;
        let status: String = row.try_get("status")?;
        let file_size: i64 = row.try_get("file_size")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            id: parse_field("source database id", &id)?,
            project_id: parse_field("project id", &project_id)?,
            display_name: row.try_get("display_name")?,
            path: row.try_get("path")?,
            database_type: parse_field("database type", &database_type)?,
            status: parse_field("source database status", &status)?,
            file_size: file_size.max(0) as u64,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub id: CatalogItemId,
    pub source_database_id: SourceDatabaseId,
    pub source_reference: String,
    pub source_name: String,
    pub code: Option<String>,
    pub attributes: HashMap<String, Vec<String>>,
    pub ingested_at: DbTimestamp,
}

impl CatalogItem {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let id: i64 = row.try_get("id")?;
        let source_database_id: String = row.try_get("source_database_id")?;
        let attributes_json: String = row.try_get("attributes_json")?;
        let ingested_at: String = row.try_get("ingested_at")?;
        let attributes = serde_json::from_str(&attributes_json)?;
        Ok(Self {
            id: CatalogItemId(id),
            source_database_id: parse_field("source database id", &source_database_id)?,
            source_reference: row.try_get("source_reference")?,
            source_name: row.try_get("source_name")?,
            code: row.try_get("code")?,
            attributes,
            ingested_at: parse_timestamp(&ingested_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedItem {
    pub id: NormalizedItemId,
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub source_item_id: CatalogItemId,
    pub source_reference: String,
    pub source_name: String,
    pub code: Option<String>,
    pub normalized_name: String,
    pub normalized_reference: Option<String>,
    pub category: String,
    pub merged_count: u32,
    pub ai_confidence: f64,
    pub ai_reasoning: Option<String>,
    pub processing_level: ProcessingLevel,
    pub classification_code: Option<String>,
    pub classification_name: Option<String>,
    pub classification_confidence: Option<f64>,
    pub stage_version: i64,
    pub stage: Stage,
    pub created_at: DbTimestamp,
}

impl NormalizedItem {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let id: String = row.try_get("id")?;
        let session_id: String = row.try_get("session_id")?;
        let project_id: String = row.try_get("project_id")?;
        let source_item_id: i64 = row.try_get("source_item_id")?;
        let merged_count: i64 = row.try_get("merged_count")?;
        let processing_level: String = row.try_get("processing_level")?;
        let stage: String = row.try_get("stage")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            id: parse_field("normalized item id", &id)?,
            session_id: parse_field("session id", &session_id)?,
            project_id: parse_field("project id", &project_id)?,
            source_item_id: CatalogItemId(source_item_id),
            source_reference: row.try_get("source_reference")?,
            source_name: row.try_get("source_name")?,
            code: row.try_get("code")?,
            normalized_name: row.try_get("normalized_name")?,
            normalized_reference: row.try_get("normalized_reference")?,
            category: row.try_get("category")?,
            merged_count: merged_count.max(0) as u32,
            ai_confidence: row.try_get("ai_confidence")?,
            ai_reasoning: row.try_get("ai_reasoning")?,
            processing_level: parse_field("processing level", &processing_level)?,
            classification_code: row.try_get("classification_code")?,
            classification_name: row.try_get("classification_name")?,
            classification_confidence: row.try_get("classification_confidence")?,
            stage_version: row.try_get("stage_version")?,
            stage: parse_field("stage", &stage)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub source_database_id: SourceDatabaseId,
    pub status: SessionStatus,
    pub priority: i32,
    pub timeout_seconds: u64,
    pub started_at: Option<DbTimestamp>,
    pub finished_at: Option<DbTimestamp>,
    pub last_activity_at: DbTimestamp,
    pub created_at: DbTimestamp,
}

impl Session {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let id: String = row.try_get("id")?;
        let project_id: String = row.try_get("project_id")?;
        let source_database_id: String = row.try_get("source_database_id")?;
        let status: String = row.try_get("status")?;
        let priority: i64 = row.try_get("priority")?;
        let timeout_seconds: i64 = row.try_get("timeout_seconds")?;
        let started_at: Option<String> = row.try_get("started_at")?;
        let finished_at: Option<String> = row.try_get("finished_at")?;
        let last_activity_at: String = row.try_get("last_activity_at")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            id: parse_field("session id", &id)?,
            project_id: parse_field("project id", &project_id)?,
            source_database_id: parse_field("source database id", &source_database_id)?,
            status: parse_field("session status", &status)?,
            priority: priority as i32,
            timeout_seconds: timeout_seconds.max(0) as u64,
            started_at: started_at.map(|s| parse_timestamp(&s)).transpose()?,
            finished_at: finished_at.map(|s| parse_timestamp(&s)).transpose()?,
            last_activity_at: parse_timestamp(&last_activity_at)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StageOutputRow {
    pub session_id: SessionId,
    pub stage: Stage,
    pub version: i64,
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_failed: u64,
    pub stats: serde_json::Value,
    pub created_at: DbTimestamp,
}

impl StageOutputRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let session_id: String = row.try_get("session_id")?;
        let stage: String = row.try_get("stage")?;
        let rows_in: i64 = row.try_get("rows_in")?;
        let rows_out: i64 = row.try_get("rows_out")?;
        let rows_failed: i64 = row.try_get("rows_failed")?;
        let stats_json: String = row.try_get("stats_json")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            session_id: parse_field("session id", &session_id)?,
            stage: parse_field("stage", &stage)?,
            version: row.try_get("version")?,
            rows_in: rows_in.max(0) as u64,
            rows_out: rows_out.max(0) as u64,
            rows_failed: rows_failed.max(0) as u64,
            stats: serde_json::from_str(&stats_json)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionHistoryEntry {
    pub session_id: SessionId,
    pub stage: Stage,
    pub version: i64,
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_failed: u64,
    pub started_at: DbTimestamp,
    pub finished_at: Option<DbTimestamp>,
    pub error: Option<String>,
}

impl SessionHistoryEntry {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let session_id: String = row.try_get("session_id")?;
        let stage: String = row.try_get("stage")?;
        let rows_in: i64 = row.try_get("rows_in")?;
        let rows_out: i64 = row.try_get("rows_out")?;
        let rows_failed: i64 = row.try_get("rows_failed")?;
        let started_at: String = row.try_get("started_at")?;
        let finished_at: Option<String> = row.try_get("finished_at")?;
        Ok(Self {
            session_id: parse_field("session id", &session_id)?,
            stage: parse_field("stage", &stage)?,
            version: row.try_get("version")?,
            rows_in: rows_in.max(0) as u64,
            rows_out: rows_out.max(0) as u64,
            rows_failed: rows_failed.max(0) as u64,
            started_at: parse_timestamp(&started_at)?,
            finished_at: finished_at.map(|s| parse_timestamp(&s)).transpose()?,
            error: row.try_get("error")?,
        })
    }

    pub fn to_stage_outcome(&self) -> catnorm_protocol::StageOutcome {
        catnorm_protocol::StageOutcome {
            stage: self.stage,
            version: self.version,
            rows_in: self.rows_in,
            rows_out: self.rows_out,
            rows_failed: self.rows_failed,
            started_at: *self.started_at.as_chrono(),
            finished_at: self.finished_at.as_ref().map(|t| *t.as_chrono()),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Benchmark {
    pub id: BenchmarkId,
    pub client_id: ClientId,
    pub name: String,
    pub category: String,
    pub created_at: DbTimestamp,
}

impl Benchmark {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let id: String = row.try_get("id")?;
        let client_id: String = row.try_get("client_id")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            id: parse_field("benchmark id", &id)?,
            client_id: parse_field("client id", &client_id)?,
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}
