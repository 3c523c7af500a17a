//! The `NormalizationService` facade (§6a) and the state machine driving
//! it: one `CancellationToken` per in-flight session, held in a registry
//! much like the teacher's sentinel keeps a `scan_jobs` map of in-flight
//! work, so `stop()` can reach a session it doesn't otherwise hold a
//! reference to.

use crate::error::{Result, SessionError};
use crate::pipeline;
use catnorm_db::DbPool;
use catnorm_events::{EventBus, EventStream};
use catnorm_ids::{ProjectId, SessionId, SourceDatabaseId};
use catnorm_llm::LlmGateway;
use catnorm_protocol::{CancellationToken, Event, EventPayload, SessionStatus, Stage, StageOutcome};
use catnorm_stages::{ClassificationReference, NoopClassificationReference, StageConfig, StageStats};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Bookkeeping for one in-flight session: the signal `stop()`/the timeout
/// watcher use to interrupt it.
struct SessionHandle {
    cancel: CancellationToken,
}

/// Pipeline-driving facade exposing exactly the operations the (external,
/// out-of-scope) transport layer maps onto HTTP routes (§6a). Cheap to
/// clone: every clone shares the same pool, event bus and session
/// registry, so a spawned pipeline task can hold its own owned copy.
#[derive(Clone)]
pub struct NormalizationService {
    db: DbPool,
    events: EventBus,
    llm: Option<Arc<LlmGateway>>,
    classification: Arc<dyn ClassificationReference>,
    handles: Arc<Mutex<HashMap<SessionId, SessionHandle>>>,
    stage_config: StageConfig,
}

impl NormalizationService {
    pub fn new(db: DbPool, events: EventBus, llm: Option<Arc<LlmGateway>>) -> Self {
        Self::with_classification(db, events, llm, Arc::new(NoopClassificationReference))
    }

    pub fn with_classification(
        db: DbPool,
        events: EventBus,
        llm: Option<Arc<LlmGateway>>,
        classification: Arc<dyn ClassificationReference>,
    ) -> Self {
        Self {
            db,
            events,
            llm,
            classification,
            handles: Arc::new(Mutex::new(HashMap::new())),
            stage_config: StageConfig::default(),
        }
    }

    fn publish(&self, session_id: SessionId, payload: EventPayload) {
        self.events.publish(Event::new(session_id, payload));
    }

    fn register(&self, session_id: SessionId) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).insert(
            session_id,
            SessionHandle {
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    fn unregister(&self, session_id: SessionId) {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).remove(&session_id);
    }

    /// Graceful shutdown (§6 "Exit/status signals"): signal every in-flight
    /// session to stop and wait for each pipeline task to observe it and
    /// unregister, so every active session lands on `stopped` with its
    /// partial output visible before the process exits. Bounded by
    /// `deadline` in case a worker is stuck on an uncancellable I/O call;
    /// any session still registered past it is left to whatever state it
    /// was last persisted in.
    pub async fn shutdown(&self, deadline: Duration) {
        let ids: Vec<SessionId> = {
            let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            for handle in handles.values() {
                handle.cancel.cancel();
            }
            handles.keys().copied().collect()
        };
        if ids.is_empty() {
            return;
        }

        info!(sessions = ids.len(), "graceful shutdown: draining active sessions");
        let start = std::time::Instant::now();
        loop {
            let remaining = self.handles.lock().unwrap_or_else(|e| e.into_inner()).len();
            if remaining == 0 || start.elapsed() >= deadline {
                if remaining > 0 {
                    warn!(remaining, "graceful shutdown deadline hit with sessions still draining");
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn cancel_token_for(&self, session_id: SessionId) -> Option<CancellationToken> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session_id)
            .map(|h| h.cancel.clone())
    }

    /// Create a session in `pending` and start the pipeline in the
    /// background; returns as soon as the session row exists, the caller
    /// polls `status`/`history` or subscribes to the event bus to observe
    /// progress (§4.6, §6a).
    pub async fn start(
        &self,
        project_id: ProjectId,
        source_database_id: SourceDatabaseId,
        priority: i32,
        timeout_seconds: u64,
    ) -> Result<SessionId> {
        let session_id =
            catnorm_state::sessions::create(&self.db, project_id, source_database_id, priority, timeout_seconds)
                .await?;
        self.spawn_run(session_id, timeout_seconds);
        Ok(session_id)
    }

    /// Resume a `stopped`/`failed` session from the first stage whose
    /// output is missing (§4.6).
    pub async fn resume(&self, session_id: SessionId) -> Result<()> {
        let session = catnorm_state::sessions::get(&self.db, session_id).await?;
        self.spawn_run(session_id, session.timeout_seconds);
        Ok(())
    }

    fn spawn_run(&self, session_id: SessionId, timeout_seconds: u64) {
        let cancel = self.register(session_id);
        let service = self.clone();
        let timeout_cancel = cancel.clone();
        let timeout_handle = if timeout_seconds > 0 {
            Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(timeout_seconds)).await;
                timeout_cancel.cancel();
            }))
        } else {
            None
        };

        tokio::spawn(async move {
            if let Err(err) = service.run_pipeline(session_id, cancel).await {
                warn!(session = %session_id, error = %err, "session pipeline failed");
                service.fail_session(session_id, &err).await;
            }
            if let Some(handle) = timeout_handle {
                handle.abort();
            }
            service.unregister(session_id);
        });
    }

    /// Cooperative stop (§4.6 "Stop semantics"): signals the session's
    /// cancellation token. The in-flight stage drains its current row and
    /// the pipeline loop persists `stopped` with partial progress visible.
    pub async fn stop(&self, session_id: SessionId) -> Result<()> {
        catnorm_state::sessions::get(&self.db, session_id).await?;
        if let Some(cancel) = self.cancel_token_for(session_id) {
            cancel.cancel();
        }
        Ok(())
    }

    pub async fn status(&self, session_id: SessionId) -> Result<SessionStatus> {
        Ok(catnorm_state::sessions::get(&self.db, session_id).await?.status)
    }

    pub async fn history(&self, session_id: SessionId) -> Result<Vec<StageOutcome>> {
        Ok(catnorm_state::sessions::history(&self.db, session_id).await?)
    }

    /// Roll a session back to `stage` and leave it `pending` so a
    /// subsequent `resume` regenerates everything after it (§4.6).
    pub async fn revert(&self, session_id: SessionId, stage: Stage) -> Result<()> {
        catnorm_state::normalized::revert_to(&self.db, session_id, stage).await?;
        catnorm_state::sessions::transition(&self.db, session_id, SessionStatus::Pending).await?;
        Ok(())
    }

    pub fn subscribe(&self, session_id_filter: Option<SessionId>) -> EventStream {
        self.events.subscribe_filtered(session_id_filter)
    }

    pub async fn apply_patterns(&self, session_id: SessionId) -> Result<StageStats> {
        self.apply_single_stage(session_id, Stage::Patterns).await
    }

    pub async fn apply_ai(&self, session_id: SessionId) -> Result<StageStats> {
        self.apply_single_stage(session_id, Stage::Ai).await
    }

    pub async fn apply_categorization(&self, session_id: SessionId) -> Result<StageStats> {
        self.apply_single_stage(session_id, Stage::Categorize).await
    }

    /// Manual single-stage re-run (§6a): reads the current input for
    /// `stage`, runs it once, and persists a fresh version without
    /// touching the session's own running state.
    async fn apply_single_stage(&self, session_id: SessionId, stage: Stage) -> Result<StageStats> {
        let session = catnorm_state::sessions::get(&self.db, session_id).await?;
        let project = catnorm_state::projects::get(&self.db, session.project_id).await?;
        let rows = pipeline::load_input_rows(&self.db, session_id, session.source_database_id, stage).await?;
        let version = pipeline::next_version(&self.db, session_id, stage).await?;
        let cancel = CancellationToken::new();

        let outcome = pipeline::run_one_stage(
            &self.db,
            self.llm.clone(),
            self.classification.clone(),
            session_id,
            session.project_id,
            project.client_id,
            project.project_type,
            version,
            self.stage_config.clone(),
            cancel,
            stage,
            rows,
        )
        .await?;

        pipeline::persist_stage_output(&self.db, session_id, session.project_id, stage, version, &outcome.rows)
            .await?;

        let mut stats = outcome.stats;
        if matches!(stage, Stage::Patterns | Stage::Ai) {
            let groups = pipeline::refresh_duplicate_groups(&self.db, session_id, stage).await?;
            stats.extra = serde_json::json!({ "duplicate_groups": groups });
        }

        catnorm_state::stage_outputs::insert(
            &self.db,
            catnorm_state::stage_outputs::NewStageOutput {
                session_id,
                stage,
                version,
                rows_in: stats.rows_in,
                rows_out: stats.rows_out,
                rows_failed: stats.rows_failed,
                stats: stats.extra.clone(),
            },
        )
        .await?;

        Ok(stats)
    }

    /// Land a session on `failed` after an unrecoverable error (§4.6, §7
    /// `DBCorruption`/exhausted-`DBTransient`/panic paths) and announce it
    /// on the event bus. Best-effort: if the session already moved to a
    /// terminal state by the time this runs (e.g. a concurrent `stop`),
    /// the transition is simply skipped.
    async fn fail_session(&self, session_id: SessionId, err: &SessionError) {
        if let Err(transition_err) =
            catnorm_state::sessions::transition(&self.db, session_id, SessionStatus::Failed).await
        {
            warn!(session = %session_id, error = %transition_err, "failed to mark session as failed");
            return;
        }
        self.publish(
            session_id,
            EventPayload::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        );
    }

    pub async fn preview_stats(&self, project_id: ProjectId) -> Result<catnorm_preview::ProjectPreview> {
        catnorm_preview::preview_project(&self.db, project_id)
            .await
            .map_err(|err| SessionError::Internal(err.to_string()))
    }

    /// The state machine proper (§4.6): decide the resume point, run each
    /// remaining stage in order, persist and announce every step, and
    /// land on `completed`/`stopped`/`failed`.
    async fn run_pipeline(&self, session_id: SessionId, cancel: CancellationToken) -> Result<()> {
        let session = catnorm_state::sessions::get(&self.db, session_id).await?;
        catnorm_state::sessions::transition(&self.db, session_id, SessionStatus::Running).await?;
        self.publish(session_id, EventPayload::DatabaseStarted);

        let project = catnorm_state::projects::get(&self.db, session.project_id).await?;
        let source = catnorm_state::source_databases::get(&self.db, session.source_database_id).await?;
        let total_rows = catnorm_state::catalog_items::count_for_source(&self.db, source.id).await?;

        let start_stage = pipeline::first_incomplete_stage(&self.db, session_id).await?;

        let mut stopped = false;
        let mut processed_rows = 0u64;

        if let Some(first) = start_stage {
            for stage in Stage::ORDER.into_iter().filter(|s| *s >= first) {
                if cancel.is_cancelled() {
                    stopped = true;
                    break;
                }

                let rows = pipeline::load_input_rows(&self.db, session_id, source.id, stage).await?;
                let version = pipeline::next_version(&self.db, session_id, stage).await?;
                self.publish(session_id, EventPayload::StageStarted { stage, version });
                let started_at = chrono::Utc::now();

                let outcome = pipeline::run_one_stage(
                    &self.db,
                    self.llm.clone(),
                    self.classification.clone(),
                    session_id,
                    session.project_id,
                    project.client_id,
                    project.project_type,
                    version,
                    self.stage_config.clone(),
                    cancel.clone(),
                    stage,
                    rows,
                )
                .await?;

                pipeline::persist_stage_output(
                    &self.db,
                    session_id,
                    session.project_id,
                    stage,
                    version,
                    &outcome.rows,
                )
                .await?;

                let mut stats = outcome.stats;
                if matches!(stage, Stage::Patterns | Stage::Ai) {
                    let groups = pipeline::refresh_duplicate_groups(&self.db, session_id, stage).await?;
                    stats.extra = serde_json::json!({ "duplicate_groups": groups });
                }

                catnorm_state::stage_outputs::insert(
                    &self.db,
                    catnorm_state::stage_outputs::NewStageOutput {
                        session_id,
                        stage,
                        version,
                        rows_in: stats.rows_in,
                        rows_out: stats.rows_out,
                        rows_failed: stats.rows_failed,
                        stats: stats.extra.clone(),
                    },
                )
                .await?;

                processed_rows += stats.rows_out;
                catnorm_state::sessions::record_history(
                    &self.db,
                    session_id,
                    &StageOutcome {
                        stage,
                        version,
                        rows_in: stats.rows_in,
                        rows_out: stats.rows_out,
                        rows_failed: stats.rows_failed,
                        started_at,
                        finished_at: Some(chrono::Utc::now()),
                        error: None,
                    },
                )
                .await?;

                self.publish(
                    session_id,
                    EventPayload::StageCompleted {
                        stage,
                        version,
                        rows_in: stats.rows_in,
                        rows_out: stats.rows_out,
                        rows_failed: stats.rows_failed,
                    },
                );

                catnorm_state::sessions::touch_last_activity(&self.db, session_id).await?;

                if cancel.is_cancelled() {
                    stopped = true;
                    break;
                }
            }
        }

        if stopped {
            catnorm_state::sessions::transition(&self.db, session_id, SessionStatus::Stopped).await?;
            let progress_percent = if total_rows == 0 {
                100.0
            } else {
                (processed_rows as f64 / total_rows as f64) * 100.0
            };
            self.publish(
                session_id,
                EventPayload::NormalizationStopped {
                    processed: processed_rows,
                    total: total_rows,
                    progress_percent,
                    reason: catnorm_protocol::defaults::CANCELLED_BY_USER_MESSAGE.to_string(),
                },
            );
            self.publish(
                session_id,
                EventPayload::DatabaseStopped {
                    reason: catnorm_protocol::defaults::CANCELLED_BY_USER_MESSAGE.to_string(),
                },
            );
            info!(session = %session_id, "session stopped");
        } else {
            catnorm_state::sessions::transition(&self.db, session_id, SessionStatus::Completed).await?;
            self.publish(session_id, EventPayload::DatabaseCompleted);
            info!(session = %session_id, "session completed");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};
    use catnorm_protocol::ProjectType;
    use std::collections::HashMap;
    use std::time::Duration;

    async fn fixture() -> (NormalizationService, ProjectId, SourceDatabaseId) {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        catnorm_state::schema::ensure_schema(&pool).await.unwrap();
        let client_id = catnorm_state::clients::create(&pool, "Acme", None).await.unwrap();
        let project_id = catnorm_state::projects::create(&pool, client_id, "Bolts", ProjectType::Nomenclature)
            .await
            .unwrap();
        let source_id = catnorm_state::source_databases::create(
            &pool,
            project_id,
            "export",
            "/data/export.db",
            ProjectType::Nomenclature,
            4096,
        )
        .await
        .unwrap();
        for (reference, name) in [("r1", "Молоток"), ("r2", "молоток"), ("r3", "Отвертка")] {
            catnorm_state::catalog_items::insert(&pool, source_id, reference, name, None, &HashMap::new())
                .await
                .unwrap();
        }
        let service = NormalizationService::new(pool, EventBus::new(), None);
        (service, project_id, source_id)
    }

    async fn wait_terminal(service: &NormalizationService, session_id: SessionId) -> SessionStatus {
        for _ in 0..200 {
            let status = service.status(session_id).await.unwrap();
            if matches!(
                status,
                SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Failed
            ) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {session_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn full_run_completes_all_four_stages() {
        let (service, project_id, source_id) = fixture().await;
        let session_id = service.start(project_id, source_id, 0, 0).await.unwrap();

        let status = wait_terminal(&service, session_id).await;
        assert_eq!(status, SessionStatus::Completed);

        let history = service.history(session_id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].stage, Stage::Preprocess);
        assert_eq!(history[3].stage, Stage::Categorize);
        assert!(history.iter().all(|outcome| outcome.error.is_none()));
    }

    #[tokio::test]
    async fn stop_during_run_lands_on_stopped_with_partial_history() {
        let (service, project_id, source_id) = fixture().await;
        let session_id = service.start(project_id, source_id, 0, 0).await.unwrap();
        service.stop(session_id).await.unwrap();

        let status = wait_terminal(&service, session_id).await;
        assert!(matches!(status, SessionStatus::Stopped | SessionStatus::Completed));
    }

    #[tokio::test]
    async fn revert_after_completion_drops_later_stage_outputs_and_resets_to_pending() {
        let (service, project_id, source_id) = fixture().await;
        let session_id = service.start(project_id, source_id, 0, 0).await.unwrap();
        wait_terminal(&service, session_id).await;

        service.revert(session_id, Stage::Patterns).await.unwrap();
        assert_eq!(service.status(session_id).await.unwrap(), SessionStatus::Pending);

        let next = pipeline::first_incomplete_stage(&service.db, session_id).await.unwrap();
        assert_eq!(next, Some(Stage::Ai));

        service.resume(session_id).await.unwrap();
        let status = wait_terminal(&service, session_id).await;
        assert_eq!(status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn shutdown_drains_active_session_to_stopped() {
        let (service, project_id, source_id) = fixture().await;
        let session_id = service.start(project_id, source_id, 0, 3600).await.unwrap();

        service.shutdown(Duration::from_secs(5)).await;

        let status = service.status(session_id).await.unwrap();
        assert!(matches!(status, SessionStatus::Stopped | SessionStatus::Completed));
        assert!(service.handles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_concurrent_session_for_same_source_is_rejected() {
        let (service, project_id, source_id) = fixture().await;
        let first = service.start(project_id, source_id, 0, 3600).await.unwrap();
        // give the background task a moment to move it into `running`
        for _ in 0..50 {
            if service.status(first).await.unwrap() != SessionStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(service.start(project_id, source_id, 0, 3600).await.is_err());
        service.stop(first).await.unwrap();
        wait_terminal(&service, first).await;
    }
}
