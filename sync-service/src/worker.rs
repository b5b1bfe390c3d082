use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{FullSyncOptions, SyncAgent};
use crate::models::*;
use crate::store::SyncStore;

pub const FULL_SYNC_TYPE: &str = "full_sync";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone)]
pub struct FullSyncJob {
    pub log_id: Uuid,
    pub user_id: Option<String>,
    pub options: FullSyncOptions,
}

/// Options recorded in a `sync_logs` marker. Markers without readable
/// options resume as a default run.
fn stored_options(log: &SyncLog) -> FullSyncOptions {
    match log.details.get("options") {
        None | Some(Value::Null) => FullSyncOptions::default(),
        Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
            warn!("Ignoring unreadable options of full sync {}: {}", log.id, e);
            FullSyncOptions::default()
        }),
    }
}

/// Submits full syncs. The `sync_logs` row is written before the job is
/// queued, so a restart can find and resume it.
#[derive(Clone)]
pub struct FullSyncQueue {
    store: Arc<dyn SyncStore>,
    tx: mpsc::Sender<FullSyncJob>,
}

pub struct FullSyncWorker {
    store: Arc<dyn SyncStore>,
    agent: SyncAgent,
    rx: mpsc::Receiver<FullSyncJob>,
}

pub fn channel(
    store: Arc<dyn SyncStore>,
    agent: SyncAgent,
    capacity: usize,
) -> (FullSyncQueue, FullSyncWorker) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        FullSyncQueue {
            store: store.clone(),
            tx,
        },
        FullSyncWorker { store, agent, rx },
    )
}

impl FullSyncQueue {
    pub async fn submit(&self, user_id: Option<String>, options: FullSyncOptions) -> Result<SyncLog> {
        let log = self
            .store
            .insert_sync_log(&NewSyncLog {
                id: Uuid::new_v4(),
                sync_type: FULL_SYNC_TYPE.to_string(),
                status: STATUS_IN_PROGRESS.to_string(),
                user_id: user_id.clone(),
                details: json!({ "options": options }),
                error: None,
                completed_at: None,
            })
            .await?;

        self.tx
            .send(FullSyncJob {
                log_id: log.id,
                user_id,
                options,
            })
            .await
            .map_err(|_| anyhow!("full sync worker is not running"))?;

        info!("Queued full sync {}", log.id);
        Ok(log)
    }

    /// Re-queues full syncs a previous process left in progress.
    pub async fn resume_interrupted(&self) -> Result<usize> {
        let interrupted = self
            .store
            .sync_logs_with_status(FULL_SYNC_TYPE, STATUS_IN_PROGRESS)
            .await?;

        for log in &interrupted {
            warn!("Resuming interrupted full sync {}", log.id);
            self.tx
                .send(FullSyncJob {
                    log_id: log.id,
                    user_id: log.user_id.clone(),
                    options: stored_options(log),
                })
                .await
                .map_err(|_| anyhow!("full sync worker is not running"))?;
        }
        Ok(interrupted.len())
    }

    pub async fn status(&self, id: Uuid) -> Result<Option<SyncLog>> {
        self.store.get_sync_log(id).await
    }
}

impl FullSyncWorker {
    /// Runs jobs one at a time until every queue handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            self.execute(job).await;
        }
        info!("Full sync worker stopped");
    }

    async fn execute(&self, job: FullSyncJob) {
        info!("Running full sync {}", job.log_id);
        let result = self.agent.sync_all(job.user_id, &job.options).await;

        let status = if result.aborted() {
            STATUS_FAILED
        } else {
            STATUS_COMPLETED
        };
        let error = result.error_summary();
        let details = serde_json::to_value(&result).unwrap_or_else(|e| {
            json!({ "serialization_error": e.to_string() })
        });

        if let Err(e) = self
            .store
            .finish_sync_log(job.log_id, status, &details, error.as_deref())
            .await
        {
            error!("Failed to record result of full sync {}: {:#}", job.log_id, e);
        }
    }
}

/// JSON shape returned by the status endpoint.
pub fn status_body(log: &SyncLog) -> Value {
    json!({
        "id": log.id,
        "status": log.status,
        "user_id": log.user_id,
        "started_at": log.started_at,
        "completed_at": log.completed_at,
        "result": log.details,
        "error": log.error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, SyncEntity};
    use crate::ingest::Ingestor;
    use crate::store::memory::MemoryStore;
    use crate::testing::FakePlatform;

    fn setup(platform: FakePlatform) -> (Arc<MemoryStore>, FullSyncQueue, FullSyncWorker) {
        let store = Arc::new(MemoryStore::new());
        let agent = SyncAgent::new(
            Arc::new(platform),
            Ingestor::new(store.clone()),
            AgentConfig::default(),
        );
        let (queue, worker) = channel(store.clone(), agent, 8);
        (store, queue, worker)
    }

    #[tokio::test]
    async fn submitted_job_completes_and_updates_its_row() {
        let (store, queue, worker) = setup(FakePlatform::new());

        let log = queue
            .submit(Some("owner".into()), FullSyncOptions::default())
            .await
            .unwrap();
        assert_eq!(log.status, STATUS_IN_PROGRESS);

        drop(queue);
        worker.run().await;

        let finished = store.sync_logs().into_iter().find(|l| l.id == log.id).unwrap();
        assert_eq!(finished.status, STATUS_COMPLETED);
        assert!(finished.completed_at.is_some());
        assert_eq!(finished.details["user_id"], "owner");
    }

    #[tokio::test]
    async fn aborted_entity_marks_job_failed() {
        let (store, queue, worker) = setup(FakePlatform::new().failing("query_orders"));

        let log = queue.submit(None, FullSyncOptions::default()).await.unwrap();
        drop(queue);
        worker.run().await;

        let finished = store.sync_logs().into_iter().find(|l| l.id == log.id).unwrap();
        assert_eq!(finished.status, STATUS_FAILED);
        assert!(finished.error.unwrap().contains("query_orders"));
    }

    #[tokio::test]
    async fn interrupted_rows_are_resumed() {
        let (store, queue, worker) = setup(FakePlatform::new());
        let stale = store
            .insert_sync_log(&NewSyncLog {
                id: Uuid::new_v4(),
                sync_type: FULL_SYNC_TYPE.to_string(),
                status: STATUS_IN_PROGRESS.to_string(),
                user_id: None,
                details: json!({}),
                error: None,
                completed_at: None,
            })
            .await
            .unwrap();

        assert_eq!(queue.resume_interrupted().await.unwrap(), 1);
        drop(queue);
        worker.run().await;

        let finished = store.sync_logs().into_iter().find(|l| l.id == stale.id).unwrap();
        assert_eq!(finished.status, STATUS_COMPLETED);
    }

    #[tokio::test]
    async fn resumed_job_reuses_its_stored_options() {
        let (store, queue, worker) = setup(FakePlatform::new().failing("query_orders"));
        let stale = store
            .insert_sync_log(&NewSyncLog {
                id: Uuid::new_v4(),
                sync_type: FULL_SYNC_TYPE.to_string(),
                status: STATUS_IN_PROGRESS.to_string(),
                user_id: None,
                details: json!({
                    "options": { "entities": ["customers"], "batch_size": 5, "skip_existing": true }
                }),
                error: None,
                completed_at: None,
            })
            .await
            .unwrap();

        queue.resume_interrupted().await.unwrap();
        drop(queue);
        worker.run().await;

        let finished = store.sync_logs().into_iter().find(|l| l.id == stale.id).unwrap();
        assert_eq!(finished.status, STATUS_COMPLETED);
        assert_eq!(finished.details["options"]["entities"], json!(["customers"]));
        assert_eq!(finished.details["options"]["batch_size"], 5);
        assert!(finished.details["orders"].is_null());
    }

    #[tokio::test]
    async fn unreadable_stored_options_fall_back_to_a_full_run() {
        let log = SyncLog {
            id: Uuid::new_v4(),
            sync_type: FULL_SYNC_TYPE.to_string(),
            status: STATUS_IN_PROGRESS.to_string(),
            user_id: None,
            details: json!({ "options": { "entities": ["invoices"] } }),
            error: None,
            started_at: chrono::Utc::now(),
            completed_at: None,
        };
        assert_eq!(stored_options(&log), FullSyncOptions::default());

        let log = SyncLog {
            details: json!({ "options": { "entities": ["orders"], "skip_existing": false } }),
            ..log
        };
        let options = stored_options(&log);
        assert_eq!(options.entities, Some(vec![SyncEntity::Orders]));
        assert_eq!(options.skip_existing, Some(false));
    }
}
