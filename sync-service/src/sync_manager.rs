use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use platform_client::PlatformApi;
use serde::Serialize;
use serde_json::{json, Value};
use shared::{BookingStatus, EntityType, OperationType, QueueStatus};
use tokio::time;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::*;
use crate::store::{ClaimRequest, SyncStore};

pub const DEFAULT_BATCH_LIMIT: i64 = 50;
pub const DEAD_LETTER_STATUS: &str = "dead_letter";
const DEAD_LETTER_SYNC_TYPE: &str = "sync_operation";
const RECENT_OPERATIONS: i64 = 10;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Platform calls per minute while draining the queue.
    pub rate_limit_per_minute: u32,
    pub max_retries: i32,
    /// How long a claim stays valid before another drain may take the row back.
    pub lease: Duration,
    pub worker_id: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            max_retries: 3,
            lease: Duration::from_secs(300),
            worker_id: format!("sync-{}", Uuid::new_v4()),
        }
    }
}

impl SyncConfig {
    pub fn delay_between_operations(&self) -> Duration {
        Duration::from_millis(60_000 / u64::from(self.rate_limit_per_minute.max(1)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Rows whose lease ran out and passed to another drain before this one
    /// reached them.
    pub lost: usize,
    /// Store writes that failed while recording an outcome.
    pub store_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    pub table: &'static str,
    pub enqueued: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub pending: i64,
    pub in_progress: i64,
    pub failed: i64,
    pub dead_lettered: i64,
    pub recent_operations: Vec<SyncOperation>,
}

/// Pushes locally changed rows to the platform through the `sync_operations`
/// queue.
pub struct SyncManager {
    store: Arc<dyn SyncStore>,
    platform: Arc<dyn PlatformApi>,
    config: SyncConfig,
}

impl SyncManager {
    pub fn new(store: Arc<dyn SyncStore>, platform: Arc<dyn PlatformApi>, config: SyncConfig) -> Self {
        Self {
            store,
            platform,
            config,
        }
    }

    /// Drains the queue every `every`, pending rows first, then retries.
    pub async fn run(&self, every: Duration) {
        let mut interval = time::interval(every);

        loop {
            interval.tick().await;

            match self.process_pending_syncs(DEFAULT_BATCH_LIMIT).await {
                Ok(result) if result.claimed > 0 => info!("Drained pending syncs: {:?}", result),
                Ok(_) => {}
                Err(e) => error!("Error processing pending syncs: {:#}", e),
            }
            match self.retry_failed_syncs(DEFAULT_BATCH_LIMIT).await {
                Ok(result) if result.claimed > 0 => info!("Retried failed syncs: {:?}", result),
                Ok(_) => {}
                Err(e) => error!("Error retrying failed syncs: {:#}", e),
            }
        }
    }

    pub async fn enqueue(
        &self,
        entity: EntityType,
        entity_id: Uuid,
        operation: OperationType,
    ) -> Result<SyncOperation> {
        let op = self
            .store
            .enqueue_sync(&NewSyncOperation::pending(
                entity.as_str(),
                entity_id,
                operation.as_str(),
            ))
            .await?;
        info!("Enqueued {} {} {}", operation.as_str(), entity, entity_id);
        Ok(op)
    }

    /// Queues every row of the given tables that is not yet synced. Rows
    /// without a platform id are queued as creates.
    pub async fn initialize(&self, entities: &[EntityType]) -> Result<Vec<InitializeResult>> {
        let mut results = Vec::with_capacity(entities.len());

        for entity in entities {
            let ids = self.store.unsynced_entity_ids(*entity).await?;
            for id in &ids {
                let operation = self.initial_operation(*entity, *id).await?;
                self.store
                    .enqueue_sync(&NewSyncOperation::pending(entity.as_str(), *id, operation.as_str()))
                    .await?;
            }
            info!("Initialized {} pending syncs for {}", ids.len(), entity.table());
            results.push(InitializeResult {
                table: entity.table(),
                enqueued: ids.len(),
            });
        }

        Ok(results)
    }

    async fn initial_operation(&self, entity: EntityType, id: Uuid) -> Result<OperationType> {
        let has_remote_id = match entity {
            EntityType::Contact => self
                .store
                .get_contact(id)
                .await?
                .and_then(|c| c.external_contact_id)
                .is_some(),
            _ => true,
        };
        Ok(if has_remote_id {
            OperationType::Update
        } else {
            OperationType::Create
        })
    }

    pub async fn process_pending_syncs(&self, limit: i64) -> Result<BatchResult> {
        let released = self.store.release_expired_leases(Utc::now()).await?;
        if released > 0 {
            warn!("Released {} sync operations with expired leases", released);
        }
        self.drain(QueueStatus::Pending, None, limit).await
    }

    pub async fn retry_failed_syncs(&self, limit: i64) -> Result<BatchResult> {
        self.drain(QueueStatus::Failed, Some(self.config.max_retries), limit)
            .await
    }

    async fn drain(&self, status: QueueStatus, max_retries: Option<i32>, limit: i64) -> Result<BatchResult> {
        let lease = chrono::Duration::from_std(self.config.lease)?;
        let delay = self.config.delay_between_operations();
        // The last row waits out the spacing of every row before it.
        let batch = u32::try_from(limit.clamp(1, i64::from(u16::MAX)))?;
        let spacing = chrono::Duration::from_std(delay.saturating_mul(batch))?;

        let claimed = self
            .store
            .claim_sync_operations(&ClaimRequest {
                status,
                max_retries,
                limit,
                worker_id: self.config.worker_id.clone(),
                lease_until: Utc::now() + lease + spacing,
            })
            .await?;

        let mut result = BatchResult {
            claimed: claimed.len(),
            ..Default::default()
        };

        for (index, op) in claimed.iter().enumerate() {
            if index > 0 {
                time::sleep(delay).await;
            }

            match self
                .store
                .renew_lease(op.id, &self.config.worker_id, Utc::now() + lease)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Lease on sync {} was lost, leaving it to its new owner", op.id);
                    result.lost += 1;
                    continue;
                }
                Err(e) => warn!("Could not renew lease on sync {}: {:#}", op.id, e),
            }

            let outcome = match self.process_single_sync(op).await {
                Ok(()) => {
                    self.store
                        .complete_sync_operation(op.id, &self.config.worker_id)
                        .await
                }
                Err(e) => {
                    self.record_failure(op, &e, &mut result).await;
                    continue;
                }
            };

            match outcome {
                Ok(true) => {
                    result.completed += 1;
                    info!("Synced {} {} ({})", op.entity_type, op.entity_id, op.operation_type);
                }
                Ok(false) => {
                    warn!("Sync {} was pushed after its lease was lost", op.id);
                    result.lost += 1;
                }
                Err(e) => {
                    error!("Failed to mark sync {} completed: {:#}", op.id, e);
                    result.store_errors.push(format!("{}: {:#}", op.id, e));
                    let e = e.context("recording completion");
                    self.record_failure(op, &e, &mut result).await;
                }
            }
        }

        Ok(result)
    }

    /// Never fails the drain; store errors land in `result` instead.
    async fn record_failure(&self, op: &SyncOperation, e: &anyhow::Error, result: &mut BatchResult) {
        let message = format!("{:#}", e);
        let failed = match self
            .store
            .fail_sync_operation(op.id, &self.config.worker_id, &message)
            .await
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                warn!("Sync {} failed after its lease was lost: {}", op.id, message);
                result.lost += 1;
                return;
            }
            Err(store_error) => {
                error!("Failed to mark sync {} failed: {:#}", op.id, store_error);
                result.store_errors.push(format!("{}: {:#}", op.id, store_error));
                return;
            }
        };
        result.failed += 1;
        warn!(
            "Sync {} for {} {} failed (attempt {}): {}",
            op.id, op.entity_type, op.entity_id, failed.retry_count, message
        );

        if failed.retry_count >= self.config.max_retries {
            error!(
                operation_id = %failed.id,
                entity_type = %failed.entity_type,
                entity_id = %failed.entity_id,
                retry_count = failed.retry_count,
                "Sync operation dead-lettered: {}",
                message
            );
            let entry = NewSyncLog {
                id: Uuid::new_v4(),
                sync_type: DEAD_LETTER_SYNC_TYPE.to_string(),
                status: DEAD_LETTER_STATUS.to_string(),
                user_id: None,
                details: json!({
                    "operation_id": failed.id,
                    "entity_type": failed.entity_type,
                    "entity_id": failed.entity_id,
                    "operation_type": failed.operation_type,
                    "retry_count": failed.retry_count,
                }),
                error: Some(message),
                completed_at: Some(Utc::now()),
            };
            if let Err(log_error) = self.store.insert_sync_log(&entry).await {
                error!("Failed to write dead-letter entry for sync {}: {:#}", failed.id, log_error);
                result.store_errors.push(format!("{}: {:#}", failed.id, log_error));
            }
        }
    }

    /// Pushes one local row to the platform and flags it synced.
    pub async fn process_single_sync(&self, op: &SyncOperation) -> Result<()> {
        let entity: EntityType = op.entity_type.parse()?;
        let operation: OperationType = op.operation_type.parse()?;

        match entity {
            EntityType::Contact => {
                let contact = self
                    .store
                    .get_contact(op.entity_id)
                    .await?
                    .ok_or_else(|| anyhow!("contact {} no longer exists", op.entity_id))?;
                let info = contact_info(&contact);

                let created_id = match (&contact.external_contact_id, operation) {
                    (Some(external_id), _) => {
                        self.platform.update_contact(external_id, &info).await?;
                        None
                    }
                    (None, OperationType::Update) => {
                        bail!("contact {} has no platform id to update", contact.id)
                    }
                    (None, OperationType::Create) => {
                        // An earlier attempt may have created it before failing locally.
                        match self.remote_contact_id(&contact).await? {
                            Some(remote_id) => {
                                info!("Contact {} already exists on the platform as {}", contact.id, remote_id);
                                self.platform.update_contact(&remote_id, &info).await?;
                                Some(remote_id)
                            }
                            None => {
                                let created = self.platform.create_contact(&info).await?;
                                Some(contact_id_of(&created)?)
                            }
                        }
                    }
                };

                self.store
                    .mark_entity_synced(entity, contact.id, created_id.as_deref())
                    .await?;
            }
            EntityType::Booking => {
                let booking = self
                    .store
                    .get_booking(op.entity_id)
                    .await?
                    .ok_or_else(|| anyhow!("booking {} no longer exists", op.entity_id))?;
                let external_id = booking
                    .external_booking_id
                    .as_deref()
                    .ok_or_else(|| anyhow!("booking {} has no platform id", booking.id))?;

                self.platform
                    .update_booking(external_id, &booking_patch(&booking))
                    .await?;
                self.store.mark_entity_synced(entity, booking.id, None).await?;
            }
            EntityType::Product => {
                let product = self
                    .store
                    .get_product(op.entity_id)
                    .await?
                    .ok_or_else(|| anyhow!("product {} no longer exists", op.entity_id))?;
                let external_id = product
                    .external_product_id
                    .as_deref()
                    .ok_or_else(|| anyhow!("product {} has no platform id", product.id))?;

                self.platform
                    .update_inventory(external_id, &inventory_patch(&product))
                    .await?;
                self.store.mark_entity_synced(entity, product.id, None).await?;
            }
        }

        Ok(())
    }

    async fn remote_contact_id(&self, contact: &Contact) -> Result<Option<String>> {
        let Some(email) = contact.email.as_deref() else {
            return Ok(None);
        };
        match self.platform.find_contact_by_email(email).await? {
            Some(remote) => Ok(Some(contact_id_of(&remote)?)),
            None => Ok(None),
        }
    }

    pub async fn get_stats(&self) -> Result<SyncStats> {
        let (counts, recent_operations) = futures::try_join!(
            self.store.sync_counts(self.config.max_retries),
            self.store.recent_sync_operations(RECENT_OPERATIONS),
        )?;

        Ok(SyncStats {
            pending: counts.pending,
            in_progress: counts.in_progress,
            failed: counts.failed,
            dead_lettered: counts.exhausted,
            recent_operations,
        })
    }
}

fn contact_id_of(remote: &Value) -> Result<String> {
    remote
        .get("id")
        .or_else(|| remote.pointer("/contact/id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("platform returned a contact without id"))
}

fn contact_info(contact: &Contact) -> Value {
    let mut info = json!({
        "name": { "first": contact.first_name, "last": contact.last_name },
    });
    if let Some(email) = &contact.email {
        info["emails"] = json!({ "items": [{ "tag": "MAIN", "email": email }] });
    }
    if let Some(phone) = &contact.phone {
        info["phones"] = json!({ "items": [{ "tag": "MAIN", "phone": phone }] });
    }
    if contact.address_line.is_some() || contact.city.is_some() {
        info["addresses"] = json!({
            "items": [{
                "tag": "HOME",
                "address": {
                    "addressLine": contact.address_line,
                    "city": contact.city,
                    "subdivision": contact.state,
                    "postalCode": contact.postal_code,
                    "country": contact.country,
                }
            }]
        });
    }
    info
}

fn booking_patch(booking: &Booking) -> Value {
    let status = BookingStatus::from_platform(&booking.status);
    let mut patch = json!({ "status": status.to_platform() });
    if let Some(revision) = booking.revision {
        patch["revision"] = json!(revision.to_string());
    }
    patch
}

fn inventory_patch(product: &Product) -> Value {
    json!({
        "trackQuantity": true,
        "variants": [{
            "variantId": "00000000-0000-0000-0000-000000000000",
            "quantity": product.current_stock,
            "inStock": product.current_stock > 0,
        }]
    })
}
