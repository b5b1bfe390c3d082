//! Persistence boundary for the sync subsystem.
//!
//! [`PgStore`] is the production implementation on top of diesel-async.
//! Everything above this module talks to [`SyncStore`] only.

mod postgres;
#[cfg(test)]
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use shared::{EntityType, QueueStatus};
use uuid::Uuid;

use crate::models::*;

pub use postgres::PgStore;

/// Parameters for claiming a batch of queue rows under a lease.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Only rows in exactly this status are eligible.
    pub status: QueueStatus,
    /// When set, rows with `retry_count >= max_retries` are skipped.
    pub max_retries: Option<i32>,
    pub limit: i64,
    pub worker_id: String,
    pub lease_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub failed: i64,
    /// Failed rows that will not be retried again.
    pub exhausted: i64,
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn find_contact_by_email(&self, email: &str) -> Result<Option<Contact>>;

    async fn find_contact_by_external_id(&self, external_id: &str) -> Result<Option<Contact>>;

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>>;

    /// Matches an existing row by email, then by external id. Creates the row
    /// when neither matches.
    async fn upsert_contact(&self, data: &ContactData) -> Result<Contact>;

    async fn upsert_service(&self, data: &ServiceData) -> Result<Service>;

    /// Case-insensitive substring match on the service name.
    async fn find_service_by_name(&self, name: &str) -> Result<Option<Service>>;

    /// Case-insensitive substring match on active staff names.
    async fn find_staff_by_name(&self, name: &str) -> Result<Option<StaffMember>>;

    async fn find_booking_by_external_id(&self, external_id: &str) -> Result<Option<Booking>>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>>;

    /// Keyed on `external_booking_id`; a booking without one is always inserted.
    async fn upsert_booking(&self, data: &BookingData) -> Result<Booking>;

    async fn find_order_by_external_id(&self, external_id: &str) -> Result<Option<Order>>;

    async fn upsert_order(&self, data: &OrderData) -> Result<Order>;

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;

    /// Keyed on `external_product_id`; a product without one is always inserted.
    async fn upsert_product(&self, data: &ProductData) -> Result<Product>;

    /// Flags a local row as pushed. For contacts a newly assigned platform id
    /// is stored alongside.
    async fn mark_entity_synced(
        &self,
        entity: EntityType,
        id: Uuid,
        external_id: Option<&str>,
    ) -> Result<()>;

    /// Ids of rows whose `sync_status` is anything but synced.
    async fn unsynced_entity_ids(&self, entity: EntityType) -> Result<Vec<Uuid>>;

    async fn enqueue_sync(&self, op: &NewSyncOperation) -> Result<SyncOperation>;

    /// Moves up to `limit` eligible rows to in_progress, oldest first, and
    /// returns them. Rows locked by a concurrent claimer are skipped.
    async fn claim_sync_operations(&self, claim: &ClaimRequest) -> Result<Vec<SyncOperation>>;

    /// Returns in_progress rows whose lease ran out to pending.
    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Extends the lease of a row `worker_id` still holds. `false` means the
    /// claim was lost to lease expiry and the row must not be pushed.
    async fn renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Completes a row `worker_id` still holds. `false` when the claim was lost.
    async fn complete_sync_operation(&self, id: Uuid, worker_id: &str) -> Result<bool>;

    /// Marks a row `worker_id` still holds as failed, bumps `retry_count` and
    /// returns the updated row. `None` when the claim was lost.
    async fn fail_sync_operation(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> Result<Option<SyncOperation>>;

    async fn sync_counts(&self, max_retries: i32) -> Result<SyncCounts>;

    async fn recent_sync_operations(&self, limit: i64) -> Result<Vec<SyncOperation>>;

    async fn log_webhook(&self, log: &NewWebhookLog) -> Result<()>;

    async fn insert_sync_log(&self, log: &NewSyncLog) -> Result<SyncLog>;

    async fn finish_sync_log(
        &self,
        id: Uuid,
        status: &str,
        details: &Value,
        error: Option<&str>,
    ) -> Result<()>;

    async fn get_sync_log(&self, id: Uuid) -> Result<Option<SyncLog>>;

    async fn sync_logs_with_status(&self, sync_type: &str, status: &str) -> Result<Vec<SyncLog>>;
}
