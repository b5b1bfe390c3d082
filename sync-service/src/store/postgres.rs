use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::expression_methods::PgTextExpressionMethods;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde_json::Value;
use shared::{EntityType, QueueStatus, SYNC_STATUS_SYNCED};
use uuid::Uuid;

use super::{ClaimRequest, SyncCounts, SyncStore};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// `%` and `_` in user text must not act as wildcards.
fn contains_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl SyncStore for PgStore {
    async fn find_contact_by_email(&self, email: &str) -> Result<Option<Contact>> {
        let mut conn = self.pool.get().await?;
        let contact = contacts::table
            .filter(contacts::email.eq(email.trim().to_ascii_lowercase()))
            .first::<Contact>(&mut conn)
            .await
            .optional()?;
        Ok(contact)
    }

    async fn find_contact_by_external_id(&self, external_id: &str) -> Result<Option<Contact>> {
        let mut conn = self.pool.get().await?;
        let contact = contacts::table
            .filter(contacts::external_contact_id.eq(external_id))
            .first::<Contact>(&mut conn)
            .await
            .optional()?;
        Ok(contact)
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>> {
        let mut conn = self.pool.get().await?;
        let contact = contacts::table
            .find(id)
            .first::<Contact>(&mut conn)
            .await
            .optional()?;
        Ok(contact)
    }

    async fn upsert_contact(&self, data: &ContactData) -> Result<Contact> {
        let mut conn = self.pool.get().await?;

        let mut existing = None;
        if let Some(email) = &data.email {
            existing = contacts::table
                .filter(contacts::email.eq(email))
                .first::<Contact>(&mut conn)
                .await
                .optional()?;
        }
        if existing.is_none() {
            if let Some(external_id) = &data.external_contact_id {
                existing = contacts::table
                    .filter(contacts::external_contact_id.eq(external_id))
                    .first::<Contact>(&mut conn)
                    .await
                    .optional()?;
            }
        }

        if let Some(contact) = existing {
            let updated = diesel::update(contacts::table.find(contact.id))
                .set(data)
                .get_result::<Contact>(&mut conn)
                .await?;
            return Ok(updated);
        }

        let mut row = data.clone();
        row.first_name = Some(data.insert_first_name());
        let insert = diesel::insert_into(contacts::table)
            .values((contacts::id.eq(Uuid::new_v4()), &row));

        // A concurrent insert of the same email lands on the existing row.
        let contact = match &row.email {
            Some(_) => {
                insert
                    .on_conflict(contacts::email)
                    .do_update()
                    .set(data)
                    .get_result::<Contact>(&mut conn)
                    .await?
            }
            None => insert.get_result::<Contact>(&mut conn).await?,
        };
        Ok(contact)
    }

    async fn upsert_service(&self, data: &ServiceData) -> Result<Service> {
        let mut conn = self.pool.get().await?;
        let service = diesel::insert_into(services::table)
            .values((services::id.eq(Uuid::new_v4()), data))
            .on_conflict(services::external_service_id)
            .do_update()
            .set(data)
            .get_result::<Service>(&mut conn)
            .await?;
        Ok(service)
    }

    async fn find_service_by_name(&self, name: &str) -> Result<Option<Service>> {
        let mut conn = self.pool.get().await?;
        let service = services::table
            .filter(services::name.ilike(contains_pattern(name)))
            .order(services::name.asc())
            .first::<Service>(&mut conn)
            .await
            .optional()?;
        Ok(service)
    }

    async fn find_staff_by_name(&self, name: &str) -> Result<Option<StaffMember>> {
        let mut conn = self.pool.get().await?;
        let staff = staff_members::table
            .filter(staff_members::is_active.eq(true))
            .filter(staff_members::name.ilike(contains_pattern(name)))
            .order(staff_members::name.asc())
            .first::<StaffMember>(&mut conn)
            .await
            .optional()?;
        Ok(staff)
    }

    async fn find_booking_by_external_id(&self, external_id: &str) -> Result<Option<Booking>> {
        let mut conn = self.pool.get().await?;
        let booking = bookings::table
            .filter(bookings::external_booking_id.eq(external_id))
            .first::<Booking>(&mut conn)
            .await
            .optional()?;
        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        let mut conn = self.pool.get().await?;
        let booking = bookings::table
            .find(id)
            .first::<Booking>(&mut conn)
            .await
            .optional()?;
        Ok(booking)
    }

    async fn upsert_booking(&self, data: &BookingData) -> Result<Booking> {
        let mut conn = self.pool.get().await?;
        let insert = diesel::insert_into(bookings::table)
            .values((bookings::id.eq(Uuid::new_v4()), data));

        let booking = match &data.external_booking_id {
            Some(_) => {
                insert
                    .on_conflict(bookings::external_booking_id)
                    .do_update()
                    .set(data)
                    .get_result::<Booking>(&mut conn)
                    .await?
            }
            None => insert.get_result::<Booking>(&mut conn).await?,
        };
        Ok(booking)
    }

    async fn find_order_by_external_id(&self, external_id: &str) -> Result<Option<Order>> {
        let mut conn = self.pool.get().await?;
        let order = orders::table
            .filter(orders::external_order_id.eq(external_id))
            .first::<Order>(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }

    async fn upsert_order(&self, data: &OrderData) -> Result<Order> {
        let mut conn = self.pool.get().await?;
        let order = diesel::insert_into(orders::table)
            .values((orders::id.eq(Uuid::new_v4()), data))
            .on_conflict(orders::external_order_id)
            .do_update()
            .set(data)
            .get_result::<Order>(&mut conn)
            .await?;
        Ok(order)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let mut conn = self.pool.get().await?;
        let product = products::table
            .find(id)
            .first::<Product>(&mut conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn upsert_product(&self, data: &ProductData) -> Result<Product> {
        let mut conn = self.pool.get().await?;
        let insert = diesel::insert_into(products::table)
            .values((products::id.eq(Uuid::new_v4()), data));

        let product = match &data.external_product_id {
            Some(_) => {
                insert
                    .on_conflict(products::external_product_id)
                    .do_update()
                    .set(data)
                    .get_result::<Product>(&mut conn)
                    .await?
            }
            None => insert.get_result::<Product>(&mut conn).await?,
        };
        Ok(product)
    }

    async fn mark_entity_synced(
        &self,
        entity: EntityType,
        id: Uuid,
        external_id: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let now = Some(Utc::now());

        let updated = match entity {
            EntityType::Booking => {
                diesel::update(bookings::table.find(id))
                    .set((
                        bookings::sync_status.eq(SYNC_STATUS_SYNCED),
                        bookings::last_synced_at.eq(now),
                    ))
                    .execute(&mut conn)
                    .await?
            }
            EntityType::Contact => match external_id {
                Some(external_id) => {
                    diesel::update(contacts::table.find(id))
                        .set((
                            contacts::sync_status.eq(SYNC_STATUS_SYNCED),
                            contacts::last_synced_at.eq(now),
                            contacts::external_contact_id.eq(external_id),
                        ))
                        .execute(&mut conn)
                        .await?
                }
                None => {
                    diesel::update(contacts::table.find(id))
                        .set((
                            contacts::sync_status.eq(SYNC_STATUS_SYNCED),
                            contacts::last_synced_at.eq(now),
                        ))
                        .execute(&mut conn)
                        .await?
                }
            },
            EntityType::Product => {
                diesel::update(products::table.find(id))
                    .set((
                        products::sync_status.eq(SYNC_STATUS_SYNCED),
                        products::last_synced_at.eq(now),
                    ))
                    .execute(&mut conn)
                    .await?
            }
        };

        if updated == 0 {
            anyhow::bail!("{} {} not found", entity, id);
        }
        Ok(())
    }

    async fn unsynced_entity_ids(&self, entity: EntityType) -> Result<Vec<Uuid>> {
        let mut conn = self.pool.get().await?;
        let ids = match entity {
            EntityType::Booking => {
                bookings::table
                    .filter(bookings::sync_status.ne(SYNC_STATUS_SYNCED))
                    .order(bookings::created_at.asc())
                    .select(bookings::id)
                    .load::<Uuid>(&mut conn)
                    .await?
            }
            EntityType::Contact => {
                contacts::table
                    .filter(contacts::sync_status.ne(SYNC_STATUS_SYNCED))
                    .order(contacts::created_at.asc())
                    .select(contacts::id)
                    .load::<Uuid>(&mut conn)
                    .await?
            }
            EntityType::Product => {
                products::table
                    .filter(products::sync_status.ne(SYNC_STATUS_SYNCED))
                    .order(products::created_at.asc())
                    .select(products::id)
                    .load::<Uuid>(&mut conn)
                    .await?
            }
        };
        Ok(ids)
    }

    async fn enqueue_sync(&self, op: &NewSyncOperation) -> Result<SyncOperation> {
        let mut conn = self.pool.get().await?;
        let row = diesel::insert_into(sync_operations::table)
            .values(op)
            .get_result::<SyncOperation>(&mut conn)
            .await?;
        Ok(row)
    }

    async fn claim_sync_operations(&self, claim: &ClaimRequest) -> Result<Vec<SyncOperation>> {
        let mut conn = self.pool.get().await?;
        let claim = claim.clone();

        let mut claimed = conn
            .transaction::<_, anyhow::Error, _>(|conn| {
                Box::pin(async move {
                    let status = claim.status.as_str();
                    let ids: Vec<Uuid> = match claim.max_retries {
                        Some(max_retries) => {
                            sync_operations::table
                                .filter(sync_operations::status.eq(status))
                                .filter(sync_operations::retry_count.lt(max_retries))
                                .order(sync_operations::created_at.asc())
                                .limit(claim.limit)
                                .select(sync_operations::id)
                                .for_update()
                                .skip_locked()
                                .load(conn)
                                .await?
                        }
                        None => {
                            sync_operations::table
                                .filter(sync_operations::status.eq(status))
                                .order(sync_operations::created_at.asc())
                                .limit(claim.limit)
                                .select(sync_operations::id)
                                .for_update()
                                .skip_locked()
                                .load(conn)
                                .await?
                        }
                    };

                    if ids.is_empty() {
                        return Ok(Vec::new());
                    }

                    let rows = diesel::update(
                        sync_operations::table.filter(sync_operations::id.eq_any(&ids)),
                    )
                    .set((
                        sync_operations::status.eq(QueueStatus::InProgress.as_str()),
                        sync_operations::claimed_by.eq(&claim.worker_id),
                        sync_operations::lease_expires_at.eq(Some(claim.lease_until)),
                    ))
                    .get_results::<SyncOperation>(conn)
                    .await?;

                    Ok(rows)
                })
            })
            .await?;

        claimed.sort_by_key(|op| op.created_at);
        Ok(claimed)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let released = diesel::update(
            sync_operations::table
                .filter(sync_operations::status.eq(QueueStatus::InProgress.as_str()))
                .filter(sync_operations::lease_expires_at.lt(now)),
        )
        .set((
            sync_operations::status.eq(QueueStatus::Pending.as_str()),
            sync_operations::claimed_by.eq(None::<String>),
            sync_operations::lease_expires_at.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await?;
        Ok(released)
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let renewed = diesel::update(
            sync_operations::table
                .find(id)
                .filter(sync_operations::status.eq(QueueStatus::InProgress.as_str()))
                .filter(sync_operations::claimed_by.eq(worker_id)),
        )
        .set(sync_operations::lease_expires_at.eq(Some(lease_until)))
        .execute(&mut conn)
        .await?;
        Ok(renewed == 1)
    }

    async fn complete_sync_operation(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let completed = diesel::update(
            sync_operations::table
                .find(id)
                .filter(sync_operations::status.eq(QueueStatus::InProgress.as_str()))
                .filter(sync_operations::claimed_by.eq(worker_id)),
        )
        .set((
            sync_operations::status.eq(QueueStatus::Completed.as_str()),
            sync_operations::completed_at.eq(Some(Utc::now())),
            sync_operations::error.eq(None::<String>),
            sync_operations::claimed_by.eq(None::<String>),
            sync_operations::lease_expires_at.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await?;
        Ok(completed == 1)
    }

    async fn fail_sync_operation(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> Result<Option<SyncOperation>> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(
            sync_operations::table
                .find(id)
                .filter(sync_operations::status.eq(QueueStatus::InProgress.as_str()))
                .filter(sync_operations::claimed_by.eq(worker_id)),
        )
        .set((
            sync_operations::status.eq(QueueStatus::Failed.as_str()),
            sync_operations::retry_count.eq(sync_operations::retry_count + 1),
            sync_operations::error.eq(error),
            sync_operations::claimed_by.eq(None::<String>),
            sync_operations::lease_expires_at.eq(None::<DateTime<Utc>>),
        ))
        .get_result::<SyncOperation>(&mut conn)
        .await
        .optional()?;
        Ok(row)
    }

    async fn sync_counts(&self, max_retries: i32) -> Result<SyncCounts> {
        let mut conn = self.pool.get().await?;

        let pending = sync_operations::table
            .filter(sync_operations::status.eq(QueueStatus::Pending.as_str()))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;
        let in_progress = sync_operations::table
            .filter(sync_operations::status.eq(QueueStatus::InProgress.as_str()))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;
        let failed = sync_operations::table
            .filter(sync_operations::status.eq(QueueStatus::Failed.as_str()))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;
        let exhausted = sync_operations::table
            .filter(sync_operations::status.eq(QueueStatus::Failed.as_str()))
            .filter(sync_operations::retry_count.ge(max_retries))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;

        Ok(SyncCounts {
            pending,
            in_progress,
            failed,
            exhausted,
        })
    }

    async fn recent_sync_operations(&self, limit: i64) -> Result<Vec<SyncOperation>> {
        let mut conn = self.pool.get().await?;
        let rows = sync_operations::table
            .order(sync_operations::created_at.desc())
            .limit(limit)
            .load::<SyncOperation>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn log_webhook(&self, log: &NewWebhookLog) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(webhook_logs::table)
            .values(log)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn insert_sync_log(&self, log: &NewSyncLog) -> Result<SyncLog> {
        let mut conn = self.pool.get().await?;
        let row = diesel::insert_into(sync_logs::table)
            .values(log)
            .get_result::<SyncLog>(&mut conn)
            .await?;
        Ok(row)
    }

    async fn finish_sync_log(
        &self,
        id: Uuid,
        status: &str,
        details: &Value,
        error: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(sync_logs::table.find(id))
            .set((
                sync_logs::status.eq(status),
                sync_logs::details.eq(details),
                sync_logs::error.eq(error),
                sync_logs::completed_at.eq(Some(Utc::now())),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_sync_log(&self, id: Uuid) -> Result<Option<SyncLog>> {
        let mut conn = self.pool.get().await?;
        let log = sync_logs::table
            .find(id)
            .first::<SyncLog>(&mut conn)
            .await
            .optional()?;
        Ok(log)
    }

    async fn sync_logs_with_status(&self, sync_type: &str, status: &str) -> Result<Vec<SyncLog>> {
        let mut conn = self.pool.get().await?;
        let logs = sync_logs::table
            .filter(sync_logs::sync_type.eq(sync_type))
            .filter(sync_logs::status.eq(status))
            .order(sync_logs::started_at.asc())
            .load::<SyncLog>(&mut conn)
            .await?;
        Ok(logs)
    }
}
