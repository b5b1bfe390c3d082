use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use platform_client::{Page, PlatformApi};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{contact_from_value, transform_booking, transform_order, transform_service};
use tracing::{error, info, warn};

use crate::ingest::Ingestor;
use crate::models::*;

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub batch_size: u32,
    /// Count records whose platform id is already stored as skipped.
    pub skip_existing: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_PAGE_SIZE,
            skip_existing: false,
        }
    }
}

/// Entity groups a full sync can be limited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    Services,
    #[serde(alias = "contacts")]
    Customers,
    #[serde(alias = "bookings")]
    Appointments,
    Orders,
}

/// Per-run overrides of [`AgentConfig`]. Stored with the job so a resumed
/// run behaves like the original one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSyncOptions {
    /// `None` syncs everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<SyncEntity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_existing: Option<bool>,
}

impl FullSyncOptions {
    fn includes(&self, entity: SyncEntity) -> bool {
        self.entities
            .as_ref()
            .map_or(true, |entities| entities.contains(&entity))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntitySyncResult {
    pub synced: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Set when a page could not be fetched and the entity was abandoned.
    pub error: Option<String>,
}

/// Entities left out of the run are `None`.
#[derive(Debug, Clone, Serialize)]
pub struct FullSyncResult {
    pub user_id: Option<String>,
    pub options: FullSyncOptions,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub services: Option<EntitySyncResult>,
    pub customers: Option<EntitySyncResult>,
    pub appointments: Option<EntitySyncResult>,
    pub orders: Option<EntitySyncResult>,
}

impl FullSyncResult {
    fn entities(&self) -> impl Iterator<Item = &EntitySyncResult> {
        [&self.services, &self.customers, &self.appointments, &self.orders]
            .into_iter()
            .flatten()
    }

    pub fn aborted(&self) -> bool {
        self.entities().any(|r| r.error.is_some())
    }

    /// Page errors of every abandoned entity, joined.
    pub fn error_summary(&self) -> Option<String> {
        let errors: Vec<&str> = self.entities().filter_map(|r| r.error.as_deref()).collect();
        (!errors.is_empty()).then(|| errors.join("; "))
    }
}

#[derive(Debug, Clone, Copy)]
enum Collection {
    Contacts,
    Bookings,
    Orders,
}

impl Collection {
    fn name(&self) -> &'static str {
        match self {
            Collection::Contacts => "customers",
            Collection::Bookings => "appointments",
            Collection::Orders => "orders",
        }
    }
}

enum RecordOutcome {
    Synced,
    Skipped,
}

/// Pulls whole collections from the platform page by page and mirrors them
/// locally, bypassing the sync queue.
pub struct SyncAgent {
    platform: Arc<dyn PlatformApi>,
    ingestor: Ingestor,
    config: AgentConfig,
}

impl SyncAgent {
    pub fn new(platform: Arc<dyn PlatformApi>, ingestor: Ingestor, config: AgentConfig) -> Self {
        Self {
            platform,
            ingestor,
            config,
        }
    }

    /// Services first so appointments can link to them, then customers so
    /// appointments and orders can link to those.
    pub async fn sync_all(&self, user_id: Option<String>, options: &FullSyncOptions) -> FullSyncResult {
        let started_at = Utc::now();
        info!("Starting full sync (user {:?}, options {:?})", user_id, options);

        let config = AgentConfig {
            batch_size: options.batch_size.unwrap_or(self.config.batch_size),
            skip_existing: options.skip_existing.unwrap_or(self.config.skip_existing),
        };

        let services = if options.includes(SyncEntity::Services) {
            Some(self.sync_services().await)
        } else {
            None
        };
        let customers = if options.includes(SyncEntity::Customers) {
            Some(self.sync_collection(Collection::Contacts, &config).await)
        } else {
            None
        };
        let appointments = if options.includes(SyncEntity::Appointments) {
            Some(self.sync_collection(Collection::Bookings, &config).await)
        } else {
            None
        };
        let orders = if options.includes(SyncEntity::Orders) {
            Some(self.sync_collection(Collection::Orders, &config).await)
        } else {
            None
        };

        let result = FullSyncResult {
            user_id,
            options: options.clone(),
            started_at,
            duration_ms: (Utc::now() - started_at).num_milliseconds(),
            services,
            customers,
            appointments,
            orders,
        };
        let synced: usize = result.entities().map(|r| r.synced).sum();
        info!(
            "Full sync finished in {}ms: {} records stored",
            result.duration_ms, synced
        );
        result
    }

    pub async fn sync_services(&self) -> EntitySyncResult {
        let mut result = EntitySyncResult::default();
        let services = match self.platform.list_services().await {
            Ok(services) => services,
            Err(e) => {
                error!("Failed to list services: {}", e);
                result.error = Some(e.to_string());
                return result;
            }
        };

        for service in &services {
            let Some(record) = transform_service(service) else {
                result.errors += 1;
                continue;
            };
            match self.ingestor.store().upsert_service(&ServiceData::from(record)).await {
                Ok(_) => result.synced += 1,
                Err(e) => {
                    warn!("Failed to store service: {:#}", e);
                    result.errors += 1;
                }
            }
        }
        result
    }

    pub async fn sync_customers(&self) -> EntitySyncResult {
        self.sync_collection(Collection::Contacts, &self.config).await
    }

    pub async fn sync_appointments(&self) -> EntitySyncResult {
        self.sync_collection(Collection::Bookings, &self.config).await
    }

    pub async fn sync_orders(&self) -> EntitySyncResult {
        self.sync_collection(Collection::Orders, &self.config).await
    }

    async fn fetch_page(
        &self,
        collection: Collection,
        cursor: Option<&str>,
        batch_size: u32,
    ) -> platform_client::Result<Page> {
        let limit = batch_size.max(1);
        match collection {
            Collection::Contacts => self.platform.query_contacts(cursor, limit).await,
            Collection::Bookings => self.platform.query_bookings(cursor, limit).await,
            Collection::Orders => self.platform.query_orders(cursor, limit).await,
        }
    }

    async fn sync_collection(&self, collection: Collection, config: &AgentConfig) -> EntitySyncResult {
        let mut result = EntitySyncResult::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self.fetch_page(collection, cursor.as_deref(), config.batch_size)
                .await {
                Ok(page) => page,
                Err(e) => {
                    error!("Failed to fetch {} page: {}", collection.name(), e);
                    result.error = Some(e.to_string());
                    break;
                }
            };

            for item in &page.items {
                match self.sync_record(collection, item, config.skip_existing).await {
                    Ok(RecordOutcome::Synced) => result.synced += 1,
                    Ok(RecordOutcome::Skipped) => result.skipped += 1,
                    Err(e) => {
                        warn!("Failed to sync one of {}: {:#}", collection.name(), e);
                        result.errors += 1;
                    }
                }
            }

            match page.next_cursor {
                Some(next) if !page.items.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                _ => break,
            }
        }

        info!(
            "Synced {}: {} stored, {} skipped, {} errors",
            collection.name(),
            result.synced,
            result.skipped,
            result.errors
        );
        result
    }

    async fn sync_record(
        &self,
        collection: Collection,
        item: &Value,
        skip_existing: bool,
    ) -> Result<RecordOutcome> {
        let store = self.ingestor.store();
        match collection {
            Collection::Contacts => {
                let record = contact_from_value(item);
                if skip_existing {
                    if let Some(external_id) = &record.external_contact_id {
                        if store.find_contact_by_external_id(external_id).await?.is_some() {
                            return Ok(RecordOutcome::Skipped);
                        }
                    }
                }
                self.ingestor
                    .upsert_contact(ContactData::from_platform(record))
                    .await?;
            }
            Collection::Bookings => {
                let record = transform_booking(item);
                if skip_existing {
                    if let Some(external_id) = &record.external_booking_id {
                        if store.find_booking_by_external_id(external_id).await?.is_some() {
                            return Ok(RecordOutcome::Skipped);
                        }
                    }
                }
                self.ingestor.upsert_booking(record).await?;
            }
            Collection::Orders => {
                let record = transform_order(item);
                if skip_existing {
                    if let Some(external_id) = &record.external_order_id {
                        if store.find_order_by_external_id(external_id).await?.is_some() {
                            return Ok(RecordOutcome::Skipped);
                        }
                    }
                }
                self.ingestor.upsert_order(record).await?;
            }
        }
        Ok(RecordOutcome::Synced)
    }
}
