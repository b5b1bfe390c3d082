use std::sync::Arc;

use anyhow::{Context, Result};
use platform_client::PlatformApi;
use serde::Serialize;
use serde_json::Value;
use shared::{
    contact_from_value, transform_booking, transform_order, Dependency, EventTarget,
    WebhookEventType,
};
use tracing::{error, info, warn};

use crate::ingest::{
    event_contact, Ingested, Ingestor, LOG_STATUS_FAILED, LOG_STATUS_LOGGED, LOG_STATUS_PROCESSED,
};
use crate::models::*;
use crate::store::SyncStore;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Processed {
        event_type: String,
        entity: Ingested,
        dependencies: Vec<&'static str>,
    },
    /// No handler for this event type; the payload is only recorded.
    Logged { event_type: String },
}

/// Processes webhook events after making sure the rows they reference exist
/// locally, pulling them from the platform when they do not.
pub struct WebhookProcessor {
    platform: Arc<dyn PlatformApi>,
    ingestor: Ingestor,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn SyncStore>, platform: Arc<dyn PlatformApi>) -> Self {
        Self {
            platform,
            ingestor: Ingestor::new(store),
        }
    }

    pub async fn process_webhook(&self, event_type: &str, payload: &Value) -> Result<ProcessOutcome> {
        let event = WebhookEventType::parse(event_type);
        info!("Processing webhook event {}", event);

        let result = self.process_event(&event, payload).await;
        let entry = match &result {
            Ok(ProcessOutcome::Processed { entity, .. }) => NewWebhookLog::new(
                event.as_str(),
                entity.external_id.clone(),
                LOG_STATUS_PROCESSED,
                payload,
            ),
            Ok(ProcessOutcome::Logged { .. }) => {
                NewWebhookLog::new(event.as_str(), None, LOG_STATUS_LOGGED, payload)
            }
            Err(e) => {
                error!("Webhook event {} failed: {:#}", event, e);
                NewWebhookLog::new(event.as_str(), None, LOG_STATUS_FAILED, payload)
                    .with_error(format!("{:#}", e))
            }
        };
        self.ingestor.log(entry).await;

        result
    }

    async fn process_event(
        &self,
        event: &WebhookEventType,
        payload: &Value,
    ) -> Result<ProcessOutcome> {
        let Some(target) = event.target() else {
            info!("No handler for webhook event {}, payload logged", event);
            return Ok(ProcessOutcome::Logged {
                event_type: event.as_str().to_string(),
            });
        };

        for dependency in event.dependencies() {
            self.resolve(*dependency, target, payload)
                .await
                .with_context(|| format!("resolving {}", dependency.as_str()))?;
        }

        let entity = self.ingestor.ingest(target, payload).await?;
        info!(
            "Webhook event {} stored {} {}",
            event, entity.entity, entity.id
        );

        Ok(ProcessOutcome::Processed {
            event_type: event.as_str().to_string(),
            entity,
            dependencies: event.dependencies().iter().map(|d| d.as_str()).collect(),
        })
    }

    async fn resolve(&self, dependency: Dependency, target: EventTarget, payload: &Value) -> Result<()> {
        match dependency {
            Dependency::ContactExists => self.ensure_contact(target, payload).await,
            Dependency::BookingExists => self.ensure_booking(payload).await,
            Dependency::OrderExists => self.ensure_order(payload).await,
        }
    }

    async fn ensure_contact(&self, target: EventTarget, payload: &Value) -> Result<()> {
        let Some(contact) = event_contact(target, payload) else {
            warn!("Event carries no contact email or id, skipping contact resolution");
            return Ok(());
        };

        let existing = self
            .ingestor
            .link_contact(contact.email.as_deref(), contact.external_contact_id.as_deref())
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        if let Some(email) = contact.email.as_deref() {
            match self.platform.find_contact_by_email(email).await {
                Ok(Some(remote)) => {
                    let mut record = contact_from_value(&remote);
                    record.email = record.email.or_else(|| contact.email.clone());
                    let stored = self.ingestor.upsert_contact(ContactData::from_platform(record)).await?;
                    info!("Pulled contact {} from the platform", stored.id);
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) => warn!("Platform contact lookup for {} failed: {}", email, e),
            }
        }

        // Not on the platform either: keep the details the event carries.
        let stored = self
            .ingestor
            .upsert_contact(ContactData::from_local(contact))
            .await?;
        info!("Created contact {} from event details", stored.id);
        Ok(())
    }

    async fn ensure_booking(&self, payload: &Value) -> Result<()> {
        let Some(external_id) = transform_booking(payload).external_booking_id else {
            return Ok(());
        };
        if self
            .ingestor
            .store()
            .find_booking_by_external_id(&external_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        match self.platform.get_booking(&external_id).await {
            Ok(Some(remote)) => {
                self.ingestor.upsert_booking(transform_booking(&remote)).await?;
                info!("Pulled booking {} from the platform", external_id);
            }
            Ok(None) => warn!("Booking {} not found on the platform", external_id),
            Err(e) => warn!("Platform booking lookup for {} failed: {}", external_id, e),
        }
        Ok(())
    }

    async fn ensure_order(&self, payload: &Value) -> Result<()> {
        let Some(external_id) = transform_order(payload).external_order_id else {
            return Ok(());
        };
        if self
            .ingestor
            .store()
            .find_order_by_external_id(&external_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        match self.platform.get_order(&external_id).await {
            Ok(Some(remote)) => {
                self.ingestor.upsert_order(transform_order(&remote)).await?;
                info!("Pulled order {} from the platform", external_id);
            }
            Ok(None) => warn!("Order {} not found on the platform", external_id),
            Err(e) => warn!("Platform order lookup for {} failed: {}", external_id, e),
        }
        Ok(())
    }
}
