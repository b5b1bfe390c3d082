use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use shared::transform::{unwrap_entity, UNKNOWN_SERVICE};
use shared::{
    contact_from_value, transform_booking, transform_contact, transform_order, transform_product,
    BookingRecord, ContactRecord, EventTarget, OrderRecord, ProductRecord,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::models::*;
use crate::store::SyncStore;

pub const LOG_STATUS_PROCESSED: &str = "processed";
pub const LOG_STATUS_FAILED: &str = "failed";
pub const LOG_STATUS_LOGGED: &str = "logged";

/// The payload lacks something required to store it. Never retried.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidPayload(pub String);

/// Local row written by an ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
    pub entity: &'static str,
    pub id: Uuid,
    pub external_id: Option<String>,
}

/// Writes platform payloads into the local mirror, linking foreign keys
/// where the referenced rows already exist.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn SyncStore>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    pub async fn ingest(&self, target: EventTarget, payload: &Value) -> Result<Ingested> {
        match target {
            EventTarget::Booking => {
                let booking = self.upsert_booking(transform_booking(payload)).await?;
                Ok(Ingested {
                    entity: "booking",
                    id: booking.id,
                    external_id: booking.external_booking_id,
                })
            }
            EventTarget::Contact => {
                let contact = self
                    .upsert_contact(ContactData::from_platform(transform_contact(payload)))
                    .await?;
                Ok(Ingested {
                    entity: "contact",
                    id: contact.id,
                    external_id: contact.external_contact_id,
                })
            }
            EventTarget::Order => {
                let order = self.upsert_order(transform_order(payload)).await?;
                Ok(Ingested {
                    entity: "order",
                    id: order.id,
                    external_id: Some(order.external_order_id),
                })
            }
            EventTarget::Product => {
                let product = self.upsert_product(transform_product(payload)).await?;
                Ok(Ingested {
                    entity: "product",
                    id: product.id,
                    external_id: product.external_product_id,
                })
            }
        }
    }

    /// Ingests and records the attempt in `webhook_logs` either way.
    pub async fn ingest_logged(
        &self,
        target: EventTarget,
        event_type: &str,
        payload: &Value,
    ) -> Result<Ingested> {
        match self.ingest(target, payload).await {
            Ok(ingested) => {
                self.log(NewWebhookLog::new(
                    event_type,
                    ingested.external_id.clone(),
                    LOG_STATUS_PROCESSED,
                    payload,
                ))
                .await;
                Ok(ingested)
            }
            Err(e) => {
                error!("Failed to ingest {} webhook: {:#}", event_type, e);
                self.log(
                    NewWebhookLog::new(event_type, None, LOG_STATUS_FAILED, payload)
                        .with_error(format!("{:#}", e)),
                )
                .await;
                Err(e)
            }
        }
    }

    /// A failed audit write must not fail the webhook itself.
    pub async fn log(&self, entry: NewWebhookLog) {
        if let Err(e) = self.store.log_webhook(&entry).await {
            error!("Failed to write webhook log for {}: {:#}", entry.event_type, e);
        }
    }

    pub async fn upsert_contact(&self, data: ContactData) -> Result<Contact> {
        let contact = self.store.upsert_contact(&data).await?;
        info!(
            "Upserted contact {} ({})",
            contact.id,
            contact.email.as_deref().unwrap_or("no email")
        );
        Ok(contact)
    }

    pub async fn upsert_booking(&self, record: BookingRecord) -> Result<Booking> {
        let customer_id = self
            .link_contact(
                record.customer_email.as_deref(),
                record.external_contact_id.as_deref(),
            )
            .await?;

        let service_id = if record.service_name != UNKNOWN_SERVICE {
            self.store
                .find_service_by_name(&record.service_name)
                .await?
                .map(|s| s.id)
        } else {
            None
        };

        let staff_id = match &record.staff_member {
            Some(name) => self.store.find_staff_by_name(name).await?.map(|s| s.id),
            None => None,
        };

        let mut data = BookingData::from_platform(record);
        data.customer_id = customer_id;
        data.service_id = service_id;
        data.staff_id = staff_id;

        let booking = self.store.upsert_booking(&data).await?;
        info!(
            "Upserted booking {} (external {:?}, customer {:?})",
            booking.id, booking.external_booking_id, booking.customer_id
        );
        Ok(booking)
    }

    pub async fn upsert_order(&self, record: OrderRecord) -> Result<Order> {
        let external_order_id = record
            .external_order_id
            .clone()
            .ok_or_else(|| InvalidPayload("order payload carries no order id".into()))?;

        let customer_id = self
            .link_contact(
                record.customer_email.as_deref(),
                record.external_contact_id.as_deref(),
            )
            .await?;

        let booking_id = match &record.external_booking_id {
            Some(external_id) => self
                .store
                .find_booking_by_external_id(external_id)
                .await?
                .map(|b| b.id),
            None => None,
        };

        let mut data = OrderData::from_platform(external_order_id, record);
        data.customer_id = customer_id;
        data.booking_id = booking_id;

        let order = self.store.upsert_order(&data).await?;
        info!("Upserted order {} (external {})", order.id, order.external_order_id);
        Ok(order)
    }

    pub async fn upsert_product(&self, record: ProductRecord) -> Result<Product> {
        let product = self.store.upsert_product(&ProductData::from(record)).await?;
        info!(
            "Upserted product {} stock={}",
            product.product_name, product.current_stock
        );
        Ok(product)
    }

    /// Local contact id by email, then by platform contact id.
    pub async fn link_contact(
        &self,
        email: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<Option<Uuid>> {
        if let Some(email) = email {
            if let Some(contact) = self.store.find_contact_by_email(email).await? {
                return Ok(Some(contact.id));
            }
        }
        if let Some(external_id) = external_id {
            if let Some(contact) = self.store.find_contact_by_external_id(external_id).await? {
                return Ok(Some(contact.id));
            }
        }
        Ok(None)
    }
}

/// Contact the event itself describes, for booking and order payloads.
pub fn event_contact(target: EventTarget, payload: &Value) -> Option<ContactRecord> {
    match target {
        EventTarget::Booking => {
            let booking = transform_booking(payload);
            let mut contact = shared::booking_contact(payload).unwrap_or_default();
            contact.email = contact.email.or(booking.customer_email);
            contact.external_contact_id =
                contact.external_contact_id.or(booking.external_contact_id);
            Some(contact)
        }
        EventTarget::Order => {
            let order = transform_order(payload);
            let entity = unwrap_entity(payload, &["order"]);
            let mut contact = entity
                .get("buyerInfo")
                .filter(|v| v.is_object())
                .map(contact_from_value)
                .unwrap_or_default();
            contact.email = contact.email.or(order.customer_email);
            contact.external_contact_id = contact.external_contact_id.or(order.external_contact_id);
            Some(contact)
        }
        EventTarget::Contact | EventTarget::Product => None,
    }
    .filter(|c| c.email.is_some() || c.external_contact_id.is_some())
}
