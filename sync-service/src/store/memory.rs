//! In-process store used by the service tests.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::transform::DEFAULT_MIN_THRESHOLD;
use shared::{EntityType, QueueStatus, SYNC_STATUS_PENDING, SYNC_STATUS_SYNCED};
use uuid::Uuid;

use super::{ClaimRequest, SyncCounts, SyncStore};
use crate::models::*;

#[derive(Default)]
pub struct MemoryState {
    pub contacts: Vec<Contact>,
    pub services: Vec<Service>,
    pub staff: Vec<StaffMember>,
    pub bookings: Vec<Booking>,
    pub orders: Vec<Order>,
    pub products: Vec<Product>,
    pub sync_operations: Vec<SyncOperation>,
    pub webhook_logs: Vec<WebhookLog>,
    pub sync_logs: Vec<SyncLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
    broken: Mutex<HashSet<&'static str>>,
}

fn merge<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

fn merge_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        *target = value.clone();
    }
}

/// The row, while it is in progress under `worker_id`.
fn held<'a>(state: &'a mut MemoryState, id: Uuid, worker_id: &str) -> Option<&'a mut SyncOperation> {
    state.sync_operations.iter_mut().find(|op| {
        op.id == id
            && op.status == QueueStatus::InProgress.as_str()
            && op.claimed_by.as_deref() == Some(worker_id)
    })
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to the named write fail until `repair` is called.
    pub fn break_write(&self, operation: &'static str) {
        self.broken.lock().unwrap().insert(operation);
    }

    pub fn repair(&self, operation: &'static str) {
        self.broken.lock().unwrap().remove(operation);
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.broken.lock().unwrap().contains(operation) {
            return Err(anyhow!("{} failed: store unavailable", operation));
        }
        Ok(())
    }

    pub fn add_staff(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().staff.push(StaffMember {
            id,
            name: name.to_string(),
            email: None,
            is_active: true,
            created_at: Utc::now(),
        });
        id
    }

    pub fn insert_contact(&self, email: &str, first_name: &str, sync_status: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.state.lock().unwrap().contacts.push(Contact {
            id,
            external_contact_id: None,
            email: Some(email.to_string()),
            first_name: first_name.to_string(),
            last_name: None,
            phone: None,
            address_line: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            sync_status: sync_status.to_string(),
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.state.lock().unwrap().contacts.clone()
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.state.lock().unwrap().bookings.clone()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn operations(&self) -> Vec<SyncOperation> {
        self.state.lock().unwrap().sync_operations.clone()
    }

    pub fn webhook_logs(&self) -> Vec<WebhookLog> {
        self.state.lock().unwrap().webhook_logs.clone()
    }

    pub fn sync_logs(&self) -> Vec<SyncLog> {
        self.state.lock().unwrap().sync_logs.clone()
    }
}

fn apply_contact(contact: &mut Contact, data: &ContactData) {
    merge_opt(&mut contact.external_contact_id, &data.external_contact_id);
    merge_opt(&mut contact.email, &data.email);
    merge(&mut contact.first_name, &data.first_name);
    merge_opt(&mut contact.last_name, &data.last_name);
    merge_opt(&mut contact.phone, &data.phone);
    merge_opt(&mut contact.address_line, &data.address_line);
    merge_opt(&mut contact.city, &data.city);
    merge_opt(&mut contact.state, &data.state);
    merge_opt(&mut contact.postal_code, &data.postal_code);
    merge_opt(&mut contact.country, &data.country);
    merge(&mut contact.sync_status, &data.sync_status);
    merge_opt(&mut contact.last_synced_at, &data.last_synced_at);
    merge(&mut contact.updated_at, &data.updated_at);
}

fn apply_booking(booking: &mut Booking, data: &BookingData) {
    merge_opt(&mut booking.external_booking_id, &data.external_booking_id);
    merge_opt(&mut booking.customer_id, &data.customer_id);
    merge_opt(&mut booking.customer_email, &data.customer_email);
    booking.customer_name = data.customer_name.clone();
    merge_opt(&mut booking.customer_phone, &data.customer_phone);
    merge_opt(&mut booking.service_id, &data.service_id);
    booking.service_name = data.service_name.clone();
    booking.service_duration = data.service_duration;
    merge_opt(&mut booking.appointment_date, &data.appointment_date);
    merge_opt(&mut booking.end_time, &data.end_time);
    merge_opt(&mut booking.staff_member, &data.staff_member);
    merge_opt(&mut booking.staff_id, &data.staff_id);
    booking.status = data.status.clone();
    booking.payment_status = data.payment_status.clone();
    merge_opt(&mut booking.total_price, &data.total_price);
    merge_opt(&mut booking.revision, &data.revision);
    booking.raw_payload = data.raw_payload.clone();
    booking.sync_status = data.sync_status.clone();
    merge_opt(&mut booking.last_synced_at, &data.last_synced_at);
    booking.updated_at = data.updated_at;
}

fn apply_order(order: &mut Order, data: &OrderData) {
    order.external_order_id = data.external_order_id.clone();
    merge_opt(&mut order.order_number, &data.order_number);
    merge_opt(&mut order.customer_id, &data.customer_id);
    merge_opt(&mut order.booking_id, &data.booking_id);
    merge_opt(&mut order.customer_email, &data.customer_email);
    order.total_amount = data.total_amount.clone();
    order.currency = data.currency.clone();
    order.payment_status = data.payment_status.clone();
    order.fulfillment_status = data.fulfillment_status.clone();
    order.raw_payload = data.raw_payload.clone();
    order.updated_at = data.updated_at;
}

fn apply_product(product: &mut Product, data: &ProductData) {
    merge_opt(&mut product.external_product_id, &data.external_product_id);
    product.product_name = data.product_name.clone();
    product.current_stock = data.current_stock;
    merge(&mut product.min_threshold, &data.min_threshold);
    merge_opt(&mut product.cost_per_unit, &data.cost_per_unit);
    product.is_active = data.is_active;
    product.sync_status = data.sync_status.clone();
    merge_opt(&mut product.last_synced_at, &data.last_synced_at);
    product.updated_at = data.updated_at;
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn find_contact_by_email(&self, email: &str) -> Result<Option<Contact>> {
        let email = email.trim().to_ascii_lowercase();
        let state = self.state.lock().unwrap();
        Ok(state
            .contacts
            .iter()
            .find(|c| c.email.as_deref() == Some(email.as_str()))
            .cloned())
    }

    async fn find_contact_by_external_id(&self, external_id: &str) -> Result<Option<Contact>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .contacts
            .iter()
            .find(|c| c.external_contact_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>> {
        let state = self.state.lock().unwrap();
        Ok(state.contacts.iter().find(|c| c.id == id).cloned())
    }

    async fn upsert_contact(&self, data: &ContactData) -> Result<Contact> {
        let mut state = self.state.lock().unwrap();
        let by_email = data.email.as_ref().and_then(|email| {
            state
                .contacts
                .iter()
                .position(|c| c.email.as_ref() == Some(email))
        });
        let position = by_email.or_else(|| {
            data.external_contact_id.as_ref().and_then(|ext| {
                state
                    .contacts
                    .iter()
                    .position(|c| c.external_contact_id.as_ref() == Some(ext))
            })
        });

        if let Some(position) = position {
            let contact = &mut state.contacts[position];
            apply_contact(contact, data);
            return Ok(contact.clone());
        }

        let now = Utc::now();
        let mut contact = Contact {
            id: Uuid::new_v4(),
            external_contact_id: None,
            email: None,
            first_name: data.insert_first_name(),
            last_name: None,
            phone: None,
            address_line: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            sync_status: SYNC_STATUS_PENDING.to_string(),
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };
        apply_contact(&mut contact, data);
        state.contacts.push(contact.clone());
        Ok(contact)
    }

    async fn upsert_service(&self, data: &ServiceData) -> Result<Service> {
        let mut state = self.state.lock().unwrap();
        if let Some(service) = state
            .services
            .iter_mut()
            .find(|s| s.external_service_id == data.external_service_id)
        {
            service.name = data.name.clone();
            service.duration_minutes = data.duration_minutes;
            service.price = data.price.clone();
            return Ok(service.clone());
        }
        let service = Service {
            id: Uuid::new_v4(),
            external_service_id: data.external_service_id.clone(),
            name: data.name.clone(),
            duration_minutes: data.duration_minutes,
            price: data.price.clone(),
            created_at: Utc::now(),
        };
        state.services.push(service.clone());
        Ok(service)
    }

    async fn find_service_by_name(&self, name: &str) -> Result<Option<Service>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .services
            .iter()
            .find(|s| contains_ignore_case(&s.name, name))
            .cloned())
    }

    async fn find_staff_by_name(&self, name: &str) -> Result<Option<StaffMember>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .staff
            .iter()
            .find(|s| s.is_active && contains_ignore_case(&s.name, name))
            .cloned())
    }

    async fn find_booking_by_external_id(&self, external_id: &str) -> Result<Option<Booking>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bookings
            .iter()
            .find(|b| b.external_booking_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        let state = self.state.lock().unwrap();
        Ok(state.bookings.iter().find(|b| b.id == id).cloned())
    }

    async fn upsert_booking(&self, data: &BookingData) -> Result<Booking> {
        let mut state = self.state.lock().unwrap();
        if let Some(ext) = &data.external_booking_id {
            if let Some(booking) = state
                .bookings
                .iter_mut()
                .find(|b| b.external_booking_id.as_ref() == Some(ext))
            {
                apply_booking(booking, data);
                return Ok(booking.clone());
            }
        }
        let booking = Booking {
            id: Uuid::new_v4(),
            external_booking_id: data.external_booking_id.clone(),
            customer_id: data.customer_id,
            customer_email: data.customer_email.clone(),
            customer_name: data.customer_name.clone(),
            customer_phone: data.customer_phone.clone(),
            service_id: data.service_id,
            service_name: data.service_name.clone(),
            service_duration: data.service_duration,
            appointment_date: data.appointment_date,
            end_time: data.end_time,
            staff_member: data.staff_member.clone(),
            staff_id: data.staff_id,
            status: data.status.clone(),
            payment_status: data.payment_status.clone(),
            total_price: data.total_price.clone(),
            revision: data.revision,
            raw_payload: data.raw_payload.clone(),
            sync_status: data.sync_status.clone(),
            last_synced_at: data.last_synced_at,
            created_at: Utc::now(),
            updated_at: data.updated_at,
        };
        state.bookings.push(booking.clone());
        Ok(booking)
    }

    async fn find_order_by_external_id(&self, external_id: &str) -> Result<Option<Order>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .iter()
            .find(|o| o.external_order_id == external_id)
            .cloned())
    }

    async fn upsert_order(&self, data: &OrderData) -> Result<Order> {
        let mut state = self.state.lock().unwrap();
        if let Some(order) = state
            .orders
            .iter_mut()
            .find(|o| o.external_order_id == data.external_order_id)
        {
            apply_order(order, data);
            return Ok(order.clone());
        }
        let order = Order {
            id: Uuid::new_v4(),
            external_order_id: data.external_order_id.clone(),
            order_number: data.order_number.clone(),
            customer_id: data.customer_id,
            booking_id: data.booking_id,
            customer_email: data.customer_email.clone(),
            total_amount: data.total_amount.clone(),
            currency: data.currency.clone(),
            payment_status: data.payment_status.clone(),
            fulfillment_status: data.fulfillment_status.clone(),
            raw_payload: data.raw_payload.clone(),
            created_at: Utc::now(),
            updated_at: data.updated_at,
        };
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let state = self.state.lock().unwrap();
        Ok(state.products.iter().find(|p| p.id == id).cloned())
    }

    async fn upsert_product(&self, data: &ProductData) -> Result<Product> {
        let mut state = self.state.lock().unwrap();
        if let Some(ext) = &data.external_product_id {
            if let Some(product) = state
                .products
                .iter_mut()
                .find(|p| p.external_product_id.as_ref() == Some(ext))
            {
                apply_product(product, data);
                return Ok(product.clone());
            }
        }
        let now = Utc::now();
        let mut product = Product {
            id: Uuid::new_v4(),
            external_product_id: None,
            product_name: String::new(),
            current_stock: 0,
            min_threshold: DEFAULT_MIN_THRESHOLD,
            cost_per_unit: None,
            is_active: true,
            sync_status: SYNC_STATUS_PENDING.to_string(),
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };
        apply_product(&mut product, data);
        state.products.push(product.clone());
        Ok(product)
    }

    async fn mark_entity_synced(
        &self,
        entity: EntityType,
        id: Uuid,
        external_id: Option<&str>,
    ) -> Result<()> {
        self.check("mark_entity_synced")?;
        let now = Some(Utc::now());
        let mut state = self.state.lock().unwrap();
        let found = match entity {
            EntityType::Booking => state.bookings.iter_mut().find(|b| b.id == id).map(|b| {
                b.sync_status = SYNC_STATUS_SYNCED.to_string();
                b.last_synced_at = now;
            }),
            EntityType::Contact => state.contacts.iter_mut().find(|c| c.id == id).map(|c| {
                c.sync_status = SYNC_STATUS_SYNCED.to_string();
                c.last_synced_at = now;
                if let Some(external_id) = external_id {
                    c.external_contact_id = Some(external_id.to_string());
                }
            }),
            EntityType::Product => state.products.iter_mut().find(|p| p.id == id).map(|p| {
                p.sync_status = SYNC_STATUS_SYNCED.to_string();
                p.last_synced_at = now;
            }),
        };
        found.ok_or_else(|| anyhow!("{} {} not found", entity, id))
    }

    async fn unsynced_entity_ids(&self, entity: EntityType) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        let ids = match entity {
            EntityType::Booking => state
                .bookings
                .iter()
                .filter(|b| b.sync_status != SYNC_STATUS_SYNCED)
                .map(|b| b.id)
                .collect(),
            EntityType::Contact => state
                .contacts
                .iter()
                .filter(|c| c.sync_status != SYNC_STATUS_SYNCED)
                .map(|c| c.id)
                .collect(),
            EntityType::Product => state
                .products
                .iter()
                .filter(|p| p.sync_status != SYNC_STATUS_SYNCED)
                .map(|p| p.id)
                .collect(),
        };
        Ok(ids)
    }

    async fn enqueue_sync(&self, op: &NewSyncOperation) -> Result<SyncOperation> {
        let row = SyncOperation {
            id: op.id,
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id,
            operation_type: op.operation_type.clone(),
            status: op.status.clone(),
            retry_count: 0,
            error: None,
            claimed_by: None,
            lease_expires_at: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.state.lock().unwrap().sync_operations.push(row.clone());
        Ok(row)
    }

    async fn claim_sync_operations(&self, claim: &ClaimRequest) -> Result<Vec<SyncOperation>> {
        let mut state = self.state.lock().unwrap();
        let mut claimed = Vec::new();
        for op in state.sync_operations.iter_mut() {
            if claimed.len() as i64 >= claim.limit {
                break;
            }
            if op.status != claim.status.as_str() {
                continue;
            }
            if matches!(claim.max_retries, Some(max) if op.retry_count >= max) {
                continue;
            }
            op.status = QueueStatus::InProgress.as_str().to_string();
            op.claimed_by = Some(claim.worker_id.clone());
            op.lease_expires_at = Some(claim.lease_until);
            claimed.push(op.clone());
        }
        Ok(claimed)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut released = 0;
        for op in state.sync_operations.iter_mut() {
            let expired = matches!(op.lease_expires_at, Some(until) if until < now);
            if op.status == QueueStatus::InProgress.as_str() && expired {
                op.status = QueueStatus::Pending.as_str().to_string();
                op.claimed_by = None;
                op.lease_expires_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match held(&mut state, id, worker_id) {
            Some(op) => {
                op.lease_expires_at = Some(lease_until);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_sync_operation(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        self.check("complete_sync_operation")?;
        let mut state = self.state.lock().unwrap();
        let Some(op) = held(&mut state, id, worker_id) else {
            return Ok(false);
        };
        op.status = QueueStatus::Completed.as_str().to_string();
        op.completed_at = Some(Utc::now());
        op.error = None;
        op.claimed_by = None;
        op.lease_expires_at = None;
        Ok(true)
    }

    async fn fail_sync_operation(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> Result<Option<SyncOperation>> {
        self.check("fail_sync_operation")?;
        let mut state = self.state.lock().unwrap();
        let Some(op) = held(&mut state, id, worker_id) else {
            return Ok(None);
        };
        op.status = QueueStatus::Failed.as_str().to_string();
        op.retry_count += 1;
        op.error = Some(error.to_string());
        op.claimed_by = None;
        op.lease_expires_at = None;
        Ok(Some(op.clone()))
    }

    async fn sync_counts(&self, max_retries: i32) -> Result<SyncCounts> {
        let state = self.state.lock().unwrap();
        let count = |status: QueueStatus| {
            state
                .sync_operations
                .iter()
                .filter(|op| op.status == status.as_str())
                .count() as i64
        };
        let exhausted = state
            .sync_operations
            .iter()
            .filter(|op| op.status == QueueStatus::Failed.as_str() && op.retry_count >= max_retries)
            .count() as i64;
        Ok(SyncCounts {
            pending: count(QueueStatus::Pending),
            in_progress: count(QueueStatus::InProgress),
            failed: count(QueueStatus::Failed),
            exhausted,
        })
    }

    async fn recent_sync_operations(&self, limit: i64) -> Result<Vec<SyncOperation>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sync_operations
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn log_webhook(&self, log: &NewWebhookLog) -> Result<()> {
        self.state.lock().unwrap().webhook_logs.push(WebhookLog {
            id: log.id,
            event_type: log.event_type.clone(),
            entity_id: log.entity_id.clone(),
            status: log.status.clone(),
            payload: log.payload.clone(),
            error: log.error.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn insert_sync_log(&self, log: &NewSyncLog) -> Result<SyncLog> {
        self.check("insert_sync_log")?;
        let row = SyncLog {
            id: log.id,
            sync_type: log.sync_type.clone(),
            status: log.status.clone(),
            user_id: log.user_id.clone(),
            details: log.details.clone(),
            error: log.error.clone(),
            started_at: Utc::now(),
            completed_at: log.completed_at,
        };
        self.state.lock().unwrap().sync_logs.push(row.clone());
        Ok(row)
    }

    async fn finish_sync_log(
        &self,
        id: Uuid,
        status: &str,
        details: &Value,
        error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let log = state
            .sync_logs
            .iter_mut()
            .find(|log| log.id == id)
            .ok_or_else(|| anyhow!("sync log {} not found", id))?;
        log.status = status.to_string();
        log.details = details.clone();
        log.error = error.map(str::to_string);
        log.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_sync_log(&self, id: Uuid) -> Result<Option<SyncLog>> {
        let state = self.state.lock().unwrap();
        Ok(state.sync_logs.iter().find(|log| log.id == id).cloned())
    }

    async fn sync_logs_with_status(&self, sync_type: &str, status: &str) -> Result<Vec<SyncLog>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sync_logs
            .iter()
            .filter(|log| log.sync_type == sync_type && log.status == status)
            .cloned()
            .collect())
    }
}
