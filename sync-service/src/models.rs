use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::transform::UNKNOWN_FIRST_NAME;
use shared::{
    BookingRecord, ContactRecord, OrderRecord, ProductRecord, QueueStatus, ServiceRecord,
    SYNC_STATUS_PENDING, SYNC_STATUS_SYNCED,
};
use uuid::Uuid;

/// Rounds to cents; non-finite values have no decimal form.
pub fn to_decimal(value: f64) -> Option<BigDecimal> {
    BigDecimal::from_f64(value).map(|d| d.round(2).with_scale(2))
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::contacts)]
pub struct Contact {
    pub id: Uuid,
    pub external_contact_id: Option<String>,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address_line: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub sync_status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column values written on insert and on update. `None` leaves an existing
/// column untouched.
#[derive(Debug, Clone, Default, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::contacts)]
pub struct ContactData {
    pub external_contact_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address_line: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub sync_status: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContactData {
    /// Contact as mirrored from the platform. A placeholder first name never
    /// overwrites a real one.
    pub fn from_platform(record: ContactRecord) -> Self {
        let now = Utc::now();
        let first_name = Some(record.first_name).filter(|n| n != UNKNOWN_FIRST_NAME);
        Self {
            external_contact_id: record.external_contact_id,
            email: record.email,
            first_name,
            last_name: record.last_name,
            phone: record.phone,
            address_line: record.address_line,
            city: record.city,
            state: record.state,
            postal_code: record.postal_code,
            country: record.country,
            sync_status: Some(SYNC_STATUS_SYNCED.to_string()),
            last_synced_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Contact that originates here rather than on the platform. Without a
    /// platform id it stays pending until pushed.
    pub fn from_local(record: ContactRecord) -> Self {
        let has_remote_id = record.external_contact_id.is_some();
        let mut data = Self::from_platform(record);
        if !has_remote_id {
            data.sync_status = Some(SYNC_STATUS_PENDING.to_string());
            data.last_synced_at = None;
        }
        data
    }

    /// First name to use when the row does not exist yet.
    pub fn insert_first_name(&self) -> String {
        self.first_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_FIRST_NAME.to_string())
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::services)]
pub struct Service {
    pub id: Uuid,
    pub external_service_id: String,
    pub name: String,
    pub duration_minutes: Option<i32>,
    pub price: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::services)]
pub struct ServiceData {
    pub external_service_id: String,
    pub name: String,
    pub duration_minutes: Option<i32>,
    pub price: Option<BigDecimal>,
}

impl From<ServiceRecord> for ServiceData {
    fn from(record: ServiceRecord) -> Self {
        Self {
            external_service_id: record.external_service_id,
            name: record.name,
            duration_minutes: record.duration_minutes,
            price: record.price.and_then(to_decimal),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::staff_members)]
pub struct StaffMember {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::bookings)]
pub struct Booking {
    pub id: Uuid,
    pub external_booking_id: Option<String>,
    pub customer_id: Option<Uuid>,
    pub customer_email: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub service_id: Option<Uuid>,
    pub service_name: String,
    pub service_duration: i32,
    pub appointment_date: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub staff_member: Option<String>,
    pub staff_id: Option<Uuid>,
    pub status: String,
    pub payment_status: String,
    pub total_price: Option<BigDecimal>,
    pub revision: Option<i64>,
    pub raw_payload: Value,
    pub sync_status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::bookings)]
pub struct BookingData {
    pub external_booking_id: Option<String>,
    pub customer_id: Option<Uuid>,
    pub customer_email: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub service_id: Option<Uuid>,
    pub service_name: String,
    pub service_duration: i32,
    pub appointment_date: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub staff_member: Option<String>,
    pub staff_id: Option<Uuid>,
    pub status: String,
    pub payment_status: String,
    pub total_price: Option<BigDecimal>,
    pub revision: Option<i64>,
    pub raw_payload: Value,
    pub sync_status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BookingData {
    /// Foreign keys are resolved by the caller; unresolved links stay `None`
    /// so an update keeps whatever was linked before.
    pub fn from_platform(record: BookingRecord) -> Self {
        let now = Utc::now();
        Self {
            external_booking_id: record.external_booking_id,
            customer_id: None,
            customer_email: record.customer_email,
            customer_name: record.customer_name,
            customer_phone: record.customer_phone,
            service_id: None,
            service_name: record.service_name,
            service_duration: record.service_duration,
            appointment_date: record.appointment_date,
            end_time: record.end_time,
            staff_member: record.staff_member,
            staff_id: None,
            status: record.status.as_str().to_string(),
            payment_status: record.payment_status,
            total_price: record.total_price.and_then(to_decimal),
            revision: record.revision,
            raw_payload: record.raw_payload,
            sync_status: SYNC_STATUS_SYNCED.to_string(),
            last_synced_at: Some(now),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub external_order_id: String,
    pub order_number: Option<String>,
    pub customer_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
    pub customer_email: Option<String>,
    pub total_amount: BigDecimal,
    pub currency: String,
    pub payment_status: String,
    pub fulfillment_status: String,
    pub raw_payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderData {
    pub external_order_id: String,
    pub order_number: Option<String>,
    pub customer_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
    pub customer_email: Option<String>,
    pub total_amount: BigDecimal,
    pub currency: String,
    pub payment_status: String,
    pub fulfillment_status: String,
    pub raw_payload: Value,
    pub updated_at: DateTime<Utc>,
}

impl OrderData {
    pub fn from_platform(external_order_id: String, record: OrderRecord) -> Self {
        Self {
            external_order_id,
            order_number: record.order_number,
            customer_id: None,
            booking_id: None,
            customer_email: record.customer_email,
            total_amount: to_decimal(record.total_amount).unwrap_or_default(),
            currency: record.currency,
            payment_status: record.payment_status,
            fulfillment_status: record.fulfillment_status,
            raw_payload: record.raw_payload,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: Uuid,
    pub external_product_id: Option<String>,
    pub product_name: String,
    pub current_stock: i32,
    pub min_threshold: i32,
    pub cost_per_unit: Option<BigDecimal>,
    pub is_active: bool,
    pub sync_status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::products)]
pub struct ProductData {
    pub external_product_id: Option<String>,
    pub product_name: String,
    pub current_stock: i32,
    /// `None` falls back to the column default on insert.
    pub min_threshold: Option<i32>,
    pub cost_per_unit: Option<BigDecimal>,
    pub is_active: bool,
    pub sync_status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductRecord> for ProductData {
    fn from(record: ProductRecord) -> Self {
        let now = Utc::now();
        Self {
            external_product_id: record.external_product_id,
            product_name: record.product_name,
            current_stock: record.current_stock,
            min_threshold: record.min_threshold,
            cost_per_unit: record.cost_per_unit.and_then(to_decimal),
            is_active: record.is_active,
            sync_status: SYNC_STATUS_SYNCED.to_string(),
            last_synced_at: Some(now),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_operations)]
pub struct SyncOperation {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub operation_type: String,
    pub status: String,
    pub retry_count: i32,
    pub error: Option<String>,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::sync_operations)]
pub struct NewSyncOperation {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub operation_type: String,
    pub status: String,
}

impl NewSyncOperation {
    pub fn pending(entity_type: &str, entity_id: Uuid, operation_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            entity_id,
            operation_type: operation_type.to_string(),
            status: QueueStatus::Pending.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::webhook_logs)]
pub struct WebhookLog {
    pub id: Uuid,
    pub event_type: String,
    pub entity_id: Option<String>,
    pub status: String,
    pub payload: Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::webhook_logs)]
pub struct NewWebhookLog {
    pub id: Uuid,
    pub event_type: String,
    pub entity_id: Option<String>,
    pub status: String,
    pub payload: Value,
    pub error: Option<String>,
}

impl NewWebhookLog {
    pub fn new(event_type: &str, entity_id: Option<String>, status: &str, payload: &Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            entity_id,
            status: status.to_string(),
            payload: payload.clone(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sync_logs)]
pub struct SyncLog {
    pub id: Uuid,
    pub sync_type: String,
    pub status: String,
    pub user_id: Option<String>,
    pub details: Value,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::sync_logs)]
pub struct NewSyncLog {
    pub id: Uuid,
    pub sync_type: String,
    pub status: String,
    pub user_id: Option<String>,
    pub details: Value,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}
