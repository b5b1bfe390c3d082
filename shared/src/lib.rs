use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

pub mod transform;

pub use transform::{
    booking_contact, contact_from_value, event_type_of, transform_booking, transform_contact,
    transform_order, transform_product, transform_service,
};

/// Local entity kinds that can be pushed to the platform through the sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Booking,
    Contact,
    Product,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Booking => "booking",
            EntityType::Contact => "contact",
            EntityType::Product => "product",
        }
    }

    /// Table holding the local rows for this entity.
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Booking => "bookings",
            EntityType::Contact => "contacts",
            EntityType::Product => "products",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "bookings" => Some(EntityType::Booking),
            "contacts" => Some(EntityType::Contact),
            "products" => Some(EntityType::Product),
            _ => None,
        }
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking" => Ok(EntityType::Booking),
            "contact" => Ok(EntityType::Contact),
            "product" => Ok(EntityType::Product),
            other => Err(anyhow::anyhow!("unknown entity type: {}", other)),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
        }
    }
}

impl FromStr for OperationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            other => Err(anyhow::anyhow!("unknown operation type: {}", other)),
        }
    }
}

/// Lifecycle of a `sync_operations` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "in_progress" => Ok(QueueStatus::InProgress),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(anyhow::anyhow!("unknown queue status: {}", other)),
        }
    }
}

/// Per-row `sync_status` on bookings, contacts and products.
pub const SYNC_STATUS_PENDING: &str = "pending";
pub const SYNC_STATUS_SYNCED: &str = "synced";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Maps the platform's status spellings onto the local enum. Anything
    /// unrecognised (CREATED, WAITING_LIST, PENDING_APPROVAL, ...) is pending.
    pub fn from_platform(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CONFIRMED" | "APPROVED" => BookingStatus::Confirmed,
            "CANCELED" | "CANCELLED" | "DECLINED" => BookingStatus::Cancelled,
            "COMPLETED" | "FINISHED" => BookingStatus::Completed,
            _ => BookingStatus::Pending,
        }
    }

    /// Platform spelling used when pushing a booking back.
    pub fn to_platform(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELED",
            BookingStatus::Completed => "COMPLETED",
        }
    }
}

/// Webhook event types understood by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventType {
    BookingCreated,
    BookingUpdated,
    BookingCanceled,
    OrderCreated,
    OrderUpdated,
    OrderPaid,
    ContactCreated,
    ContactUpdated,
    InventoryUpdated,
    Unknown(String),
}

/// A precondition that must hold locally before an event is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    ContactExists,
    BookingExists,
    OrderExists,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::ContactExists => "contact_exists",
            Dependency::BookingExists => "booking_exists",
            Dependency::OrderExists => "order_exists",
        }
    }
}

/// Which ingestion routine an event ends up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Booking,
    Contact,
    Order,
    Product,
}

impl WebhookEventType {
    /// Parses a raw event name such as `booking_created`,
    /// `wix.bookings.v2.booking_created` or `BookingCreated`.
    pub fn parse(raw: &str) -> Self {
        let name = normalize_event_name(raw);
        match name.as_str() {
            "booking_created" => WebhookEventType::BookingCreated,
            "booking_updated" | "booking_rescheduled" | "booking_confirmed" => {
                WebhookEventType::BookingUpdated
            }
            "booking_canceled" | "booking_cancelled" | "booking_declined" => {
                WebhookEventType::BookingCanceled
            }
            "order_created" | "order_placed" => WebhookEventType::OrderCreated,
            "order_updated" => WebhookEventType::OrderUpdated,
            "order_paid" | "order_payment_status_updated" => WebhookEventType::OrderPaid,
            "contact_created" => WebhookEventType::ContactCreated,
            "contact_updated" | "contact_merged" => WebhookEventType::ContactUpdated,
            "inventory_updated"
            | "inventory_item_changed"
            | "inventory_variants_changed"
            | "product_created"
            | "product_updated" => WebhookEventType::InventoryUpdated,
            _ => WebhookEventType::Unknown(name),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WebhookEventType::BookingCreated => "booking_created",
            WebhookEventType::BookingUpdated => "booking_updated",
            WebhookEventType::BookingCanceled => "booking_canceled",
            WebhookEventType::OrderCreated => "order_created",
            WebhookEventType::OrderUpdated => "order_updated",
            WebhookEventType::OrderPaid => "order_paid",
            WebhookEventType::ContactCreated => "contact_created",
            WebhookEventType::ContactUpdated => "contact_updated",
            WebhookEventType::InventoryUpdated => "inventory_updated",
            WebhookEventType::Unknown(name) => name,
        }
    }

    /// Static dependency table consulted before an event is processed.
    pub fn dependencies(&self) -> &'static [Dependency] {
        match self {
            WebhookEventType::BookingCreated => &[Dependency::ContactExists],
            WebhookEventType::BookingUpdated => {
                &[Dependency::ContactExists, Dependency::BookingExists]
            }
            WebhookEventType::OrderCreated => &[Dependency::ContactExists],
            WebhookEventType::OrderUpdated => &[Dependency::ContactExists, Dependency::OrderExists],
            _ => &[],
        }
    }

    pub fn target(&self) -> Option<EventTarget> {
        match self {
            WebhookEventType::BookingCreated
            | WebhookEventType::BookingUpdated
            | WebhookEventType::BookingCanceled => Some(EventTarget::Booking),
            WebhookEventType::OrderCreated
            | WebhookEventType::OrderUpdated
            | WebhookEventType::OrderPaid => Some(EventTarget::Order),
            WebhookEventType::ContactCreated | WebhookEventType::ContactUpdated => {
                Some(EventTarget::Contact)
            }
            WebhookEventType::InventoryUpdated => Some(EventTarget::Product),
            WebhookEventType::Unknown(_) => None,
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips namespace prefixes and converts camel case to snake case.
pub fn normalize_event_name(raw: &str) -> String {
    let tail = raw.trim().rsplit(|c| c == '.' || c == '/').next().unwrap_or("");
    let mut out = String::with_capacity(tail.len() + 4);
    let mut prev_lower = false;
    for ch in tail.chars() {
        if ch == '-' || ch == ' ' {
            out.push('_');
            prev_lower = false;
        } else if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

/// Canonical booking extracted from a webhook or API payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRecord {
    pub external_booking_id: Option<String>,
    pub external_contact_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub service_name: String,
    pub service_duration: i32,
    pub appointment_date: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub staff_member: Option<String>,
    pub status: BookingStatus,
    pub payment_status: String,
    pub total_price: Option<f64>,
    pub revision: Option<i64>,
    pub raw_payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactRecord {
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
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub external_order_id: Option<String>,
    pub order_number: Option<String>,
    pub external_contact_id: Option<String>,
    pub customer_email: Option<String>,
    pub external_booking_id: Option<String>,
    pub total_amount: f64,
    pub currency: String,
    pub payment_status: String,
    pub fulfillment_status: String,
    pub raw_payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub external_service_id: String,
    pub name: String,
    pub duration_minutes: Option<i32>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub external_product_id: Option<String>,
    pub product_name: String,
    pub current_stock: i32,
    /// Only set when the payload carries one; the local default applies otherwise.
    pub min_threshold: Option<i32>,
    pub cost_per_unit: Option<f64>,
    pub is_active: bool,
}
