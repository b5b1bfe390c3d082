//! Scripted platform used by the service tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use platform_client::{Page, PlatformApi, PlatformError, Result};
use serde_json::{json, Value};

#[derive(Default)]
pub struct FakePlatform {
    pub contacts_by_email: Mutex<HashMap<String, Value>>,
    pub bookings_by_id: Mutex<HashMap<String, Value>>,
    pub orders_by_id: Mutex<HashMap<String, Value>>,
    pub services: Mutex<Vec<Value>>,
    pages: Mutex<HashMap<&'static str, Vec<Value>>>,
    failing: Mutex<HashSet<&'static str>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(self, name: &'static str, items: Vec<Value>) -> Self {
        self.pages.lock().unwrap().insert(name, items);
        self
    }

    /// Every call to `operation` answers with a 500.
    pub fn failing(self, operation: &'static str) -> Self {
        self.failing.lock().unwrap().insert(operation);
        self
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        if self.failing.lock().unwrap().contains(operation) {
            return Err(PlatformError::api(500, format!("{} unavailable", operation)));
        }
        Ok(())
    }

    fn page(&self, name: &'static str, cursor: Option<&str>, limit: u32) -> Result<Page> {
        self.record(name)?;
        let pages = self.pages.lock().unwrap();
        let items = pages.get(name).cloned().unwrap_or_default();
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + limit as usize).min(items.len());
        Ok(Page {
            items: items[start.min(end)..end].to_vec(),
            next_cursor: (end < items.len()).then(|| end.to_string()),
        })
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn query_bookings(&self, cursor: Option<&str>, limit: u32) -> Result<Page> {
        self.page("query_bookings", cursor, limit)
    }

    async fn query_contacts(&self, cursor: Option<&str>, limit: u32) -> Result<Page> {
        self.page("query_contacts", cursor, limit)
    }

    async fn query_orders(&self, cursor: Option<&str>, limit: u32) -> Result<Page> {
        self.page("query_orders", cursor, limit)
    }

    async fn list_services(&self) -> Result<Vec<Value>> {
        self.record("list_services")?;
        Ok(self.services.lock().unwrap().clone())
    }

    async fn find_contact_by_email(&self, email: &str) -> Result<Option<Value>> {
        self.record("find_contact_by_email")?;
        Ok(self.contacts_by_email.lock().unwrap().get(email).cloned())
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Value>> {
        self.record("get_booking")?;
        Ok(self.bookings_by_id.lock().unwrap().get(booking_id).cloned())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Value>> {
        self.record("get_order")?;
        Ok(self.orders_by_id.lock().unwrap().get(order_id).cloned())
    }

    async fn create_contact(&self, info: &Value) -> Result<Value> {
        self.record("create_contact")?;
        let id = format!("remote-{}", self.calls_to("create_contact"));
        let contact = json!({ "id": id, "info": info });
        if let Some(email) = info.pointer("/emails/items/0/email").and_then(Value::as_str) {
            self.contacts_by_email
                .lock()
                .unwrap()
                .insert(email.to_string(), contact.clone());
        }
        Ok(contact)
    }

    async fn update_contact(&self, contact_id: &str, info: &Value) -> Result<Value> {
        self.record("update_contact")?;
        Ok(json!({ "id": contact_id, "info": info }))
    }

    async fn update_booking(&self, booking_id: &str, booking: &Value) -> Result<Value> {
        self.record("update_booking")?;
        Ok(json!({ "id": booking_id, "booking": booking }))
    }

    async fn update_inventory(&self, product_id: &str, inventory: &Value) -> Result<Value> {
        self.record("update_inventory")?;
        Ok(json!({ "productId": product_id, "inventoryItem": inventory }))
    }
}
