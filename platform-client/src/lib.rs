//! Client for the third-party booking/commerce platform.
//!
//! `PlatformClient` owns authentication, rate-limit handling and retries.
//! Services depend on the [`PlatformApi`] trait so tests can script the
//! platform's answers.

mod client;
pub mod credentials;
pub mod endpoints;
pub mod error;

use async_trait::async_trait;
use serde_json::Value;

pub use client::{PlatformClient, DEFAULT_BASE_URL, SITE_ID_HEADER};
pub use credentials::{
    AuthMode, Clock, CredentialCache, IssuedToken, OAuthTokenSource, SystemClock, TokenSource,
    DEFAULT_TOKEN_URL,
};
pub use endpoints::Page;
pub use error::{PlatformError, Result, RetryClass};

/// Operations the sync subsystem performs against the platform.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn query_bookings(&self, cursor: Option<&str>, limit: u32) -> Result<Page>;

    async fn query_contacts(&self, cursor: Option<&str>, limit: u32) -> Result<Page>;

    async fn query_orders(&self, cursor: Option<&str>, limit: u32) -> Result<Page>;

    /// Every bookable service, across all pages.
    async fn list_services(&self) -> Result<Vec<Value>>;

    async fn find_contact_by_email(&self, email: &str) -> Result<Option<Value>>;

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Value>>;

    async fn get_order(&self, order_id: &str) -> Result<Option<Value>>;

    /// Creates a contact and returns the platform's contact object.
    async fn create_contact(&self, info: &Value) -> Result<Value>;

    async fn update_contact(&self, contact_id: &str, info: &Value) -> Result<Value>;

    async fn update_booking(&self, booking_id: &str, booking: &Value) -> Result<Value>;

    async fn update_inventory(&self, product_id: &str, inventory: &Value) -> Result<Value>;
}
