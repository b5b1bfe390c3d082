//! Candidate endpoint lists for operations whose upstream path or payload
//! shape has changed between platform API versions.
//!
//! This is a compatibility shim: each read operation walks its list in
//! priority order and keeps the first response that succeeds. Remove stale
//! candidates once the upstream surface settles.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// How paging parameters are sent to a candidate endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// `{"query": {"cursorPaging": {...}}}`
    CursorQuery,
    /// `{"search": {"cursorPaging": {...}}}`
    CursorSearch,
    /// `{"query": {"paging": {"limit", "offset"}}}`; the cursor is an offset.
    OffsetQuery,
    /// `?limit=..&cursor=..` on a GET.
    QueryString,
}

#[derive(Debug, Clone)]
pub struct EndpointCandidate {
    pub method: Method,
    pub path: &'static str,
    pub shape: BodyShape,
}

impl EndpointCandidate {
    const fn new(method: Method, path: &'static str, shape: BodyShape) -> Self {
        Self {
            method,
            path,
            shape,
        }
    }

    fn offset(cursor: Option<&str>) -> u64 {
        cursor.and_then(|c| c.parse().ok()).unwrap_or(0)
    }

    /// Path including any query string for this page.
    pub fn endpoint(&self, cursor: Option<&str>, limit: u32) -> String {
        match self.shape {
            BodyShape::QueryString => match cursor {
                Some(cursor) => format!(
                    "{}?limit={}&cursor={}",
                    self.path,
                    limit,
                    urlencoding::encode(cursor)
                ),
                None => format!("{}?limit={}", self.path, limit),
            },
            _ => self.path.to_string(),
        }
    }

    pub fn body(&self, cursor: Option<&str>, limit: u32) -> Option<Value> {
        let mut cursor_paging = json!({ "limit": limit });
        if let Some(cursor) = cursor {
            cursor_paging["cursor"] = Value::String(cursor.to_string());
        }
        match self.shape {
            BodyShape::CursorQuery => Some(json!({ "query": { "cursorPaging": cursor_paging } })),
            BodyShape::CursorSearch => Some(json!({ "search": { "cursorPaging": cursor_paging } })),
            BodyShape::OffsetQuery => Some(json!({
                "query": { "paging": { "limit": limit, "offset": Self::offset(cursor) } }
            })),
            BodyShape::QueryString => None,
        }
    }

    /// Extracts one page of items plus the cursor for the next page.
    pub fn page(&self, response: &Value, cursor: Option<&str>, limit: u32) -> Page {
        let items = COLLECTION_KEYS
            .iter()
            .find_map(|key| response.get(*key).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default();

        let next_cursor = match self.shape {
            BodyShape::OffsetQuery => {
                let offset = Self::offset(cursor);
                (items.len() as u32 >= limit && limit > 0)
                    .then(|| (offset + items.len() as u64).to_string())
            }
            _ => NEXT_CURSOR_POINTERS
                .iter()
                .find_map(|p| response.pointer(p).and_then(Value::as_str))
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        };

        Page { items, next_cursor }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
}

const COLLECTION_KEYS: [&str; 7] = [
    "bookings",
    "extendedBookings",
    "contacts",
    "orders",
    "services",
    "items",
    "results",
];

const NEXT_CURSOR_POINTERS: [&str; 3] = [
    "/pagingMetadata/cursors/next",
    "/metadata/cursors/next",
    "/nextCursor",
];

pub static BOOKING_QUERY: [EndpointCandidate; 3] = [
    EndpointCandidate::new(Method::POST, "bookings/v2/bookings/query", BodyShape::CursorQuery),
    EndpointCandidate::new(
        Method::POST,
        "_api/bookings-service/v2/bookings/query",
        BodyShape::CursorQuery,
    ),
    EndpointCandidate::new(Method::GET, "bookings/v1/bookings", BodyShape::QueryString),
];

pub static SERVICE_QUERY: [EndpointCandidate; 2] = [
    EndpointCandidate::new(Method::POST, "bookings/v2/services/query", BodyShape::CursorQuery),
    EndpointCandidate::new(Method::GET, "bookings/v1/services", BodyShape::QueryString),
];

pub static ORDER_QUERY: [EndpointCandidate; 2] = [
    EndpointCandidate::new(Method::POST, "ecom/v1/orders/search", BodyShape::CursorSearch),
    EndpointCandidate::new(Method::POST, "stores/v2/orders/query", BodyShape::OffsetQuery),
];

pub static CONTACT_QUERY: [EndpointCandidate; 2] = [
    EndpointCandidate::new(Method::POST, "contacts/v4/contacts/query", BodyShape::CursorQuery),
    EndpointCandidate::new(Method::GET, "contacts/v4/contacts", BodyShape::QueryString),
];
