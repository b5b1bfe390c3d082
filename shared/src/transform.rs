//! Pure mapping from platform payloads to canonical records.
//!
//! Webhook envelopes and API responses arrive in several historical shapes.
//! Every function here tolerates missing fields and falls back to defaults
//! instead of failing.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{BookingRecord, BookingStatus, ContactRecord, OrderRecord, ProductRecord, ServiceRecord};

pub const UNKNOWN_CUSTOMER: &str = "Unknown Customer";
pub const UNKNOWN_FIRST_NAME: &str = "Unknown";
pub const UNKNOWN_SERVICE: &str = "Unknown Service";
pub const UNNAMED_PRODUCT: &str = "Unnamed Product";
pub const DEFAULT_DURATION_MINUTES: i32 = 60;
pub const DEFAULT_BOOKING_PAYMENT_STATUS: &str = "pending";
pub const DEFAULT_ORDER_PAYMENT_STATUS: &str = "UNDEFINED";
pub const DEFAULT_FULFILLMENT_STATUS: &str = "NOT_FULFILLED";
pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_MIN_THRESHOLD: i32 = 5;

static NULL: Value = Value::Null;

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integers stay exact; string forms are parsed as `i64`, not through `f64`.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_text(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .find_map(|p| value.pointer(p).and_then(as_text))
}

fn first_number(value: &Value, pointers: &[&str]) -> Option<f64> {
    pointers
        .iter()
        .find_map(|p| value.pointer(p).and_then(as_number))
}

fn first_datetime(value: &Value, pointers: &[&str]) -> Option<DateTime<Utc>> {
    pointers.iter().find_map(|p| {
        value
            .pointer(p)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn first_object<'a>(value: &'a Value, pointers: &[&str]) -> Option<&'a Value> {
    pointers
        .iter()
        .filter_map(|p| value.pointer(p))
        .find(|v| v.is_object())
}

fn normalize_email(raw: String) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Finds the entity object inside a webhook envelope. `keys` are the entity
/// names the payload may be nested under, e.g. `["booking"]`.
pub fn unwrap_entity<'a>(payload: &'a Value, keys: &[&str]) -> &'a Value {
    let mut pointers: Vec<String> = vec![
        "/data/createdEvent/entity".into(),
        "/data/updatedEvent/currentEntity".into(),
        "/createdEvent/entity".into(),
        "/updatedEvent/currentEntity".into(),
    ];
    for key in keys {
        pointers.push(format!("/data/actionEvent/body/{}", key));
        pointers.push(format!("/actionEvent/body/{}", key));
        pointers.push(format!("/data/{}", key));
        pointers.push(format!("/{}", key));
    }
    pointers.push("/entity".into());
    pointers.push("/data".into());

    pointers
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find(|v| v.is_object())
        .unwrap_or(payload)
}

/// Event name carried inside the envelope, if any.
pub fn event_type_of(payload: &Value) -> Option<String> {
    first_text(payload, &["/eventType", "/data/eventType", "/type", "/event"])
}

const CONTACT_DETAIL_POINTERS: [&str; 4] = [
    "/contactDetails",
    "/bookedEntity/contactDetails",
    "/contact",
    "/buyerInfo",
];

pub fn transform_booking(payload: &Value) -> BookingRecord {
    let booking = unwrap_entity(payload, &["booking"]);
    let details = first_object(booking, &CONTACT_DETAIL_POINTERS).unwrap_or(&NULL);

    let first_name = first_text(details, &["/firstName", "/name/first"]);
    let last_name = first_text(details, &["/lastName", "/name/last"]);
    let customer_name = match (first_name, last_name) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        (Some(first), None) => first,
        (None, Some(last)) => last,
        (None, None) => first_text(details, &["/fullName", "/name"])
            .unwrap_or_else(|| UNKNOWN_CUSTOMER.to_string()),
    };

    let appointment_date = first_datetime(
        booking,
        &[
            "/bookedEntity/slot/startDate",
            "/startDate",
            "/start",
            "/appointmentDate",
        ],
    );
    let end_time = first_datetime(booking, &["/bookedEntity/slot/endDate", "/endDate", "/end"]);
    let service_duration = match (appointment_date, end_time) {
        (Some(start), Some(end)) if end > start => (end - start).num_minutes() as i32,
        _ => first_number(booking, &["/duration", "/serviceDuration"])
            .map(|d| d as i32)
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_DURATION_MINUTES),
    };

    BookingRecord {
        external_booking_id: first_text(booking, &["/id", "/_id", "/bookingId"])
            .or_else(|| first_text(payload, &["/entityId", "/data/entityId"])),
        external_contact_id: first_text(details, &["/contactId", "/id"])
            .or_else(|| first_text(booking, &["/contactId"])),
        customer_email: first_text(details, &["/email"]).map(normalize_email),
        customer_name,
        customer_phone: first_text(details, &["/phone"]),
        service_name: first_text(
            booking,
            &[
                "/bookedEntity/title",
                "/bookedEntity/slot/serviceName",
                "/serviceName",
                "/service/name",
            ],
        )
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
        service_duration,
        appointment_date,
        end_time,
        staff_member: first_text(
            booking,
            &[
                "/bookedEntity/slot/resource/name",
                "/staffMemberName",
                "/staffMember/name",
                "/resource/name",
            ],
        ),
        status: first_text(booking, &["/status"])
            .map(|s| BookingStatus::from_platform(&s))
            .unwrap_or(BookingStatus::Pending),
        payment_status: first_text(booking, &["/paymentStatus", "/payment/paymentStatus"])
            .unwrap_or_else(|| DEFAULT_BOOKING_PAYMENT_STATUS.to_string()),
        total_price: first_number(
            booking,
            &[
                "/totalPrice",
                "/payment/finalPrice/amount",
                "/payment/price/amount",
                "/price/amount",
            ],
        ),
        revision: booking.pointer("/revision").and_then(as_integer),
        raw_payload: payload.clone(),
    }
}

/// Contact embedded in a booking payload, when the booking carries any
/// contact details at all.
pub fn booking_contact(payload: &Value) -> Option<ContactRecord> {
    let booking = unwrap_entity(payload, &["booking"]);
    first_object(booking, &CONTACT_DETAIL_POINTERS).map(contact_from_value)
}

pub fn transform_contact(payload: &Value) -> ContactRecord {
    contact_from_value(unwrap_entity(payload, &["contact"]))
}

/// Maps an already-unwrapped contact object (API v4 contact, legacy contact,
/// or booking `contactDetails`).
pub fn contact_from_value(contact: &Value) -> ContactRecord {
    let address = first_object(
        contact,
        &[
            "/info/addresses/items/0/address",
            "/info/addresses/0/address",
            "/address",
            "/addresses/0",
        ],
    )
    .unwrap_or(&NULL);

    ContactRecord {
        external_contact_id: first_text(contact, &["/id", "/_id", "/contactId"]),
        email: first_text(
            contact,
            &[
                "/primaryInfo/email",
                "/primaryEmail/email",
                "/info/emails/items/0/email",
                "/info/emails/0/email",
                "/email",
                "/emails/0",
            ],
        )
        .map(normalize_email),
        first_name: first_text(
            contact,
            &["/info/name/first", "/name/first", "/firstName", "/first_name"],
        )
        .unwrap_or_else(|| UNKNOWN_FIRST_NAME.to_string()),
        last_name: first_text(
            contact,
            &["/info/name/last", "/name/last", "/lastName", "/last_name"],
        ),
        phone: first_text(
            contact,
            &[
                "/primaryInfo/phone",
                "/primaryPhone/phone",
                "/info/phones/items/0/phone",
                "/info/phones/0/phone",
                "/phone",
                "/phones/0",
            ],
        ),
        address_line: first_text(
            address,
            &["/addressLine", "/addressLine1", "/streetAddress/name", "/street"],
        ),
        city: first_text(address, &["/city"]),
        state: first_text(address, &["/subdivision", "/state", "/region"]),
        postal_code: first_text(address, &["/postalCode", "/zip"]),
        country: first_text(address, &["/country"]),
    }
}

pub fn transform_order(payload: &Value) -> OrderRecord {
    let order = unwrap_entity(payload, &["order"]);

    OrderRecord {
        external_order_id: first_text(order, &["/id", "/_id", "/orderId"])
            .or_else(|| first_text(payload, &["/entityId", "/data/entityId"])),
        order_number: first_text(order, &["/number", "/orderNumber"]),
        external_contact_id: first_text(order, &["/buyerInfo/contactId", "/contactId"]),
        customer_email: first_text(
            order,
            &[
                "/buyerInfo/email",
                "/billingInfo/contactDetails/email",
                "/contactDetails/email",
                "/customerEmail",
                "/email",
            ],
        )
        .map(normalize_email),
        external_booking_id: first_text(
            order,
            &[
                "/bookingId",
                "/lineItems/0/catalogReference/options/bookingId",
                "/lineItems/0/bookingId",
            ],
        ),
        total_amount: first_number(
            order,
            &[
                "/priceSummary/total/amount",
                "/totals/total",
                "/totalAmount",
                "/total",
            ],
        )
        .unwrap_or(0.0),
        currency: first_text(order, &["/currency"])
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        payment_status: first_text(order, &["/paymentStatus"])
            .unwrap_or_else(|| DEFAULT_ORDER_PAYMENT_STATUS.to_string()),
        fulfillment_status: first_text(order, &["/fulfillmentStatus"])
            .unwrap_or_else(|| DEFAULT_FULFILLMENT_STATUS.to_string()),
        raw_payload: payload.clone(),
    }
}

pub fn transform_product(payload: &Value) -> ProductRecord {
    let product = unwrap_entity(payload, &["product", "inventoryItem"]);

    ProductRecord {
        external_product_id: first_text(
            product,
            &["/productId", "/externalProductId", "/id", "/_id"],
        ),
        product_name: first_text(product, &["/name", "/productName"])
            .unwrap_or_else(|| UNNAMED_PRODUCT.to_string()),
        current_stock: first_number(
            product,
            &[
                "/stock/quantity",
                "/quantity",
                "/currentStock",
                "/variants/0/quantity",
                "/variants/0/stock/quantity",
            ],
        )
        .map(|q| q as i32)
        .unwrap_or(0),
        min_threshold: first_number(product, &["/minThreshold"]).map(|q| q as i32),
        cost_per_unit: first_number(
            product,
            &["/costAndProfitData/itemCost", "/cost/price", "/costPerUnit"],
        ),
        is_active: ["/visible", "/isActive"]
            .iter()
            .find_map(|p| product.pointer(p).and_then(Value::as_bool))
            .unwrap_or(true),
    }
}

/// Bookable service from the services catalogue. Services without an id
/// cannot be keyed and yield `None`.
pub fn transform_service(service: &Value) -> Option<ServiceRecord> {
    let external_service_id = first_text(service, &["/id", "/_id", "/serviceId"])?;

    Some(ServiceRecord {
        external_service_id,
        name: first_text(service, &["/name", "/info/name", "/title"])
            .unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
        duration_minutes: first_number(
            service,
            &[
                "/schedule/availabilityConstraints/sessionDurations/0",
                "/schedule/availabilityConstraints/durations/0/minutes",
                "/duration",
            ],
        )
        .map(|d| d as i32)
        .filter(|d| *d > 0),
        price: first_number(
            service,
            &[
                "/payment/fixed/price/value",
                "/payment/fixed/price/amount",
                "/payment/rateLabel/price",
                "/price",
            ],
        ),
    })
}
