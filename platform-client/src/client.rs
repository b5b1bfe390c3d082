use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::credentials::CredentialCache;
use crate::endpoints::{
    EndpointCandidate, Page, BOOKING_QUERY, CONTACT_QUERY, ORDER_QUERY, SERVICE_QUERY,
};
use crate::error::{PlatformError, Result};
use crate::PlatformApi;

pub const DEFAULT_BASE_URL: &str = "https://www.wixapis.com";
pub const SITE_ID_HEADER: &str = "wix-site-id";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const MAX_LOG_BODY_CHARS: usize = 512;
const SERVICE_PAGE_SIZE: u32 = 100;
const MAX_BACKOFF_EXPONENT: u32 = 8;

fn log_response(status: StatusCode, body: &str) {
    if status.is_success() {
        debug!("Platform response status: {}", status);
        return;
    }

    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    debug!("Platform response error ({}): {}", status, preview);
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Pulls a human readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["/message", "/details/applicationError/description", "/error"]
                .iter()
                .find_map(|p| v.pointer(p).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.chars().take(MAX_LOG_BODY_CHARS).collect())
}

/// Authenticated client for the platform REST API.
#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    site_id: Option<String>,
    credentials: Arc<CredentialCache>,
    backoff_base: Duration,
}

impl PlatformClient {
    /// Create a new platform client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. "https://www.wixapis.com"
    /// * `site_id` - value for the site-identifier header, when the
    ///   credentials are not already site-scoped
    pub fn new(base_url: &str, site_id: Option<String>, credentials: CredentialCache) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_http(http, base_url, site_id, credentials))
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: &str,
        site_id: Option<String>,
        credentials: CredentialCache,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            site_id,
            credentials: Arc::new(credentials),
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Unit for exponential backoff; the wait before retry `n` is
    /// `base * 2^n`.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2_u32.pow(attempt.min(MAX_BACKOFF_EXPONENT))
    }

    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let token = self.credentials.authorization_header().await?;
        let auth_value = HeaderValue::from_str(&token)
            .map_err(|_| PlatformError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(site_id) = &self.site_id {
            let site_value = HeaderValue::from_str(site_id)
                .map_err(|_| PlatformError::invalid_request("Invalid site id format"))?;
            headers.insert(SITE_ID_HEADER, site_value);
        }

        Ok(headers)
    }

    /// Sends a request with the default retry budget.
    pub async fn request(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<Value> {
        self.request_with_retries(method, endpoint, body, DEFAULT_RETRIES)
            .await
    }

    /// Sends a request, retrying up to `retries` times.
    ///
    /// 429 waits for `retry-after` (5s when absent). 408, 5xx and transport
    /// failures back off exponentially. Any other non-2xx is returned at once.
    pub async fn request_with_retries(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        retries: u32,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut attempt: u32 = 0;

        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .headers(self.headers().await?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    let err = PlatformError::from(err);
                    if attempt < retries && err.is_retryable() {
                        let wait = self.backoff(attempt);
                        warn!("{} {} failed ({}), retrying in {:?}", method, endpoint, err, wait);
                        sleep(wait).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= retries {
                    return Err(PlatformError::RateLimited {
                        attempts: attempt + 1,
                    });
                }
                let wait = retry_after(response.headers())
                    .unwrap_or(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS));
                warn!("{} {} rate limited, waiting {:?}", method, endpoint, wait);
                sleep(wait).await;
                attempt += 1;
                continue;
            }

            let text = response.text().await?;
            log_response(status, &text);

            if status.is_success() {
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return Ok(serde_json::from_str(&text)?);
            }

            if status == StatusCode::UNAUTHORIZED {
                self.credentials.invalidate().await;
            }

            let err = PlatformError::api(status.as_u16(), error_message(&text));
            if attempt < retries && err.is_retryable() {
                let wait = self.backoff(attempt);
                warn!("{} {} returned {}, retrying in {:?}", method, endpoint, status, wait);
                sleep(wait).await;
                attempt += 1;
                continue;
            }
            return Err(err);
        }
    }

    /// Tries each candidate in order and returns the first page that loads.
    async fn first_successful(
        &self,
        candidates: &[EndpointCandidate],
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page> {
        let mut attempts = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let endpoint = candidate.endpoint(cursor, limit);
            let body = candidate.body(cursor, limit);
            match self
                .request(candidate.method.clone(), &endpoint, body.as_ref())
                .await
            {
                Ok(response) => return Ok(candidate.page(&response, cursor, limit)),
                Err(err) => {
                    debug!("Candidate {} {} failed: {}", candidate.method, candidate.path, err);
                    attempts.push(format!("{} {}: {}", candidate.method, candidate.path, err));
                }
            }
        }

        Err(PlatformError::AllEndpointsFailed { attempts })
    }

    /// GET that maps 404 to `None`.
    async fn get_optional(&self, endpoint: &str) -> Result<Option<Value>> {
        match self.request(Method::GET, endpoint, None).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn query_bookings(&self, cursor: Option<&str>, limit: u32) -> Result<Page> {
        self.first_successful(&BOOKING_QUERY, cursor, limit).await
    }

    async fn query_contacts(&self, cursor: Option<&str>, limit: u32) -> Result<Page> {
        self.first_successful(&CONTACT_QUERY, cursor, limit).await
    }

    async fn query_orders(&self, cursor: Option<&str>, limit: u32) -> Result<Page> {
        self.first_successful(&ORDER_QUERY, cursor, limit).await
    }

    async fn list_services(&self) -> Result<Vec<Value>> {
        let mut services = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .first_successful(&SERVICE_QUERY, cursor.as_deref(), SERVICE_PAGE_SIZE)
                .await?;
            services.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(services)
    }

    async fn find_contact_by_email(&self, email: &str) -> Result<Option<Value>> {
        let body = json!({
            "query": {
                "filter": { "info.emails.email": { "$eq": email } },
                "cursorPaging": { "limit": 1 }
            }
        });
        let response = self
            .request(Method::POST, "contacts/v4/contacts/query", Some(&body))
            .await?;
        Ok(CONTACT_QUERY[0]
            .page(&response, None, 1)
            .items
            .into_iter()
            .next())
    }

    async fn get_booking(&self, booking_id: &str) -> Result<Option<Value>> {
        self.get_optional(&format!(
            "bookings/v2/bookings/{}",
            urlencoding::encode(booking_id)
        ))
        .await
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Value>> {
        let id = urlencoding::encode(order_id);
        match self.get_optional(&format!("ecom/v1/orders/{}", id)).await? {
            Some(order) => Ok(Some(order)),
            None => self.get_optional(&format!("stores/v2/orders/{}", id)).await,
        }
    }

    async fn create_contact(&self, info: &Value) -> Result<Value> {
        let body = json!({ "info": info });
        let response = self
            .request(Method::POST, "contacts/v4/contacts", Some(&body))
            .await?;
        Ok(response.get("contact").cloned().unwrap_or(response))
    }

    async fn update_contact(&self, contact_id: &str, info: &Value) -> Result<Value> {
        let endpoint = format!("contacts/v4/contacts/{}", urlencoding::encode(contact_id));
        // Updates are rejected without the contact's current revision.
        let current = self
            .get_optional(&endpoint)
            .await?
            .ok_or_else(|| PlatformError::api(404, format!("contact {} not found", contact_id)))?;
        let revision = current
            .pointer("/contact/revision")
            .or_else(|| current.get("revision"))
            .cloned()
            .unwrap_or(Value::Null);

        let body = json!({ "revision": revision, "info": info });
        let response = self.request(Method::PATCH, &endpoint, Some(&body)).await?;
        Ok(response.get("contact").cloned().unwrap_or(response))
    }

    async fn update_booking(&self, booking_id: &str, booking: &Value) -> Result<Value> {
        let endpoint = format!("bookings/v2/bookings/{}", urlencoding::encode(booking_id));
        let body = json!({ "booking": booking });
        self.request(Method::PATCH, &endpoint, Some(&body)).await
    }

    async fn update_inventory(&self, product_id: &str, inventory: &Value) -> Result<Value> {
        let endpoint = format!(
            "stores/v2/inventoryItems/product/{}",
            urlencoding::encode(product_id)
        );
        let body = json!({ "inventoryItem": inventory });
        self.request(Method::PATCH, &endpoint, Some(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::AuthMode;
    use std::collections::HashMap;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    struct Received {
        method: String,
        path: String,
        headers: HashMap<String, String>,
    }

    struct Reply {
        status: u16,
        retry_after: Option<&'static str>,
        body: &'static str,
    }

    fn reply(status: u16, body: &'static str) -> Reply {
        Reply {
            status,
            retry_after: None,
            body,
        }
    }

    /// Answers each connection with the next scripted reply and records what
    /// it received. Unscripted calls get a 500.
    struct ScriptedPlatform {
        base_url: String,
        received: Arc<TokioMutex<Vec<Received>>>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Drop for ScriptedPlatform {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    impl ScriptedPlatform {
        async fn start(replies: Vec<Reply>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let base_url = format!("http://{}", listener.local_addr().expect("addr"));
            let received = Arc::new(TokioMutex::new(Vec::new()));
            let log = Arc::clone(&received);
            let mut replies = replies.into_iter();

            let task = tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let Some(request) = read_request(&mut stream).await else {
                        continue;
                    };
                    log.lock().await.push(request);
                    let next = replies
                        .next()
                        .unwrap_or_else(|| reply(500, r#"{"message":"unexpected request"}"#));
                    let retry_after = next
                        .retry_after
                        .map(|secs| format!("Retry-After: {}\r\n", secs))
                        .unwrap_or_default();
                    let raw = format!(
                        "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
                        next.status,
                        next.body.len(),
                        retry_after,
                        next.body
                    );
                    let _ = stream.write_all(raw.as_bytes()).await;
                }
            });

            Self {
                base_url,
                received,
                task,
            }
        }

        async fn received(&self) -> Vec<Received> {
            self.received.lock().await.clone()
        }
    }

    /// Parses the request head and drains a `content-length` body.
    async fn read_request(stream: &mut TcpStream) -> Option<Received> {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 4096];
        let head_end = loop {
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
        };

        let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
        let mut lines = head.lines();
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();
        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let body_len = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body_read = buffer.len() - (head_end + 4);
        while body_read < body_len {
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body_read += read;
        }

        Some(Received {
            method,
            path,
            headers,
        })
    }

    fn client_for(base_url: &str) -> PlatformClient {
        PlatformClient::new(
            base_url,
            Some("site-123".to_string()),
            CredentialCache::new(AuthMode::StaticToken("api-key".to_string())),
        )
        .expect("client")
        .with_backoff_base(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn rate_limited_request_waits_for_retry_after_then_succeeds() {
        let platform = ScriptedPlatform::start(vec![
            Reply {
                status: 429,
                retry_after: Some("1"),
                body: r#"{"message":"slow down"}"#,
            },
            reply(200, r#"{"ok":true}"#),
        ])
        .await;

        let client = client_for(&platform.base_url);
        let started = Instant::now();
        let response = client
            .request(Method::GET, "bookings/v2/bookings/bk-1", None)
            .await
            .expect("second attempt succeeds");

        assert_eq!(response, json!({ "ok": true }));
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(platform.received().await.len(), 2);
    }

    #[tokio::test]
    async fn server_errors_back_off_and_retry() {
        let platform = ScriptedPlatform::start(vec![
            reply(503, r#"{"message":"unavailable"}"#),
            reply(500, r#"{"message":"boom"}"#),
            reply(200, r#"{"contacts":[]}"#),
        ])
        .await;

        let client = client_for(&platform.base_url);
        let response = client
            .request(Method::POST, "contacts/v4/contacts/query", Some(&json!({})))
            .await
            .expect("third attempt succeeds");

        assert_eq!(response, json!({ "contacts": [] }));
        assert_eq!(platform.received().await.len(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let platform = ScriptedPlatform::start(vec![
            reply(500, r#"{"message":"1"}"#),
            reply(500, r#"{"message":"2"}"#),
            reply(500, r#"{"message":"3"}"#),
        ])
        .await;

        let client = client_for(&platform.base_url);
        let err = client
            .request_with_retries(Method::GET, "ecom/v1/orders/o-1", None, 2)
            .await
            .expect_err("retries exhausted");

        assert_eq!(err.status_code(), Some(500));
        assert!(err.to_string().contains("3"));
        assert_eq!(platform.received().await.len(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let platform = ScriptedPlatform::start(vec![reply(400, r#"{"message":"bad filter"}"#)]).await;

        let client = client_for(&platform.base_url);
        let err = client
            .request(Method::POST, "contacts/v4/contacts/query", Some(&json!({})))
            .await
            .expect_err("400 is permanent");

        match err {
            PlatformError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad filter");
            }
            other => panic!("expected api error, got {:?}", other),
        }
        assert_eq!(platform.received().await.len(), 1);
    }

    #[tokio::test]
    async fn requests_carry_auth_and_site_headers() {
        let platform = ScriptedPlatform::start(vec![reply(200, "{}")]).await;

        let client = client_for(&platform.base_url);
        client
            .request(Method::GET, "/bookings/v2/bookings/bk-1", None)
            .await
            .expect("ok");

        let requests = platform.received().await;
        assert_eq!(requests[0].path, "/bookings/v2/bookings/bk-1");
        assert_eq!(requests[0].headers.get("authorization").map(String::as_str), Some("api-key"));
        assert_eq!(requests[0].headers.get(SITE_ID_HEADER).map(String::as_str), Some("site-123"));
    }

    #[tokio::test]
    async fn booking_query_falls_back_to_next_candidate() {
        let platform = ScriptedPlatform::start(vec![
            reply(404, r#"{"message":"no such route"}"#),
            reply(
                200,
                r#"{"bookings":[{"id":"bk-1"}],"pagingMetadata":{"cursors":{"next":"n1"}}}"#,
            ),
        ])
        .await;

        let client = client_for(&platform.base_url);
        let page = client.query_bookings(None, 25).await.expect("fallback page");

        assert_eq!(page.items, vec![json!({ "id": "bk-1" })]);
        assert_eq!(page.next_cursor.as_deref(), Some("n1"));
        let requests = platform.received().await;
        assert_eq!(requests[0].path, "/bookings/v2/bookings/query");
        assert_eq!(requests[1].path, "/_api/bookings-service/v2/bookings/query");
        assert_eq!(requests[1].method, "POST");
    }

    #[tokio::test]
    async fn booking_query_reports_every_failed_candidate() {
        let platform = ScriptedPlatform::start(vec![
            reply(404, "{}"),
            reply(404, "{}"),
            reply(403, r#"{"message":"forbidden"}"#),
        ])
        .await;

        let client = client_for(&platform.base_url);
        match client.query_bookings(None, 25).await {
            Err(PlatformError::AllEndpointsFailed { attempts }) => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts[2].contains("forbidden"));
            }
            other => panic!("expected all endpoints failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_booking_is_none() {
        let platform = ScriptedPlatform::start(vec![reply(404, r#"{"message":"not found"}"#)]).await;

        let client = client_for(&platform.base_url);
        assert!(client.get_booking("bk-404").await.expect("ok").is_none());
    }
}
