use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};

use crate::error::ApiError;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Compares SHA-256 digests so the comparison time does not depend on where
/// the inputs first differ.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn verify_webhook(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = secret.filter(|s| !s.is_empty()) else {
        return Err(ApiError::Unauthorized("webhook secret is not configured".into()));
    };
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing webhook secret".into()))?;

    if secrets_match(provided, expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid webhook secret".into()))
    }
}

pub fn verify_bearer(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = secret.filter(|s| !s.is_empty()) else {
        return Err(ApiError::Unauthorized("cron secret is not configured".into()));
    };
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    if secrets_match(token.trim(), expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid bearer token".into()))
    }
}
