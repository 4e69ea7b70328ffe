//! Request signing for the futures REST API

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::errors::{ReconcileError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on signed requests
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Sign a query string with HMAC-SHA256, hex encoded
///
/// The signature covers the exact bytes of `query`, so the caller must send
/// the query string unchanged and append `&signature=<hex>`.
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ReconcileError::Authentication(format!("Failed to create HMAC: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
