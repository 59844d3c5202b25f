//! Request signing for authenticated Coinbase Exchange endpoints

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::errors::{AlphaError, Result};
use crate::config::types::ApiCredentials;

type HmacSha256 = Hmac<Sha256>;

/// Generate HMAC-SHA256 signature for API requests
///
/// # Arguments
/// * `secret` - API secret key (base64 encoded)
/// * `timestamp` - Unix timestamp in seconds
/// * `method` - HTTP method (GET, POST, etc.)
/// * `request_path` - API endpoint path including the query string
/// * `body` - Request body (empty string for GET requests)
pub fn sign_request(
    secret: &str,
    timestamp: i64,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String> {
    let secret_bytes = BASE64
        .decode(secret)
        .map_err(|e| AlphaError::Authentication(format!("Failed to decode secret: {}", e)))?;

    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), request_path, body);

    let mut mac = HmacSha256::new_from_slice(&secret_bytes)
        .map_err(|e| AlphaError::Authentication(format!("Failed to create HMAC: {}", e)))?;
    mac.update(message.as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Generate authentication headers for a request signed now
pub fn generate_auth_headers(
    credentials: &ApiCredentials,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<AuthHeaders> {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = sign_request(&credentials.api_secret, timestamp, method, request_path, body)?;

    Ok(AuthHeaders {
        api_key: credentials.api_key.clone(),
        signature,
        timestamp,
        passphrase: credentials.passphrase.clone(),
    })
}

/// Authentication headers for API requests
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub api_key: String,
    pub signature: String,
    pub timestamp: i64,
    pub passphrase: String,
}

impl AuthHeaders {
    /// Add authentication headers to a reqwest RequestBuilder
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("CB-ACCESS-KEY", &self.api_key)
            .header("CB-ACCESS-SIGN", &self.signature)
            .header("CB-ACCESS-TIMESTAMP", self.timestamp.to_string())
            .header("CB-ACCESS-PASSPHRASE", &self.passphrase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_request_is_deterministic() {
        let secret = BASE64.encode(b"test_secret_key_12345");
        let first = sign_request(&secret, 1234567890, "GET", "/orders", "").unwrap();
        let second = sign_request(&secret, 1234567890, "get", "/orders", "").unwrap();

        assert_eq!(first, second);
        assert_eq!(BASE64.decode(&first).unwrap().len(), 32);
    }

    #[test]
    fn test_sign_request_rejects_bad_secret() {
        let result = sign_request("not base64!!", 1, "GET", "/", "");
        assert!(matches!(result, Err(AlphaError::Authentication(_))));
    }

    #[test]
    fn test_generate_auth_headers() {
        let credentials = ApiCredentials::new(
            "test_api_key".to_string(),
            BASE64.encode(b"test_secret_key_12345"),
            "test_passphrase".to_string(),
        );
        let headers = generate_auth_headers(&credentials, "POST", "/orders", "{}").unwrap();

        assert_eq!(headers.api_key, "test_api_key");
        assert_eq!(headers.passphrase, "test_passphrase");
        assert!(!headers.signature.is_empty());
    }
}
