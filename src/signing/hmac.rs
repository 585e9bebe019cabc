use crate::error::{EngineError, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::request::{RequestBody, RequestParts};

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Number of key characters that may appear in logs and reports
pub const KEY_PREFIX_LEN: usize = 6;

/// API key pair for one user. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiCredentials {
    api_key: String,
    secret_key: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.secret_key.trim().is_empty()
    }

    pub fn key_prefix(&self) -> String {
        key_prefix(&self.api_key)
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &format!("{}...", self.key_prefix()))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Fixed-length prefix of a key, safe to log.
pub fn key_prefix(key: &str) -> String {
    key.chars().take(KEY_PREFIX_LEN).collect()
}

/// Exchange key format: 64 ASCII alphanumerics.
pub fn has_expected_key_format(key: &str) -> bool {
    key.len() == 64 && key.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Current Unix time in milliseconds
pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// HMAC-SHA256 request signer
#[derive(Clone)]
pub struct RequestSigner {
    credentials: ApiCredentials,
}

impl RequestSigner {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }

    /// Hex-encoded HMAC-SHA256 of `payload` under the secret key
    pub fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes())
            .map_err(|e| EngineError::Auth(format!("HMAC init failed: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Add `timestamp`, `recvWindow` and `signature` to a request.
    ///
    /// The signed payload is the encoded query string followed by the
    /// encoded body. Parameters go where the rest of the payload lives:
    /// into a form body when there is one, otherwise into the query.
    pub fn sign_request(
        &self,
        parts: RequestParts,
        recv_window_ms: u64,
        timestamp: i64,
    ) -> Result<RequestParts> {
        let mut parts = parts;
        let timing = [
            ("timestamp".to_string(), timestamp.to_string()),
            ("recvWindow".to_string(), recv_window_ms.to_string()),
        ];

        match &mut parts.body {
            Some(RequestBody::Form(fields)) => fields.extend(timing),
            _ => parts.query.extend(timing),
        }

        let payload = format!("{}{}", parts.query_string(), parts.body_string());
        let signature = self.sign(&payload)?;

        match &mut parts.body {
            Some(RequestBody::Form(fields)) => fields.push(("signature".to_string(), signature)),
            _ => parts.query.push(("signature".to_string(), signature)),
        }
        Ok(parts)
    }

    /// Header carrying the API key
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(&self.credentials.api_key)
                .map_err(|e| EngineError::Auth(format!("Invalid API key header: {}", e)))?,
        );
        Ok(headers)
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published exchange documentation example
    const DOC_SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
    const DOC_PAYLOAD: &str = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
    const DOC_SIGNATURE: &str = "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71";

    fn signer() -> RequestSigner {
        RequestSigner::new(ApiCredentials::new("vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A", DOC_SECRET))
    }

    #[test]
    fn test_signature_matches_documented_vector() {
        assert_eq!(signer().sign(DOC_PAYLOAD).unwrap(), DOC_SIGNATURE);
    }

    #[test]
    fn test_signature_is_deterministic() {
        let s = signer();
        let a = s.sign("symbol=BTCUSDT").unwrap();
        let b = s.sign("symbol=BTCUSDT").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, s.sign("symbol=ETHUSDT").unwrap());
    }

    #[test]
    fn test_sign_request_form_body() {
        let parts = RequestParts::post("/api/v3/order")
            .form_param("symbol", "LTCBTC")
            .form_param("side", "BUY");
        let signed = signer().sign_request(parts, 5000, 1499827319559).unwrap();

        assert!(signed.query.is_empty());
        assert_eq!(signed.form_value("timestamp"), Some("1499827319559"));
        assert_eq!(signed.form_value("recvWindow"), Some("5000"));

        let expected = signer()
            .sign("symbol=LTCBTC&side=BUY&timestamp=1499827319559&recvWindow=5000")
            .unwrap();
        assert_eq!(signed.form_value("signature"), Some(expected.as_str()));
    }

    #[test]
    fn test_sign_request_query_only() {
        let parts = RequestParts::get("/api/v3/account");
        let signed = signer().sign_request(parts, 60000, 42).unwrap();
        let expected = signer().sign("timestamp=42&recvWindow=60000").unwrap();
        assert_eq!(signed.query_value("signature"), Some(expected.as_str()));
        assert!(signed.body.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = ApiCredentials::new("abcdefghijkl", "supersecret");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("abcdef..."));
        assert!(!rendered.contains("ghijkl"));
        assert!(!rendered.contains("supersecret"));
    }

    #[test]
    fn test_key_format() {
        assert!(has_expected_key_format(&"a1".repeat(32)));
        assert!(!has_expected_key_format("short"));
        assert!(!has_expected_key_format(&"-".repeat(64)));
        assert_eq!(key_prefix("abc"), "abc");
    }

    #[test]
    fn test_headers_carry_api_key() {
        let headers = signer().headers().unwrap();
        assert!(headers.get(API_KEY_HEADER).is_some());
    }
}
