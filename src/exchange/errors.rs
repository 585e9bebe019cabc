//! Mapping of exchange failures onto [`ExchangeError`].

use reqwest::StatusCode;

use crate::error::ExchangeError;

/// Map a structured `{code, msg}` error.
pub fn classify_code(code: i64, message: &str) -> ExchangeError {
    let message = message.to_string();
    match code {
        -1021 => ExchangeError::TimestampSkew(message),
        -1022 => ExchangeError::SignatureInvalid(message),
        -2008 | -2014 => ExchangeError::InvalidCredentials(message),
        -2015 => ExchangeError::PermissionDenied(message),
        -1003 => ExchangeError::RateLimitExceeded(message),
        -2010 => ExchangeError::InsufficientBalance(message),
        -2011 | -2013 => ExchangeError::OrderNotFound(message),
        -1121 => ExchangeError::InvalidSymbol(message),
        -1106..=-1100 | -1111 | -1013 | -4003 | -4028 => {
            ExchangeError::InvalidOrderParameters(message)
        }
        _ => ExchangeError::Exchange { code, message },
    }
}

fn parse_signed_int(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let end = raw
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}

/// Pull an exchange error code out of free-form error text.
///
/// Recognizes `"code":-2010`, `code=-2010` and a bare `-NNNN` token.
pub fn extract_code(text: &str) -> Option<i64> {
    for marker in ["\"code\":", "code="] {
        if let Some(pos) = text.find(marker) {
            if let Some(code) = parse_signed_int(&text[pos + marker.len()..]) {
                return Some(code);
            }
        }
    }

    text.split(|c: char| !(c.is_ascii_digit() || c == '-'))
        .filter(|token| {
            token.len() >= 5
                && token.starts_with('-')
                && token[1..].chars().all(|c| c.is_ascii_digit())
        })
        .find_map(|token| token.parse().ok())
}

const MESSAGE_FRAGMENTS: &[(&str, fn(String) -> ExchangeError)] = &[
    ("timestamp for this request", ExchangeError::TimestampSkew),
    ("signature for this request", ExchangeError::SignatureInvalid),
    ("insufficient balance", ExchangeError::InsufficientBalance),
    ("unknown order", ExchangeError::OrderNotFound),
    ("invalid symbol", ExchangeError::InvalidSymbol),
    ("too many requests", ExchangeError::RateLimitExceeded),
    ("too much request weight", ExchangeError::RateLimitExceeded),
    ("not whitelisted", ExchangeError::PermissionDenied),
    ("permissions", ExchangeError::PermissionDenied),
];

/// Map an unstructured error message.
pub fn classify_text(text: &str) -> ExchangeError {
    if let Some(code) = extract_code(text) {
        return classify_code(code, text);
    }

    let lowered = text.to_ascii_lowercase();
    MESSAGE_FRAGMENTS
        .iter()
        .find(|(fragment, _)| lowered.contains(fragment))
        .map(|(_, build)| build(text.to_string()))
        .unwrap_or_else(|| ExchangeError::Exchange {
            code: 0,
            message: text.to_string(),
        })
}

/// Map a non-success HTTP response body.
pub fn classify_response(status: StatusCode, body: &str) -> ExchangeError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return ExchangeError::RateLimitExceeded(format!("HTTP {}: {}", status.as_u16(), body));
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(code) = value.get("code").and_then(serde_json::Value::as_i64) {
            let msg = value
                .get("msg")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            return classify_code(code, msg);
        }
    }

    if body.trim().is_empty() {
        return ExchangeError::Exchange {
            code: 0,
            message: format!("HTTP {} with empty body", status.as_u16()),
        };
    }
    classify_text(body)
}

/// Map a transport-level failure.
pub fn classify_transport(err: &reqwest::Error) -> ExchangeError {
    if err.is_timeout() || err.is_connect() {
        ExchangeError::NetworkUnavailable(err.to_string())
    } else {
        classify_text(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_codes() {
        assert!(matches!(classify_code(-1021, ""), ExchangeError::TimestampSkew(_)));
        assert!(matches!(classify_code(-1022, ""), ExchangeError::SignatureInvalid(_)));
        assert!(matches!(classify_code(-2008, ""), ExchangeError::InvalidCredentials(_)));
        assert!(matches!(classify_code(-2014, ""), ExchangeError::InvalidCredentials(_)));
        assert!(matches!(classify_code(-2015, ""), ExchangeError::PermissionDenied(_)));
        assert!(matches!(classify_code(-1003, ""), ExchangeError::RateLimitExceeded(_)));
        assert!(matches!(classify_code(-2010, ""), ExchangeError::InsufficientBalance(_)));
        assert!(matches!(classify_code(-2011, ""), ExchangeError::OrderNotFound(_)));
        assert!(matches!(classify_code(-2013, ""), ExchangeError::OrderNotFound(_)));
        assert!(matches!(classify_code(-1121, ""), ExchangeError::InvalidSymbol(_)));
        for code in [-1100, -1103, -1106, -1111, -1013, -4003, -4028] {
            assert!(
                matches!(classify_code(code, ""), ExchangeError::InvalidOrderParameters(_)),
                "code {code}"
            );
        }
        assert_eq!(
            classify_code(-1000, "unknown"),
            ExchangeError::Exchange {
                code: -1000,
                message: "unknown".into()
            }
        );
        assert!(matches!(
            classify_code(-2016, ""),
            ExchangeError::Exchange { code: -2016, .. }
        ));
    }

    #[test]
    fn codes_extracted_from_text() {
        assert_eq!(extract_code(r#"{"code":-2010,"msg":"Account has insufficient balance"}"#), Some(-2010));
        assert_eq!(extract_code("<APIError> code=-1022, msg=Signature invalid"), Some(-1022));
        assert_eq!(extract_code("request failed with -1021 from server"), Some(-1021));
        assert_eq!(extract_code("nothing here"), None);
        assert_eq!(extract_code("price 12.5 qty -3"), None);
    }

    #[test]
    fn text_fallback() {
        assert!(matches!(
            classify_text("APIError(code=-2011): Unknown order sent."),
            ExchangeError::OrderNotFound(_)
        ));
        assert!(matches!(
            classify_text("Timestamp for this request is outside of the recvWindow."),
            ExchangeError::TimestampSkew(_)
        ));
        assert!(matches!(
            classify_text("Too much request weight used"),
            ExchangeError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            classify_text("IP not whitelisted"),
            ExchangeError::PermissionDenied(_)
        ));
        assert_eq!(
            classify_text("gateway exploded"),
            ExchangeError::Exchange {
                code: 0,
                message: "gateway exploded".into()
            }
        );
    }

    #[test]
    fn http_status_mapping() {
        assert!(matches!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, ""),
            ExchangeError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            classify_response(StatusCode::from_u16(418).unwrap(), "banned"),
            ExchangeError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            classify_response(
                StatusCode::BAD_REQUEST,
                r#"{"code":-1121,"msg":"Invalid symbol."}"#
            ),
            ExchangeError::InvalidSymbol(_)
        ));
    }
}
