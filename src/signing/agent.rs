//! Partner agent-code injection.
//!
//! Every mutating POST and the order/sapi GETs carry `apiAgentCode`. The
//! original request is left untouched; a modified copy is returned.

use reqwest::Method;

use super::request::{RequestBody, RequestParts};

pub const AGENT_CODE_PARAM: &str = "apiAgentCode";

fn get_needs_agent_code(path: &str) -> bool {
    path.contains("/sapi/") || path.contains("/api/v3/order")
}

/// Return a copy of `parts` carrying the agent code where the exchange expects it.
pub fn inject_agent_code(parts: &RequestParts, agent_code: &str) -> RequestParts {
    let mut out = parts.clone();
    if agent_code.is_empty() {
        return out;
    }

    if parts.method == Method::POST {
        match &mut out.body {
            Some(RequestBody::Form(fields)) => {
                fields.push((AGENT_CODE_PARAM.to_string(), agent_code.to_string()));
            }
            Some(RequestBody::Json(_)) | None => {
                out.query
                    .push((AGENT_CODE_PARAM.to_string(), agent_code.to_string()));
            }
        }
    } else if parts.method == Method::GET && get_needs_agent_code(&parts.path) {
        out.query
            .push((AGENT_CODE_PARAM.to_string(), agent_code.to_string()));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CODE: &str = "JW9QZKMK";

    #[test]
    fn form_post_gets_code_in_body() {
        let original = RequestParts::post("/api/v3/order")
            .form_param("symbol", "BTCUSDT")
            .form_param("side", "BUY");
        let injected = inject_agent_code(&original, CODE);

        assert_eq!(injected.form_value(AGENT_CODE_PARAM), Some(CODE));
        assert_eq!(injected.query_value(AGENT_CODE_PARAM), None);
        assert_eq!(
            injected.body_string(),
            "symbol=BTCUSDT&side=BUY&apiAgentCode=JW9QZKMK"
        );
        // original untouched
        assert_eq!(original.form_value(AGENT_CODE_PARAM), None);
    }

    #[test]
    fn json_post_gets_code_in_query() {
        let mut original = RequestParts::post("/fapi/v1/order").query_param("symbol", "ETHUSDT");
        original.body = Some(RequestBody::Json(json!({"quantity": "1"})));

        let injected = inject_agent_code(&original, CODE);
        assert_eq!(injected.query_value(AGENT_CODE_PARAM), Some(CODE));
        assert_eq!(injected.body, original.body);
        assert_eq!(injected.query_value("symbol"), Some("ETHUSDT"));
    }

    #[test]
    fn bodyless_post_gets_code_in_query() {
        let original = RequestParts::post("/fapi/v1/leverage").query_param("leverage", 8);
        let injected = inject_agent_code(&original, CODE);
        assert_eq!(injected.query_value(AGENT_CODE_PARAM), Some(CODE));
        assert!(injected.body.is_none());
    }

    #[test]
    fn order_and_sapi_gets_are_tagged() {
        let order = inject_agent_code(&RequestParts::get("/api/v3/order"), CODE);
        assert_eq!(order.query_value(AGENT_CODE_PARAM), Some(CODE));

        let sapi = inject_agent_code(&RequestParts::get("/sapi/v1/capital/config/getall"), CODE);
        assert_eq!(sapi.query_value(AGENT_CODE_PARAM), Some(CODE));
    }

    #[test]
    fn other_requests_are_unchanged() {
        let price = RequestParts::get("/api/v3/ticker/price").query_param("symbol", "BTCUSDT");
        assert_eq!(inject_agent_code(&price, CODE), price);

        let cancel = RequestParts::delete("/api/v3/order").query_param("orderId", 1);
        assert_eq!(inject_agent_code(&cancel, CODE), cancel);
    }

    #[test]
    fn empty_code_is_a_no_op() {
        let original = RequestParts::post("/api/v3/order").form_param("symbol", "BTCUSDT");
        assert_eq!(inject_agent_code(&original, ""), original);
    }
}
