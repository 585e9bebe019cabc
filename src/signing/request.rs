use reqwest::Method;
use serde_json::Value;

/// Body of an outgoing request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// `application/json`
    Json(Value),
}

/// Transport-level description of a REST call, built before it is signed
/// and turned into a `reqwest::Request`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParts {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RequestParts {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query_param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Append a form field, switching the body to form encoding.
    pub fn form_param(mut self, key: &str, value: impl ToString) -> Self {
        match &mut self.body {
            Some(RequestBody::Form(fields)) => fields.push((key.to_string(), value.to_string())),
            _ => {
                self.body = Some(RequestBody::Form(vec![(key.to_string(), value.to_string())]))
            }
        }
        self
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match &self.body {
            Some(RequestBody::Form(_)) => Some("application/x-www-form-urlencoded"),
            Some(RequestBody::Json(_)) => Some("application/json"),
            None => None,
        }
    }

    pub fn query_string(&self) -> String {
        encode_pairs(&self.query)
    }

    pub fn body_string(&self) -> String {
        match &self.body {
            Some(RequestBody::Form(fields)) => encode_pairs(fields),
            Some(RequestBody::Json(value)) => value.to_string(),
            None => String::new(),
        }
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            Some(RequestBody::Form(fields)) => fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_params_accumulate() {
        let parts = RequestParts::post("/api/v3/order")
            .form_param("symbol", "BTCUSDT")
            .form_param("side", "BUY");
        assert_eq!(parts.body_string(), "symbol=BTCUSDT&side=BUY");
        assert_eq!(parts.content_type(), Some("application/x-www-form-urlencoded"));
        assert_eq!(parts.form_value("side"), Some("BUY"));
    }

    #[test]
    fn query_is_url_encoded() {
        let parts = RequestParts::get("/sapi/v1/capital/withdraw/history").query_param("coin", "A B");
        assert_eq!(parts.query_string(), "coin=A+B");
    }
}
