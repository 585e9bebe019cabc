pub mod agent;
pub mod credentials;
pub mod hmac;
pub mod request;

pub use agent::{inject_agent_code, AGENT_CODE_PARAM};
pub use credentials::{ConfigCredentials, CredentialResolver, StaticCredentials};
pub use hmac::{key_prefix, timestamp_ms, ApiCredentials, RequestSigner};
pub use request::{RequestBody, RequestParts};
