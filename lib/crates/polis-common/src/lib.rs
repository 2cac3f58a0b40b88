pub mod config;
pub mod redis_keys;
pub mod types;

pub use config::{AdminServerConfig, AgentServerConfig};
pub use redis_keys::{
    approval, approved_key, auto_approve_key, blocked_key, exception_value_key, keys, ott_key,
    ttl, validate_credential_hash, validate_ott_code, validate_request_id,
};
pub use types::*;
