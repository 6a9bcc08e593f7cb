//! Model provider transport.

pub mod openai;
pub mod shared;

pub use shared::{
    ProviderError, ProviderErrorKind, ProviderResult, UsageStats, resolve_api_key,
    resolve_base_url,
};
