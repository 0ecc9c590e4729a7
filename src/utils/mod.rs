pub mod base64;
pub mod http;
pub mod matcher;
pub mod url;

// Re-export common utilities
pub use self::base64::decode_subscription_content;
pub use http::{HttpFetcher, HttpFetcherConfig, StaticFetcher, SubscriptionFetcher};
pub use matcher::{any_match, matches, CompiledRules};
