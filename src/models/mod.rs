//! Core data models for the crate
//!
//! This module contains the primary data structures used throughout the pipeline,
//! separated from the logic that operates on them.
//!
//! # Usage
//!
//! ```rust
//! use singbox_subparser::models::{ParserConfig, ProxySource};
//!
//! let mut cfg = ParserConfig::default();
//! cfg.parser_config
//!     .proxies
//!     .push(ProxySource::from_url("https://example.com/sub"));
//! assert!(cfg.proxies()[0].is_remote());
//! ```

mod parser_config;
mod proxy;

pub use parser_config::*;
pub use proxy::*;
