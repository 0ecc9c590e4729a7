//! Turns proxy subscriptions into sing-box outbound descriptors.
//!
//! Links (`vless://`, `vmess://`, `trojan://`, `ss://`, `hysteria2://`) are
//! exploded into [`ParsedNode`]s, filtered, given batch-unique tags and rendered
//! as outbound JSON. Selector groups declared in a [`ParserConfig`] are built
//! on top of the generated nodes.

pub mod constants;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod models;
pub mod parser;
pub mod settings;
pub mod utils;

// Re-export the main node types for easier access
pub use models::{FilterRule, ParsedNode, ParserConfig, Protocol, ProxySource};

// Re-export the error type
pub use error::{ParseError, Result};

pub use constants::{LogContext, LogLevel};
pub use ledger::{tag_candidate, TagLedger};
pub use parser::{parse_node, SourceProcessor};
