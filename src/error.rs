//! Error taxonomy shared by the whole pipeline.
//!
//! A skipped link is never an error: parsers return `Ok(None)` for that case, so
//! every `Err` below is a real failure the caller can report.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Malformed link ({reason}): {link}")]
    MalformedLink { link: String, reason: String },

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ParseError {
    pub fn malformed(link: &str, reason: impl Into<String>) -> Self {
        ParseError::MalformedLink {
            link: link.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;
