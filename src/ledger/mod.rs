//! Tag allocation
//!
//! Every outbound needs a tag that is unique within a batch. Tags are derived
//! from the node's display name and disambiguated with a `-<n>` suffix against a
//! ledger shared by all sources of the batch.

pub mod service;

use std::collections::HashMap;

use crate::error::{ParseError, Result};

pub use service::{LedgerHandle, LedgerService};

/// Derives the base tag for a node from its display name
///
/// Leading and trailing whitespace is trimmed, whitespace runs collapse to a
/// single space, and control characters plus `"`, `\`, `,` and `;` become `_`.
/// A name with nothing left falls back to `server:port`.
pub fn tag_candidate(display_name: &str, server: &str, port: u16) -> String {
    let mut out = String::with_capacity(display_name.len());
    let mut pending_space = false;

    for c in display_name.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if c.is_control() || matches!(c, '"' | '\\' | ',' | ';') {
            out.push('_');
        } else {
            out.push(c);
        }
    }

    if out.is_empty() {
        format!("{}:{}", server, port)
    } else {
        out
    }
}

/// Counts how often each tag has been handed out in one batch.
#[derive(Debug, Default, Clone)]
pub struct TagLedger {
    counts: HashMap<String, usize>,
}

impl TagLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.counts.get(tag).copied().unwrap_or(0)
    }

    pub fn is_used(&self, tag: &str) -> bool {
        self.count(tag) > 0
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Reserves a unique tag for `base`
    ///
    /// An unused base is returned as-is. Otherwise `-2`, `-3`, ... is appended
    /// until a free tag is found. The chosen tag is marked used and the base's
    /// count grows on every call, so repeated names keep stepping forward.
    pub fn allocate(&mut self, base: &str) -> String {
        if !self.is_used(base) {
            self.counts.insert(base.to_string(), 1);
            return base.to_string();
        }

        let mut suffix = 2usize;
        let tag = loop {
            let candidate = format!("{}-{}", base, suffix);
            if !self.is_used(&candidate) {
                break candidate;
            }
            suffix += 1;
        };

        *self.counts.entry(base.to_string()).or_insert(0) += 1;
        self.counts.insert(tag.clone(), 1);
        tag
    }
}

/// Allocates a tag for a node of source `ordinal` out of `total`
///
/// A plain ledger access is only correct when the caller already serializes
/// sources in ordinal order; concurrent batches go through [`LedgerService`].
pub fn allocate_tag(
    ledger: &mut TagLedger,
    base: &str,
    ordinal: usize,
    total: usize,
) -> Result<String> {
    check_ordinal(ordinal, total)?;
    Ok(ledger.allocate(base))
}

/// A source ordinal must lie within its batch.
pub fn check_ordinal(ordinal: usize, total: usize) -> Result<()> {
    if ordinal >= total {
        return Err(ParseError::SchemaViolation(format!(
            "source ordinal {} outside batch of {}",
            ordinal, total
        )));
    }
    Ok(())
}
