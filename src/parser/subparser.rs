//! Source processing: fetch a subscription, explode its links, allocate tags and
//! generate outbounds.
//!
//! One source is handled by [`SourceProcessor::process`] against a caller-owned
//! [`TagLedger`]. A whole batch runs its sources concurrently through
//! [`SourceProcessor::process_batch`]; tag allocation then goes through the
//! ledger task so the result is the same as a serial run in source order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::constants::LogContext;
use crate::error::{ParseError, Result};
use crate::generator::check_supported;
use crate::ledger::{
    allocate_tag, check_ordinal, tag_candidate, LedgerHandle, LedgerService, TagLedger,
};
use crate::models::{FilterRule, ParsedNode, ProxySource};
use crate::parser::explodes::explode;
use crate::utils::base64::decode_subscription_content;
use crate::utils::http::SubscriptionFetcher;
use crate::utils::matcher::CompiledRules;

/// Split subscription content into link lines.
pub fn split_links(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comment and metadata lines some providers put in front of the links,
/// e.g. `#profile-title: ...` or `// updated daily`.
fn is_comment_line(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("//")
}

/// A link that could not be turned into an outbound.
#[derive(Debug)]
pub struct LinkFailure {
    /// Position of the link within its source
    pub ordinal: usize,
    pub line: String,
    pub error: ParseError,
}

/// What one source produced.
#[derive(Debug, Default)]
pub struct SourceReport {
    pub ordinal: usize,
    pub nodes: Vec<ParsedNode>,
    /// Links dropped by a skip rule
    pub skipped: usize,
    pub failures: Vec<LinkFailure>,
}

/// Per-source results of a batch, ordered by source ordinal.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub sources: Vec<Result<SourceReport>>,
    /// Ledger state after the batch, for callers chaining batches.
    pub ledger: TagLedger,
}

impl BatchReport {
    /// Generated nodes of all successful sources, in batch order.
    pub fn nodes(&self) -> impl Iterator<Item = &ParsedNode> {
        self.sources
            .iter()
            .filter_map(|source| source.as_ref().ok())
            .flat_map(|report| report.nodes.iter())
    }

    pub fn into_nodes(self) -> Vec<ParsedNode> {
        self.sources
            .into_iter()
            .filter_map(|source| source.ok())
            .flat_map(|report| report.nodes)
            .collect()
    }

    /// Sources that failed as a whole, with their ordinal.
    pub fn source_errors(&self) -> impl Iterator<Item = (usize, &ParseError)> {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(ordinal, source)| source.as_ref().err().map(|e| (ordinal, e)))
    }

    pub fn link_failures(&self) -> usize {
        self.sources
            .iter()
            .filter_map(|source| source.as_ref().ok())
            .map(|report| report.failures.len())
            .sum()
    }
}

/// Nodes of one source that passed parsing, filtering and the transport check,
/// waiting for their tags.
#[derive(Default)]
struct ExplodedSource {
    candidates: Vec<(usize, String, ParsedNode)>,
    skipped: usize,
    failures: Vec<LinkFailure>,
}

impl ExplodedSource {
    fn bases(&self) -> Vec<String> {
        self.candidates
            .iter()
            .map(|(_, _, node)| tag_candidate(&node.display_name, &node.server, node.port))
            .collect()
    }
}

/// Drives parser, filter, tag allocation and generation for subscription
/// sources.
pub struct SourceProcessor<F> {
    fetcher: Arc<F>,
    log: LogContext,
}

impl<F> Clone for SourceProcessor<F> {
    fn clone(&self) -> Self {
        SourceProcessor {
            fetcher: Arc::clone(&self.fetcher),
            log: self.log.clone(),
        }
    }
}

impl<F: SubscriptionFetcher> SourceProcessor<F> {
    pub fn new(fetcher: F, log: LogContext) -> Self {
        SourceProcessor {
            fetcher: Arc::new(fetcher),
            log,
        }
    }

    /// Process one source against a caller-owned ledger
    ///
    /// `ordinal` and `total` place the source within its batch. A fetch failure
    /// fails this source only; per-link failures are collected in the report.
    pub async fn process(
        &self,
        source: &ProxySource,
        ledger: &mut TagLedger,
        default_skip: &[FilterRule],
        ordinal: usize,
        total: usize,
    ) -> Result<SourceReport> {
        check_ordinal(ordinal, total)?;
        let log = self.log.scoped(&format!("source {}", ordinal));
        let links = self
            .collect_links(source, &CancellationToken::new(), &log)
            .await?;
        let exploded = self.explode_links(links, source, default_skip, &log);

        let tags = exploded
            .bases()
            .iter()
            .map(|base| allocate_tag(ledger, base, ordinal, total))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.finish(ordinal, exploded, tags, &log))
    }

    /// Fetches the remote body (if any) and appends the inline connections.
    async fn collect_links(
        &self,
        source: &ProxySource,
        cancel: &CancellationToken,
        log: &LogContext,
    ) -> Result<Vec<String>> {
        let mut links = Vec::new();

        if source.is_remote() {
            let url = source.source.trim();
            log.verbose(format_args!("Fetching subscription {}", url));

            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ParseError::Cancelled),
                body = self.fetcher.fetch(url) => body?,
            };

            let content = decode_subscription_content(&body);
            links = split_links(&content);
            log.verbose(format_args!(
                "Subscription {} carries {} lines",
                url,
                links.len()
            ));
        }

        links.extend(
            source
                .connections
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
        Ok(links)
    }

    fn explode_links(
        &self,
        links: Vec<String>,
        source: &ProxySource,
        default_skip: &[FilterRule],
        log: &LogContext,
    ) -> ExplodedSource {
        let skip = CompiledRules::new(source.skip.iter().chain(default_skip.iter()));
        let mut out = ExplodedSource::default();

        for (index, line) in links.into_iter().enumerate() {
            if is_comment_line(&line) {
                continue;
            }

            let parsed = explode(&line, &skip)
                .and_then(|node| node.map(|n| check_supported(&n).map(|_| n)).transpose());
            match parsed {
                Ok(Some(node)) => out.candidates.push((index, line, node)),
                Ok(None) => {
                    out.skipped += 1;
                    log.verbose(format_args!("Skipped link {} by filter", index));
                }
                Err(error) => {
                    log.warn(format_args!("Link {} rejected: {}", index, error));
                    out.failures.push(LinkFailure {
                        ordinal: index,
                        line,
                        error,
                    });
                }
            }
        }
        out
    }

    /// Applies the allocated tags and renders the outbounds.
    fn finish(
        &self,
        ordinal: usize,
        exploded: ExplodedSource,
        tags: Vec<String>,
        log: &LogContext,
    ) -> SourceReport {
        let ExplodedSource {
            candidates,
            skipped,
            mut failures,
        } = exploded;
        let mut nodes = Vec::with_capacity(candidates.len());

        for ((index, line, mut node), tag) in candidates.into_iter().zip(tags) {
            node.set_tag(tag);
            match node.generate() {
                Ok(node) => nodes.push(node),
                Err(error) => {
                    log.warn(format_args!("Link {} failed to generate: {}", index, error));
                    failures.push(LinkFailure {
                        ordinal: index,
                        line,
                        error,
                    });
                }
            }
        }

        log.info(format_args!(
            "{} nodes, {} skipped, {} failed",
            nodes.len(),
            skipped,
            failures.len()
        ));
        SourceReport {
            ordinal,
            nodes,
            skipped,
            failures,
        }
    }
}

impl<F: SubscriptionFetcher + 'static> SourceProcessor<F> {
    /// One batch worker. Submits to the ledger exactly once, whatever happens.
    async fn run_source(
        &self,
        ordinal: usize,
        source: &ProxySource,
        default_skip: &[FilterRule],
        ledger: &LedgerHandle,
        cancel: &CancellationToken,
        log: &LogContext,
    ) -> Result<SourceReport> {
        let links = match self.collect_links(source, cancel, log).await {
            Ok(_) if cancel.is_cancelled() => Err(ParseError::Cancelled),
            other => other,
        };
        let exploded = match links {
            Ok(links) => self.explode_links(links, source, default_skip, log),
            Err(e) => {
                log.warn(format_args!("Source failed: {}", e));
                // Later sources wait on this slot
                let _ = ledger.release(ordinal).await;
                return Err(e);
            }
        };

        let tags = ledger.allocate(ordinal, exploded.bases()).await?;
        Ok(self.finish(ordinal, exploded, tags, log))
    }

    /// Process all sources of a batch concurrently
    ///
    /// Tags are committed in source order through a ledger task, so the output
    /// does not depend on which fetch finishes first. A failing or cancelled
    /// source is reported in its slot and never aborts its siblings.
    pub async fn process_batch(
        &self,
        sources: &[ProxySource],
        default_skip: &[FilterRule],
        cancel: CancellationToken,
    ) -> BatchReport {
        let total = sources.len();
        let service = LedgerService::spawn(total);
        let default_skip: Arc<Vec<FilterRule>> = Arc::new(default_skip.to_vec());

        let mut tasks = JoinSet::new();
        for (ordinal, source) in sources.iter().enumerate() {
            let worker = self.clone();
            let source = source.clone();
            let ledger = service.handle();
            let default_skip = Arc::clone(&default_skip);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let log = worker.log.scoped(&format!("source {}", ordinal));
                let work =
                    worker.run_source(ordinal, &source, &default_skip, &ledger, &cancel, &log);
                let result = match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        log.error(format_args!("Worker panicked"));
                        // Free the slot in case the worker never reached the ledger
                        let _ = ledger.release(ordinal).await;
                        Err(ParseError::Cancelled)
                    }
                };
                (ordinal, result)
            });
        }

        let mut results: Vec<Option<Result<SourceReport>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ordinal, result)) => results[ordinal] = Some(result),
                Err(e) => self.log.error(format_args!("Worker task failed: {}", e)),
            }
        }

        let ledger = service.finish().await.unwrap_or_default();
        BatchReport {
            sources: results
                .into_iter()
                .map(|r| r.unwrap_or(Err(ParseError::Cancelled)))
                .collect(),
            ledger,
        }
    }
}
