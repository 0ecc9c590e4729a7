//! Ledger-owning task for concurrent batches
//!
//! Sources of one batch are processed in parallel, but their tags must come out
//! exactly as a serial run in source order would produce them. Workers send
//! their candidate tags to a single task that owns the [`TagLedger`]; the task
//! buffers early arrivals and commits strictly by source ordinal.

use std::collections::BTreeMap;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{check_ordinal, TagLedger};
use crate::error::{ParseError, Result};

struct AllocationRequest {
    ordinal: usize,
    bases: Vec<String>,
    reply: oneshot::Sender<Result<Vec<String>>>,
}

/// Cloneable sender side used by the workers.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::UnboundedSender<AllocationRequest>,
    total: usize,
}

impl LedgerHandle {
    /// Allocates tags for all `bases` of source `ordinal`, in order
    ///
    /// Resolves once every source with a lower ordinal has committed. Each
    /// ordinal must be submitted exactly once; a source that failed or was
    /// cancelled submits an empty list so later sources are not held back.
    pub async fn allocate(&self, ordinal: usize, bases: Vec<String>) -> Result<Vec<String>> {
        check_ordinal(ordinal, self.total)?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AllocationRequest {
                ordinal,
                bases,
                reply,
            })
            .map_err(|_| ParseError::Cancelled)?;
        rx.await.map_err(|_| ParseError::Cancelled)?
    }

    /// Releases the slot of a source that produced no nodes.
    pub async fn release(&self, ordinal: usize) -> Result<()> {
        self.allocate(ordinal, Vec::new()).await.map(|_| ())
    }
}

/// Owns the ledger task of one batch.
pub struct LedgerService {
    handle: LedgerHandle,
    task: JoinHandle<TagLedger>,
}

impl LedgerService {
    /// Starts a task for a batch of `total` sources with a fresh ledger.
    pub fn spawn(total: usize) -> Self {
        Self::spawn_with(TagLedger::new(), total)
    }

    /// Starts a task continuing from an existing ledger, e.g. one shared with a
    /// previous batch.
    pub fn spawn_with(ledger: TagLedger, total: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_ledger(ledger, total, rx));
        LedgerService {
            handle: LedgerHandle { tx, total },
            task,
        }
    }

    pub fn handle(&self) -> LedgerHandle {
        self.handle.clone()
    }

    /// Waits for the task to drain and returns the final ledger.
    ///
    /// Every handle clone must be dropped (or every ordinal committed) before
    /// this resolves.
    pub async fn finish(self) -> Result<TagLedger> {
        drop(self.handle);
        self.task.await.map_err(|e| {
            warn!("Ledger task failed: {}", e);
            ParseError::Cancelled
        })
    }
}

async fn run_ledger(
    mut ledger: TagLedger,
    total: usize,
    mut rx: mpsc::UnboundedReceiver<AllocationRequest>,
) -> TagLedger {
    let mut next = 0usize;
    let mut pending: BTreeMap<usize, AllocationRequest> = BTreeMap::new();

    while next < total {
        let Some(request) = rx.recv().await else {
            break;
        };

        if request.ordinal >= total
            || request.ordinal < next
            || pending.contains_key(&request.ordinal)
        {
            warn!(
                "Rejecting tag allocation for source {} (next {}, total {})",
                request.ordinal, next, total
            );
            let _ = request.reply.send(Err(ParseError::SchemaViolation(format!(
                "source ordinal {} submitted twice or out of range",
                request.ordinal
            ))));
            continue;
        }

        if request.ordinal != next {
            debug!(
                "Source {} waiting for source {} before committing tags",
                request.ordinal, next
            );
        }
        pending.insert(request.ordinal, request);

        while let Some(request) = pending.remove(&next) {
            let tags: Vec<String> = request
                .bases
                .iter()
                .map(|base| ledger.allocate(base))
                .collect();
            debug!("Committed {} tags for source {}", tags.len(), request.ordinal);
            // The worker may have gone away; its tags stay reserved either way
            let _ = request.reply.send(Ok(tags));
            next += 1;
        }
    }

    if !pending.is_empty() {
        warn!(
            "Ledger closed with {} sources waiting on source {}",
            pending.len(),
            next
        );
    }
    ledger
}
