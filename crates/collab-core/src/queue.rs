//! EditQueue: applies remote edits to local buffers strictly one at a time.
//!
//! The host's apply primitive is asynchronous and may lose an edit if it is
//! called again before the previous call resolved, while remote `change`
//! messages arrive in bursts. The queue therefore keeps at most one apply in
//! flight and dequeues in FIFO order:
//!
//! 1. If a drain is already in flight, return; it will reach new entries.
//! 2. If the queue is empty, clear the suppression flag and return.
//! 3. Set the suppression and reentrancy flags.
//! 4. Dequeue the head, resolve its editor and start the apply.
//! 5. When the apply resolves, log a failure as a warning.
//! 6. Clear the reentrancy flag.
//! 7. Drain again.
//!
//! Suppression stays set for the whole burst, so change notifications the host
//! emits while applying are never mistaken for user input.

use crate::host::{self, EditorHost};
use crate::protocol::{Change, DocumentId};
use crate::registry::Registry;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::poll_fn;
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, warn};

/// Whether an apply is currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Draining,
}

/// Result of one apply operation.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub document_id: DocumentId,
    pub change: Change,
    pub result: host::Result<()>,
}

/// FIFO of remote edits with a single in-flight slot.
#[derive(Default)]
pub struct EditQueue {
    entries: VecDeque<(DocumentId, Change)>,
    /// The apply currently running, polled by `applied`
    in_flight: Option<BoxFuture<'static, ApplyOutcome>>,
    /// Reentrancy flag: true from dequeue until the apply has been completed
    draining: bool,
    /// Suppression flag: true while remote edits are being applied
    suppressing: bool,
}

impl EditQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, document_id: DocumentId, change: Change) {
        self.entries.push_back((document_id, change));
    }

    /// Number of entries waiting (not counting the one in flight).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> QueueState {
        if self.draining {
            QueueState::Draining
        } else {
            QueueState::Idle
        }
    }

    /// Whether local change notifications must be ignored right now.
    pub fn is_suppressing(&self) -> bool {
        self.suppressing
    }

    /// Start applying the next entry unless an apply is already in flight.
    ///
    /// Entries whose document has no bound editor are logged and skipped.
    pub fn drain<H: EditorHost>(
        &mut self,
        host: &Arc<H>,
        registry: &Registry<H::Document, H::Editor>,
    ) {
        loop {
            if self.draining {
                return;
            }

            let Some((document_id, change)) = self.entries.pop_front() else {
                if self.suppressing {
                    debug!("No more changes to process");
                }
                self.suppressing = false;
                return;
            };

            self.suppressing = true;

            let Some(editor) = registry.resolve_editor(&document_id).cloned() else {
                warn!(
                    "Dropping change for unknown document {}: {:?}",
                    document_id, change
                );
                continue;
            };

            debug!("Applying {:?} to document {}", change, document_id);
            self.draining = true;
            let host = Arc::clone(host);
            self.in_flight = Some(Box::pin(async move {
                let result = host.apply_edit(&editor, &change).await;
                ApplyOutcome {
                    document_id,
                    change,
                    result,
                }
            }));
            return;
        }
    }

    /// Wait for the in-flight apply to resolve.
    ///
    /// Never resolves while idle. Cancel-safe: dropping the returned future
    /// keeps the apply in its slot.
    pub async fn applied(&mut self) -> ApplyOutcome {
        poll_fn(|cx| {
            let Some(apply) = self.in_flight.as_mut() else {
                return Poll::Pending;
            };
            let outcome = std::task::ready!(apply.as_mut().poll(cx));
            self.in_flight = None;
            Poll::Ready(outcome)
        })
        .await
    }

    /// Record a resolved apply and clear the reentrancy flag.
    ///
    /// Call `drain` afterwards to continue with the next entry.
    pub fn complete(&mut self, outcome: &ApplyOutcome) {
        if let Err(e) = &outcome.result {
            warn!(
                "Failed to apply {:?} to document {}: {}",
                outcome.change, outcome.document_id, e
            );
        }
        self.draining = false;
    }
}
