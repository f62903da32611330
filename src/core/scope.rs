//! Per-document resource scope
//!
//! Everything a run allocates for one document (change subscriptions,
//! spawned step tasks, the halt signal) is registered here so it can be
//! released in one place when the document leaves the engine.

use crate::core::document::{DocumentChange, DocumentId};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// Capacity of each document's change channel
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Resources owned by one in-flight document
pub struct DocumentScope {
    doc_id: DocumentId,
    changes: broadcast::Sender<DocumentChange>,
    halted: watch::Sender<bool>,
    tasks: Mutex<Vec<AbortHandle>>,
    subscriptions: Arc<AtomicUsize>,
    disposed: AtomicBool,
}

impl DocumentScope {
    pub fn new(doc_id: DocumentId) -> Arc<Self> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (halted, _) = watch::channel(false);
        Arc::new(Self {
            doc_id,
            changes,
            halted,
            tasks: Mutex::new(Vec::new()),
            subscriptions: Arc::new(AtomicUsize::new(0)),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn doc_id(&self) -> &DocumentId {
        &self.doc_id
    }

    /// Subscribe to changes applied to this document from now on
    pub fn subscribe(&self) -> Subscription {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Subscription {
            receiver: self.changes.subscribe(),
            counter: self.subscriptions.clone(),
        }
    }

    /// Number of live subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub(crate) fn notify(&self, change: DocumentChange) {
        // No subscribers is fine: nothing is waiting on this document.
        let _ = self.changes.send(change);
    }

    /// Register a task that must not outlive the document
    pub fn track(&self, handle: AbortHandle) {
        if self.is_disposed() {
            handle.abort();
            return;
        }
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Spawn a task bound to this document's lifetime
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.track(handle.abort_handle());
        handle
    }

    /// Stop handing out new attempts; parked steps abandon
    pub fn halt(&self) {
        self.halted.send_replace(true);
    }

    pub fn is_halted(&self) -> bool {
        *self.halted.borrow()
    }

    /// Resolves once [`halt`](Self::halt) has been called
    pub async fn halted(&self) {
        let mut receiver = self.halted.subscribe();
        // The sender lives as long as `self`, so this only returns once halted.
        let _ = receiver.wait_for(|halted| *halted).await;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Release everything registered for the document.
    ///
    /// Returns `true` only for the call that actually disposed the scope.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.halt();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        debug!(
            "Disposing scope of document {} ({} tracked tasks)",
            self.doc_id,
            tasks.len()
        );
        for task in tasks {
            task.abort();
        }
        true
    }
}

impl Drop for DocumentScope {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A counted receiver of document changes; the count drops with the guard
pub struct Subscription {
    receiver: broadcast::Receiver<DocumentChange>,
    counter: Arc<AtomicUsize>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<DocumentChange, RecvError> {
        self.receiver.recv().await
    }

    /// Discard changes already queued; returns how many were dropped
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(_) => drained += 1,
                Err(TryRecvError::Lagged(skipped)) => drained += skipped as usize,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return drained,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
