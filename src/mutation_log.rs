use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error as ThisError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::frame::Frame;

/// One appended batch. Every element is the wire form of a modifying command, in the order
/// the commands were applied to the store.
pub type Record = Arc<[Frame]>;

#[derive(Debug, ThisError, PartialEq, Clone)]
pub enum Error {
    #[error("mutation log append cancelled")]
    Cancelled,
    #[error("mutation log is closed")]
    Closed,
}

/// A registered listener. `removed` fires when the listener is removed or replaced, which
/// releases a fan-out blocked on its full channel.
#[derive(Clone)]
struct Listener {
    tx: mpsc::Sender<Record>,
    removed: CancellationToken,
}

type Listeners = Arc<Mutex<HashMap<String, Listener>>>;

/// Ordered record of the mutations applied to the store, fanned out to named listeners.
///
/// Appends go through a bounded channel to a background task that hands each record to
/// every listener in append order. A slow listener stalls the fan-out, which in turn makes
/// `append` wait once the channel is full. Nothing is dropped silently: a waiting append
/// either gets through or fails when its cancellation token fires or the log is closed.
#[derive(Clone)]
pub struct MutationLog {
    tx: mpsc::Sender<Record>,
    listeners: Listeners,
    closed: CancellationToken,
}

impl MutationLog {
    /// Creates the log and spawns its fan-out task on the current runtime.
    pub fn new(capacity: usize) -> MutationLog {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let listeners = Listeners::default();
        let closed = CancellationToken::new();

        tokio::spawn(fan_out(rx, listeners.clone(), closed.clone()));

        MutationLog {
            tx,
            listeners,
            closed,
        }
    }

    pub async fn append(
        &self,
        records: Vec<Frame>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.closed.cancelled() => Err(Error::Closed),
            sent = self.tx.send(records.into()) => sent.map_err(|_| Error::Closed),
        }
    }

    /// Registers a listener. A listener registered under an existing name replaces it, and
    /// the replaced receiver sees its channel closed.
    pub fn add_listener(&self, name: impl Into<String>, capacity: usize) -> mpsc::Receiver<Record> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let name = name.into();

        debug!(listener = %name, capacity, "mutation log listener added");
        let listener = Listener {
            tx,
            removed: CancellationToken::new(),
        };
        if let Some(replaced) = lock(&self.listeners).insert(name, listener) {
            replaced.removed.cancel();
        }

        rx
    }

    /// Unregisters a listener. Delivery to it stops at once, even when the fan-out is
    /// waiting on its full channel.
    pub fn remove_listener(&self, name: &str) -> bool {
        match lock(&self.listeners).remove(name) {
            Some(listener) => {
                listener.removed.cancel();
                debug!(listener = %name, "mutation log listener removed");
                true
            }
            None => false,
        }
    }

    /// Stops the fan-out. Pending and future appends fail with `Closed` and every listener
    /// channel is closed.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

fn lock(listeners: &Listeners) -> MutexGuard<'_, HashMap<String, Listener>> {
    // The map stays consistent even if a holder panicked, every operation is one call.
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn fan_out(
    mut rx: mpsc::Receiver<Record>,
    listeners: Listeners,
    closed: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            record = rx.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        // Snapshot the senders, the lock must not be held across an await.
        let targets: Vec<(String, Listener)> = lock(&listeners)
            .iter()
            .map(|(name, listener)| (name.clone(), listener.clone()))
            .collect();

        for (name, listener) in targets {
            tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                _ = listener.removed.cancelled() => {}
                sent = listener.tx.send(record.clone()) => {
                    if sent.is_err() {
                        debug!(listener = %name, "mutation log listener went away");
                        let mut listeners = lock(&listeners);
                        let current = listeners
                            .get(&name)
                            .is_some_and(|other| other.tx.same_channel(&listener.tx));
                        if current {
                            listeners.remove(&name);
                        }
                    }
                }
            }
        }
    }

    lock(&listeners).clear();
    info!("mutation log closed");
}
