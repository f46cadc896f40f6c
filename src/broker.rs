//! Single-flight correlation of platform requests with their
//! callback-delivered results.
//!
//! The radio stack has no way of cancelling a request once issued. A waiter
//! that gives up (timeout, supersession, drop) only detaches from its slot;
//! the eventual callback finds no matching slot and is discarded.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{Error, OpKind, Result, SyncMutex};

/// Broker slot key.
pub(crate) trait Key: Clone + Debug + Eq + Hash {
    /// Returns the kind of operation tracked by the key.
    fn kind(&self) -> OpKind;
}

/// Correlator that allows at most one pending operation per key.
#[derive(Debug)]
pub(crate) struct Broker<K, T> {
    slots: Arc<SyncMutex<Slots<K, T>>>,
}

impl<K, T> Clone for Broker<K, T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, T> Default for Broker<K, T> {
    #[inline]
    fn default() -> Self {
        Self {
            slots: Arc::new(SyncMutex::new(Slots {
                map: HashMap::new(),
                next_id: 1,
            })),
        }
    }
}

#[derive(Debug)]
struct Slots<K, T> {
    map: HashMap<K, Slot<T>>,
    next_id: u64,
}

#[derive(Debug)]
struct Slot<T> {
    id: u64,
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Slot<T> {
    #[inline]
    fn resolve(self, r: Result<T>) {
        // The receiver is gone only if the handle was dropped concurrently
        let _ = self.tx.send(r);
    }
}

impl<K: Key, T> Broker<K, T> {
    /// Registers a new pending operation for `key`. Any operation already
    /// pending for the same key is resolved with
    /// [`Error::OperationCancelled`] before this function returns.
    pub fn begin(&self, key: K, timeout: Duration) -> Handle<K, T> {
        let (tx, rx) = oneshot::channel();
        let (id, old) = {
            let mut s = self.slots.lock();
            let id = s.next_id;
            s.next_id += 1;
            (id, s.map.insert(key.clone(), Slot { id, tx }))
        };
        if let Some(old) = old {
            debug!("Superseding {key:?} (op #{} -> #{id})", old.id);
            old.resolve(Err(Error::OperationCancelled));
        }
        trace!("Pending {key:?} (op #{id})");
        Handle {
            broker: self.clone(),
            key,
            id,
            rx: Some(rx),
            ct: CancellationToken::new(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Resolves the pending operation for `key`. Returns `false` and drops
    /// the result if nothing is pending, which happens for late completions
    /// of timed-out or superseded operations and for duplicate callbacks.
    pub fn complete(&self, key: &K, r: Result<T>) -> bool {
        let slot = self.slots.lock().map.remove(key);
        slot.map_or_else(
            || {
                trace!("Dropping unmatched completion for {key:?}");
                false
            },
            |slot| {
                trace!("Completing {key:?} (op #{})", slot.id);
                slot.resolve(r);
                true
            },
        )
    }

    /// Fails every pending operation whose key satisfies `pred`. Each one is
    /// resolved exactly once. Returns the number of operations failed.
    pub fn fail_where(&self, pred: impl Fn(&K) -> bool, err: impl Fn(&K) -> Error) -> usize {
        let failed: Vec<(K, Slot<T>)> = {
            let mut s = self.slots.lock();
            let keys: Vec<K> = s.map.keys().filter(|k| pred(k)).cloned().collect();
            (keys.into_iter())
                .filter_map(|k| s.map.remove(&k).map(|slot| (k, slot)))
                .collect()
        };
        let n = failed.len();
        for (k, slot) in failed {
            let e = err(&k);
            debug!("Failing {k:?} (op #{}): {e}", slot.id);
            slot.resolve(Err(e));
        }
        n
    }

    /// Fails every pending operation.
    #[inline]
    pub fn fail_all(&self, err: impl Fn(&K) -> Error) -> usize {
        self.fail_where(|_| true, err)
    }

    /// Returns whether an operation is pending for `key`.
    #[cfg(test)]
    #[inline]
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.slots.lock().map.contains_key(key)
    }

    /// Returns the number of pending operations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().map.len()
    }

    /// Removes the slot for `key` if it still belongs to operation `id`.
    fn detach(&self, key: &K, id: u64) {
        let mut s = self.slots.lock();
        if s.map.get(key).map_or(false, |slot| slot.id == id) {
            s.map.remove(key);
            trace!("Detached {key:?} (op #{id})");
        }
    }
}

/// Waiter side of a pending operation. Dropping the handle detaches it from
/// the broker without affecting any newer operation under the same key.
#[derive(Debug)]
#[must_use]
pub(crate) struct Handle<K: Key, T> {
    broker: Broker<K, T>,
    key: K,
    id: u64,
    rx: Option<oneshot::Receiver<Result<T>>>,
    ct: CancellationToken,
    deadline: Instant,
}

impl<K: Key, T> Handle<K, T> {
    /// Returns the token that cancels this operation's wait.
    #[cfg(test)]
    #[inline(always)]
    pub const fn token(&self) -> &CancellationToken {
        &self.ct
    }

    /// Waits for the operation result, a timeout, or cancellation.
    pub async fn wait(mut self) -> Result<T> {
        let Some(mut rx) = self.rx.take() else {
            return Err(Error::OperationCancelled);
        };
        let r = tokio::select! {
            biased;
            r = &mut rx => r.unwrap_or(Err(Error::OperationCancelled)),
            _ = self.ct.cancelled() => Err(Error::OperationCancelled),
            _ = tokio::time::sleep_until(self.deadline) => {
                debug!("{:?} (op #{}) timed out", self.key, self.id);
                Err(Error::OperationTimedOut(self.key.kind()))
            }
        };
        self.broker.detach(&self.key, self.id);
        r
    }
}

impl<K: Key, T> Drop for Handle<K, T> {
    #[inline]
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.broker.detach(&self.key, self.id);
        }
    }
}
