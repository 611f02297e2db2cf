use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error as ThisError;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::frame::Frame;

#[derive(Debug, ThisError, PartialEq, Clone)]
pub enum StoreError {
    #[error("ERR key not found")]
    KeyNotFound,
    #[error("ERR key not found: expired")]
    Expired,
}

impl StoreError {
    /// `Expired` is a refinement of `KeyNotFound`, callers looking for a missing key
    /// should treat both alike.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound | StoreError::Expired)
    }
}

#[derive(Debug, ThisError, PartialEq, Clone)]
pub enum LockError {
    #[error("store lock acquisition cancelled")]
    Cancelled,
    #[error("timed out waiting for the store lock")]
    Timeout,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bytes(Bytes),
    Integer(i64),
}

impl Value {
    pub fn to_frame(&self) -> Frame {
        match self {
            Value::Bytes(bytes) => Frame::Bulk(bytes.clone()),
            Value::Integer(i) => Frame::Integer(*i),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// A stored value with its write counter and optional expiration time.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    value: Value,
    revision: u64,
    expires_at: Option<SystemTime>,
}

impl Entry {
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Starts at 1 when the key is created and grows by one on every write.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// The Store maps keys to entries. All access goes through `lock`, which hands out the
/// single exclusivity token: while a `StoreGuard` is alive nobody else can read or write.
///
/// Expiration is lazy, an expired entry is removed by the first read that finds it.
/// The store is cloned cheaply, every clone is a handle to the same data.
#[derive(Clone, Default)]
pub struct Store {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    keys: HashMap<String, Entry>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    /// Waits for the exclusivity token. The wait is abandoned as soon as `cancel` fires.
    pub async fn lock(&self, cancel: &CancellationToken) -> Result<StoreGuard, LockError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LockError::Cancelled),
            state = self.state.clone().lock_owned() => Ok(StoreGuard { state }),
        }
    }
}

/// Exclusive access to the store. The token is released when the guard is dropped.
pub struct StoreGuard {
    state: OwnedMutexGuard<State>,
}

impl StoreGuard {
    pub fn get(&mut self, key: &str) -> Result<Entry, StoreError> {
        let now = SystemTime::now();

        let entry = self
            .state
            .keys
            .get(key)
            .cloned()
            .ok_or(StoreError::KeyNotFound)?;

        if entry.is_expired(now) {
            self.state.keys.remove(key);
            return Err(StoreError::Expired);
        }

        Ok(entry)
    }

    /// Writes `value` under `key` and returns the new entry. An expired entry counts as
    /// absent, so writing over it starts a fresh revision count.
    pub fn set(&mut self, key: String, value: Value, expires_at: Option<SystemTime>) -> Entry {
        let revision = match self.get(&key) {
            Ok(previous) => previous.revision + 1,
            Err(_) => 1,
        };

        let entry = Entry {
            value,
            revision,
            expires_at,
        };
        self.state.keys.insert(key, entry.clone());

        entry
    }

    pub fn del(&mut self, key: &str) -> Result<Entry, StoreError> {
        let entry = self.get(key)?;
        self.state.keys.remove(key);
        Ok(entry)
    }

    /// Current revision of `key`, 0 when it does not exist.
    pub fn revision(&mut self, key: &str) -> u64 {
        self.get(key).map_or(0, |entry| entry.revision)
    }

    pub fn len(&self) -> usize {
        self.state.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.keys.is_empty()
    }
}
