use std::collections::HashMap;
use std::mem;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::commands::{Command, CommandError};
use crate::frame::Frame;
use crate::mutation_log::MutationLog;
use crate::store::{LockError, Store, StoreGuard};

/// Per connection execution context. Runs commands against the store one atomic section at a
/// time and keeps the transaction state: the commands queued since MULTI and the revisions
/// of the watched keys.
///
/// A session belongs to one connection and is never shared.
pub struct Session {
    store: Store,
    log: MutationLog,
    cancel: CancellationToken,
    lock_timeout: Duration,

    queued: Vec<Command>,
    watches: HashMap<String, u64>,
    in_transaction: bool,
}

impl Session {
    pub fn new(
        store: Store,
        log: MutationLog,
        cancel: CancellationToken,
        lock_timeout: Duration,
    ) -> Session {
        Session {
            store,
            log,
            cancel,
            lock_timeout,
            queued: Vec::new(),
            watches: HashMap::new(),
            in_transaction: false,
        }
    }

    /// Runs one client command. Transaction control runs right away. Inside MULTI anything
    /// else is queued and answered with QUEUED, outside it runs in its own atomic section.
    ///
    /// Errors for which `is_fatal` holds mean the session can not go on.
    pub async fn run(&mut self, command: Command) -> Result<Frame, CommandError> {
        match command {
            Command::Multi(cmd) => cmd.exec(self),
            Command::Exec(cmd) => cmd.exec(self).await,
            Command::Discard(cmd) => cmd.exec(self),
            Command::Watch(cmd) => cmd.exec(self).await,
            Command::Unwatch(cmd) => cmd.exec(self),

            command if self.in_transaction => {
                debug!(command = command.name(), "queued");
                self.queued.push(command);
                Ok(Frame::Simple("QUEUED".to_string()))
            }
            command => {
                let mut store = self.lock().await?;
                self.apply(&mut store, &command).await
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn queued(&self) -> &[Command] {
        &self.queued
    }

    pub fn is_watching(&self, key: &str) -> bool {
        self.watches.contains_key(key)
    }

    pub fn start_tx(&mut self) -> Result<Frame, CommandError> {
        if self.in_transaction {
            return Err(CommandError::NestedMulti);
        }

        self.in_transaction = true;
        Ok(Frame::ok())
    }

    /// Runs the queued commands under a single hold of the exclusivity token. Nothing runs
    /// when a watched key was written since it was watched, the reply is then a null array.
    ///
    /// The session is back to idle afterwards, whatever the outcome.
    pub async fn exec_tx(&mut self) -> Result<Frame, CommandError> {
        if !self.in_transaction {
            return Err(CommandError::ExecWithoutMulti);
        }

        let queued = mem::take(&mut self.queued);
        let watches = mem::take(&mut self.watches);
        self.in_transaction = false;

        let mut store = self.lock().await?;

        for (key, revision) in &watches {
            if store.revision(key) != *revision {
                debug!(key = %key, "watched key changed, transaction aborted");
                return Ok(Frame::NullArray);
            }
        }

        let mut results = Vec::with_capacity(queued.len());
        for command in &queued {
            match self.apply(&mut store, command).await {
                Ok(frame) => results.push(frame),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    return Err(CommandError::ExecAborted {
                        partial: results,
                        source: Box::new(err),
                    })
                }
            }
        }

        Ok(Frame::Array(results))
    }

    pub fn discard_tx(&mut self) -> Result<Frame, CommandError> {
        if !self.in_transaction {
            return Err(CommandError::DiscardWithoutMulti);
        }

        self.queued.clear();
        self.watches.clear();
        self.in_transaction = false;
        Ok(Frame::ok())
    }

    /// Records the current revision of every key, 0 for a missing one. A key that is already
    /// watched keeps the revision seen first.
    pub async fn watch(&mut self, keys: &[String]) -> Result<Frame, CommandError> {
        let mut store = self.lock().await?;

        for key in keys {
            if !self.watches.contains_key(key) {
                let revision = store.revision(key);
                self.watches.insert(key.clone(), revision);
            }
        }

        Ok(Frame::ok())
    }

    pub fn unwatch(&mut self) {
        self.watches.clear();
    }

    async fn lock(&self) -> Result<StoreGuard, CommandError> {
        match tokio::time::timeout(self.lock_timeout, self.store.lock(&self.cancel)).await {
            Ok(guard) => Ok(guard?),
            Err(_) => Err(LockError::Timeout.into()),
        }
    }

    /// Executes `command` and, when it changed the store, appends it to the mutation log
    /// while the token is still held.
    async fn apply(&self, store: &mut StoreGuard, command: &Command) -> Result<Frame, CommandError> {
        let executable = command
            .executable()
            .ok_or_else(|| CommandError::NotExecutable(command.name().to_string()))?;

        let res = executable.exec(store)?;

        if executable.is_modifying() {
            self.log.append(vec![command.wire_args()], &self.cancel).await?;
        }

        Ok(res)
    }
}

/// Hands out sessions bound to one store and one mutation log.
#[derive(Clone)]
pub struct SessionFactory {
    store: Store,
    log: MutationLog,
    lock_timeout: Duration,
}

impl SessionFactory {
    pub fn new(store: Store, log: MutationLog, lock_timeout: Duration) -> SessionFactory {
        SessionFactory {
            store,
            log,
            lock_timeout,
        }
    }

    /// A fresh idle session. Waits inside it are abandoned once `cancel` fires.
    pub fn create(&self, cancel: CancellationToken) -> Session {
        Session::new(
            self.store.clone(),
            self.log.clone(),
            cancel,
            self.lock_timeout,
        )
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn mutation_log(&self) -> &MutationLog {
        &self.log
    }
}
