use std::sync::{Arc, Mutex, PoisonError};

use mxsync_core::{ErrorCategory, SyncFault, SyncParams, SyncPhase, SyncStateMachine};
use mxsync_store::{StoreError, TokenStore};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{client::Client, error::ClientError};

/// Counter that identifies the canonical sync run of one [`Client`].
///
/// Bumped when a run starts and on [`Client::stop_sync`]; a run whose
/// captured value no longer matches has been superseded.
#[derive(Debug, Default)]
pub struct SyncGeneration {
    current: Mutex<u64>,
}

impl SyncGeneration {
    /// Increment and return the new value.
    pub fn advance(&self) -> u64 {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = current.wrapping_add(1);
        *current
    }

    pub fn current(&self) -> u64 {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How a sync run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A newer run started or [`Client::stop_sync`] was called.
    Superseded,
    /// The caller's cancellation token fired.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync bootstrap failed: {0}")]
    Bootstrap(#[source] ClientError),
    #[error("token store failed: {0}")]
    Store(#[from] StoreError),
    #[error("sync processor ended the run: {0}")]
    Processor(#[source] SyncFault),
    #[error("cannot sync without a user id")]
    MissingUserId,
    #[error("sync run broke its phase order: {0}")]
    InvalidTransition(#[source] SyncFault),
}

impl SyncError {
    pub fn to_fault(&self) -> SyncFault {
        match self {
            SyncError::Bootstrap(err) => err.to_fault(),
            SyncError::Store(err) => {
                SyncFault::new(ErrorCategory::Storage, "token_store_error", err.to_string())
            }
            SyncError::Processor(fault) | SyncError::InvalidTransition(fault) => fault.clone(),
            SyncError::MissingUserId => {
                SyncFault::new(ErrorCategory::Config, "missing_user_id", self.to_string())
            }
        }
    }
}

impl Client {
    /// Run the long-poll loop until it is superseded, cancelled, or fails.
    ///
    /// Starting a run supersedes any run already in progress on this client.
    /// Each received `next_batch` is saved to the token store before the batch
    /// is handed to the processor; a superseded run still saves the token of
    /// the poll it completed but never delivers that batch.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let generation = self.generation.advance();
        let mut machine = SyncStateMachine::new(generation);
        info!(generation, "sync run starting");

        let result = self.run_sync(&mut machine, cancel).await;
        machine.stop();

        match &result {
            Ok(outcome) => info!(generation, ?outcome, "sync run ended"),
            Err(err) => warn!(generation, error = %err, "sync run failed"),
        }
        result
    }

    /// Supersede the current sync run, if any.
    ///
    /// The in-flight poll is not aborted; its result is discarded when it
    /// completes. Use the run's [`CancellationToken`] to abort immediately.
    pub fn stop_sync(&self) {
        let generation = self.generation.advance();
        debug!(generation, "sync generation advanced by stop");
    }

    pub fn sync_generation(&self) -> u64 {
        self.generation.current()
    }

    fn is_superseded(&self, machine: &SyncStateMachine) -> bool {
        self.generation.current() != machine.generation()
    }

    async fn run_sync(
        &self,
        machine: &mut SyncStateMachine,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        advance(machine, SyncPhase::Bootstrapping)?;

        let user_id = self
            .user_id()
            .filter(|user_id| !user_id.is_empty())
            .ok_or(SyncError::MissingUserId)?;

        let owner = user_id.clone();
        let mut since = self
            .store_op(move |store| store.load_next_batch(&owner))
            .await?
            .filter(|token| !token.is_empty());
        let owner = user_id.clone();
        let stored_filter = self
            .store_op(move |store| store.load_filter_id(&owner))
            .await?
            .filter(|filter| !filter.is_empty());

        let filter_id = match stored_filter {
            Some(filter_id) => filter_id,
            None => {
                let definition = self.processor.filter_spec(&user_id);
                let created = tokio::select! {
                    _ = cancel.cancelled() => return Ok(SyncOutcome::Cancelled),
                    created = self.create_filter(&user_id, &definition) => {
                        created.map_err(SyncError::Bootstrap)?
                    }
                };
                let (owner, filter_id) = (user_id.clone(), created.filter_id.clone());
                self.store_op(move |store| store.save_filter_id(&owner, &filter_id))
                    .await?;
                debug!(%user_id, filter_id = %created.filter_id, "sync filter created");
                created.filter_id
            }
        };

        advance(machine, SyncPhase::Polling)?;

        loop {
            let params = SyncParams {
                timeout_ms: self.config().sync_timeout.as_millis() as u64,
                since: since.clone(),
                filter_id: Some(filter_id.clone()),
                full_state: self.config().full_state,
                set_presence: self.config().set_presence.clone(),
            };

            let polled = tokio::select! {
                _ = cancel.cancelled() => return Ok(SyncOutcome::Cancelled),
                polled = self.sync_request(&params) => polled,
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(err) => {
                    if self.is_superseded(machine) {
                        debug!(error = %err, "dropping failure of superseded sync run");
                        return Ok(SyncOutcome::Superseded);
                    }
                    let delay = self
                        .processor
                        .on_failure(&err)
                        .map_err(SyncError::Processor)?;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(SyncOutcome::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    if self.is_superseded(machine) {
                        return Ok(SyncOutcome::Superseded);
                    }
                    advance(machine, SyncPhase::Polling)?;
                    continue;
                }
            };

            let (owner, token) = (user_id.clone(), batch.next_batch.clone());
            self.store_op(move |store| store.save_next_batch(&owner, &token))
                .await?;
            if self.is_superseded(machine) {
                debug!(
                    generation = machine.generation(),
                    next_batch = %batch.next_batch,
                    "discarding batch of superseded sync run"
                );
                return Ok(SyncOutcome::Superseded);
            }

            advance(machine, SyncPhase::Delivering)?;
            let next_batch = batch.next_batch.clone();
            debug!(
                %next_batch,
                events = batch.event_count(),
                "delivering sync batch"
            );
            self.processor
                .on_batch(batch, since.as_deref())
                .map_err(SyncError::Processor)?;

            since = Some(next_batch).filter(|token| !token.is_empty());
            advance(machine, SyncPhase::Polling)?;
        }
    }
}

impl Client {
    /// Run one token store call on the blocking pool, since a store may do
    /// synchronous file I/O.
    async fn store_op<T, F>(&self, op: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TokenStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|err| StoreError::Backend(format!("store task failed: {err}")))?;
        Ok(result?)
    }
}

fn advance(machine: &mut SyncStateMachine, next: SyncPhase) -> Result<(), SyncError> {
    machine
        .advance(next)
        .map(drop)
        .map_err(SyncError::InvalidTransition)
}
