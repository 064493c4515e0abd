use serde::{Deserialize, Serialize};

use crate::error::SyncFault;

/// Phase of a single sync run (one generation).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncPhase {
    /// No loop running for this generation yet.
    Idle,
    /// Loading token/filter and negotiating a filter if needed.
    Bootstrapping,
    /// Awaiting one long-poll response.
    Polling,
    /// Token persisted, batch being handed to the processor.
    Delivering,
    /// Superseded, cancelled, or failed. Terminal for this generation.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SyncStateMachine {
    generation: u64,
    phase: SyncPhase,
}

impl SyncStateMachine {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            phase: SyncPhase::Idle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == SyncPhase::Stopped
    }

    /// Move to `next`, rejecting edges the sync loop never takes.
    ///
    /// `Polling -> Polling` is the retry edge after a failed exchange.
    pub fn advance(&mut self, next: SyncPhase) -> Result<SyncPhase, SyncFault> {
        use SyncPhase::*;

        let allowed = match (self.phase, next) {
            (Idle, Bootstrapping) => true,
            (Bootstrapping, Polling) => true,
            (Polling, Polling | Delivering) => true,
            (Delivering, Polling) => true,
            (Stopped, _) => false,
            (_, Stopped) => true,
            _ => false,
        };

        if !allowed {
            return Err(SyncFault::invalid_transition(self.phase, next));
        }

        let previous = self.phase;
        self.phase = next;
        Ok(previous)
    }

    /// Enter the terminal phase. Idempotent.
    pub fn stop(&mut self) {
        self.phase = SyncPhase::Stopped;
    }
}
