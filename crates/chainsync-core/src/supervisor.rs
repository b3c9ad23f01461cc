//! Crash-only supervision of the index loop.
//!
//! The scheduler keeps nothing in memory worth saving: its position lives in
//! the cursor store and its tip is re-queried on startup. The supervisor
//! leans on that. Whatever escapes `BatchScheduler::run`, it waits out a
//! backoff delay and starts the loop again from scratch, exactly as a
//! process restart would.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cursor::CursorStore;
use crate::scheduler::BatchScheduler;
use crate::source::{BlockFetcher, TipOracle};

/// What the supervisor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    /// The scheduler is running.
    Running,
    /// The scheduler failed; waiting out the restart delay.
    Backoff,
    /// Delay elapsed; about to start the scheduler again.
    Restarting,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Backoff => write!(f, "backoff"),
            Self::Restarting => write!(f, "restarting"),
        }
    }
}

/// Strategy for how long to wait before the next restart.
pub trait BackoffPolicy: Send + Sync {
    /// Delay before the `attempt`-th restart (1-based).
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// Capped exponential backoff without an attempt limit.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first restart.
    pub initial_delay: Duration,
    /// Ceiling the delay growth stops at.
    pub max_delay: Duration,
    /// Multiplier applied per additional failure.
    pub multiplier: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(base_ms.min(cap_ms) as u64)
    }
}

/// Restarts a scheduler with backoff until the process dies.
pub struct Supervisor<C: TipOracle + BlockFetcher, S: CursorStore> {
    scheduler: BatchScheduler<C, S>,
    backoff: Box<dyn BackoffPolicy>,
    state: SupervisorState,
}

impl<C: TipOracle + BlockFetcher, S: CursorStore> Supervisor<C, S> {
    pub fn new(scheduler: BatchScheduler<C, S>, backoff: Box<dyn BackoffPolicy>) -> Self {
        Self {
            scheduler,
            backoff,
            state: SupervisorState::Running,
        }
    }

    /// Current position in the restart cycle.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Run the scheduler forever, restarting it after every failure.
    ///
    /// Each restart re-reads the cursor and re-queries the tip, the same
    /// path a process restart takes. The attempt counter never resets
    /// because the loop has no success event to reset it on; after enough
    /// failures the delay simply sits at the ceiling.
    pub async fn run(&mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.state = SupervisorState::Running;
            let err = match self.scheduler.run().await {
                Ok(()) => {
                    tracing::info!(indexer = %self.scheduler.name(), "Index loop exited");
                    return;
                }
                Err(err) => err,
            };

            attempt = attempt.saturating_add(1);
            let delay = self.backoff.delay_for(attempt);
            self.state = SupervisorState::Backoff;
            tracing::error!(
                indexer = %self.scheduler.name(),
                error = %err,
                retryable = err.is_retryable(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Index loop failed, backing off"
            );

            tokio::time::sleep(delay).await;
            self.state = SupervisorState::Restarting;
            tracing::info!(
                indexer = %self.scheduler.name(),
                state = %self.state,
                attempt,
                "Restarting index loop"
            );
        }
    }
}
