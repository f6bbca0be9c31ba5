//! OCC Processor: retry-and-rebuild around contended account writes
//!
//! Account balances are the only contended rows in the engine. Instead of
//! locking them (which would serialize unrelated transactions across the
//! whole ledger), every unit of work reads account rows at some version and
//! the commit fails with a stale-version error if anything moved underneath.
//! Collisions are expected and cheap; the recovery is to rebuild the whole
//! unit from scratch (re-reading accounts) and try again.
//!
//! The processor drives that loop:
//! 1. run one freshly built attempt
//! 2. on a stale-version failure, notify the caller (so the per-attempt
//!    error record lands on the command without a status transition), sleep
//!    a short increasing backoff, and rebuild
//! 3. after `max_occ_retries` consecutive collisions, surface
//!    [`OccError::Exhausted`]; the dispatcher turns that into the
//!    `occ_timeout` queue transition (or a validation result in
//!    no-save-on-error mode)
//!
//! Non-collision failures pass through untouched on the first occurrence;
//! the retry budget is spent on collisions only.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::OccConfig;
use crate::storage::MultiError;

#[derive(Error, Debug)]
pub enum OccError {
    /// Display form is the message recorded on the queue item.
    #[error("OCC conflict: Max number of {attempts} retries reached")]
    Exhausted { attempts: u32 },

    #[error(transparent)]
    Failed(#[from] MultiError),
}

pub struct OccProcessor {
    config: OccConfig,
}

impl OccProcessor {
    pub fn new(config: OccConfig) -> Self {
        OccProcessor { config }
    }

    /// Run `attempt` until it succeeds, fails for a non-OCC reason, or the
    /// collision budget is spent. `attempt` must rebuild its unit of work on
    /// every call; `on_collision` is invoked once per stale-version failure
    /// with the 1-based attempt number.
    pub async fn execute<A, C>(&self, mut attempt: A, mut on_collision: C) -> Result<(), OccError>
    where
        A: FnMut() -> Result<(), MultiError>,
        C: FnMut(u32, &MultiError),
    {
        let max_attempts = self.config.max_occ_retries.max(1);
        for attempt_number in 1..=max_attempts {
            match attempt() {
                Ok(()) => return Ok(()),
                Err(error) if error.error.is_occ_collision() => {
                    debug!(
                        "OCC collision on attempt {} of {}: {}",
                        attempt_number, max_attempts, error
                    );
                    on_collision(attempt_number, &error);
                    if attempt_number < max_attempts {
                        tokio::time::sleep(self.collision_backoff(attempt_number)).await;
                    }
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(OccError::Exhausted {
            attempts: max_attempts,
        })
    }

    /// Run a single attempt with no retry loop, for handlers that never
    /// touch contended rows.
    pub fn execute_once<A>(&self, mut attempt: A) -> Result<(), OccError>
    where
        A: FnMut() -> Result<(), MultiError>,
    {
        attempt().map_err(OccError::from)
    }

    // Linearly increasing with jitter; collisions resolve in milliseconds,
    // so anything exponential would overshoot immediately
    fn collision_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.saturating_mul(attempt as u64);
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base / 2)
        };
        Duration::from_millis(base + jitter)
    }
}
