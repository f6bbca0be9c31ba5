//! Worker pool
//!
//! A pool of independent claim-process loops with no affinity: any worker
//! may claim any runnable command. Each loop polls the runnable index, claims
//! one command at a time (claim races resolve inside `process_next`), runs
//! the handler to completion, and goes back for more; an empty poll sleeps
//! for the configured interval.
//!
//! Shutdown is cooperative: flipping the watch channel stops further claims,
//! in-flight handlers finish their current command, and `shutdown()` joins
//! every loop before returning.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::ledger::Ledger;

pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Spawn `config.count` worker loops against the ledger.
pub fn spawn_workers(ledger: Arc<Ledger>, config: &WorkerConfig) -> WorkerPool {
    let (shutdown, _) = watch::channel(false);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    let handles = (0..config.count.max(1))
        .map(|index| {
            let ledger = ledger.clone();
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(worker_loop(index, ledger, poll_interval, shutdown_rx))
        })
        .collect();

    info!("🛠️ Started {} ledger worker(s)", config.count.max(1));
    WorkerPool { shutdown, handles }
}

async fn worker_loop(
    index: usize,
    ledger: Arc<Ledger>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // Stable per-loop identity, stamped on every claim for forensics
    let processor_id = format!("worker-{}-{}", index, &Uuid::new_v4().to_string()[..8]);
    debug!("Worker {} started", processor_id);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Drain everything currently runnable, then sleep
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            match ledger.process_next(&processor_id).await {
                Ok(Some((command_id, outcome))) => {
                    debug!("Worker {} finished {}: {:?}", processor_id, command_id, outcome);
                }
                Ok(None) => break,
                Err(err) => {
                    error!("Worker {} processing error: {}", processor_id, err);
                    break;
                }
            }
        }

        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!("Worker {} stopped", processor_id);
}

impl WorkerPool {
    /// Stop claiming, let in-flight work finish, and join every loop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("🛑 Worker pool drained");
    }
}
