//! Periodic driver.
//!
//! Fires `Engine::reconcile` on a fixed cadence, enforces a per-tick
//! timeout, tolerates overlapping ticks, and shuts down gracefully on
//! SIGINT/SIGTERM. Every spawned tick is registered in a `JoinSet` *before*
//! `tokio::spawn` runs it, so shutdown can always await exactly the set of
//! ticks that were actually started — a task started concurrently with
//! shutdown is never lost track of. On shutdown a `CancellationToken` is
//! cancelled first, so ticks still in flight observe cancellation and stop
//! at their next await point instead of running to completion.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vaultkeeper_engine::Engine;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

pub struct DriverConfig {
    pub repeat_interval: Duration,
    pub operation_timeout: Duration,
}

pub struct Driver {
    engine: Arc<Engine>,
    config: DriverConfig,
}

impl Driver {
    pub fn new(engine: Arc<Engine>, config: DriverConfig) -> Self {
        Self { engine, config }
    }

    /// Run until an interruption signal arrives, then await every
    /// in-flight tick before returning.
    pub async fn run(self) -> Result<(), DriverError> {
        let mut ticker = tokio::time::interval(self.config.repeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let shutdown = CancellationToken::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            tokio::select! {
                _ = ticker.tick() => {
                    let engine = self.engine.clone();
                    let timeout = self.config.operation_timeout;
                    let cancelled = shutdown.clone();
                    in_flight.spawn(async move {
                        tokio::select! {
                            _ = cancelled.cancelled() => {
                                tracing::info!("reconcile tick cancelled by shutdown");
                            }
                            result = tokio::time::timeout(timeout, engine.reconcile()) => {
                                match result {
                                    Ok(Ok(())) => {}
                                    Ok(Err(e)) => tracing::error!(error = %e, "reconcile tick failed"),
                                    Err(_) => tracing::error!("reconcile tick exceeded operation timeout"),
                                }
                            }
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received interrupt signal, shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = terminate.recv() => {
                    tracing::info!("received terminate signal, shutting down");
                    shutdown.cancel();
                    break;
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn join_set_tracks_tasks_registered_before_spawn() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set: JoinSet<()> = JoinSet::new();

        for _ in 0..3 {
            let counter = counter.clone();
            set.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        while set.join_next().await.is_some() {}
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelling_the_token_stops_a_tick_before_it_finishes() {
        let reached_end = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let cancelled = shutdown.clone();
        let marker = reached_end.clone();
        let mut set: JoinSet<()> = JoinSet::new();
        set.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                    marker.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        shutdown.cancel();
        while set.join_next().await.is_some() {}
        assert_eq!(reached_end.load(Ordering::SeqCst), 0);
    }
}
