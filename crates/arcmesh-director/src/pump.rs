//! Background pump loops.
//!
//! Pumping is a non-blocking drain; something has to call it on an
//! interval. [`spawn_pump_loop`] does, and also wakes early whenever the
//! target's notifier fires (a message landed in its inbox).

use std::sync::Arc;
use std::time::Instant as StdInstant;

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::{Director, DirectorKind, PumpConfig, Router};

/// Something a pump loop can drive.
pub trait Pump: Send + Sync + 'static {
    /// One drain cycle. Returns the number of messages handled.
    fn pump(&self) -> usize;

    /// Fired when there is work; lets the loop react before the next tick.
    fn wakeup(&self) -> Option<Arc<Notify>> {
        None
    }

    /// Name used in logs.
    fn label(&self) -> String;
}

impl Pump for Director {
    /// A root drains its whole tree; anything else drains itself.
    fn pump(&self) -> usize {
        match self.kind() {
            Some(DirectorKind::Root) => self.pump_tree(),
            Some(_) => Director::pump(self),
            None => 0,
        }
    }

    fn wakeup(&self) -> Option<Arc<Notify>> {
        Some(self.notifier())
    }

    fn label(&self) -> String {
        self.id().to_string()
    }
}

impl Pump for Arc<Router> {
    fn pump(&self) -> usize {
        Router::pump(self)
    }

    fn wakeup(&self) -> Option<Arc<Notify>> {
        Some(self.director().notifier())
    }

    fn label(&self) -> String {
        format!("router@{}", self.director().id())
    }
}

/// Handle to a running pump loop.
#[derive(Debug)]
pub struct PumpHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PumpHandle {
    /// Stops the loop after its current cycle and waits for it.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Stops the loop without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns a task that pumps `target` every [`PumpConfig::interval`],
/// skipping missed ticks, and logs cycles that exceed the configured
/// share of the interval.
pub fn spawn_pump_loop<P: Pump>(target: P, config: PumpConfig) -> PumpHandle {
    let config = config.validated();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let interval = config.interval();
    let budget = interval.mul_f64(config.budget_warn_threshold);

    let task = tokio::spawn(async move {
        let label = target.label();
        let wakeup = target.wakeup();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(target = %label, interval_ms = config.interval_ms, "pump loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {}
                _ = notified(wakeup.as_deref()) => {}
            }
            let started = StdInstant::now();
            let handled = target.pump();
            let took = started.elapsed();
            if took > budget && handled > 0 {
                warn!(
                    target = %label,
                    handled,
                    took_us = took.as_micros() as u64,
                    budget_us = budget.as_micros() as u64,
                    "pump over budget"
                );
            } else if handled > 0 {
                trace!(target = %label, handled, "pumped");
            }
        }
        debug!(target = %label, "pump loop stopped");
    });

    PumpHandle {
        shutdown: Some(shutdown_tx),
        task,
    }
}

async fn notified(notify: Option<&Notify>) {
    match notify {
        Some(n) => n.notified().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counter(Arc<AtomicUsize>);

    impl Pump for Counter {
        fn pump(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn label(&self) -> String {
            "counter".into()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_loop_ticks_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = spawn_pump_loop(
            Counter(Arc::clone(&count)),
            PumpConfig {
                interval_ms: 10,
                ..PumpConfig::host()
            },
        );
        time::sleep(std::time::Duration::from_millis(55)).await;
        let seen = count.load(Ordering::SeqCst);
        assert!((5..=7).contains(&seen), "ticks: {seen}");

        handle.stop().await;
        let after = count.load(Ordering::SeqCst);
        time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after);
    }
}
