//! Off-critical-path notification delivery.
//!
//! The frame loop hands finalized clips to `NotificationDispatcher::send`,
//! which only enqueues. A single worker thread owns the `Notifier` and makes
//! one delivery attempt per clip; failures are logged and counted, never
//! retried or reported back to the frame loop.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::recording::ClipArtifact;
use crate::transport::{AlertNotification, Notifier};

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Clips seen while notifications are disabled.
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

pub struct NotificationDispatcher {
    tx: Option<Sender<AlertNotification>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    notifier_name: &'static str,
}

impl NotificationDispatcher {
    /// Start a worker thread that delivers through `notifier`.
    pub fn spawn(notifier: Box<dyn Notifier>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let notifier_name = notifier.name();
        let worker_counters = Arc::clone(&counters);
        let worker = std::thread::Builder::new()
            .name(format!("notify-{notifier_name}"))
            .spawn(move || run_worker(notifier, rx, worker_counters))
            .context("failed to spawn notification worker")?;
        log::info!("notifications enabled via {}", notifier_name);
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            counters,
            notifier_name,
        })
    }

    /// Notifications off: clips are checked for existence and dropped.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: None,
            counters: Arc::new(Counters::default()),
            notifier_name: "disabled",
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn notifier_name(&self) -> &'static str {
        self.notifier_name
    }

    /// Enqueue a notification for `artifact`. Never blocks.
    pub fn send(&self, artifact: &ClipArtifact) {
        let Some(tx) = &self.tx else {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            if artifact.path.exists() {
                log::debug!(
                    "notifications disabled; clip {} not sent",
                    artifact.path.display()
                );
            } else {
                log::warn!(
                    "notifications disabled; clip {} does not exist",
                    artifact.path.display()
                );
            }
            return;
        };

        let notification = AlertNotification::from_artifact(artifact);
        match tx.send(notification) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "notification worker gone; alert for {} dropped",
                    artifact.path.display()
                );
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait at most `grace` for in-flight deliveries.
    /// Returns the final stats; undelivered work past the grace is abandoned.
    pub fn shutdown(mut self, grace: Duration) -> DispatchStats {
        self.close(grace);
        self.stats()
    }

    fn close(&mut self, grace: Duration) {
        drop(self.tx.take());
        let Some(worker) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + grace;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "notification worker still busy after {:?}; abandoning pending alerts",
                    grace
                );
                return;
            }
            std::thread::sleep(SHUTDOWN_POLL);
        }
        if worker.join().is_err() {
            log::error!("notification worker panicked");
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.close(Duration::ZERO);
    }
}

fn run_worker(mut notifier: Box<dyn Notifier>, rx: Receiver<AlertNotification>, counters: Arc<Counters>) {
    for notification in rx {
        match notifier.notify(&notification) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "alert sent via {}: {}",
                    notifier.name(),
                    notification.subject()
                );
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "alert delivery via {} failed for {}: {:#}",
                    notifier.name(),
                    notification.clip_path,
                    err
                );
            }
        }
    }
    log::debug!("notification worker stopped");
}
