//! Periodic driver around [`BackupManager`].
//!
//! `start` runs one cycle straight away and then spawns a loop that sleeps
//! for the configured interval between cycles. Each cycle runs on the
//! blocking pool. `stop` cancels the loop and waits a bounded time for an
//! in-flight cycle to finish; a cycle still running after that is left to
//! complete on its own.

use super::error::BackupError;
use super::manager::{BackupManager, BackupStatus, CycleReport, SchedulerStats};
use crate::config::BackupConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One backup cycle, run on the blocking pool.
type CycleFn = Arc<dyn Fn(&BackupManager) -> Result<CycleReport, BackupError> + Send + Sync>;

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BackupScheduler {
    manager: Arc<BackupManager>,
    cycle: CycleFn,
    /// Present while the loop is running.
    lifecycle: Mutex<Option<RunningLoop>>,
    /// Written only by `start` and `stop`.
    running: AtomicBool,
}

impl BackupScheduler {
    pub fn new(config: BackupConfig) -> Result<Self, BackupError> {
        Ok(Self::with_manager(Arc::new(BackupManager::new(config)?)))
    }

    pub fn with_manager(manager: Arc<BackupManager>) -> Self {
        Self::with_cycle(manager, |manager: &BackupManager| manager.backup_now())
    }

    fn with_cycle<F>(manager: Arc<BackupManager>, cycle: F) -> Self
    where
        F: Fn(&BackupManager) -> Result<CycleReport, BackupError> + Send + Sync + 'static,
    {
        Self {
            manager,
            cycle: Arc::new(cycle),
            lifecycle: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn manager(&self) -> &Arc<BackupManager> {
        &self.manager
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.manager.stats()
    }

    pub async fn status(&self) -> BackupStatus {
        let manager = Arc::clone(&self.manager);
        let running = self.is_running();
        match tokio::task::spawn_blocking(move || manager.status(running)).await {
            Ok(status) => status,
            Err(e) => {
                error!("Status task failed: {}", e);
                self.manager.status(running)
            }
        }
    }

    /// Starts periodic backups. Returns `false` if already running.
    ///
    /// The first cycle completes before this returns; its failure is logged
    /// and counted but does not prevent the loop from starting.
    pub async fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            warn!("Backup scheduler is already running");
            return false;
        }

        let config = self.manager.config();
        info!(
            "Starting backup scheduler (every {}s, keeping {} snapshots)",
            config.interval_secs, config.max_backups
        );

        run_cycle(&self.manager, &self.cycle).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.manager),
            Arc::clone(&self.cycle),
            cancel.clone(),
        ));
        self.running.store(true, Ordering::SeqCst);
        *lifecycle = Some(RunningLoop { cancel, handle });
        true
    }

    /// Stops periodic backups. Returns `false` if not running.
    pub async fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running_loop) = lifecycle.take() else {
            warn!("Backup scheduler is not running");
            return false;
        };

        info!("Stopping backup scheduler...");
        self.running.store(false, Ordering::SeqCst);
        running_loop.cancel.cancel();

        let timeout = self.manager.config().stop_timeout();
        match tokio::time::timeout(timeout, running_loop.handle).await {
            Ok(Ok(())) => info!("Backup scheduler stopped"),
            Ok(Err(e)) => error!("Backup loop ended abnormally: {}", e),
            Err(_) => warn!(
                "Backup cycle still running after {:?}, leaving it to finish",
                timeout
            ),
        }
        true
    }
}

/// Runs one cycle on the blocking pool. Returns `false` if the cycle
/// panicked instead of reporting a result.
async fn run_cycle(manager: &Arc<BackupManager>, cycle: &CycleFn) -> bool {
    let worker = Arc::clone(manager);
    let cycle = Arc::clone(cycle);
    match tokio::task::spawn_blocking(move || cycle(worker.as_ref())).await {
        Ok(Ok(report)) => {
            debug!(
                "Cycle {} finished, {} old files pruned",
                report.timestamp, report.pruned
            );
            true
        }
        // already logged and counted by the manager
        Ok(Err(_)) => true,
        Err(e) => {
            manager.record_unexpected_failure();
            error!("Backup cycle panicked: {}", e);
            false
        }
    }
}

async fn run_loop(manager: Arc<BackupManager>, cycle: CycleFn, cancel: CancellationToken) {
    let interval = manager.config().interval();
    let cooldown = manager.config().retry_cooldown();
    let mut wait = interval;

    loop {
        debug!("Next backup cycle in {:?}", wait);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        wait = if run_cycle(&manager, &cycle).await {
            interval
        } else {
            warn!("Cooling down for {:?} before the next cycle", cooldown);
            cooldown
        };
    }

    debug!("Backup loop exited");
}
