use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::error::AppResult;
use crate::jobs::dispatcher::JobDispatcher;
use crate::jobs::queue::QueueManager;
use crate::models::StageQueue;

/// Interval for the stale-reset and retention-pruning maintenance pass.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// How long an idle worker sleeps before checking its queue again.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Per-poll cap on jobs pulled from the database into memory per queue.
const POLL_BATCH: u32 = 50;

/// Drives the engine: restores persisted work at startup, polls the jobs
/// table for due work (retries whose backoff elapsed, jobs enqueued by a
/// previous run), and runs one worker pool per stage queue sized to that
/// queue's concurrency limit.
pub struct JobScheduler {
    queue_manager: Arc<QueueManager>,
    dispatcher: Arc<JobDispatcher>,
    config: Arc<EngineConfig>,
    shutdown_tx: watch::Sender<bool>,
}

impl JobScheduler {
    pub fn new(
        queue_manager: Arc<QueueManager>,
        dispatcher: Arc<JobDispatcher>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { queue_manager, dispatcher, config, shutdown_tx }
    }

    /// Startup recovery: return abandoned running rows to the queue, then
    /// load every queued row into memory so work resumes without waiting for
    /// the first poll.
    pub async fn recover(&self) -> AppResult<usize> {
        let repository = self.queue_manager.repository();

        repository
            .reset_stale_running(self.config.stale_running_threshold_secs)
            .await?;

        let queued = repository.get_queued_jobs().await?;
        let mut restored = 0usize;
        for job in queued {
            if self.queue_manager.offer(job).await? {
                restored += 1;
            }
        }

        info!("Recovered {restored} persisted job(s) into memory");
        Ok(restored)
    }

    /// Spawn the poll loop, the maintenance loop, and the per-queue worker
    /// pools. Returns immediately; the tasks run until `shutdown`.
    pub fn start(&self) {
        self.spawn_poll_loop();
        self.spawn_maintenance_loop();

        for queue in StageQueue::all() {
            let workers = self.config.queue_settings(queue).concurrency;
            for worker_index in 0..workers {
                self.spawn_worker(queue, worker_index);
            }
        }

        info!("Scheduler started");
    }

    /// Signal every loop to stop and close the in-memory queues. Jobs caught
    /// mid-run finish their current attempt; anything still `running` after
    /// a hard kill is returned by the next startup's stale reset.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down");
        let _ = self.shutdown_tx.send(true);
        self.queue_manager.shutdown().await;
    }

    fn spawn_poll_loop(&self) {
        let queue_manager = self.queue_manager.clone();
        let interval = Duration::from_millis(self.config.db_poll_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => break,
                }

                for queue in StageQueue::all() {
                    let due = match queue_manager.repository().get_due_jobs(queue, POLL_BATCH).await
                    {
                        Ok(due) => due,
                        Err(e) => {
                            error!("Database poll failed for {queue}: {e}");
                            continue;
                        }
                    };

                    for job in due {
                        match queue_manager.offer(job).await {
                            Ok(true) => debug!("Poll offered a due job to {queue}"),
                            Ok(false) => {}
                            Err(e) => error!("Failed to offer due job to {queue}: {e}"),
                        }
                    }
                }
            }
            debug!("Poll loop stopped");
        });
    }

    fn spawn_maintenance_loop(&self) {
        let queue_manager = self.queue_manager.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {}
                    _ = shutdown_rx.changed() => break,
                }

                let repository = queue_manager.repository();
                if let Err(e) = repository
                    .reset_stale_running(config.stale_running_threshold_secs)
                    .await
                {
                    error!("Stale-job reset failed: {e}");
                }
                if let Err(e) = repository
                    .prune_finished_jobs(config.finished_jobs_retained_per_queue)
                    .await
                {
                    error!("Retention pruning failed: {e}");
                }
            }
            debug!("Maintenance loop stopped");
        });
    }

    fn spawn_worker(&self, queue: StageQueue, worker_index: usize) {
        let queue_manager = self.queue_manager.clone();
        let dispatcher = self.dispatcher.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("Worker {queue}#{worker_index} started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let Some(permit) = queue_manager.acquire_permit(queue).await else {
                    break;
                };

                match queue_manager.dequeue(queue).await {
                    Some(job) => {
                        let job_id = job.id.clone();
                        if let Err(e) = dispatcher.dispatch(job).await {
                            error!("Dispatch of job {job_id} failed: {e}");
                        }
                        drop(permit);
                    }
                    None => {
                        drop(permit);
                        tokio::select! {
                            _ = tokio::time::sleep(IDLE_WAIT) => {}
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                }
            }
            debug!("Worker {queue}#{worker_index} stopped");
        });
    }
}
