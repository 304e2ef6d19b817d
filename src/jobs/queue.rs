use log::{debug, error, info};
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::config::EngineConfig;
use crate::db_utils::JobRepository;
use crate::error::{AppError, AppResult};
use crate::jobs::types::{EnqueueOptions, Job, JobPayload};
use crate::models::{JobPriority, JobStatus, StageQueue};
use crate::utils::{get_timestamp, new_id};

/// Message sent to one stage queue's actor task.
#[derive(Debug)]
enum QueueMessage {
    /// Offer a job to the in-memory queue. Replies false when a job with the
    /// same id is already held, so the database poll can re-offer freely.
    Offer {
        job: Job,
        response_tx: oneshot::Sender<bool>,
    },
    Dequeue {
        response_tx: oneshot::Sender<Option<Job>>,
    },
    Len {
        response_tx: oneshot::Sender<usize>,
    },
    Shutdown,
}

struct StageQueueHandle {
    tx: mpsc::Sender<QueueMessage>,
    permits: Arc<Semaphore>,
}

/// One manager owning all five stage queues. Every enqueue writes the jobs
/// table first; the in-memory priority queues only accelerate pickup. Lost
/// memory state is rebuilt from the table at startup or by the next poll.
pub struct QueueManager {
    handles: HashMap<StageQueue, StageQueueHandle>,
    repository: JobRepository,
    config: Arc<EngineConfig>,
}

impl QueueManager {
    pub fn new(repository: JobRepository, config: Arc<EngineConfig>) -> Self {
        let mut handles = HashMap::new();

        for queue in StageQueue::all() {
            let settings = config.queue_settings(queue);
            let (tx, rx) = mpsc::channel(256);
            tokio::spawn(StageQueueActor::new(queue, rx).run());

            handles.insert(
                queue,
                StageQueueHandle {
                    tx,
                    permits: Arc::new(Semaphore::new(settings.concurrency)),
                },
            );

            info!(
                "Queue {} ready with {} concurrent slot(s)",
                queue, settings.concurrency
            );
        }

        Self { handles, repository, config }
    }

    pub fn repository(&self) -> &JobRepository {
        &self.repository
    }

    fn handle(&self, queue: StageQueue) -> AppResult<&StageQueueHandle> {
        self.handles
            .get(&queue)
            .ok_or_else(|| AppError::UnknownQueue(queue.queue_name().to_string()))
    }

    /// Enqueue a payload on its stage queue: persist the row, then offer it
    /// to the in-memory queue.
    pub async fn enqueue(&self, payload: JobPayload, options: EnqueueOptions) -> AppResult<Job> {
        let queue = payload.queue();
        let settings = self.config.queue_settings(queue);
        let now = get_timestamp();

        let job = Job {
            id: new_id(),
            queue,
            payload,
            status: JobStatus::Queued,
            priority: options.priority.unwrap_or_default(),
            attempt_count: 0,
            max_attempts: options.max_attempts.unwrap_or(settings.max_attempts),
            process_after: options.delay_ms.map(|delay| now + delay as i64),
            created_at: now,
            started_at: None,
            completed_at: None,
            last_error: None,
            chained_from: options.chained_from,
        };

        self.repository.insert_job(&job).await?;
        self.offer(job.clone()).await?;

        debug!(
            "Enqueued job {} on {} (priority {:?}, max {} attempts)",
            job.id, queue, job.priority, job.max_attempts
        );
        Ok(job)
    }

    /// String-keyed enqueue for callers outside the typed API, e.g. an
    /// administrative re-submission endpoint. An unrecognized queue name is
    /// rejected before anything is written.
    pub async fn enqueue_on(
        &self,
        queue_name: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> AppResult<Job> {
        let queue = StageQueue::from_str(queue_name)
            .map_err(|_| AppError::UnknownQueue(queue_name.to_string()))?;

        if payload.queue() != queue {
            return Err(AppError::ValidationError(format!(
                "Payload belongs on queue {}, not {}",
                payload.queue(),
                queue
            )));
        }

        self.enqueue(payload, options).await
    }

    /// Offer an already-persisted job to its in-memory queue. Used by the
    /// scheduler for startup recovery and the periodic database poll; a job
    /// already held in memory is ignored.
    pub async fn offer(&self, job: Job) -> AppResult<bool> {
        let handle = self.handle(job.queue)?;
        let (response_tx, response_rx) = oneshot::channel();

        handle
            .tx
            .send(QueueMessage::Offer { job, response_tx })
            .await
            .map_err(|_| AppError::JobError("Queue actor is gone".to_string()))?;

        response_rx
            .await
            .map_err(|_| AppError::JobError("Queue actor dropped the reply".to_string()))
    }

    /// Take the next eligible job off one queue, honoring priority order and
    /// `process_after`.
    pub async fn dequeue(&self, queue: StageQueue) -> Option<Job> {
        let handle = match self.handle(queue) {
            Ok(handle) => handle,
            Err(_) => return None,
        };

        let (response_tx, response_rx) = oneshot::channel();
        if handle
            .tx
            .send(QueueMessage::Dequeue { response_tx })
            .await
            .is_err()
        {
            error!("Failed to reach queue actor for {queue}");
            return None;
        }

        response_rx.await.unwrap_or(None)
    }

    /// Acquire one of the queue's concurrency permits. Blocks until a slot
    /// frees up; returns None only during shutdown.
    pub async fn acquire_permit(
        &self,
        queue: StageQueue,
    ) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let handle = self.handle(queue).ok()?;
        handle.permits.clone().acquire_owned().await.ok()
    }

    pub async fn in_memory_len(&self, queue: StageQueue) -> usize {
        let Ok(handle) = self.handle(queue) else { return 0 };
        let (response_tx, response_rx) = oneshot::channel();
        if handle.tx.send(QueueMessage::Len { response_tx }).await.is_err() {
            return 0;
        }
        response_rx.await.unwrap_or(0)
    }

    pub async fn shutdown(&self) {
        for (queue, handle) in &self.handles {
            if handle.tx.send(QueueMessage::Shutdown).await.is_err() {
                debug!("Queue actor for {queue} already stopped");
            }
        }
    }
}

/// Actor owning one stage's in-memory priority queues. Single-threaded by
/// construction, so eligibility scans need no locking.
struct StageQueueActor {
    queue: StageQueue,
    rx: mpsc::Receiver<QueueMessage>,
    by_priority: [VecDeque<Job>; JobPriority::COUNT],
    held_ids: HashSet<String>,
}

impl StageQueueActor {
    fn new(queue: StageQueue, rx: mpsc::Receiver<QueueMessage>) -> Self {
        Self {
            queue,
            rx,
            by_priority: std::array::from_fn(|_| VecDeque::new()),
            held_ids: HashSet::new(),
        }
    }

    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                QueueMessage::Offer { job, response_tx } => {
                    let accepted = self.held_ids.insert(job.id.clone());
                    if accepted {
                        self.by_priority[job.priority as usize].push_back(job);
                    }
                    let _ = response_tx.send(accepted);
                }
                QueueMessage::Dequeue { response_tx } => {
                    let job = self.take_next_eligible();
                    if let Some(ref job) = job {
                        self.held_ids.remove(&job.id);
                        debug!("Dequeued job {} from {}", job.id, self.queue);
                    }
                    let _ = response_tx.send(job);
                }
                QueueMessage::Len { response_tx } => {
                    let _ = response_tx.send(self.held_ids.len());
                }
                QueueMessage::Shutdown => {
                    info!("Shutting down queue {}", self.queue);
                    break;
                }
            }
        }
    }

    /// Highest priority first; within a priority, oldest eligible job wins.
    fn take_next_eligible(&mut self) -> Option<Job> {
        let now = get_timestamp();

        for priority_queue in self.by_priority.iter_mut().rev() {
            let index = priority_queue
                .iter()
                .position(|job| job.process_after.is_none_or(|after| after <= now));
            if let Some(index) = index {
                return priority_queue.remove(index);
            }
        }
        None
    }
}
