use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::StageQueue;
use crate::utils::read_env_parsed;

/// Per-queue tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// How many jobs from this queue may run at the same time.
    pub concurrency: usize,
    /// Default attempt budget for jobs on this queue.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
}

/// Engine configuration, loaded once at process start and passed by reference.
///
/// Concurrency is deliberately uneven across queues: AI processing calls a
/// rate-limited remote service and is bounded low; notifications fan out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub queues: HashMap<StageQueue, QueueSettings>,
    /// Minimum identified processes required before SOP generation may run.
    pub min_processes_to_advance: usize,
    /// Timeout for the remote AI analysis call, in seconds.
    pub ai_call_timeout_secs: u64,
    /// Timeout for the document renderer call, in seconds.
    pub render_timeout_secs: u64,
    /// Timeout for the notification sender call, in seconds.
    pub notify_timeout_secs: u64,
    /// Hard cap on a single processor execution, in seconds.
    pub job_timeout_secs: u64,
    /// How often the scheduler polls the database for due jobs, in milliseconds.
    pub db_poll_interval_ms: u64,
    /// Running jobs older than this are considered abandoned and reset at startup.
    pub stale_running_threshold_secs: u64,
    /// How many completed/failed jobs to keep per queue for inspection.
    pub finished_jobs_retained_per_queue: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut queues = HashMap::new();
        queues.insert(
            StageQueue::AiProcessing,
            QueueSettings { concurrency: 2, max_attempts: 3, backoff_base_ms: 30_000 },
        );
        queues.insert(
            StageQueue::SopGeneration,
            QueueSettings { concurrency: 4, max_attempts: 3, backoff_base_ms: 15_000 },
        );
        queues.insert(
            StageQueue::ProposalGeneration,
            QueueSettings { concurrency: 4, max_attempts: 3, backoff_base_ms: 15_000 },
        );
        queues.insert(
            StageQueue::PdfGeneration,
            QueueSettings { concurrency: 3, max_attempts: 3, backoff_base_ms: 10_000 },
        );
        queues.insert(
            StageQueue::Notifications,
            QueueSettings { concurrency: 10, max_attempts: 5, backoff_base_ms: 10_000 },
        );

        Self {
            queues,
            min_processes_to_advance: 5,
            ai_call_timeout_secs: 300,
            render_timeout_secs: 120,
            notify_timeout_secs: 30,
            job_timeout_secs: 600,
            db_poll_interval_ms: 5_000,
            stale_running_threshold_secs: 900,
            finished_jobs_retained_per_queue: 200,
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Env keys follow the pattern `SOPFLOW_<QUEUE>_CONCURRENCY`, e.g.
    /// `SOPFLOW_AI_PROCESSING_CONCURRENCY=1`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        for (queue, settings) in config.queues.iter_mut() {
            let prefix = format!("SOPFLOW_{}", queue.env_key());
            settings.concurrency =
                read_env_parsed(&format!("{prefix}_CONCURRENCY"), settings.concurrency);
            settings.max_attempts =
                read_env_parsed(&format!("{prefix}_MAX_ATTEMPTS"), settings.max_attempts);
            settings.backoff_base_ms =
                read_env_parsed(&format!("{prefix}_BACKOFF_BASE_MS"), settings.backoff_base_ms);
        }

        config.min_processes_to_advance =
            read_env_parsed("SOPFLOW_MIN_PROCESSES", config.min_processes_to_advance);
        config.ai_call_timeout_secs =
            read_env_parsed("SOPFLOW_AI_TIMEOUT_SECS", config.ai_call_timeout_secs);
        config.render_timeout_secs =
            read_env_parsed("SOPFLOW_RENDER_TIMEOUT_SECS", config.render_timeout_secs);
        config.notify_timeout_secs =
            read_env_parsed("SOPFLOW_NOTIFY_TIMEOUT_SECS", config.notify_timeout_secs);
        config.job_timeout_secs =
            read_env_parsed("SOPFLOW_JOB_TIMEOUT_SECS", config.job_timeout_secs);
        config.db_poll_interval_ms =
            read_env_parsed("SOPFLOW_DB_POLL_INTERVAL_MS", config.db_poll_interval_ms);
        config.stale_running_threshold_secs = read_env_parsed(
            "SOPFLOW_STALE_RUNNING_THRESHOLD_SECS",
            config.stale_running_threshold_secs,
        );
        config.finished_jobs_retained_per_queue = read_env_parsed(
            "SOPFLOW_FINISHED_JOBS_RETAINED",
            config.finished_jobs_retained_per_queue,
        );

        config
    }

    pub fn queue_settings(&self, queue: StageQueue) -> QueueSettings {
        self.queues
            .get(&queue)
            .cloned()
            .unwrap_or(QueueSettings { concurrency: 1, max_attempts: 3, backoff_base_ms: 10_000 })
    }
}
