use sqlx::SqlitePool;
use std::sync::Arc;

/// Durable store for job rows. The queue manager is the only writer; the
/// in-memory queues are an accelerator over this table, never the source of
/// truth.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pub(super) pool: Arc<SqlitePool>,
}

impl JobRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn get_pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }
}
