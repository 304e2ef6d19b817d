use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{
    ArtifactType, CommercialProposal, GeneratedDocument, GeneratedSop, IdentifiedProcess,
    IdentifiedProcessDraft, NotificationRecord, NotificationType,
};
use crate::utils::{get_timestamp, new_id};

/// Persistence for the artifacts each pipeline stage produces: identified
/// processes, SOPs, proposals, rendered documents and notification records.
#[derive(Debug, Clone)]
pub struct StageOutputRepository {
    pool: Arc<SqlitePool>,
}

fn row_to_process(row: &SqliteRow) -> AppResult<IdentifiedProcess> {
    let approved: i64 = row.try_get("approved")?;
    Ok(IdentifiedProcess {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        form_response_id: row.try_get("form_response_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        confidence: row.try_get("confidence")?,
        approved: approved != 0,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_sop(row: &SqliteRow) -> AppResult<GeneratedSop> {
    Ok(GeneratedSop {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        process_id: row.try_get("process_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_proposal(row: &SqliteRow) -> AppResult<CommercialProposal> {
    let sop_ids_json: String = row.try_get("sop_ids")?;
    let sop_ids: Vec<String> = serde_json::from_str(&sop_ids_json)
        .map_err(|e| AppError::DatabaseError(format!("Corrupt sop_ids column: {e}")))?;

    Ok(CommercialProposal {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        sop_ids,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_document(row: &SqliteRow) -> AppResult<GeneratedDocument> {
    let type_str: String = row.try_get("artifact_type")?;
    Ok(GeneratedDocument {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        artifact_type: ArtifactType::from_str(&type_str)
            .map_err(|e| AppError::DatabaseError(format!("Corrupt artifact_type column: {e}")))?,
        artifact_id: row.try_get("artifact_id")?,
        storage_ref: row.try_get("storage_ref")?,
        created_at: row.try_get("created_at")?,
    })
}

impl StageOutputRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Persist the processes the AI analysis identified for one submission.
    pub async fn insert_identified_processes(
        &self,
        client_id: &str,
        form_response_id: &str,
        drafts: &[IdentifiedProcessDraft],
    ) -> AppResult<Vec<IdentifiedProcess>> {
        let now = get_timestamp();
        let mut stored = Vec::with_capacity(drafts.len());

        for draft in drafts {
            let process = IdentifiedProcess {
                id: new_id(),
                client_id: client_id.to_string(),
                form_response_id: form_response_id.to_string(),
                name: draft.name.clone(),
                description: draft.description.clone(),
                confidence: draft.confidence,
                approved: false,
                created_at: now,
            };

            sqlx::query(
                r#"
                INSERT INTO identified_processes (
                    id, client_id, form_response_id, name, description, confidence, approved, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
                "#,
            )
            .bind(&process.id)
            .bind(client_id)
            .bind(form_response_id)
            .bind(&process.name)
            .bind(&process.description)
            .bind(process.confidence)
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to insert process: {e}")))?;

            stored.push(process);
        }

        Ok(stored)
    }

    pub async fn count_identified_processes(&self, client_id: &str) -> AppResult<u32> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM identified_processes WHERE client_id = $1")
            .bind(client_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count processes: {e}")))?;

        let n: i64 = row.try_get("n")?;
        Ok(n as u32)
    }

    pub async fn get_identified_processes(
        &self,
        client_id: &str,
    ) -> AppResult<Vec<IdentifiedProcess>> {
        let rows = sqlx::query(
            "SELECT * FROM identified_processes WHERE client_id = $1 ORDER BY confidence DESC",
        )
        .bind(client_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch processes: {e}")))?;

        rows.iter().map(row_to_process).collect()
    }

    pub async fn insert_sop(
        &self,
        client_id: &str,
        process_id: &str,
        title: &str,
        content: &str,
    ) -> AppResult<GeneratedSop> {
        let now = get_timestamp();
        let sop = GeneratedSop {
            id: new_id(),
            client_id: client_id.to_string(),
            process_id: process_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO generated_sops (id, client_id, process_id, title, content, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&sop.id)
        .bind(client_id)
        .bind(process_id)
        .bind(title)
        .bind(content)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert SOP: {e}")))?;

        Ok(sop)
    }

    pub async fn get_sops(&self, client_id: &str) -> AppResult<Vec<GeneratedSop>> {
        let rows = sqlx::query(
            "SELECT * FROM generated_sops WHERE client_id = $1 ORDER BY created_at ASC",
        )
        .bind(client_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch SOPs: {e}")))?;

        rows.iter().map(row_to_sop).collect()
    }

    pub async fn get_sops_by_ids(&self, sop_ids: &[String]) -> AppResult<Vec<GeneratedSop>> {
        let mut sops = Vec::with_capacity(sop_ids.len());
        for id in sop_ids {
            let row = sqlx::query("SELECT * FROM generated_sops WHERE id = $1")
                .bind(id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to fetch SOP: {e}")))?;

            match row {
                Some(row) => sops.push(row_to_sop(&row)?),
                None => {
                    return Err(AppError::NotFoundError(format!("SOP {id} not found")));
                }
            }
        }
        Ok(sops)
    }

    pub async fn insert_proposal(
        &self,
        client_id: &str,
        title: &str,
        body: &str,
        sop_ids: &[String],
    ) -> AppResult<CommercialProposal> {
        let now = get_timestamp();
        let sop_ids_json = serde_json::to_string(sop_ids)
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize sop ids: {e}")))?;

        let proposal = CommercialProposal {
            id: new_id(),
            client_id: client_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            sop_ids: sop_ids.to_vec(),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO commercial_proposals (id, client_id, title, body, sop_ids, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&proposal.id)
        .bind(client_id)
        .bind(title)
        .bind(body)
        .bind(sop_ids_json)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert proposal: {e}")))?;

        Ok(proposal)
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> AppResult<Option<CommercialProposal>> {
        let row = sqlx::query("SELECT * FROM commercial_proposals WHERE id = $1")
            .bind(proposal_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch proposal: {e}")))?;

        row.as_ref().map(row_to_proposal).transpose()
    }

    pub async fn insert_document(
        &self,
        client_id: &str,
        artifact_type: ArtifactType,
        artifact_id: &str,
        storage_ref: &str,
    ) -> AppResult<GeneratedDocument> {
        let now = get_timestamp();
        let document = GeneratedDocument {
            id: new_id(),
            client_id: client_id.to_string(),
            artifact_type,
            artifact_id: artifact_id.to_string(),
            storage_ref: storage_ref.to_string(),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO generated_documents (id, client_id, artifact_type, artifact_id, storage_ref, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&document.id)
        .bind(client_id)
        .bind(artifact_type.to_string())
        .bind(artifact_id)
        .bind(storage_ref)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert document: {e}")))?;

        Ok(document)
    }

    pub async fn get_documents(&self, client_id: &str) -> AppResult<Vec<GeneratedDocument>> {
        let rows = sqlx::query(
            "SELECT * FROM generated_documents WHERE client_id = $1 ORDER BY created_at ASC",
        )
        .bind(client_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch documents: {e}")))?;

        rows.iter().map(row_to_document).collect()
    }

    pub async fn insert_notification_record(
        &self,
        client_id: &str,
        notification_type: NotificationType,
        channel: &str,
        status: &str,
    ) -> AppResult<NotificationRecord> {
        let now = get_timestamp();
        let record = NotificationRecord {
            id: new_id(),
            client_id: client_id.to_string(),
            notification_type,
            channel: channel.to_string(),
            status: status.to_string(),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO notification_records (id, client_id, notification_type, channel, status, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&record.id)
        .bind(client_id)
        .bind(notification_type.to_string())
        .bind(channel)
        .bind(status)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert notification record: {e}")))?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_utils::connection::test_pool;

    fn drafts(n: usize) -> Vec<IdentifiedProcessDraft> {
        (0..n)
            .map(|i| IdentifiedProcessDraft {
                name: format!("Process {i}"),
                description: "Manual invoice reconciliation".to_string(),
                confidence: 0.5 + (i as f64) * 0.05,
            })
            .collect()
    }

    #[tokio::test]
    async fn processes_persist_and_count() {
        let pool = test_pool().await;
        let repo = StageOutputRepository::new(pool);

        let stored = repo
            .insert_identified_processes("c-1", "fr-1", &drafts(6))
            .await
            .unwrap();
        assert_eq!(stored.len(), 6);
        assert_eq!(repo.count_identified_processes("c-1").await.unwrap(), 6);
        assert_eq!(repo.count_identified_processes("c-other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn proposal_keeps_sop_ids() {
        let pool = test_pool().await;
        let repo = StageOutputRepository::new(pool);

        let sop = repo
            .insert_sop("c-1", "p-1", "Invoice intake", "1. Collect invoices...")
            .await
            .unwrap();
        let proposal = repo
            .insert_proposal("c-1", "Automation proposal", "Dear client...", &[sop.id.clone()])
            .await
            .unwrap();

        let fetched = repo.get_proposal(&proposal.id).await.unwrap().unwrap();
        assert_eq!(fetched.sop_ids, vec![sop.id]);
    }

    #[tokio::test]
    async fn missing_sop_id_is_not_found() {
        let pool = test_pool().await;
        let repo = StageOutputRepository::new(pool);

        let err = repo
            .get_sops_by_ids(&["ghost".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFoundError(_)));
    }
}
