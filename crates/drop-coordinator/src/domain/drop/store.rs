use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use time::OffsetDateTime;

use super::states::DropStatus;
use crate::{
    domain::Error,
    infra::db::{parse_required_blob_json, parse_required_datetime, DbConnection},
};

struct DropRow {
    status: DropStatus,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl FromRow<'_, SqliteRow> for DropRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(DropRow {
            status: parse_required_blob_json(row, "state")?,
            created_at: parse_required_datetime(row, "created_at")?,
            updated_at: parse_required_datetime(row, "updated_at")?,
        })
    }
}

/// Entry in the Drops Index: a lightweight, listable projection kept
/// separate from the full drop row so enumerating live drops never has to
/// deserialize `participant_tickets`/`participant_multipliers` maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropIndexEntry {
    pub drop_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_end: OffsetDateTime,
    pub purchase_window_secs: u64,
}

impl FromRow<'_, SqliteRow> for DropIndexEntry {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        parse_required_blob_json(row, "data")
    }
}

#[derive(Debug, Clone)]
pub struct DropStore {
    db_connection: DbConnection,
}

impl DropStore {
    pub fn new(db_connection: DbConnection) -> Self {
        Self { db_connection }
    }

    pub async fn get(&self, drop_id: &str) -> Result<Option<DropStatus>, Error> {
        let row = sqlx::query_as::<_, DropRow>(
            "SELECT state, created_at, updated_at FROM drops WHERE drop_id = ?",
        )
        .bind(drop_id)
        .fetch_optional(self.db_connection.read())
        .await?;

        Ok(row.map(|r| r.status))
    }

    pub async fn exists(&self, drop_id: &str) -> Result<bool, Error> {
        Ok(self.get(drop_id).await?.is_some())
    }

    pub async fn upsert(&self, status: &DropStatus) -> Result<(), Error> {
        let now = OffsetDateTime::now_utc();
        let drop_id = status.data().drop_id.clone();
        let phase = status.phase_name().to_string();
        let config =
            serde_json::to_vec(&status.data().config).map_err(|e| Error::Internal(e.to_string()))?;
        let state = serde_json::to_vec(status).map_err(|e| Error::Internal(e.to_string()))?;

        self.db_connection
            .execute_write(move |pool| {
                let drop_id = drop_id.clone();
                let phase = phase.clone();
                let config = config.clone();
                let state = state.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO drops (drop_id, phase, config, state, created_at, updated_at)
                         VALUES (?, ?, ?, ?, ?, ?)
                         ON CONFLICT (drop_id) DO UPDATE SET
                            phase = excluded.phase, config = excluded.config,
                            state = excluded.state, updated_at = excluded.updated_at",
                    )
                    .bind(drop_id)
                    .bind(phase)
                    .bind(config)
                    .bind(state)
                    .bind(now)
                    .bind(now)
                    .execute(&pool)
                    .await
                }
            })
            .await?;
        Ok(())
    }

    pub async fn upsert_index(&self, entry: &DropIndexEntry) -> Result<(), Error> {
        let drop_id = entry.drop_id.clone();
        let data = serde_json::to_vec(entry).map_err(|e| Error::Internal(e.to_string()))?;

        self.db_connection
            .execute_write(move |pool| {
                let drop_id = drop_id.clone();
                let data = data.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO drops_index (drop_id, data) VALUES (?, ?)
                         ON CONFLICT (drop_id) DO UPDATE SET data = excluded.data",
                    )
                    .bind(drop_id)
                    .bind(data)
                    .execute(&pool)
                    .await
                }
            })
            .await?;
        Ok(())
    }

    pub async fn delete_index(&self, drop_id: &str) -> Result<(), Error> {
        let drop_id = drop_id.to_string();
        self.db_connection
            .execute_write(move |pool| {
                let drop_id = drop_id.clone();
                async move {
                    sqlx::query("DELETE FROM drops_index WHERE drop_id = ?")
                        .bind(drop_id)
                        .execute(&pool)
                        .await
                }
            })
            .await?;
        Ok(())
    }

    pub async fn list_index(&self) -> Result<Vec<DropIndexEntry>, Error> {
        let rows = sqlx::query_as::<_, DropIndexEntry>("SELECT data FROM drops_index")
            .fetch_all(self.db_connection.read())
            .await?;
        Ok(rows)
    }
}
