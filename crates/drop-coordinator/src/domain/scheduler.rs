//! Durable delayed self-invocations. A handler schedules a future call on
//! its own (or another) actor key by inserting a row here rather than
//! spawning a bare `tokio::spawn(sleep(...))` — the deadline survives a
//! restart, and delivery is at-least-once: the drainer deletes a task only
//! after its handler returns `Ok`, so a crash between dispatch and delete
//! redelivers it. Handlers on the receiving end must tolerate that (the
//! Drop Object's handlers already do, per their own idempotence rules).

use async_trait::async_trait;
use log::{debug, error, info};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{domain::Error, infra::db::DbConnection};

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: i64,
    pub deadline: OffsetDateTime,
    pub actor_key: String,
    pub handler: String,
    pub payload: Vec<u8>,
}

impl FromRow<'_, SqliteRow> for ScheduledTask {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ScheduledTask {
            id: row.get("id"),
            deadline: crate::infra::db::parse_required_datetime(row, "deadline")?,
            actor_key: row.get("actor_key"),
            handler: row.get("handler"),
            payload: row.get("payload"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerStore {
    db_connection: DbConnection,
}

impl SchedulerStore {
    pub fn new(db_connection: DbConnection) -> Self {
        Self { db_connection }
    }

    pub async fn schedule(
        &self,
        deadline: OffsetDateTime,
        actor_key: &str,
        handler: &str,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        let now = OffsetDateTime::now_utc();
        let actor_key = actor_key.to_string();
        let handler = handler.to_string();

        self.db_connection
            .execute_write(move |pool| {
                let actor_key = actor_key.clone();
                let handler = handler.clone();
                let payload = payload.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO scheduled_tasks (deadline, actor_key, handler, payload, created_at)
                         VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(deadline)
                    .bind(actor_key)
                    .bind(handler)
                    .bind(payload)
                    .bind(now)
                    .execute(&pool)
                    .await
                }
            })
            .await?;
        Ok(())
    }

    pub async fn due_tasks(&self, now: OffsetDateTime) -> Result<Vec<ScheduledTask>, Error> {
        let tasks = sqlx::query_as::<_, ScheduledTask>(
            "SELECT id, deadline, actor_key, handler, payload FROM scheduled_tasks
             WHERE deadline <= ? ORDER BY deadline ASC",
        )
        .bind(now)
        .fetch_all(self.db_connection.read())
        .await?;
        Ok(tasks)
    }

    pub async fn delete(&self, id: i64) -> Result<(), Error> {
        self.db_connection
            .execute_write(move |pool| async move {
                sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
                    .bind(id)
                    .execute(&pool)
                    .await
            })
            .await?;
        Ok(())
    }
}

/// Dispatch target for a due task. The Drop registry is the only
/// implementor; kept as a trait so the drainer doesn't need to know about
/// `Drop` directly.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle_task(&self, actor_key: &str, handler: &str, payload: &[u8]) -> Result<(), Error>;
}

pub struct SchedulerLoop {
    store: Arc<SchedulerStore>,
    handler: Arc<dyn TaskHandler>,
    tick_interval: Duration,
    cancel_token: CancellationToken,
}

impl SchedulerLoop {
    pub fn new(
        store: Arc<SchedulerStore>,
        handler: Arc<dyn TaskHandler>,
        tick_interval: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            handler,
            tick_interval,
            cancel_token,
        }
    }

    pub async fn watch(&self) -> Result<(), anyhow::Error> {
        info!("Starting scheduled task drainer");

        loop {
            if self.cancel_token.is_cancelled() {
                info!("scheduled task drainer received cancellation");
                break;
            }

            match self.drain_due().await {
                Ok(drained) if drained > 0 => debug!("scheduler drained {drained} tasks"),
                Ok(_) => {}
                Err(e) => error!("scheduler tick error: {e}"),
            }

            tokio::select! {
                _ = sleep(self.tick_interval) => continue,
                _ = self.cancel_token.cancelled() => {
                    info!("scheduled task drainer cancelled during sleep");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn drain_due(&self) -> Result<u32, Error> {
        let due = self.store.due_tasks(OffsetDateTime::now_utc()).await?;
        let mut drained = 0;
        for task in due {
            match self
                .handler
                .handle_task(&task.actor_key, &task.handler, &task.payload)
                .await
            {
                Ok(()) => {
                    self.store.delete(task.id).await?;
                    drained += 1;
                }
                Err(e) if e.is_transient() => {
                    error!("transient error dispatching task {}: {e}", task.id);
                }
                Err(e) => {
                    error!("terminal error dispatching task {}, dropping: {e}", task.id);
                    self.store.delete(task.id).await?;
                }
            }
        }
        Ok(drained)
    }
}
