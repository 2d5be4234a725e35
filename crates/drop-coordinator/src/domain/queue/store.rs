use sqlx::{sqlite::SqliteRow, FromRow, Row};
use time::{Duration, OffsetDateTime};

use super::{generate_token_id, JoinQueueResult, QueueCounters, QueueStatus, QueueToken};
use crate::{
    domain::Error,
    infra::db::{parse_required_blob_json, DbConnection},
};

impl FromRow<'_, SqliteRow> for QueueToken {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        parse_required_blob_json(row, "data")
    }
}

#[derive(Debug, Clone)]
pub struct QueueStore {
    db_connection: DbConnection,
}

impl QueueStore {
    pub fn new(db_connection: DbConnection) -> Self {
        Self { db_connection }
    }

    async fn get_counters(&self, drop_id: &str) -> Result<QueueCounters, Error> {
        let row: Option<(Vec<u8>, Vec<u8>, i64, i64)> = sqlx::query_as(
            "SELECT fingerprint_counts, ip_counts, position_counter, ready_count
             FROM queue_counters WHERE drop_id = ?",
        )
        .bind(drop_id)
        .fetch_optional(self.db_connection.read())
        .await?;

        Ok(match row {
            Some((fp, ip, position_counter, ready_count)) => QueueCounters {
                fingerprint_counts: serde_json::from_slice(&fp).unwrap_or_default(),
                ip_counts: serde_json::from_slice(&ip).unwrap_or_default(),
                position_counter: position_counter as u64,
                ready_count: ready_count as u32,
            },
            None => QueueCounters::default(),
        })
    }

    async fn write_counters(&self, drop_id: &str, counters: &QueueCounters) -> Result<(), Error> {
        let drop_id = drop_id.to_string();
        let fp = serde_json::to_vec(&counters.fingerprint_counts).map_err(|e| Error::Internal(e.to_string()))?;
        let ip = serde_json::to_vec(&counters.ip_counts).map_err(|e| Error::Internal(e.to_string()))?;
        let position_counter = counters.position_counter as i64;
        let ready_count = counters.ready_count as i64;

        self.db_connection
            .execute_write(move |pool| {
                let drop_id = drop_id.clone();
                let fp = fp.clone();
                let ip = ip.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO queue_counters (drop_id, fingerprint_counts, ip_counts, position_counter, ready_count)
                         VALUES (?, ?, ?, ?, ?)
                         ON CONFLICT (drop_id) DO UPDATE SET
                            fingerprint_counts = excluded.fingerprint_counts,
                            ip_counts = excluded.ip_counts,
                            position_counter = excluded.position_counter,
                            ready_count = excluded.ready_count",
                    )
                    .bind(drop_id)
                    .bind(fp)
                    .bind(ip)
                    .bind(position_counter)
                    .bind(ready_count)
                    .execute(&pool)
                    .await
                }
            })
            .await?;
        Ok(())
    }

    async fn write_token(&self, token: &QueueToken) -> Result<(), Error> {
        let now = OffsetDateTime::now_utc();
        let data = serde_json::to_vec(token).map_err(|e| Error::Internal(e.to_string()))?;
        let drop_id = token.drop_id.clone();
        let token_id = token.token_id.clone();

        self.db_connection
            .execute_write(move |pool| {
                let data = data.clone();
                let drop_id = drop_id.clone();
                let token_id = token_id.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO queue_tokens (drop_id, token_id, data, created_at)
                         VALUES (?, ?, ?, ?)
                         ON CONFLICT (drop_id, token_id) DO UPDATE SET data = excluded.data",
                    )
                    .bind(drop_id)
                    .bind(token_id)
                    .bind(data)
                    .bind(now)
                    .execute(&pool)
                    .await
                }
            })
            .await?;
        Ok(())
    }

    pub async fn get_token(&self, drop_id: &str, token_id: &str) -> Result<Option<QueueToken>, Error> {
        let token = sqlx::query_as::<_, QueueToken>(
            "SELECT data FROM queue_tokens WHERE drop_id = ? AND token_id = ?",
        )
        .bind(drop_id)
        .bind(token_id)
        .fetch_optional(self.db_connection.read())
        .await?;
        Ok(token)
    }

    pub async fn waiting_tokens_in_order(&self, drop_id: &str) -> Result<Vec<QueueToken>, Error> {
        let tokens = sqlx::query_as::<_, QueueToken>(
            "SELECT data FROM queue_tokens WHERE drop_id = ?",
        )
        .bind(drop_id)
        .fetch_all(self.db_connection.read())
        .await?;

        let mut waiting: Vec<QueueToken> = tokens
            .into_iter()
            .filter(|t| t.status == QueueStatus::Waiting)
            .collect();
        waiting.sort_by_key(|t| t.position);
        Ok(waiting)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn join_queue(
        &self,
        drop_id: &str,
        fingerprint: &str,
        ip_hash: &str,
        per_fingerprint_cap: u32,
        per_ip_cap: u32,
        ready_cap: u32,
        ready_ttl_secs: u64,
        issue_rate_per_sec: f64,
    ) -> Result<JoinQueueResult, Error> {
        let mut counters = self.get_counters(drop_id).await?;

        let fp_count = *counters.fingerprint_counts.get(fingerprint).unwrap_or(&0);
        if fp_count >= per_fingerprint_cap {
            return Err(Error::RateLimited("cap exceeded".to_string()));
        }
        let ip_count = *counters.ip_counts.get(ip_hash).unwrap_or(&0);
        if ip_count >= per_ip_cap {
            return Err(Error::RateLimited("cap exceeded".to_string()));
        }

        counters.position_counter += 1;
        let position = counters.position_counter;

        let now = OffsetDateTime::now_utc();
        let (status, ready_at, expires_at) = if counters.ready_count < ready_cap {
            counters.ready_count += 1;
            (QueueStatus::Ready, Some(now), Some(now + Duration::seconds(ready_ttl_secs as i64)))
        } else {
            (QueueStatus::Waiting, None, None)
        };

        let token_id = generate_token_id();
        let token = QueueToken {
            token_id: token_id.clone(),
            drop_id: drop_id.to_string(),
            fingerprint: fingerprint.to_string(),
            ip_hash: ip_hash.to_string(),
            position,
            status,
            ready_at,
            expires_at,
        };

        self.write_token(&token).await?;

        counters
            .fingerprint_counts
            .insert(fingerprint.to_string(), fp_count + 1);
        counters.ip_counts.insert(ip_hash.to_string(), ip_count + 1);
        self.write_counters(drop_id, &counters).await?;

        let estimated_wait_seconds = if issue_rate_per_sec > 0.0 {
            position as f64 / issue_rate_per_sec
        } else {
            0.0
        };

        Ok(JoinQueueResult {
            token: token_id,
            position,
            estimated_wait_seconds,
            status,
        })
    }

    /// Returns the current status of a token, actively sweeping an
    /// expired-but-still-`ready` token on the access path so `readyCount`
    /// doesn't silently leak (the store never gets an independent sweep
    /// tick of its own; this plus `AdmissionLoop` are the two places the
    /// count can change).
    pub async fn check_token(&self, drop_id: &str, token_id: &str) -> Result<QueueToken, Error> {
        let mut token = self
            .get_token(drop_id, token_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("token {token_id} not found")))?;

        if token.status == QueueStatus::Ready {
            if let Some(expires_at) = token.expires_at {
                if OffsetDateTime::now_utc() >= expires_at {
                    token.status = QueueStatus::Expired;
                    self.write_token(&token).await?;

                    let mut counters = self.get_counters(drop_id).await?;
                    counters.ready_count = counters.ready_count.saturating_sub(1);
                    self.write_counters(drop_id, &counters).await?;
                }
            }
        }

        Ok(token)
    }

    /// Marks a ready token `used`; the registration path calls this before
    /// doing any further work so a failure past this point still burns the
    /// token rather than letting it be replayed.
    pub async fn consume_token(&self, drop_id: &str, token_id: &str) -> Result<(), Error> {
        let mut token = self.check_token(drop_id, token_id).await?;
        if token.status != QueueStatus::Ready {
            return Err(Error::Conflict(format!("token not ready: {:?}", token.status)));
        }
        token.status = QueueStatus::Used;
        self.write_token(&token).await?;

        let mut counters = self.get_counters(drop_id).await?;
        counters.ready_count = counters.ready_count.saturating_sub(1);
        self.write_counters(drop_id, &counters).await?;
        Ok(())
    }

    /// Promotes `waiting` tokens to `ready`, in strict position order,
    /// until `readyCap` is hit or no waiting tokens remain.
    pub async fn admit(&self, drop_id: &str, ready_cap: u32, ready_ttl_secs: u64) -> Result<u32, Error> {
        let mut counters = self.get_counters(drop_id).await?;
        if counters.ready_count >= ready_cap {
            return Ok(0);
        }

        let waiting = self.waiting_tokens_in_order(drop_id).await?;
        let mut promoted = 0;
        let now = OffsetDateTime::now_utc();

        for mut token in waiting {
            if counters.ready_count >= ready_cap {
                break;
            }
            token.status = QueueStatus::Ready;
            token.ready_at = Some(now);
            token.expires_at = Some(now + Duration::seconds(ready_ttl_secs as i64));
            self.write_token(&token).await?;
            counters.ready_count += 1;
            promoted += 1;
        }

        if promoted > 0 {
            self.write_counters(drop_id, &counters).await?;
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_default_to_zero() {
        let counters = QueueCounters::default();
        assert_eq!(counters.ready_count, 0);
        assert_eq!(counters.position_counter, 0);
    }
}
