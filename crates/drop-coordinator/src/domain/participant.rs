//! Participant object: one actor per `(dropId, userId)`, tracking a single
//! entrant's status and purchase token across a drop's lifecycle.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use time::OffsetDateTime;

use crate::{
    domain::{token::verify_purchase_token, Error},
    infra::db::{parse_required_blob_json, parse_required_datetime, DbConnection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    None,
    Registered,
    Winner,
    Backup,
    Loser,
    Purchased,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub drop_id: String,
    pub user_id: String,
    pub status: ParticipantStatus,
    pub tickets: u32,
    pub effective_tickets: u64,
    pub rollover_used: u32,
    pub paid_entries: u32,
    pub loyalty_tier: String,
    pub loyalty_multiplier: f64,
    pub queue_position: Option<u64>,
    pub purchase_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub promoted: bool,
}

impl Participant {
    fn new(drop_id: &str, user_id: &str) -> Self {
        Self {
            drop_id: drop_id.to_string(),
            user_id: user_id.to_string(),
            status: ParticipantStatus::None,
            tickets: 0,
            effective_tickets: 0,
            rollover_used: 0,
            paid_entries: 0,
            loyalty_tier: "bronze".to_string(),
            loyalty_multiplier: 1.0,
            queue_position: None,
            purchase_token: None,
            expires_at: None,
            promoted: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub participant: Participant,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FromRow<'_, SqliteRow> for ParticipantRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ParticipantRow {
            participant: parse_required_blob_json(row, "data")?,
            created_at: parse_required_datetime(row, "created_at")?,
            updated_at: parse_required_datetime(row, "updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantStore {
    db_connection: DbConnection,
}

impl ParticipantStore {
    pub fn new(db_connection: DbConnection) -> Self {
        Self { db_connection }
    }

    async fn upsert(&self, participant: &Participant) -> Result<(), Error> {
        let now = OffsetDateTime::now_utc();
        let data = serde_json::to_vec(participant).map_err(|e| Error::Internal(e.to_string()))?;
        let drop_id = participant.drop_id.clone();
        let user_id = participant.user_id.clone();
        let status = format!("{:?}", participant.status).to_lowercase();

        self.db_connection
            .execute_write(move |pool| {
                let data = data.clone();
                let drop_id = drop_id.clone();
                let user_id = user_id.clone();
                let status = status.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO participants (drop_id, user_id, status, data, created_at, updated_at)
                         VALUES (?, ?, ?, ?, ?, ?)
                         ON CONFLICT (drop_id, user_id)
                         DO UPDATE SET status = excluded.status, data = excluded.data, updated_at = excluded.updated_at",
                    )
                    .bind(drop_id)
                    .bind(user_id)
                    .bind(status)
                    .bind(data)
                    .bind(now)
                    .bind(now)
                    .execute(&pool)
                    .await
                }
            })
            .await?;

        Ok(())
    }

    pub async fn get(&self, drop_id: &str, user_id: &str) -> Result<Option<Participant>, Error> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            "SELECT data, created_at, updated_at FROM participants WHERE drop_id = ? AND user_id = ?",
        )
        .bind(drop_id)
        .bind(user_id)
        .fetch_optional(self.db_connection.read())
        .await?;

        Ok(row.map(|r| r.participant))
    }

    pub async fn list_for_drop(&self, drop_id: &str) -> Result<Vec<Participant>, Error> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            "SELECT data, created_at, updated_at FROM participants WHERE drop_id = ?",
        )
        .bind(drop_id)
        .fetch_all(self.db_connection.read())
        .await?;

        Ok(rows.into_iter().map(|r| r.participant).collect())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_registered(
        &self,
        drop_id: &str,
        user_id: &str,
        position: u64,
        tickets: u32,
        effective_tickets: u64,
        rollover_used: u32,
        paid_entries: u32,
        loyalty_tier: &str,
        loyalty_multiplier: f64,
    ) -> Result<(), Error> {
        let mut participant = self.get(drop_id, user_id).await?.unwrap_or_else(|| Participant::new(drop_id, user_id));
        participant.status = ParticipantStatus::Registered;
        participant.queue_position = Some(position);
        participant.tickets = tickets;
        participant.effective_tickets = effective_tickets;
        participant.rollover_used = rollover_used;
        participant.paid_entries = paid_entries;
        participant.loyalty_tier = loyalty_tier.to_string();
        participant.loyalty_multiplier = loyalty_multiplier;
        self.upsert(&participant).await
    }

    pub async fn notify_result(&self, drop_id: &str, user_id: &str, is_winner: bool) -> Result<(), Error> {
        let mut participant = self
            .get(drop_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {drop_id}/{user_id} not found")))?;
        participant.status = if is_winner { ParticipantStatus::Winner } else { ParticipantStatus::Loser };
        self.upsert(&participant).await
    }

    pub async fn notify_backup(&self, drop_id: &str, user_id: &str) -> Result<(), Error> {
        let mut participant = self
            .get(drop_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {drop_id}/{user_id} not found")))?;
        participant.status = ParticipantStatus::Backup;
        self.upsert(&participant).await
    }

    pub async fn notify_promotion(&self, drop_id: &str, user_id: &str) -> Result<(), Error> {
        let mut participant = self
            .get(drop_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {drop_id}/{user_id} not found")))?;
        participant.status = ParticipantStatus::Winner;
        participant.promoted = true;
        self.upsert(&participant).await
    }

    pub async fn notify_expiry(&self, drop_id: &str, user_id: &str) -> Result<(), Error> {
        let mut participant = self
            .get(drop_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {drop_id}/{user_id} not found")))?;
        participant.status = ParticipantStatus::Expired;
        self.upsert(&participant).await
    }

    pub async fn set_token(
        &self,
        drop_id: &str,
        user_id: &str,
        purchase_token: String,
        expires_at: OffsetDateTime,
    ) -> Result<(), Error> {
        let mut participant = self
            .get(drop_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {drop_id}/{user_id} not found")))?;
        participant.purchase_token = Some(purchase_token);
        participant.expires_at = Some(expires_at);
        self.upsert(&participant).await
    }

    /// Verifies and consumes a purchase token: checks winner status, token
    /// equality, single-use, expiry, and the HMAC signature, then
    /// atomically marks the participant `purchased`.
    pub async fn complete_purchase(
        &self,
        drop_id: &str,
        user_id: &str,
        token: &str,
        secret_key: &[u8],
    ) -> Result<(), Error> {
        let mut participant = self
            .get(drop_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {drop_id}/{user_id} not found")))?;

        if participant.status != ParticipantStatus::Winner {
            return Err(Error::Forbidden("not a winner".to_string()));
        }

        match &participant.purchase_token {
            Some(stored) if stored == token => {}
            _ => return Err(Error::Forbidden("token mismatch".to_string())),
        }

        verify_purchase_token(secret_key, drop_id, user_id, token, OffsetDateTime::now_utc())
            .map_err(|e| Error::Validation(e.to_string()))?;

        participant.status = ParticipantStatus::Purchased;
        self.upsert(&participant).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_participant_starts_unregistered() {
        let p = Participant::new("drop-1", "user-1");
        assert_eq!(p.status, ParticipantStatus::None);
        assert_eq!(p.tickets, 0);
    }
}
