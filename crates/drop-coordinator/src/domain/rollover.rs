//! UserRollover object: a per-user, cross-drop entry credit balance, capped
//! and only ever funded by paid losing entries.

use sqlx::{sqlite::SqliteRow, FromRow, Row};
use time::OffsetDateTime;

use crate::{domain::Error, infra::db::DbConnection};

#[derive(Debug, Clone)]
pub struct UserRollover {
    pub user_id: String,
    pub balance: u32,
}

impl FromRow<'_, SqliteRow> for UserRollover {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(UserRollover {
            user_id: row.get("user_id"),
            balance: row.get::<i64, _>("balance") as u32,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RolloverStore {
    db_connection: DbConnection,
}

impl RolloverStore {
    pub fn new(db_connection: DbConnection) -> Self {
        Self { db_connection }
    }

    pub async fn get_balance(&self, user_id: &str) -> Result<u32, Error> {
        let row = sqlx::query_as::<_, UserRollover>(
            "SELECT user_id, balance FROM user_rollovers WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.db_connection.read())
        .await?;

        Ok(row.map(|r| r.balance).unwrap_or(0))
    }

    async fn write_balance(&self, user_id: &str, balance: u32) -> Result<(), Error> {
        let now = OffsetDateTime::now_utc();
        let user_id = user_id.to_string();
        self.db_connection
            .execute_write(move |pool| {
                let user_id = user_id.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO user_rollovers (user_id, balance, updated_at)
                         VALUES (?, ?, ?)
                         ON CONFLICT (user_id) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at",
                    )
                    .bind(user_id)
                    .bind(balance as i64)
                    .bind(now)
                    .execute(&pool)
                    .await
                }
            })
            .await?;
        Ok(())
    }

    /// Debits up to `amount` from the user's balance, returning how much was
    /// actually consumed. Writes the new balance only when `consumed > 0`.
    pub async fn consume_rollover(&self, user_id: &str, amount: u32) -> Result<(u32, u32), Error> {
        let balance = self.get_balance(user_id).await?;
        let consumed = amount.min(balance);
        let remaining = balance - consumed;
        if consumed > 0 {
            self.write_balance(user_id, remaining).await?;
        }
        Ok((consumed, remaining))
    }

    /// Adds `amount` to the balance, capped at `max_rollover`. A no-op for
    /// non-positive amounts. Returns `(new_balance, capped)`.
    pub async fn add_rollover(&self, user_id: &str, amount: u32, max_rollover: u32) -> Result<(u32, bool), Error> {
        if amount == 0 {
            return Ok((self.get_balance(user_id).await?, false));
        }
        let balance = self.get_balance(user_id).await?;
        let uncapped = balance + amount;
        let capped = uncapped > max_rollover;
        let new_balance = uncapped.min(max_rollover);
        self.write_balance(user_id, new_balance).await?;
        Ok((new_balance, capped))
    }

    /// Administrative override; clamps at `max_rollover` (kept as its own
    /// method to mirror the handler surface).
    pub async fn set_balance(&self, user_id: &str, balance: u32, max_rollover: u32) -> Result<(), Error> {
        self.write_balance(user_id, balance.min(max_rollover)).await
    }
}
