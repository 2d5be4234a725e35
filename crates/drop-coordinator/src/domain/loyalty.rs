//! UserLoyalty object: tracks distinct-drop participation and derives a
//! tier/multiplier pair from operator-configured thresholds.

use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::collections::BTreeSet;
use time::OffsetDateTime;

use crate::{
    domain::Error,
    infra::db::{parse_required_blob_json, DbConnection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    Bronze,
    Silver,
    Gold,
}

impl LoyaltyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyTier::Bronze => "bronze",
            LoyaltyTier::Silver => "silver",
            LoyaltyTier::Gold => "gold",
        }
    }
}

/// Computes tier/multiplier from a participation count and the operator's
/// configured thresholds. Values must stay stable across a single drop's
/// lifetime, so callers fetch this once per drop rather than per handler.
pub fn tier_for_count(
    participation_count: u32,
    silver_threshold: u32,
    gold_threshold: u32,
    silver_multiplier: f64,
    gold_multiplier: f64,
) -> (LoyaltyTier, f64) {
    if participation_count >= gold_threshold {
        (LoyaltyTier::Gold, gold_multiplier)
    } else if participation_count >= silver_threshold {
        (LoyaltyTier::Silver, silver_multiplier)
    } else {
        (LoyaltyTier::Bronze, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct UserLoyalty {
    pub user_id: String,
    pub participation_count: u32,
    pub seen_drops: BTreeSet<String>,
}

impl FromRow<'_, SqliteRow> for UserLoyalty {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(UserLoyalty {
            user_id: row.get("user_id"),
            participation_count: row.get::<i64, _>("participation_count") as u32,
            seen_drops: parse_required_blob_json(row, "seen_drops")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoyaltyStore {
    db_connection: DbConnection,
}

impl LoyaltyStore {
    pub fn new(db_connection: DbConnection) -> Self {
        Self { db_connection }
    }

    pub async fn get(&self, user_id: &str) -> Result<UserLoyalty, Error> {
        let row = sqlx::query_as::<_, UserLoyalty>(
            "SELECT user_id, participation_count, seen_drops FROM user_loyalties WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.db_connection.read())
        .await?;

        Ok(row.unwrap_or(UserLoyalty {
            user_id: user_id.to_string(),
            participation_count: 0,
            seen_drops: BTreeSet::new(),
        }))
    }

    /// Increments participation count only the first time `drop_id` is seen
    /// for this user.
    pub async fn record_participation(&self, user_id: &str, drop_id: &str) -> Result<(), Error> {
        let mut loyalty = self.get(user_id).await?;
        if loyalty.seen_drops.insert(drop_id.to_string()) {
            loyalty.participation_count += 1;
        } else {
            return Ok(());
        }

        let now = OffsetDateTime::now_utc();
        let user_id = user_id.to_string();
        let seen_drops = serde_json::to_vec(&loyalty.seen_drops).map_err(|e| Error::Internal(e.to_string()))?;
        let participation_count = loyalty.participation_count;

        self.db_connection
            .execute_write(move |pool| {
                let user_id = user_id.clone();
                let seen_drops = seen_drops.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO user_loyalties (user_id, participation_count, seen_drops, updated_at)
                         VALUES (?, ?, ?, ?)
                         ON CONFLICT (user_id) DO UPDATE SET
                            participation_count = excluded.participation_count,
                            seen_drops = excluded.seen_drops,
                            updated_at = excluded.updated_at",
                    )
                    .bind(user_id)
                    .bind(participation_count as i64)
                    .bind(seen_drops)
                    .bind(now)
                    .execute(&pool)
                    .await
                }
            })
            .await?;

        Ok(())
    }

    pub async fn get_multiplier(
        &self,
        user_id: &str,
        silver_threshold: u32,
        gold_threshold: u32,
        silver_multiplier: f64,
        gold_multiplier: f64,
    ) -> Result<(LoyaltyTier, f64), Error> {
        let loyalty = self.get(user_id).await?;
        Ok(tier_for_count(
            loyalty.participation_count,
            silver_threshold,
            gold_threshold,
            silver_multiplier,
            gold_multiplier,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_monotonic() {
        assert_eq!(tier_for_count(0, 3, 10, 1.25, 1.5).0, LoyaltyTier::Bronze);
        assert_eq!(tier_for_count(3, 3, 10, 1.25, 1.5).0, LoyaltyTier::Silver);
        assert_eq!(tier_for_count(10, 3, 10, 1.25, 1.5).0, LoyaltyTier::Gold);
    }

    #[test]
    fn multipliers_are_non_decreasing() {
        let bronze = tier_for_count(0, 3, 10, 1.25, 1.5).1;
        let silver = tier_for_count(3, 3, 10, 1.25, 1.5).1;
        let gold = tier_for_count(10, 3, 10, 1.25, 1.5).1;
        assert!(bronze <= silver && silver <= gold);
    }
}
