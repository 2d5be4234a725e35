use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use time::OffsetDateTime;

use crate::domain::{geo::GeoFence, lottery::LotteryProof};

/// Operator-supplied configuration for a drop, fixed at `initialize` time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropConfig {
    pub inventory: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_end: OffsetDateTime,
    pub purchase_window_secs: u64,
    pub ticket_price_unit: String,
    pub max_tickets_per_user: u32,
    pub backup_multiplier: f64,
    pub geo_fence: Option<GeoFence>,
}

/// All mutable state owned by a drop, regardless of phase. Each typestate
/// wraps this directly, mirroring how the teacher's competition states each
/// wrap the full `Competition` row rather than a phase-specific subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropData {
    pub drop_id: String,
    pub config: DropConfig,
    pub inventory: u32,
    pub initial_inventory: u32,
    pub participant_tickets: HashMap<String, u32>,
    pub participant_multipliers: HashMap<String, f64>,
    pub winners: Vec<String>,
    pub backup_winners: VecDeque<String>,
    pub expired_winners: Vec<String>,
    pub lottery_secret: String,
    pub lottery_commitment: String,
    pub lottery_proof: Option<LotteryProof>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub purchase_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl DropData {
    pub fn participant_count(&self) -> usize {
        self.participant_tickets.len()
    }

    pub fn total_tickets(&self) -> u32 {
        self.participant_tickets.values().sum()
    }
}

/// Public read projection returned by `getState` and published to the
/// notifier; never carries the lottery secret.
#[derive(Debug, Clone, Serialize)]
pub struct DropState {
    pub drop_id: String,
    pub phase: String,
    pub participant_count: u64,
    pub total_tickets: u64,
    pub inventory: u32,
    pub initial_inventory: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub purchase_end: Option<OffsetDateTime>,
    pub lottery_commitment: Option<String>,
}
