//! Admission queue: a per-drop actor metering traffic into the (expensive)
//! registration path via a token lifecycle `{waiting, ready, used, expired}`,
//! gated by per-fingerprint/per-IP caps.

mod admission_loop;
mod store;

pub use admission_loop::AdmissionLoop;
pub use store::QueueStore;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Ready,
    Used,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueToken {
    pub token_id: String,
    pub drop_id: String,
    pub fingerprint: String,
    pub ip_hash: String,
    pub position: u64,
    pub status: QueueStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ready_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinQueueResult {
    pub token: String,
    pub position: u64,
    pub estimated_wait_seconds: f64,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounters {
    pub fingerprint_counts: std::collections::HashMap<String, u32>,
    pub ip_counts: std::collections::HashMap<String, u32>,
    pub position_counter: u64,
    pub ready_count: u32,
}

/// Random 128-bit token id, hex-encoded.
pub fn generate_token_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
