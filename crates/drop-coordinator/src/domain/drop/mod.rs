//! Drop Object: the authoritative per-drop state machine. One logical actor
//! per `dropId`, single-writer via a keyed mutex registry, orchestrating the
//! lottery, purchase tokens, and the Participant/Rollover/Loyalty objects.

mod data;
mod states;
mod store;

pub use data::{DropConfig, DropData, DropState};
pub use states::{DropStatus, HasDropData};
pub use store::{DropIndexEntry, DropStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};

use crate::{
    config::DropDefaultsSettings,
    domain::{
        geo::{inside_geo_fence, GeoFence, GeoMode},
        loyalty::LoyaltyStore,
        lottery::{self, LotteryLeaf, LotteryProof},
        notifier::{DropEvent, Notifier},
        participant::{ParticipantStatus, ParticipantStore},
        queue::QueueStore,
        rollover::RolloverStore,
        scheduler::{SchedulerStore, TaskHandler},
        token::mint_purchase_token,
        trust::{score_trust, TrustInput},
        Error,
    },
};

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeRequest {
    pub drop_id: String,
    pub inventory: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_end: OffsetDateTime,
    pub purchase_window_secs: Option<u64>,
    pub ticket_price_unit: Option<String>,
    pub max_tickets_per_user: Option<u32>,
    pub backup_multiplier: Option<f64>,
    pub geo_fence: Option<GeoFence>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    pub drop_id: String,
    pub commitment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub user_id: String,
    pub desired_tickets: u32,
    pub fingerprint: String,
    pub fingerprint_confidence: f64,
    pub timing_ms: u64,
    pub pow_verified: bool,
    pub behavior_score: Option<f64>,
    pub location: Option<(f64, f64)>,
    /// The `ready` admission-queue token this caller was issued by `joinQueue`.
    /// Consumed at the top of the register path before any allocation work.
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResult {
    pub participant_count: u64,
    pub total_tickets: u64,
    pub user_tickets: u32,
    pub effective_tickets: u64,
    pub position: u64,
    pub rollover_used: u32,
    pub paid_entries: u32,
    pub loyalty_tier: String,
    pub loyalty_multiplier: f64,
    pub geo_bonus: f64,
    pub in_geo_zone: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunLotteryResult {
    pub participant_count: u64,
    pub total_tickets: u64,
    pub primary_winners: usize,
    pub total_selected: usize,
    pub winners: Vec<String>,
    pub backup_winners: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartPurchaseResult {
    pub purchase_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletePurchaseResult {
    pub inventory: u32,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckExpiryResult {
    pub expired: bool,
    pub promoted: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosePurchaseWindowResult {
    pub phase: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LotteryProofResult {
    pub commitment: String,
    pub proof: Option<LotteryProof>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InclusionProofResult {
    pub leaf: LotteryLeaf,
    pub leaf_hash: String,
    pub proof: Vec<(String, String)>,
    pub merkle_root: String,
    pub verified: bool,
}

/// Per-dropId single-writer registry plus the collaborator stores the Drop
/// Object's handlers orchestrate. Cheap to clone (everything behind `Arc`),
/// so one instance lives in `AppState` and is shared across axum handlers
/// and the background loops.
#[derive(Clone)]
pub struct DropRegistry {
    store: Arc<DropStore>,
    participants: Arc<ParticipantStore>,
    rollovers: Arc<RolloverStore>,
    loyalties: Arc<LoyaltyStore>,
    queue: Arc<QueueStore>,
    scheduler: Arc<SchedulerStore>,
    notifier: Arc<dyn Notifier>,
    secret_key: Arc<Vec<u8>>,
    defaults: DropDefaultsSettings,
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DropRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DropStore>,
        participants: Arc<ParticipantStore>,
        rollovers: Arc<RolloverStore>,
        loyalties: Arc<LoyaltyStore>,
        queue: Arc<QueueStore>,
        scheduler: Arc<SchedulerStore>,
        notifier: Arc<dyn Notifier>,
        secret_key: Vec<u8>,
        defaults: DropDefaultsSettings,
    ) -> Self {
        Self {
            store,
            participants,
            rollovers,
            loyalties,
            queue,
            scheduler,
            notifier,
            secret_key: Arc::new(secret_key),
            defaults,
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, drop_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(drop_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(drop_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn publish(&self, status: &DropStatus) {
        let data = status.data();
        self.notifier
            .publish(DropEvent {
                event_type: "drop".to_string(),
                drop_id: data.drop_id.clone(),
                phase: status.phase_name().to_string(),
                participant_count: data.participant_count() as u64,
                total_tickets: data.total_tickets() as u64,
                inventory: data.inventory,
                initial_inventory: data.initial_inventory,
                registration_end: data.config.registration_end,
                purchase_end: data.purchase_end,
                server_time: OffsetDateTime::now_utc(),
                lottery_commitment: Some(data.lottery_commitment.clone()),
            })
            .await;
    }

    async fn load(&self, drop_id: &str) -> Result<DropStatus, Error> {
        self.store
            .get(drop_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("drop {drop_id} not found")))
    }

    pub async fn initialize(&self, request: InitializeRequest) -> Result<InitializeResult, Error> {
        let lock = self.lock_for(&request.drop_id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.get(&request.drop_id).await? {
            return Ok(InitializeResult {
                drop_id: request.drop_id,
                commitment: existing.data().lottery_commitment.clone(),
            });
        }

        if let Some(fence) = &request.geo_fence {
            if fence.radius_meters < self.defaults.min_geo_radius_meters
                || fence.radius_meters > self.defaults.max_geo_radius_meters
            {
                return Err(Error::Validation(format!(
                    "geo radius {} outside allowed range [{}, {}]",
                    fence.radius_meters,
                    self.defaults.min_geo_radius_meters,
                    self.defaults.max_geo_radius_meters
                )));
            }
        }

        let (secret, commitment) = lottery::generate_secret();
        let now = OffsetDateTime::now_utc();

        let config = DropConfig {
            inventory: request.inventory,
            registration_start: request.registration_start,
            registration_end: request.registration_end,
            purchase_window_secs: request
                .purchase_window_secs
                .unwrap_or(self.defaults.purchase_window_secs),
            ticket_price_unit: request
                .ticket_price_unit
                .unwrap_or_else(|| self.defaults.default_ticket_price_unit.clone()),
            max_tickets_per_user: request
                .max_tickets_per_user
                .unwrap_or(self.defaults.default_max_tickets_per_user),
            backup_multiplier: request
                .backup_multiplier
                .unwrap_or(self.defaults.default_backup_multiplier),
            geo_fence: request.geo_fence,
        };

        let data = DropData {
            drop_id: request.drop_id.clone(),
            config: config.clone(),
            inventory: request.inventory,
            initial_inventory: request.inventory,
            participant_tickets: HashMap::new(),
            participant_multipliers: HashMap::new(),
            winners: Vec::new(),
            backup_winners: VecDeque::new(),
            expired_winners: Vec::new(),
            lottery_secret: secret,
            lottery_commitment: commitment.clone(),
            lottery_proof: None,
            purchase_end: None,
            created_at: now,
        };

        let status = DropStatus::new_registration(data);
        self.store.upsert(&status).await?;
        self.store
            .upsert_index(&DropIndexEntry {
                drop_id: request.drop_id.clone(),
                created_at: now,
                registration_start: config.registration_start,
                registration_end: config.registration_end,
                purchase_window_secs: config.purchase_window_secs,
            })
            .await?;
        self.publish(&status).await;

        self.scheduler
            .schedule(config.registration_end, &request.drop_id, "run_lottery", Vec::new())
            .await?;

        Ok(InitializeResult {
            drop_id: request.drop_id,
            commitment,
        })
    }

    pub async fn register(
        &self,
        drop_id: &str,
        request: RegisterRequest,
    ) -> Result<RegisterResult, Error> {
        let lock = self.lock_for(drop_id).await;
        let _guard = lock.lock().await;

        self.queue.consume_token(drop_id, &request.token).await?;

        let mut status = self.load(drop_id).await?;
        let registration = match &status {
            DropStatus::Registration(r) => r,
            _ => return Err(Error::Conflict("drop not accepting registrations".to_string())),
        };

        let now = OffsetDateTime::now_utc();
        if now < registration.data.config.registration_start || now >= registration.data.config.registration_end {
            return Err(Error::Conflict("registration window closed".to_string()));
        }
        if registration.data.participant_tickets.contains_key(&request.user_id) {
            return Err(Error::Conflict("already registered".to_string()));
        }

        let trust = score_trust(
            &TrustInput {
                fingerprint: request.fingerprint.clone(),
                fingerprint_confidence: request.fingerprint_confidence,
                timing_ms: request.timing_ms,
                pow_verified: request.pow_verified,
                behavior_score: request.behavior_score,
            },
            self.defaults.trust_score_threshold,
            self.defaults.fingerprint_confidence_threshold,
        );
        if !trust.allowed {
            return Err(Error::Forbidden(
                trust.reason.unwrap_or_else(|| "trust score rejected".to_string()),
            ));
        }

        let (geo_bonus, in_geo_zone) = match &registration.data.config.geo_fence {
            Some(fence) => {
                let (lat, lng) = request
                    .location
                    .ok_or_else(|| Error::Validation("location required by geo fence".to_string()))?;
                let inside = inside_geo_fence(fence, lat, lng);
                match fence.mode {
                    GeoMode::Exclusive if !inside => {
                        return Err(Error::Forbidden("outside geo-fenced zone".to_string()))
                    }
                    GeoMode::Exclusive => (1.0, true),
                    GeoMode::Bonus => {
                        if inside {
                            (fence.bonus_multiplier, true)
                        } else {
                            (1.0, false)
                        }
                    }
                }
            }
            None => (1.0, false),
        };

        let desired = request
            .desired_tickets
            .clamp(1, registration.data.config.max_tickets_per_user);

        let (rollover_used, _remaining) = self.rollovers.consume_rollover(&request.user_id, desired).await?;
        let free_entry = if rollover_used < desired { 1 } else { 0 };
        let paid_entries = desired.saturating_sub(rollover_used).saturating_sub(free_entry);
        let actual_tickets = rollover_used + free_entry + paid_entries;

        let (loyalty_tier, loyalty_multiplier) = self
            .loyalties
            .get_multiplier(
                &request.user_id,
                self.defaults.silver_threshold,
                self.defaults.gold_threshold,
                self.defaults.silver_multiplier,
                self.defaults.gold_multiplier,
            )
            .await?;

        let combined_multiplier = loyalty_multiplier * geo_bonus;
        let effective_tickets = (actual_tickets as f64 * combined_multiplier).floor() as u64;
        let position = status.data().participant_count() as u64 + 1;

        let data = status.data_mut();
        data.participant_tickets.insert(request.user_id.clone(), actual_tickets);
        data.participant_multipliers.insert(request.user_id.clone(), combined_multiplier);

        self.store.upsert(&status).await?;
        self.participants
            .set_registered(
                drop_id,
                &request.user_id,
                position,
                actual_tickets,
                effective_tickets,
                rollover_used,
                paid_entries,
                loyalty_tier.as_str(),
                loyalty_multiplier,
            )
            .await?;
        self.publish(&status).await;

        let data = status.data();
        Ok(RegisterResult {
            participant_count: data.participant_count() as u64,
            total_tickets: data.total_tickets() as u64,
            user_tickets: actual_tickets,
            effective_tickets,
            position,
            rollover_used,
            paid_entries,
            loyalty_tier: loyalty_tier.as_str().to_string(),
            loyalty_multiplier,
            geo_bonus,
            in_geo_zone,
        })
    }

    pub async fn run_lottery(&self, drop_id: &str) -> Result<RunLotteryResult, Error> {
        let lock = self.lock_for(drop_id).await;
        let _guard = lock.lock().await;

        let mut status = self.load(drop_id).await?;
        if !matches!(status, DropStatus::Registration(_)) {
            let data = status.data();
            let primary_winners = data.winners.len();
            return Ok(RunLotteryResult {
                participant_count: data.participant_count() as u64,
                total_tickets: data.total_tickets() as u64,
                primary_winners,
                total_selected: primary_winners + data.backup_winners.len(),
                winners: data.winners.clone(),
                backup_winners: data.backup_winners.iter().cloned().collect(),
            });
        }

        let registration = match status {
            DropStatus::Registration(r) => r,
            _ => unreachable!(),
        };

        let mut user_ids: Vec<String> = registration.data.participant_tickets.keys().cloned().collect();
        user_ids.sort();
        let leaves: Vec<LotteryLeaf> = user_ids
            .iter()
            .enumerate()
            .map(|(index, user_id)| {
                let tickets = registration.data.participant_tickets[user_id];
                let multiplier = registration.data.participant_multipliers[user_id];
                LotteryLeaf {
                    user_id: user_id.clone(),
                    effective_tickets: (tickets as f64 * multiplier).floor() as u64,
                    index,
                }
            })
            .collect();

        let participant_count = leaves.len();
        let primary_winners = registration.data.inventory.min(participant_count as u32) as usize;
        let total_selected =
            ((primary_winners as f64 * registration.data.config.backup_multiplier).ceil() as usize).min(participant_count);

        let (merkle_root_hex, seed_hex, selected) =
            lottery::run_lottery(&registration.data.lottery_secret, &leaves, total_selected);

        let winners: Vec<String> = selected.iter().take(primary_winners).cloned().collect();
        let backups: Vec<String> = selected.iter().skip(primary_winners).cloned().collect();
        let losers: Vec<String> = user_ids
            .iter()
            .filter(|u| !selected.contains(u))
            .cloned()
            .collect();

        let now = OffsetDateTime::now_utc();
        let purchase_end = now + Duration::seconds(registration.data.config.purchase_window_secs as i64);

        let proof = LotteryProof {
            commitment: registration.data.lottery_commitment.clone(),
            secret: registration.data.lottery_secret.clone(),
            participant_merkle_root: merkle_root_hex,
            participant_count,
            seed: seed_hex,
            algorithm: lottery::ALGORITHM.to_string(),
            timestamp: now,
            winners: winners.clone(),
            backup_winners: backups.clone(),
        };

        let mut data = registration.data;
        data.winners = winners.clone();
        data.backup_winners = backups.clone().into();
        data.lottery_proof = Some(proof);
        data.purchase_end = Some(purchase_end);

        let lottery_phase = states::Lottery::from_data(data).into_purchase();
        self.store.upsert(&lottery_phase).await?;

        for user_id in &winners {
            self.participants.notify_result(drop_id, user_id, true).await?;
            self.loyalties.record_participation(user_id, drop_id).await?;
        }
        for user_id in &backups {
            self.participants.notify_backup(drop_id, user_id).await?;
            self.loyalties.record_participation(user_id, drop_id).await?;
        }
        for user_id in &losers {
            self.participants.notify_result(drop_id, user_id, false).await?;
            self.loyalties.record_participation(user_id, drop_id).await?;
            if let Some(participant) = self.participants.get(drop_id, user_id).await? {
                if participant.paid_entries > 0 {
                    self.rollovers
                        .add_rollover(user_id, participant.paid_entries, self.defaults.max_rollover_balance)
                        .await?;
                }
            }
        }

        self.publish(&lottery_phase).await;
        self.scheduler
            .schedule(purchase_end, drop_id, "close_purchase_window", Vec::new())
            .await?;

        Ok(RunLotteryResult {
            participant_count: participant_count as u64,
            total_tickets: lottery_phase.data().total_tickets() as u64,
            primary_winners,
            total_selected,
            winners,
            backup_winners: backups,
        })
    }

    pub async fn start_purchase(&self, drop_id: &str, user_id: &str) -> Result<StartPurchaseResult, Error> {
        let lock = self.lock_for(drop_id).await;
        let _guard = lock.lock().await;
        let status = self.load(drop_id).await?;
        self.start_purchase_locked(drop_id, user_id, &status).await
    }

    async fn start_purchase_locked(
        &self,
        drop_id: &str,
        user_id: &str,
        status: &DropStatus,
    ) -> Result<StartPurchaseResult, Error> {
        if !matches!(status, DropStatus::Purchase(_)) {
            return Err(Error::Conflict("drop is not in the purchase phase".to_string()));
        }
        let data = status.data();
        if !data.winners.iter().any(|w| w == user_id) {
            return Err(Error::Forbidden("not a winner".to_string()));
        }
        if data.inventory == 0 {
            return Err(Error::Gone("inventory depleted".to_string()));
        }

        let now = OffsetDateTime::now_utc();
        let fresh_window = now + Duration::seconds(data.config.purchase_window_secs as i64);
        let expires_at = data.purchase_end.map_or(fresh_window, |end| end.min(fresh_window));

        let token = mint_purchase_token(&self.secret_key, drop_id, user_id, expires_at);
        self.participants
            .set_token(drop_id, user_id, token.to_string(), expires_at)
            .await?;
        self.scheduler
            .schedule(
                expires_at,
                drop_id,
                "check_winner_expiry",
                user_id.as_bytes().to_vec(),
            )
            .await?;

        Ok(StartPurchaseResult {
            purchase_token: token.to_string(),
            expires_at,
        })
    }

    pub async fn complete_purchase(
        &self,
        drop_id: &str,
        user_id: &str,
        token: &str,
    ) -> Result<CompletePurchaseResult, Error> {
        let lock = self.lock_for(drop_id).await;
        let _guard = lock.lock().await;

        let mut status = self.load(drop_id).await?;
        if !matches!(status, DropStatus::Purchase(_)) {
            return Err(Error::Conflict("drop is not in the purchase phase".to_string()));
        }
        if status.data().inventory == 0 {
            return Err(Error::Gone("inventory depleted".to_string()));
        }

        self.participants
            .complete_purchase(drop_id, user_id, token, &self.secret_key)
            .await?;

        let data = status.data_mut();
        data.inventory -= 1;
        let exhausted = data.inventory == 0;

        let status = if exhausted {
            let purchase = match status {
                DropStatus::Purchase(p) => p,
                _ => unreachable!(),
            };
            let completed = purchase.into_completed();
            self.store.delete_index(drop_id).await?;
            completed
        } else {
            status
        };

        self.store.upsert(&status).await?;
        self.publish(&status).await;

        Ok(CompletePurchaseResult {
            inventory: status.data().inventory,
            phase: status.phase_name().to_string(),
        })
    }

    pub async fn check_winner_expiry(&self, drop_id: &str, user_id: &str) -> Result<CheckExpiryResult, Error> {
        let lock = self.lock_for(drop_id).await;
        let _guard = lock.lock().await;

        let mut status = self.load(drop_id).await?;
        if !matches!(status, DropStatus::Purchase(_)) || !status.data().winners.iter().any(|w| w == user_id) {
            return Ok(CheckExpiryResult {
                expired: false,
                promoted: None,
            });
        }

        if let Some(participant) = self.participants.get(drop_id, user_id).await? {
            if participant.status == ParticipantStatus::Purchased {
                return Ok(CheckExpiryResult {
                    expired: false,
                    promoted: None,
                });
            }
        }

        let data = status.data_mut();
        data.winners.retain(|w| w != user_id);
        data.expired_winners.push(user_id.to_string());
        self.participants.notify_expiry(drop_id, user_id).await?;

        let promoted = self.promote_next_backup(drop_id, &mut status).await?;

        self.store.upsert(&status).await?;
        self.publish(&status).await;

        if let Some(promoted_id) = &promoted {
            self.start_purchase_locked(drop_id, promoted_id, &status).await?;
        }

        Ok(CheckExpiryResult {
            expired: true,
            promoted,
        })
    }

    pub async fn promote_backup(&self, drop_id: &str) -> Result<CheckExpiryResult, Error> {
        let lock = self.lock_for(drop_id).await;
        let _guard = lock.lock().await;

        let mut status = self.load(drop_id).await?;
        if !matches!(status, DropStatus::Purchase(_)) {
            return Err(Error::Conflict("drop is not in the purchase phase".to_string()));
        }

        let promoted = self.promote_next_backup(drop_id, &mut status).await?;
        self.store.upsert(&status).await?;
        self.publish(&status).await;

        if let Some(promoted_id) = &promoted {
            self.start_purchase_locked(drop_id, promoted_id, &status).await?;
        }

        Ok(CheckExpiryResult {
            expired: false,
            promoted,
        })
    }

    async fn promote_next_backup(&self, drop_id: &str, status: &mut DropStatus) -> Result<Option<String>, Error> {
        let data = status.data_mut();
        if data.inventory == 0 {
            return Ok(None);
        }
        let Some(promoted) = data.backup_winners.pop_front() else {
            return Ok(None);
        };
        data.winners.push(promoted.clone());
        self.participants.notify_promotion(drop_id, &promoted).await?;
        Ok(Some(promoted))
    }

    pub async fn close_purchase_window(&self, drop_id: &str) -> Result<ClosePurchaseWindowResult, Error> {
        let lock = self.lock_for(drop_id).await;
        let _guard = lock.lock().await;

        let status = self.load(drop_id).await?;
        let purchase = match status {
            DropStatus::Purchase(p) => p,
            other => {
                return Ok(ClosePurchaseWindowResult {
                    phase: other.phase_name().to_string(),
                })
            }
        };

        let completed = purchase.into_completed();
        self.store.delete_index(drop_id).await?;
        self.store.upsert(&completed).await?;
        self.publish(&completed).await;

        Ok(ClosePurchaseWindowResult {
            phase: completed.phase_name().to_string(),
        })
    }

    pub async fn get_lottery_proof(&self, drop_id: &str) -> Result<LotteryProofResult, Error> {
        let status = self.load(drop_id).await?;
        let data = status.data();
        Ok(LotteryProofResult {
            commitment: data.lottery_commitment.clone(),
            proof: data.lottery_proof.clone(),
        })
    }

    pub async fn get_inclusion_proof(&self, drop_id: &str, user_id: &str) -> Result<InclusionProofResult, Error> {
        let status = self.load(drop_id).await?;
        let data = status.data();
        let proof = data
            .lottery_proof
            .as_ref()
            .ok_or_else(|| Error::Internal("lottery commitment absent when expected".to_string()))?;

        let mut user_ids: Vec<String> = data.participant_tickets.keys().cloned().collect();
        user_ids.sort();
        let leaves: Vec<LotteryLeaf> = user_ids
            .iter()
            .enumerate()
            .map(|(index, uid)| LotteryLeaf {
                user_id: uid.clone(),
                effective_tickets: (data.participant_tickets[uid] as f64 * data.participant_multipliers[uid]).floor()
                    as u64,
                index,
            })
            .collect();

        let leaf_index = user_ids
            .iter()
            .position(|u| u == user_id)
            .ok_or_else(|| Error::NotFound(format!("participant {user_id} not found")))?;

        let merkle_root: [u8; 32] = hex::decode(&proof.participant_merkle_root)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::Internal("stored merkle root is malformed".to_string()))?;

        let inclusion = lottery::verify_inclusion(&leaves, leaf_index, &merkle_root);
        let leaf = leaves[leaf_index].clone();
        let leaf_hash = hex::encode(leaf.leaf_hash());

        Ok(InclusionProofResult {
            verified: inclusion.is_some(),
            proof: inclusion
                .map(|p| {
                    p.siblings
                        .iter()
                        .map(|(hash, side)| (hex::encode(hash), format!("{side:?}").to_lowercase()))
                        .collect()
                })
                .unwrap_or_default(),
            leaf,
            leaf_hash,
            merkle_root: proof.participant_merkle_root.clone(),
        })
    }

    pub async fn get_state(&self, drop_id: &str) -> Result<DropState, Error> {
        Ok(self.load(drop_id).await?.public_state())
    }

    pub async fn list_index(&self) -> Result<Vec<DropIndexEntry>, Error> {
        self.store.list_index().await
    }
}

#[async_trait]
impl TaskHandler for DropRegistry {
    async fn handle_task(&self, actor_key: &str, handler: &str, payload: &[u8]) -> Result<(), Error> {
        match handler {
            "run_lottery" => {
                self.run_lottery(actor_key).await?;
            }
            "close_purchase_window" => {
                self.close_purchase_window(actor_key).await?;
            }
            "check_winner_expiry" => {
                let user_id = std::str::from_utf8(payload)
                    .map_err(|e| Error::Internal(e.to_string()))?;
                self.check_winner_expiry(actor_key, user_id).await?;
            }
            other => return Err(Error::Internal(format!("unknown scheduled handler: {other}"))),
        }
        Ok(())
    }
}
