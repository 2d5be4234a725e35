pub mod drop;
pub mod error;
pub mod geo;
pub mod loyalty;
pub mod lottery;
pub mod notifier;
pub mod participant;
pub mod queue;
pub mod rollover;
pub mod scheduler;
pub mod token;
pub mod trust;

pub use drop::{DropConfig, DropRegistry, DropState, DropStatus, DropStore};
pub use error::Error;
pub use geo::{inside_geo_fence, GeoFence, GeoMode};
pub use loyalty::{LoyaltyStore, LoyaltyTier, UserLoyalty};
pub use lottery::{run_lottery, LotteryProof};
pub use notifier::{DropEvent, InMemoryNotifier, Notifier};
pub use participant::{Participant, ParticipantStatus, ParticipantStore};
pub use queue::{AdmissionLoop, QueueStatus, QueueToken, QueueStore};
pub use rollover::{RolloverStore, UserRollover};
pub use scheduler::{ScheduledTask, SchedulerLoop, SchedulerStore, TaskHandler};
pub use token::{mint_purchase_token, verify_purchase_token, PurchaseToken};
pub use trust::{score_trust, TrustInput, TrustResult};
