//! Typestate phase machine for a drop: `Registration → Lottery → Purchase →
//! Completed`. Each phase is a distinct struct wrapping the full
//! `DropData`; transitions consume `self` and return the wrapper enum, so
//! an invalid transition (e.g. registering during `Completed`) is a type
//! error rather than a runtime check.

use super::data::{DropData, DropState};
use serde::{Deserialize, Serialize};

pub trait HasDropData {
    fn data(&self) -> &DropData;
    fn data_mut(&mut self) -> &mut DropData;
    fn into_data(self) -> DropData;
}

macro_rules! phase_struct {
    ($name:ident) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub data: DropData,
        }

        impl $name {
            pub fn from_data(data: DropData) -> Self {
                Self { data }
            }
        }

        impl HasDropData for $name {
            fn data(&self) -> &DropData {
                &self.data
            }
            fn data_mut(&mut self) -> &mut DropData {
                &mut self.data
            }
            fn into_data(self) -> DropData {
                self.data
            }
        }
    };
}

phase_struct!(Registration);
phase_struct!(Lottery);
phase_struct!(Purchase);
phase_struct!(Completed);

impl Registration {
    pub fn into_lottery(self) -> DropStatus {
        DropStatus::Lottery(Lottery::from_data(self.data))
    }
}

impl Lottery {
    pub fn into_purchase(self) -> DropStatus {
        DropStatus::Purchase(Purchase::from_data(self.data))
    }
}

impl Purchase {
    pub fn into_completed(self) -> DropStatus {
        DropStatus::Completed(Completed::from_data(self.data))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase")]
pub enum DropStatus {
    Registration(Registration),
    Lottery(Lottery),
    Purchase(Purchase),
    Completed(Completed),
}

impl DropStatus {
    pub fn new_registration(data: DropData) -> Self {
        DropStatus::Registration(Registration::from_data(data))
    }

    pub fn phase_name(&self) -> &'static str {
        match self {
            DropStatus::Registration(_) => "registration",
            DropStatus::Lottery(_) => "lottery",
            DropStatus::Purchase(_) => "purchase",
            DropStatus::Completed(_) => "completed",
        }
    }

    pub fn data(&self) -> &DropData {
        match self {
            DropStatus::Registration(s) => s.data(),
            DropStatus::Lottery(s) => s.data(),
            DropStatus::Purchase(s) => s.data(),
            DropStatus::Completed(s) => s.data(),
        }
    }

    pub fn data_mut(&mut self) -> &mut DropData {
        match self {
            DropStatus::Registration(s) => s.data_mut(),
            DropStatus::Lottery(s) => s.data_mut(),
            DropStatus::Purchase(s) => s.data_mut(),
            DropStatus::Completed(s) => s.data_mut(),
        }
    }

    pub fn public_state(&self) -> DropState {
        let data = self.data();
        DropState {
            drop_id: data.drop_id.clone(),
            phase: self.phase_name().to_string(),
            participant_count: data.participant_count() as u64,
            total_tickets: data.total_tickets() as u64,
            inventory: data.inventory,
            initial_inventory: data.initial_inventory,
            registration_end: data.config.registration_end,
            purchase_end: data.purchase_end,
            lottery_commitment: Some(data.lottery_commitment.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::drop::data::DropConfig;
    use time::OffsetDateTime;

    fn sample_data() -> DropData {
        DropData {
            drop_id: "drop-1".to_string(),
            config: DropConfig {
                inventory: 10,
                registration_start: OffsetDateTime::now_utc(),
                registration_end: OffsetDateTime::now_utc(),
                purchase_window_secs: 60,
                ticket_price_unit: "usd".to_string(),
                max_tickets_per_user: 5,
                backup_multiplier: 1.5,
                geo_fence: None,
            },
            inventory: 10,
            initial_inventory: 10,
            participant_tickets: Default::default(),
            participant_multipliers: Default::default(),
            winners: Vec::new(),
            backup_winners: Default::default(),
            expired_winners: Vec::new(),
            lottery_secret: "ab".to_string(),
            lottery_commitment: "cd".to_string(),
            lottery_proof: None,
            purchase_end: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn phases_only_advance_forward() {
        let status = DropStatus::new_registration(sample_data());
        assert_eq!(status.phase_name(), "registration");

        let status = match status {
            DropStatus::Registration(r) => r.into_lottery(),
            _ => unreachable!(),
        };
        assert_eq!(status.phase_name(), "lottery");

        let status = match status {
            DropStatus::Lottery(l) => l.into_purchase(),
            _ => unreachable!(),
        };
        assert_eq!(status.phase_name(), "purchase");

        let status = match status {
            DropStatus::Purchase(p) => p.into_completed(),
            _ => unreachable!(),
        };
        assert_eq!(status.phase_name(), "completed");
    }
}
