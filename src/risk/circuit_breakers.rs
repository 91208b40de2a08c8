use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::BotState;

/// Circuit breakers that block new entries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakers {
    pub loss_cooldown_secs: u64,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            loss_cooldown_secs: 0, // Disabled
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerTrip {
    LossCooldown { remaining_secs: i64 },
}

impl CircuitBreakers {
    pub fn check(&self, state: &BotState, now: DateTime<Utc>) -> Result<(), CircuitBreakerTrip> {
        if self.loss_cooldown_secs == 0 {
            return Ok(());
        }

        if let Some(loss_time) = state.last_realized_loss_time {
            let until = loss_time + Duration::seconds(self.loss_cooldown_secs as i64);
            if now < until {
                return Err(CircuitBreakerTrip::LossCooldown {
                    remaining_secs: (until - now).num_seconds(),
                });
            }
        }

        Ok(())
    }
}
