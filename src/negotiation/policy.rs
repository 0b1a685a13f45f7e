//! Rate tolerance policy

use serde::{Deserialize, Serialize};

/// Absolute tolerance used when comparing two dollar amounts
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Tolerance added per round, as a fraction of the reference rate
pub const DEFAULT_TOLERANCE_STEP: f64 = 0.05;

/// Rounds after which tolerance stops growing and the broker stops countering
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// Absolute ceiling above the reference rate, as a fraction
pub const DEFAULT_HARD_CAP_RATIO: f64 = 0.15;

/// Pricing rules applied by the negotiation engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationPolicy {
    pub tolerance_step: f64,
    pub max_rounds: u32,
    pub hard_cap_ratio: f64,
    pub epsilon: f64,
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self {
            tolerance_step: DEFAULT_TOLERANCE_STEP,
            max_rounds: DEFAULT_MAX_ROUNDS,
            hard_cap_ratio: DEFAULT_HARD_CAP_RATIO,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl NegotiationPolicy {
    /// Round number used for tolerance math, clamped to `1..=max_rounds`
    pub fn effective_round(&self, round_number: u32) -> u32 {
        round_number.clamp(1, self.max_rounds.max(1))
    }

    /// Highest rate the broker accepts in the given round
    pub fn max_acceptable(&self, reference_rate: f64, round_number: u32) -> f64 {
        let r = self.effective_round(round_number) as f64;
        round_to_cents(reference_rate * (1.0 + self.tolerance_step * r))
    }

    /// Ceiling beyond which no further concession is made
    pub fn hard_cap(&self, reference_rate: f64) -> f64 {
        round_to_cents(reference_rate * (1.0 + self.hard_cap_ratio))
    }

    /// Whether the round is the last one in which a counter is possible
    pub fn is_final_round(&self, round_number: u32) -> bool {
        self.effective_round(round_number) >= self.max_rounds
    }

    pub fn same_amount(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.epsilon
    }

    pub fn at_most(&self, amount: f64, ceiling: f64) -> bool {
        amount <= ceiling + self.epsilon
    }

    /// Reject values that would make the engine's arithmetic meaningless
    pub fn validate(&self) -> Result<(), String> {
        if !(self.tolerance_step.is_finite() && self.tolerance_step > 0.0) {
            return Err(format!(
                "tolerance_step must be positive, got {}",
                self.tolerance_step
            ));
        }
        if self.max_rounds == 0 {
            return Err("max_rounds must be at least 1".to_string());
        }
        if !(self.hard_cap_ratio.is_finite() && self.hard_cap_ratio > 0.0) {
            return Err(format!(
                "hard_cap_ratio must be positive, got {}",
                self.hard_cap_ratio
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(format!("epsilon must be positive, got {}", self.epsilon));
        }
        Ok(())
    }
}

/// Round to two decimal places, half away from zero
pub fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
