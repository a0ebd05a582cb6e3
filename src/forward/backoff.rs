use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay between retry attempts. Every shape is monotonically
/// non-decreasing in the attempt number, so a degraded remote is never
/// hammered faster over time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_secs: f64 },
    Linear { step_secs: f64, cap_secs: f64 },
    Exponential { initial_secs: f64, cap_secs: f64 },
}

impl Default for Backoff {
    // Matches the deployed relay: 2s per completed attempt, capped at 6s.
    fn default() -> Self {
        Backoff::Linear {
            step_secs: 2.0,
            cap_secs: 6.0,
        }
    }
}

impl Backoff {
    /// Delay to sleep after `completed_attempts` attempts have failed
    /// (so the first retry passes 1).
    pub fn delay_for(&self, completed_attempts: u32) -> Duration {
        let n = completed_attempts.max(1);
        let secs = match self {
            Backoff::Fixed { delay_secs } => *delay_secs,
            Backoff::Linear {
                step_secs,
                cap_secs,
            } => (step_secs * f64::from(n)).min(*cap_secs),
            Backoff::Exponential {
                initial_secs,
                cap_secs,
            } => (initial_secs * 2f64.powi(n.saturating_sub(1).min(32) as i32)).min(*cap_secs),
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}
