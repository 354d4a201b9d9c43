//! Safe scaling decisions: cooldown enforcement, per-direction step caps,
//! and absolute bound clamping between a policy's desired count and the
//! actual workload write.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use pkg_types::intent::ScalingBehavior;
use tracing::{debug, info};

/// The gate's verdict for one tick: whether to write, what to write, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub act: bool,
    pub target: u32,
    pub reason: String,
}

impl Decision {
    fn hold(current: u32, reason: &str) -> Self {
        Self {
            act: false,
            target: current,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Stateful decision gate between policy output and the workload write.
///
/// The per-intent cooldown clock is the only mutable state. It is monotonic
/// (`Instant`), partitioned by intent key, and advanced exclusively through
/// [`SafeScaler::record_scale`] after a confirmed write, never speculatively.
/// All upstream failures stop the tick before this gate is consulted, so
/// `decide` itself cannot fail.
pub struct SafeScaler {
    last_scale: DashMap<String, Instant>,
}

impl SafeScaler {
    pub fn new() -> Self {
        Self {
            last_scale: DashMap::new(),
        }
    }

    /// Gate a policy's desired count. Order matters: equality short-circuit,
    /// cooldown, step cap, bound clamp, clamped-to-current short-circuit.
    pub fn decide(
        &self,
        intent_key: &str,
        current: u32,
        desired: u32,
        min: u32,
        max: u32,
        behavior: &ScalingBehavior,
        now: Instant,
    ) -> Decision {
        if desired == current {
            return Decision::hold(current, "at desired replica count");
        }

        let direction = if desired > current {
            Direction::Up
        } else {
            Direction::Down
        };
        let (cooldown_seconds, step_cap) = match direction {
            Direction::Up => (
                behavior.scale_up.cooldown_seconds,
                behavior.scale_up.max_increment,
            ),
            Direction::Down => (
                behavior.scale_down.cooldown_seconds,
                behavior.scale_down.max_decrement,
            ),
        };

        if let Some(last) = self.last_scale.get(intent_key) {
            let elapsed = now.duration_since(*last);
            let cooldown = Duration::from_secs(u64::from(cooldown_seconds));
            if elapsed < cooldown {
                debug!(
                    "{}: in cooldown, {}s remaining",
                    intent_key,
                    (cooldown - elapsed).as_secs()
                );
                return Decision::hold(current, "in cooldown period");
            }
        }

        let change = current.abs_diff(desired);
        let mut target = if change > step_cap {
            info!(
                "{}: rate limiting change of {} to step cap {}",
                intent_key, change, step_cap
            );
            match direction {
                Direction::Up => current + step_cap,
                Direction::Down => current.saturating_sub(step_cap),
            }
        } else {
            desired
        };

        target = target.clamp(min, max);

        if target == current {
            return Decision::hold(current, "clamped to current replica count");
        }

        let verb = match direction {
            Direction::Up => "up",
            Direction::Down => "down",
        };
        Decision {
            act: true,
            target,
            reason: format!("scaling {} from {} to {}", verb, current, target),
        }
    }

    /// Record a confirmed replica write. Called by the reconciler only after
    /// the workload API acknowledged the mutation.
    pub fn record_scale(&self, intent_key: &str, at: Instant) {
        self.last_scale.insert(intent_key.to_string(), at);
    }

    /// Seed the cooldown clock from a wall-clock `lastScaleTime` observed on
    /// the intent's status, shrinking the post-restart unenforced window.
    pub fn seed(&self, intent_key: &str, elapsed_since_last_scale: Duration, now: Instant) {
        if let Some(at) = now.checked_sub(elapsed_since_last_scale) {
            self.last_scale.entry(intent_key.to_string()).or_insert(at);
        }
    }

    /// Drop the clock entry for a deleted intent.
    pub fn forget(&self, intent_key: &str) {
        self.last_scale.remove(intent_key);
    }

    pub fn last_scale_at(&self, intent_key: &str) -> Option<Instant> {
        self.last_scale.get(intent_key).map(|entry| *entry)
    }
}

impl Default for SafeScaler {
    fn default() -> Self {
        Self::new()
    }
}
