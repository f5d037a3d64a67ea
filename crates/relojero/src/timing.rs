//! Adaptive timing policy.
//!
//! Every wait in the crate routes its budget through [`TimingPolicy`]:
//! a base budget for the operation kind, scaled by the model's timeout
//! multiplier and by any catalogued per-operation extra delay. Slower
//! hardware variants stop producing flaky timeouts and faster variants
//! are not needlessly slowed down. Raw literal waits are a design smell
//! this module exists to eliminate; the only suspension primitive is the
//! bounded predicate poll.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::capability::CapabilityDescriptor;

/// Default polling interval for bounded waits (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Kinds of waitable operations, each with its own base budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// An element becoming present and visible
    ElementAppear,
    /// The save control flipping to enabled after a form change
    SaveEnable,
    /// A save settling (control disabled again, or page reloaded)
    SaveCompletion,
    /// Navigation between configuration sections
    SectionNavigation,
    /// Background requests settling after navigation
    NetworkSettle,
    /// A saved value becoming readable after reload
    ValuePersist,
}

impl OperationKind {
    /// Operation name as used in logs and timeout errors
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ElementAppear => "element-appear",
            Self::SaveEnable => "save-enable",
            Self::SaveCompletion => "save-completion",
            Self::SectionNavigation => "section-navigation",
            Self::NetworkSettle => "network-settle",
            Self::ValuePersist => "value-persist",
        }
    }

    /// Unscaled base budget for this operation on a multiplier-1.0 model
    #[must_use]
    pub const fn base_budget(&self) -> Duration {
        match self {
            Self::ElementAppear => Duration::from_millis(5_000),
            Self::SaveEnable => Duration::from_millis(10_000),
            Self::SaveCompletion => Duration::from_millis(15_000),
            Self::SectionNavigation => Duration::from_millis(30_000),
            Self::NetworkSettle => Duration::from_millis(10_000),
            Self::ValuePersist => Duration::from_millis(3_000),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-model wait budget computation.
///
/// Pure over the descriptor it was built from; cheap to clone and safe to
/// share across protocol runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingPolicy {
    multiplier: f64,
    extra_delays: Vec<(OperationKind, f64)>,
    poll_interval: Duration,
}

impl TimingPolicy {
    /// Policy with a bare multiplier and no catalogued extra delays
    #[must_use]
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier: multiplier.max(1.0),
            extra_delays: Vec::new(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Policy derived from a capability descriptor
    #[must_use]
    pub fn for_descriptor(descriptor: &CapabilityDescriptor) -> Self {
        use crate::capability::Quirk;
        let extra_delays = descriptor
            .known_issues
            .iter()
            .filter_map(|quirk| match quirk {
                Quirk::ExtraDelay { operation, factor } => Some((*operation, *factor)),
                _ => None,
            })
            .collect();
        Self {
            multiplier: descriptor.timeout_multiplier.max(1.0),
            extra_delays,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Override the polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The polling interval for bounded waits
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// The model's timeout multiplier
    #[must_use]
    pub const fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Scale a base budget by the model multiplier only
    #[must_use]
    pub fn scale(&self, base: Duration) -> Duration {
        base.mul_f64(self.multiplier)
    }

    /// Budget for an operation: base × multiplier × catalogued extra delay
    #[must_use]
    pub fn budget(&self, base: Duration, operation: OperationKind) -> Duration {
        let extra: f64 = self
            .extra_delays
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, factor)| *factor)
            .product();
        base.mul_f64(self.multiplier * extra.max(1.0))
    }

    /// Budget for an operation using its standard base
    #[must_use]
    pub fn operation_budget(&self, operation: OperationKind) -> Duration {
        self.budget(operation.base_budget(), operation)
    }
}

/// Outcome of a bounded predicate poll.
#[derive(Debug, Clone)]
pub struct WaitReport {
    /// Whether the predicate was satisfied within budget
    pub satisfied: bool,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Description of what was waited for
    pub waited_for: String,
}

/// Poll a predicate until it holds or the budget is exhausted.
///
/// The predicate is checked immediately, then once per poll interval. The
/// wait never exceeds `budget` by more than one interval and never hangs;
/// an exhausted budget is a normal, typed outcome for the caller to
/// interpret (the mutation protocol turns it into a finding and proceeds
/// to rollback rather than propagating).
pub fn poll_until(
    budget: Duration,
    interval: Duration,
    waited_for: impl Into<String>,
    mut predicate: impl FnMut() -> bool,
) -> WaitReport {
    let start = Instant::now();
    let waited_for = waited_for.into();
    loop {
        if predicate() {
            return WaitReport {
                satisfied: true,
                elapsed: start.elapsed(),
                waited_for,
            };
        }
        if start.elapsed() >= budget {
            return WaitReport {
                satisfied: false,
                elapsed: start.elapsed(),
                waited_for,
            };
        }
        std::thread::sleep(interval.min(budget.saturating_sub(start.elapsed())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityRegistry;
    use proptest::prelude::*;

    mod budget_tests {
        use super::*;

        #[test]
        fn test_multiplier_scales_budget() {
            // Series 3 model catalogued at 1.5x: 2000ms base becomes 3000ms
            let registry = CapabilityRegistry::builtin();
            let descriptor = registry.resolve("KRONOS-3R-HVLV-TCXO-A2F").unwrap();
            let policy = TimingPolicy::for_descriptor(descriptor);
            assert_eq!(
                policy.budget(Duration::from_millis(2000), OperationKind::ElementAppear),
                Duration::from_millis(3000)
            );
        }

        #[test]
        fn test_baseline_model_is_unscaled() {
            let registry = CapabilityRegistry::builtin();
            let descriptor = registry.resolve("KRONOS-2R-HVXX-A2F").unwrap();
            let policy = TimingPolicy::for_descriptor(descriptor);
            assert_eq!(
                policy.budget(Duration::from_millis(2000), OperationKind::ElementAppear),
                Duration::from_millis(2000)
            );
        }

        #[test]
        fn test_extra_delay_applies_to_matching_operation_only() {
            let registry = CapabilityRegistry::builtin();
            let descriptor = registry.resolve("KRONOS-3R-HVXX-TCXO-44A").unwrap();
            let policy = TimingPolicy::for_descriptor(descriptor);
            // 2.0 multiplier, 1.5 extra on navigation
            assert_eq!(
                policy.budget(Duration::from_millis(1000), OperationKind::SectionNavigation),
                Duration::from_millis(3000)
            );
            assert_eq!(
                policy.budget(Duration::from_millis(1000), OperationKind::SaveCompletion),
                Duration::from_millis(2000)
            );
        }

        #[test]
        fn test_operation_budget_uses_standard_base() {
            let policy = TimingPolicy::new(1.0);
            assert_eq!(
                policy.operation_budget(OperationKind::SaveEnable),
                Duration::from_millis(10_000)
            );
        }

        #[test]
        fn test_submultiplier_clamped_to_one() {
            let policy = TimingPolicy::new(0.25);
            assert_eq!(
                policy.scale(Duration::from_millis(1000)),
                Duration::from_millis(1000)
            );
        }
    }

    mod poll_tests {
        use super::*;
        use std::sync::atomic::{AtomicU32, Ordering};

        #[test]
        fn test_immediate_satisfaction() {
            let report = poll_until(
                Duration::from_millis(100),
                Duration::from_millis(1),
                "always true",
                || true,
            );
            assert!(report.satisfied);
            assert!(report.elapsed < Duration::from_millis(100));
        }

        #[test]
        fn test_satisfied_after_a_few_polls() {
            let calls = AtomicU32::new(0);
            let report = poll_until(
                Duration::from_millis(500),
                Duration::from_millis(1),
                "third call",
                || calls.fetch_add(1, Ordering::SeqCst) >= 2,
            );
            assert!(report.satisfied);
        }

        #[test]
        fn test_timeout_is_a_typed_outcome() {
            let report = poll_until(
                Duration::from_millis(10),
                Duration::from_millis(1),
                "never true",
                || false,
            );
            assert!(!report.satisfied);
            assert!(report.elapsed >= Duration::from_millis(10));
            assert_eq!(report.waited_for, "never true");
        }
    }

    mod property_tests {
        use super::*;

        proptest! {
            /// Budget ordering follows multiplier ordering for any base
            #[test]
            fn prop_budget_monotone_in_multiplier(
                base_ms in 1u64..60_000,
                lo in 1.0f64..4.0,
                delta in 0.1f64..4.0,
            ) {
                let slow = TimingPolicy::new(lo + delta);
                let fast = TimingPolicy::new(lo);
                let base = Duration::from_millis(base_ms);
                prop_assert!(
                    fast.budget(base, OperationKind::ElementAppear)
                        < slow.budget(base, OperationKind::ElementAppear)
                );
            }

            /// A budget never shrinks below its base
            #[test]
            fn prop_budget_at_least_base(
                base_ms in 1u64..60_000,
                multiplier in 0.0f64..4.0,
            ) {
                let policy = TimingPolicy::new(multiplier);
                let base = Duration::from_millis(base_ms);
                prop_assert!(policy.budget(base, OperationKind::SaveEnable) >= base);
            }
        }
    }
}
