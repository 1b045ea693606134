//! Core data types for batch execution.
//!
//! This module defines the executor configuration, the value a
//! transformation hands back, and the outcome of a whole batch.

use crate::error::{EscalatedFailure, ItemFailure};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on concurrent units, whatever the core count says.
pub const MAX_CONCURRENCY: usize = 1024;

/// Default multiple of available cores used as the concurrency bound.
pub const DEFAULT_CONCURRENCY_MULTIPLIER: usize = 2;

/// Configuration options for batch execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorConfig {
    /// Maximum number of units executing at once.
    /// Default: `concurrency_multiplier × available cores`
    pub max_concurrency: usize,

    /// Multiple of available cores used when no explicit bound is set.
    /// Default: 2
    pub concurrency_multiplier: usize,

    /// Stop submitting new units once a unit has escalated.
    /// Default: false (every non-skipped item is still dispatched)
    pub stop_on_escalation: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: crate::utils::default_concurrency(DEFAULT_CONCURRENCY_MULTIPLIER),
            concurrency_multiplier: DEFAULT_CONCURRENCY_MULTIPLIER,
            stop_on_escalation: false,
        }
    }
}

impl ExecutorConfig {
    /// Set an explicit concurrency bound.
    ///
    /// Clamped to `1..=MAX_CONCURRENCY`.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    /// Set the per-core multiplier.
    ///
    /// The bound is re-derived as `multiplier × available cores` only while
    /// it still follows the previous multiplier; a bound set through
    /// [`with_concurrency`](Self::with_concurrency) is kept.
    pub fn with_multiplier(mut self, multiplier: usize) -> Self {
        let derived = crate::utils::default_concurrency(self.concurrency_multiplier);
        self.concurrency_multiplier = multiplier.max(1);
        if self.max_concurrency == derived {
            self.max_concurrency = crate::utils::default_concurrency(self.concurrency_multiplier);
        }
        self
    }

    /// Enable or disable halting dispatch after an escalation.
    pub fn with_stop_on_escalation(mut self, enabled: bool) -> Self {
        self.stop_on_escalation = enabled;
        self
    }

    /// The bound actually applied by the limiter.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

/// Successful output of a transformation together with its auxiliary metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed<T, A = ()> {
    pub output: T,
    pub metadata: Option<A>,
}

impl<T, A> Transformed<T, A> {
    /// Output without metadata.
    pub fn new(output: T) -> Self {
        Self {
            output,
            metadata: None,
        }
    }

    /// Output with metadata.
    pub fn with_metadata(output: T, metadata: A) -> Self {
        Self {
            output,
            metadata: Some(metadata),
        }
    }
}

/// Counters describing how a batch went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Number of input items
    pub total: usize,

    /// Items excluded by the skip mask
    pub skipped: usize,

    /// Units actually submitted to the limiter
    pub dispatched: usize,

    /// Units whose transformation returned `Ok`
    pub succeeded: usize,

    /// Units whose transformation returned `Err`
    pub failed: usize,

    /// Per-item failures overwritten by an escalation
    pub superseded: usize,

    /// Wall time of the whole call
    pub elapsed: Duration,
}

/// Result of running one batch.
///
/// On normal completion `results` holds one slot per input item, `None` at
/// skipped and failed indices, and `errors` holds only failed indices. When
/// the batch escalated, `results` and `metadata` are `None` and every
/// non-skipped index maps to the same [`EscalatedFailure`].
#[derive(Debug)]
pub struct BatchOutcome<T, E, A = ()> {
    pub results: Option<Vec<Option<T>>>,
    pub metadata: Option<Vec<Option<A>>>,
    pub errors: BTreeMap<usize, ItemFailure<E>>,
    pub stats: BatchStats,
}

impl<T, E, A> BatchOutcome<T, E, A> {
    pub fn is_escalated(&self) -> bool {
        self.results.is_none()
    }

    /// The shared escalated failure, if the batch escalated.
    pub fn escalation(&self) -> Option<&Arc<EscalatedFailure>> {
        if !self.is_escalated() {
            return None;
        }
        self.errors.values().find_map(ItemFailure::escalation)
    }

    /// Indices with an error entry, ascending.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.errors.keys().copied().collect()
    }

    /// Successful output at `index`, if any.
    pub fn output(&self, index: usize) -> Option<&T> {
        self.results
            .as_ref()
            .and_then(|results| results.get(index))
            .and_then(Option::as_ref)
    }

    /// Auxiliary metadata at `index`, if any.
    pub fn metadata_at(&self, index: usize) -> Option<&A> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get(index))
            .and_then(Option::as_ref)
    }

    /// Split into index-aligned results and the error map.
    pub fn into_results(self) -> (Option<Vec<Option<T>>>, BTreeMap<usize, ItemFailure<E>>) {
        (self.results, self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_multiplier() {
        let config = ExecutorConfig::default();
        assert_eq!(config.concurrency_multiplier, 2);
        assert!(config.max_concurrency >= 2);
        assert_eq!(config.max_concurrency % 2, 0);
        assert!(!config.stop_on_escalation);
    }

    #[test]
    fn test_with_concurrency_clamps() {
        assert_eq!(ExecutorConfig::default().with_concurrency(0).max_concurrency, 1);
        assert_eq!(
            ExecutorConfig::default()
                .with_concurrency(usize::MAX)
                .max_concurrency,
            MAX_CONCURRENCY
        );
        assert_eq!(ExecutorConfig::default().with_concurrency(7).max_concurrency, 7);
    }

    #[test]
    fn test_multiplier_keeps_explicit_bound() {
        let explicit = ExecutorConfig::default().with_concurrency(7).with_multiplier(3);
        assert_eq!(explicit.max_concurrency, 7);
        assert_eq!(explicit.concurrency_multiplier, 3);

        let derived = ExecutorConfig::default().with_multiplier(3);
        assert_eq!(derived.max_concurrency, crate::utils::default_concurrency(3));

        // Chained multipliers keep following the core count.
        let chained = ExecutorConfig::default().with_multiplier(3).with_multiplier(1);
        assert_eq!(chained.max_concurrency, crate::utils::default_concurrency(1));
    }

    #[test]
    fn test_config_serializes_every_field() {
        let config = ExecutorConfig::default()
            .with_concurrency(5)
            .with_stop_on_escalation(true);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["max_concurrency"], 5);
        assert_eq!(json["concurrency_multiplier"], 2);
        assert_eq!(json["stop_on_escalation"], true);
    }

    #[test]
    fn test_effective_concurrency_never_zero() {
        let config = ExecutorConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn test_outcome_accessors() {
        let mut errors = BTreeMap::new();
        errors.insert(1, ItemFailure::Item("bad"));
        let outcome: BatchOutcome<u32, &str> = BatchOutcome {
            results: Some(vec![Some(10), None, Some(30)]),
            metadata: Some(vec![None, None, None]),
            errors,
            stats: BatchStats::default(),
        };

        assert!(!outcome.is_escalated());
        assert!(outcome.escalation().is_none());
        assert_eq!(outcome.output(0), Some(&10));
        assert_eq!(outcome.output(1), None);
        assert_eq!(outcome.output(9), None);
        assert_eq!(outcome.failed_indices(), vec![1]);
    }
}
