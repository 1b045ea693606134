//! Utility functions shared by the executor.
//!
//! Core-count discovery, skip-mask handling, and panic payload decoding.

use std::any::Any;
use std::num::NonZeroUsize;

/// Number of logical cores available to this process.
///
/// Falls back to 1 when the platform cannot report it.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Concurrency bound derived from the core count.
///
/// # Arguments
///
/// * `multiplier` - How many units to allow per core (treated as at least 1)
pub fn default_concurrency(multiplier: usize) -> usize {
    available_cores()
        .saturating_mul(multiplier.max(1))
        .min(crate::types::MAX_CONCURRENCY)
}

/// Whether the item at `index` is excluded by the mask.
///
/// Positions beyond the end of the mask are not skipped.
pub(crate) fn is_skipped(skip_mask: &[bool], index: usize) -> bool {
    skip_mask.get(index).copied().unwrap_or(false)
}

/// Number of items among the first `len` that the mask excludes.
pub(crate) fn count_skipped(skip_mask: &[bool], len: usize) -> usize {
    skip_mask.iter().take(len).filter(|skip| **skip).count()
}

/// Render a panic payload as text.
pub(crate) fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
