//! Error handling for batch execution.
//!
//! Two families live here. `BatchExecError` covers the library's own
//! operations (configuration loading and validation). `ItemFailure` is what
//! lands in a batch's error map: either the transformation's own error for
//! one item, or the single escalated failure shared by the whole batch.

use std::fmt;
use std::sync::Arc;

/// Error type for library-level operations.
#[derive(Debug, Clone)]
pub enum BatchExecError {
    /// Configuration errors (invalid settings, unparsable files, etc.)
    ConfigError { message: String },

    /// File I/O errors when reading configuration files
    FileError { path: String, message: String },
}

impl BatchExecError {
    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for BatchExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message } => write!(f, "Configuration error: {}", message),
            Self::FileError { path, message } => {
                write!(f, "File error at '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for BatchExecError {}

impl From<toml::de::Error> for BatchExecError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}

/// How a unit of work terminated abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationKind {
    /// The transformation panicked inside its unit
    Panicked,

    /// The unit's task ended without producing an outcome (aborted by the runtime)
    TaskLost,
}

impl fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationKind::Panicked => write!(f, "panicked"),
            EscalationKind::TaskLost => write!(f, "task lost"),
        }
    }
}

/// A batch-wide failure raised when any unit terminates abnormally.
///
/// Once raised it supersedes every per-item outcome of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalatedFailure {
    /// Index of the unit that terminated, when it can be attributed
    pub index: Option<usize>,

    /// What kind of abnormal termination occurred
    pub kind: EscalationKind,

    /// Human-readable detail (panic payload, join error text)
    pub message: String,
}

impl EscalatedFailure {
    /// Create a failure for a unit that panicked.
    pub fn panicked<M: Into<String>>(index: usize, message: M) -> Self {
        Self {
            index: Some(index),
            kind: EscalationKind::Panicked,
            message: message.into(),
        }
    }

    /// Create a failure for a unit whose task vanished.
    pub fn task_lost<M: Into<String>>(index: Option<usize>, message: M) -> Self {
        Self {
            index,
            kind: EscalationKind::TaskLost,
            message: message.into(),
        }
    }
}

impl fmt::Display for EscalatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(
                f,
                "batch escalated: unit {} {}: {}",
                index, self.kind, self.message
            ),
            None => write!(f, "batch escalated: unit {}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for EscalatedFailure {}

/// Entry in a batch's error map.
#[derive(Debug)]
pub enum ItemFailure<E> {
    /// The transformation reported a failure for this item only
    Item(E),

    /// The whole batch was escalated; every non-skipped index shares this value
    Escalated(Arc<EscalatedFailure>),
}

impl<E> ItemFailure<E> {
    /// Whether this entry comes from a batch-wide escalation.
    pub fn is_escalated(&self) -> bool {
        matches!(self, Self::Escalated(_))
    }

    /// The transformation's own error, if this is a per-item failure.
    pub fn item_error(&self) -> Option<&E> {
        match self {
            Self::Item(err) => Some(err),
            Self::Escalated(_) => None,
        }
    }

    /// The shared escalated failure, if any.
    pub fn escalation(&self) -> Option<&Arc<EscalatedFailure>> {
        match self {
            Self::Item(_) => None,
            Self::Escalated(failure) => Some(failure),
        }
    }

    /// Consume the entry and return the per-item error, if any.
    pub fn into_item_error(self) -> Option<E> {
        match self {
            Self::Item(err) => Some(err),
            Self::Escalated(_) => None,
        }
    }
}

impl<E: Clone> Clone for ItemFailure<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Item(err) => Self::Item(err.clone()),
            Self::Escalated(failure) => Self::Escalated(Arc::clone(failure)),
        }
    }
}

impl<E: PartialEq> PartialEq for ItemFailure<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Item(a), Self::Item(b)) => a == b,
            (Self::Escalated(a), Self::Escalated(b)) => a == b,
            _ => false,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ItemFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(err) => write!(f, "{}", err),
            Self::Escalated(failure) => write!(f, "{}", failure),
        }
    }
}

impl<E> std::error::Error for ItemFailure<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Item(err) => Some(err),
            Self::Escalated(failure) => Some(failure.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalated_display_includes_index() {
        let failure = EscalatedFailure::panicked(3, "boom");
        assert_eq!(failure.to_string(), "batch escalated: unit 3 panicked: boom");

        let lost = EscalatedFailure::task_lost(None, "cancelled");
        assert_eq!(lost.to_string(), "batch escalated: unit task lost: cancelled");
    }

    #[test]
    fn test_item_failure_accessors() {
        let item: ItemFailure<String> = ItemFailure::Item("bad input".to_string());
        assert!(!item.is_escalated());
        assert_eq!(item.item_error(), Some(&"bad input".to_string()));
        assert!(item.escalation().is_none());

        let shared = Arc::new(EscalatedFailure::panicked(0, "boom"));
        let escalated: ItemFailure<String> = ItemFailure::Escalated(Arc::clone(&shared));
        assert!(escalated.is_escalated());
        assert!(escalated.item_error().is_none());
        assert!(Arc::ptr_eq(escalated.escalation().unwrap(), &shared));
    }

    #[test]
    fn test_toml_error_maps_to_config_error() {
        let err = toml::from_str::<toml::Table>("not = [valid").unwrap_err();
        let converted: BatchExecError = err.into();
        assert!(matches!(converted, BatchExecError::ConfigError { .. }));
    }
}
