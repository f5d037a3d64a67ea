//! Result and error types for relojero.

use thiserror::Error;

/// Result type for relojero operations
pub type RelojeroResult<T> = Result<T, RelojeroError>;

/// Errors that can occur in relojero.
///
/// Only hard failures live here. Conditions that a capability table
/// catalogues as expected device behavior (a save control that never
/// disables, a value that does not survive a reload) are returned as
/// [`crate::mutation::Finding`]s on the mutation result instead.
#[derive(Debug, Error)]
pub enum RelojeroError {
    /// Hardware model is absent from the capability table
    #[error("Unknown hardware model '{model}': not in the capability table")]
    UnknownModel {
        /// The model identifier that failed to resolve
        model: String,
    },

    /// The session never detected a hardware model
    #[error("No hardware model detected for this session")]
    ModelNotDetected,

    /// A capability descriptor violates its own invariants
    #[error("Invalid capability descriptor for '{model}': {reason}")]
    InvalidDescriptor {
        /// Model identifier of the offending descriptor
        model: String,
        /// What the descriptor got wrong
        reason: String,
    },

    /// Every candidate selector of a strategy was exhausted
    #[error("Element not found for '{strategy}' (tried {})", tried.join(", "))]
    ElementNotFound {
        /// Logical control name of the strategy
        strategy: String,
        /// Every selector expression that was attempted, in order
        tried: Vec<String>,
    },

    /// Requested section does not exist on this hardware model
    #[error("Section '{section}' is not available on model '{model}'")]
    SectionUnavailable {
        /// Section identifier
        section: String,
        /// Hardware model the section was requested for
        model: String,
    },

    /// Target value rejected by the field's catalogued constraint
    #[error("Value rejected for field '{field}': {reason}")]
    ConstraintViolation {
        /// Field identifier
        field: String,
        /// Which part of the constraint the value violates
        reason: String,
    },

    /// A bounded wait exceeded its adaptive budget
    #[error("Timed out waiting for {operation} after {budget_ms}ms")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// The budget that was exhausted, in milliseconds
        budget_ms: u64,
    },

    /// Navigation request failed at the driver
    #[error("Navigation to {path} failed: {message}")]
    NavigationError {
        /// Path that failed
        path: String,
        /// Error message
        message: String,
    },

    /// Driver-level failure interacting with an element
    #[error("Driver error: {message}")]
    DriverError {
        /// Error message
        message: String,
    },

    /// Operation called in a state the protocol does not allow
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// JSON error while loading a capability table
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
