//! Relojero: Device-Aware UI Test Automation Core
//!
//! Relojero (Spanish: "watchmaker") drives a browser against the embedded
//! web interface of network time synchronization appliances and behaves
//! correctly across two hardware generations that expose different
//! configuration sections, field limits, timing characteristics and
//! markup.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     RELOJERO Architecture                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌─────────────┐   ┌──────────────────────┐    │
//! │  │ Capability │──►│   Timing    │   │  Selector Resolution  │    │
//! │  │  Registry  │   │   Policy    │   │  (ranked fallback)    │    │
//! │  └─────┬──────┘   └──────┬──────┘   └──────────┬───────────┘    │
//! │        │                 │                     │                │
//! │        ▼                 ▼                     ▼                │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │        Mutation Protocol (change → save → reload →       │   │
//! │  │        verify → roll back, rollback unconditional)       │   │
//! │  └──────────────────────────┬───────────────────────────────┘   │
//! │                             ▼                                   │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │   Page façade  ──►  UiDriver (external automation)       │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use relojero::{
//!     CapabilityRegistry, ControlValue, MockDevice, MutationOptions, Page, Section,
//! };
//!
//! let registry = Arc::new(CapabilityRegistry::builtin());
//! let device = MockDevice::new()
//!     .with_save_control(&["button#button_save"])
//!     .with_text_field(&["input[name='contact']"], "ops@example.com");
//!
//! let mut page = Page::for_model(registry, device, "KRONOS-2R-HVXX-A2F")?
//!     .with_mutation_options(MutationOptions::fast());
//! let result = page.mutate_and_verify(
//!     Section::General,
//!     "contact",
//!     ControlValue::text("night-shift@example.com"),
//! )?;
//!
//! assert!(result.persisted);
//! assert!(result.rollback_succeeded);
//! # Ok::<(), relojero::RelojeroError>(())
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Section and feature availability resolution
pub mod availability;
/// Capability registry and per-model descriptors
pub mod capability;
/// Automation driver trait and the in-memory mock device
pub mod driver;
/// The configuration mutation protocol state machine
pub mod mutation;
/// Per-screen page façade and session context
pub mod page;
/// Error and result types
pub mod result;
/// Selector strategies and the fallback resolution engine
pub mod selector;
/// Adaptive timing policy and bounded polling
pub mod timing;

pub use availability::{cross_check_ptp, AvailabilityResolver};
pub use capability::{
    CapabilityDescriptor, CapabilityRegistry, FieldConstraint, FieldKind, Quirk, Section, Series,
    FEATURE_ADVANCED_GNSS, FEATURE_MULTI_INTERFACE, FEATURE_PTP, FEATURE_SYNC_E,
};
pub use driver::{ControlHandle, ControlValue, MockDevice, UiDriver};
pub use mutation::{
    ExclusiveResult, Finding, FindingSeverity, MutationOptions, MutationResult, MutationSession,
    MutationState,
};
pub use page::{Page, SessionContext};
pub use result::{RelojeroError, RelojeroResult};
pub use selector::{
    resolve_control, ResolvedControl, SelectorCandidate, SelectorRank, SelectorStrategy,
};
pub use timing::{poll_until, OperationKind, TimingPolicy, WaitReport};
