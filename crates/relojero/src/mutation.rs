//! Configuration mutation protocol.
//!
//! Encapsulates the cycle every stateful test repeats: read the current
//! value, change it, persist it, verify it survived a reload, and restore
//! the original no matter what happened. The cycle is an explicit state
//! machine (Pristine → Dirty → Saving → Saved → VerifyingPersistence →
//! RollingBack → Terminal) whose single hard guarantee is that RollingBack
//! runs on every exit path once the device has been dirtied. A timeout
//! inside Dirty/Saving/VerifyingPersistence is a reason to proceed to
//! rollback, not to propagate.
//!
//! Catalogued firmware oddities (a save control that never disables, a
//! value the device silently drops) come back as structured findings on
//! the result, so callers decide which model quirks are acceptable instead
//! of fishing outcomes out of exception text.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capability::CapabilityDescriptor;
use crate::driver::{ControlValue, UiDriver};
use crate::result::RelojeroResult;
use crate::selector::{resolve_control, ResolvedControl, SelectorRank, SelectorStrategy};
use crate::timing::{poll_until, OperationKind, TimingPolicy};

/// States of the mutation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    /// Save control observed disabled; original value captured
    Pristine,
    /// Target field mutated; waiting for the save control to enable
    Dirty,
    /// Save control invoked; waiting for the save to settle
    Saving,
    /// Mutation assumed committed server-side
    Saved,
    /// Page reloaded; field re-read and compared
    VerifyingPersistence,
    /// Restoring the original value; entered on every exit path
    RollingBack,
    /// Rollback attempted; protocol finished
    Terminal,
}

impl MutationState {
    /// State name for logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pristine => "pristine",
            Self::Dirty => "dirty",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::VerifyingPersistence => "verifying-persistence",
            Self::RollingBack => "rolling-back",
            Self::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for MutationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    /// Expected model-conditional behavior
    Info,
    /// Catalogued quirk or unverified assumption
    Warning,
    /// The device may have been left misconfigured
    Error,
}

/// Structured, non-fatal observation attached to a mutation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum Finding {
    /// Save control did not flip to enabled within budget
    SaveNotEnabled {
        /// How long the flip was awaited
        waited_ms: u64,
    },
    /// Save was clicked but never observed settling
    SaveNotConfirmed {
        /// How long settling was awaited
        waited_ms: u64,
    },
    /// Re-read after reload did not match the saved value
    PersistenceMismatch {
        /// The value that was saved
        expected: ControlValue,
        /// The value the reloaded page showed
        observed: ControlValue,
    },
    /// Field disappeared after reload (model-conditional control)
    FieldAbsentAfterReload {
        /// Logical field name
        field: String,
    },
    /// Live page disagrees with the capability table
    CapabilityInconsistency {
        /// Hardware model the table described
        model: String,
        /// What disagreed
        detail: String,
    },
    /// Rollback could not restore the original value
    RollbackFailure {
        /// Why rollback failed
        detail: String,
    },
    /// A driver operation failed mid-protocol
    OperationFailed {
        /// Protocol state the failure occurred in
        state: MutationState,
        /// Driver error text
        detail: String,
    },
}

impl Finding {
    /// Severity of this finding.
    #[must_use]
    pub const fn severity(&self) -> FindingSeverity {
        match self {
            Self::FieldAbsentAfterReload { .. } => FindingSeverity::Info,
            Self::SaveNotEnabled { .. }
            | Self::SaveNotConfirmed { .. }
            | Self::PersistenceMismatch { .. }
            | Self::CapabilityInconsistency { .. }
            | Self::OperationFailed { .. } => FindingSeverity::Warning,
            Self::RollbackFailure { .. } => FindingSeverity::Error,
        }
    }
}

/// Options for a mutation run.
///
/// Base budgets are pre-multiplier; the session scales them through the
/// timing policy. Tests against the in-memory device shrink them to keep
/// deliberate-timeout paths fast.
#[derive(Debug, Clone)]
pub struct MutationOptions {
    /// Continue past `SaveNotEnabled` even without the catalogued quirk
    pub best_effort_save: bool,
    /// Base budget for locating controls
    pub element_base: Duration,
    /// Base budget for the save control enabling
    pub save_enable_base: Duration,
    /// Base budget for a save settling
    pub save_completion_base: Duration,
    /// Polling interval for all bounded waits
    pub poll_interval: Duration,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            best_effort_save: false,
            element_base: OperationKind::ElementAppear.base_budget(),
            save_enable_base: OperationKind::SaveEnable.base_budget(),
            save_completion_base: OperationKind::SaveCompletion.base_budget(),
            poll_interval: Duration::from_millis(crate::timing::DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl MutationOptions {
    /// Options with all base budgets shrunk, for hermetic tests
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            best_effort_save: false,
            element_base: Duration::from_millis(30),
            save_enable_base: Duration::from_millis(30),
            save_completion_base: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
        }
    }

    /// Continue past `SaveNotEnabled` without a catalogued quirk
    #[must_use]
    pub const fn with_best_effort_save(mut self, best_effort: bool) -> Self {
        self.best_effort_save = best_effort;
        self
    }
}

/// Outcome of one mutation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResult {
    /// Logical field name
    pub field: String,
    /// Furthest forward state the protocol reached before rollback
    pub final_state: MutationState,
    /// Whether the value survived a full reload
    pub persisted: bool,
    /// Whether the device was restored to its original configuration
    pub rollback_succeeded: bool,
    /// Value the field held before the protocol ran
    pub original: ControlValue,
    /// Value observed at persistence verification, if reached
    pub observed: Option<ControlValue>,
    /// Selector rank that located the field
    pub rank_used: SelectorRank,
    /// Structured findings accumulated on the way
    pub findings: Vec<Finding>,
}

impl MutationResult {
    /// Whether a finding of the given shape was recorded
    #[must_use]
    pub fn has_finding(&self, predicate: impl Fn(&Finding) -> bool) -> bool {
        self.findings.iter().any(predicate)
    }

    /// Highest severity among recorded findings
    #[must_use]
    pub fn worst_severity(&self) -> Option<FindingSeverity> {
        self.findings.iter().map(Finding::severity).max()
    }
}

/// Outcome of an exclusive-group selection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusiveResult {
    /// Furthest forward state the protocol reached before rollback
    pub final_state: MutationState,
    /// Whether the selection survived a full reload
    pub persisted: bool,
    /// Whether the group was restored to its original configuration
    pub rollback_succeeded: bool,
    /// Logical names of controls actually active after re-read
    pub active: Vec<String>,
    /// Structured findings accumulated on the way
    pub findings: Vec<Finding>,
}

/// One run of the mutation protocol against a device page.
///
/// Borrows the driver for the duration of the run; the protocol is
/// strictly sequential and every suspension is a bounded poll.
pub struct MutationSession<'a, D: UiDriver> {
    driver: &'a mut D,
    descriptor: &'a CapabilityDescriptor,
    policy: &'a TimingPolicy,
    save_strategy: &'a SelectorStrategy,
    options: MutationOptions,
}

impl<'a, D: UiDriver> MutationSession<'a, D> {
    /// Create a session for one protocol run
    pub fn new(
        driver: &'a mut D,
        descriptor: &'a CapabilityDescriptor,
        policy: &'a TimingPolicy,
        save_strategy: &'a SelectorStrategy,
        options: MutationOptions,
    ) -> Self {
        Self {
            driver,
            descriptor,
            policy,
            save_strategy,
            options,
        }
    }

    fn element_budget(&self) -> Duration {
        self.policy
            .budget(self.options.element_base, OperationKind::ElementAppear)
    }

    /// Mutate a single field and verify persistence across reload.
    ///
    /// # Errors
    ///
    /// Returns a hard error only for failures occurring before anything is
    /// dirtied (field or save control unresolvable). After the first
    /// mutation every failure becomes a finding and rollback still runs.
    pub fn mutate(
        &mut self,
        field_strategy: &SelectorStrategy,
        target: &ControlValue,
    ) -> RelojeroResult<MutationResult> {
        let poll = self.options.poll_interval;
        let elem_budget = self.element_budget();

        // Pristine: capture everything needed for rollback before touching
        // the device.
        let field = resolve_control(self.driver, field_strategy, elem_budget, poll)?;
        let original = self.driver.read_value(&field.handle)?;
        let save = resolve_control(self.driver, self.save_strategy, elem_budget, poll)?;
        let pristine_save_enabled = self.driver.is_enabled(&save.handle);

        let mut findings = Vec::new();
        let (final_state, persisted, observed) = self.forward(
            field_strategy,
            &field,
            &save,
            pristine_save_enabled,
            target,
            &mut findings,
        );

        // RollingBack: unconditional from here on.
        let rollback_succeeded = self.roll_back(field_strategy, &original, &mut findings);

        Ok(MutationResult {
            field: field_strategy.name.clone(),
            final_state,
            persisted,
            rollback_succeeded,
            original,
            observed,
            rank_used: field.rank,
            findings,
        })
    }

    /// Forward pass: Dirty → Saving → Saved → VerifyingPersistence.
    ///
    /// Never returns `Err`: once the device is dirtied, failures become
    /// findings so the caller's rollback always runs.
    fn forward(
        &mut self,
        field_strategy: &SelectorStrategy,
        field: &ResolvedControl,
        save: &ResolvedControl,
        pristine_save_enabled: bool,
        target: &ControlValue,
        findings: &mut Vec<Finding>,
    ) -> (MutationState, bool, Option<ControlValue>) {
        // Dirty
        if let Err(e) = self.driver.set_value(&field.handle, target) {
            findings.push(Finding::OperationFailed {
                state: MutationState::Dirty,
                detail: e.to_string(),
            });
            return (MutationState::Dirty, false, None);
        }
        // The device, not the intent, is authoritative: firmware may adjust
        // the value (or neighbors in an exclusive group) as a side effect.
        let observed_after_set = self.driver.read_value(&field.handle).ok();

        if !self.await_save_enabled(save, pristine_save_enabled, findings) {
            return (MutationState::Dirty, false, observed_after_set);
        }

        // Saving
        if !self.click_and_settle(save, findings) {
            return (MutationState::Saving, false, observed_after_set);
        }

        // Saved → VerifyingPersistence
        let (persisted, observed) = self.verify_persistence(field_strategy, target, findings);
        (MutationState::Saved, persisted, observed)
    }

    /// Dirty-state oracle: wait for the save control's enabled flip.
    ///
    /// Returns whether the protocol should proceed to Saving.
    fn await_save_enabled(
        &mut self,
        save: &ResolvedControl,
        pristine_save_enabled: bool,
        findings: &mut Vec<Finding>,
    ) -> bool {
        let always_enabled = self.descriptor.save_never_disables();
        if always_enabled || pristine_save_enabled {
            // The flip can never be observed on this firmware: the control
            // was already enabled at Pristine. Recorded, not fatal.
            findings.push(Finding::SaveNotEnabled { waited_ms: 0 });
            if always_enabled || self.options.best_effort_save {
                return true;
            }
            return false;
        }

        let budget = self
            .policy
            .budget(self.options.save_enable_base, OperationKind::SaveEnable);
        let save_handle = save.handle.clone();
        let report = poll_until(budget, self.options.poll_interval, "save control enabled", || {
            self.driver.is_enabled(&save_handle)
        });
        if report.satisfied {
            return true;
        }
        findings.push(Finding::SaveNotEnabled {
            waited_ms: report.elapsed.as_millis() as u64,
        });
        self.options.best_effort_save
    }

    /// Saving-state: invoke the save control and wait for it to settle.
    fn click_and_settle(&mut self, save: &ResolvedControl, findings: &mut Vec<Finding>) -> bool {
        let generation_before = self.driver.page_generation();
        if let Err(e) = self.driver.click(&save.handle) {
            findings.push(Finding::OperationFailed {
                state: MutationState::Saving,
                detail: e.to_string(),
            });
            return false;
        }

        let budget = self.policy.budget(
            self.options.save_completion_base,
            OperationKind::SaveCompletion,
        );
        let poll = self.options.poll_interval;
        let settled = if self.descriptor.saves_via_reload() {
            // This firmware settles a save by reloading the page.
            poll_until(budget, poll, "post-save reload", || {
                self.driver.page_generation() > generation_before
            })
            .satisfied
        } else if self.descriptor.save_never_disables() {
            // The control will not disable; the click is the best evidence
            // available, and verification decides the rest.
            true
        } else {
            let save_handle = save.handle.clone();
            poll_until(budget, poll, "save control disabled", || {
                !self.driver.is_enabled(&save_handle)
            })
            .satisfied
        };

        if !settled {
            findings.push(Finding::SaveNotConfirmed {
                waited_ms: budget.as_millis() as u64,
            });
        }
        settled
    }

    /// VerifyingPersistence: full reload, then re-read and compare.
    ///
    /// An in-place re-read is not accepted as persistence evidence; only
    /// the reloaded page is authoritative.
    fn verify_persistence(
        &mut self,
        field_strategy: &SelectorStrategy,
        target: &ControlValue,
        findings: &mut Vec<Finding>,
    ) -> (bool, Option<ControlValue>) {
        if let Err(e) = self.driver.reload() {
            findings.push(Finding::OperationFailed {
                state: MutationState::VerifyingPersistence,
                detail: e.to_string(),
            });
            return (false, None);
        }
        let field = match resolve_control(
            self.driver,
            field_strategy,
            self.element_budget(),
            self.options.poll_interval,
        ) {
            Ok(field) => field,
            Err(_) => {
                // Distinguish "persistence failed" from "field is simply
                // absent on this model after reload".
                findings.push(Finding::FieldAbsentAfterReload {
                    field: field_strategy.name.clone(),
                });
                return (false, None);
            }
        };
        match self.driver.read_value(&field.handle) {
            Ok(observed) => {
                let persisted = observed == *target;
                if !persisted {
                    findings.push(Finding::PersistenceMismatch {
                        expected: target.clone(),
                        observed: observed.clone(),
                    });
                }
                (persisted, Some(observed))
            }
            Err(e) => {
                findings.push(Finding::OperationFailed {
                    state: MutationState::VerifyingPersistence,
                    detail: e.to_string(),
                });
                (false, None)
            }
        }
    }

    /// RollingBack: restore the original value, re-saving if needed.
    ///
    /// Errors here are logged and recorded, never raised over the primary
    /// outcome. An automation run that silently leaves a physical device
    /// misconfigured is the failure mode this method exists to prevent.
    fn roll_back(
        &mut self,
        field_strategy: &SelectorStrategy,
        original: &ControlValue,
        findings: &mut Vec<Finding>,
    ) -> bool {
        match self.try_restore(field_strategy, original) {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(
                    field = %field_strategy.name,
                    "rollback could not restore the original value"
                );
                findings.push(Finding::RollbackFailure {
                    detail: "field still differs from the original after restore".to_string(),
                });
                false
            }
            Err(e) => {
                tracing::warn!(field = %field_strategy.name, error = %e, "rollback failed");
                findings.push(Finding::RollbackFailure {
                    detail: e.to_string(),
                });
                false
            }
        }
    }

    fn try_restore(
        &mut self,
        field_strategy: &SelectorStrategy,
        original: &ControlValue,
    ) -> RelojeroResult<bool> {
        let poll = self.options.poll_interval;
        let elem_budget = self.element_budget();

        let field = resolve_control(self.driver, field_strategy, elem_budget, poll)?;
        let current = self.driver.read_value(&field.handle)?;
        if current == *original {
            return Ok(true);
        }

        self.driver.set_value(&field.handle, original)?;
        self.save_restore_if_possible()?;

        // Fresh resolution: a reload-settling save invalidates handles.
        let field = resolve_control(self.driver, field_strategy, elem_budget, poll)?;
        let after = self.driver.read_value(&field.handle)?;
        Ok(after == *original)
    }

    /// Re-issue a save for the restored value, when the control allows it.
    fn save_restore_if_possible(&mut self) -> RelojeroResult<()> {
        let poll = self.options.poll_interval;
        let save = resolve_control(self.driver, self.save_strategy, self.element_budget(), poll)?;
        let budget = self
            .policy
            .budget(self.options.save_enable_base, OperationKind::SaveEnable);
        let save_handle = save.handle.clone();
        let _ = poll_until(budget, poll, "save control enabled for rollback", || {
            self.driver.is_enabled(&save_handle)
        });
        if self.driver.is_enabled(&save.handle) {
            let generation_before = self.driver.page_generation();
            self.driver.click(&save.handle)?;
            if !self.descriptor.save_never_disables() {
                let completion = self.policy.budget(
                    self.options.save_completion_base,
                    OperationKind::SaveCompletion,
                );
                let save_handle = save.handle.clone();
                let via_reload = self.descriptor.saves_via_reload();
                let _ = poll_until(completion, poll, "rollback save settled", || {
                    if via_reload {
                        self.driver.page_generation() > generation_before
                    } else {
                        !self.driver.is_enabled(&save_handle)
                    }
                });
            }
        }
        Ok(())
    }

    /// Select one control of a firmware-enforced exclusive group.
    ///
    /// The device's exclusivity is client-side behavior: setting one
    /// checkbox unchecks its neighbors as a side effect. The actual
    /// post-mutation state is always re-derived from every group member;
    /// the intended value is never trusted.
    ///
    /// # Errors
    ///
    /// Returns a hard error when a group member or the save control cannot
    /// be resolved before mutation, or `target_index` is out of range.
    pub fn select_exclusive(
        &mut self,
        group: &[SelectorStrategy],
        target_index: usize,
    ) -> RelojeroResult<ExclusiveResult> {
        use crate::result::RelojeroError;
        if target_index >= group.len() {
            return Err(RelojeroError::InvalidState {
                message: format!(
                    "target index {target_index} out of range for group of {}",
                    group.len()
                ),
            });
        }
        let poll = self.options.poll_interval;
        let elem_budget = self.element_budget();

        // Pristine: resolve and capture the whole group.
        let mut handles = Vec::with_capacity(group.len());
        let mut originals = Vec::with_capacity(group.len());
        for strategy in group {
            let resolved = resolve_control(self.driver, strategy, elem_budget, poll)?;
            originals.push(self.driver.read_value(&resolved.handle)?);
            handles.push(resolved);
        }
        let save = resolve_control(self.driver, self.save_strategy, elem_budget, poll)?;
        let pristine_save_enabled = self.driver.is_enabled(&save.handle);

        let mut findings = Vec::new();
        let target_value = ControlValue::Checked(true);

        // Dirty
        let mut final_state = MutationState::Dirty;
        let mut persisted = false;
        let mut active = Vec::new();
        if let Err(e) = self
            .driver
            .set_value(&handles[target_index].handle, &target_value)
        {
            findings.push(Finding::OperationFailed {
                state: MutationState::Dirty,
                detail: e.to_string(),
            });
        } else {
            // Re-derive the group state from the device.
            active = self.read_active(group, &handles);

            if self.await_save_enabled(&save, pristine_save_enabled, &mut findings)
                && self.click_and_settle(&save, &mut findings)
            {
                final_state = MutationState::Saved;
                // VerifyingPersistence over the whole group.
                if self.driver.reload().is_ok() {
                    let mut reloaded = Vec::with_capacity(group.len());
                    let mut all_resolved = true;
                    for strategy in group {
                        match resolve_control(self.driver, strategy, elem_budget, poll) {
                            Ok(resolved) => reloaded.push(resolved),
                            Err(_) => {
                                findings.push(Finding::FieldAbsentAfterReload {
                                    field: strategy.name.clone(),
                                });
                                all_resolved = false;
                                break;
                            }
                        }
                    }
                    if all_resolved {
                        active = self.read_active(group, &reloaded);
                        persisted = active == vec![group[target_index].name.clone()];
                        if !persisted {
                            findings.push(Finding::PersistenceMismatch {
                                expected: target_value.clone(),
                                observed: ControlValue::Checked(
                                    active.contains(&group[target_index].name),
                                ),
                            });
                        }
                    }
                }
            } else {
                final_state = if findings
                    .iter()
                    .any(|f| matches!(f, Finding::SaveNotConfirmed { .. }))
                {
                    MutationState::Saving
                } else {
                    MutationState::Dirty
                };
            }
        }

        // RollingBack: restore every member, letting the firmware's own
        // exclusivity sort out ordering (active member restored last).
        let rollback_succeeded =
            self.roll_back_group(group, &originals, &mut findings);

        Ok(ExclusiveResult {
            final_state,
            persisted,
            rollback_succeeded,
            active,
            findings,
        })
    }

    fn read_active(&self, group: &[SelectorStrategy], handles: &[ResolvedControl]) -> Vec<String> {
        group
            .iter()
            .zip(handles)
            .filter(|(_, resolved)| self.driver.is_checked(&resolved.handle))
            .map(|(strategy, _)| strategy.name.clone())
            .collect()
    }

    fn roll_back_group(
        &mut self,
        group: &[SelectorStrategy],
        originals: &[ControlValue],
        findings: &mut Vec<Finding>,
    ) -> bool {
        match self.try_restore_group(group, originals) {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!("group rollback could not restore the original selection");
                findings.push(Finding::RollbackFailure {
                    detail: "group still differs from the original after restore".to_string(),
                });
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "group rollback failed");
                findings.push(Finding::RollbackFailure {
                    detail: e.to_string(),
                });
                false
            }
        }
    }

    fn try_restore_group(
        &mut self,
        group: &[SelectorStrategy],
        originals: &[ControlValue],
    ) -> RelojeroResult<bool> {
        let poll = self.options.poll_interval;
        let elem_budget = self.element_budget();

        let mut handles = Vec::with_capacity(group.len());
        for strategy in group {
            handles.push(resolve_control(self.driver, strategy, elem_budget, poll)?);
        }
        let current: Vec<_> = handles
            .iter()
            .map(|h| self.driver.read_value(&h.handle))
            .collect::<RelojeroResult<_>>()?;
        if current == originals {
            return Ok(true);
        }

        // Unchecked members first so the firmware's exclusivity cannot
        // clear the restored active member afterwards.
        for (resolved, original) in handles.iter().zip(originals) {
            if *original == ControlValue::Checked(false) {
                self.driver.set_value(&resolved.handle, original)?;
            }
        }
        for (resolved, original) in handles.iter().zip(originals) {
            if *original == ControlValue::Checked(true) {
                self.driver.set_value(&resolved.handle, original)?;
            }
        }
        self.save_restore_if_possible()?;

        let mut restored = Vec::with_capacity(group.len());
        for strategy in group {
            let resolved = resolve_control(self.driver, strategy, elem_budget, poll)?;
            restored.push(self.driver.read_value(&resolved.handle)?);
        }
        Ok(restored == originals)
    }
}
