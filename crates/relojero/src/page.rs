//! Per-screen page façade.
//!
//! Thin composition layer: a `Page` binds a resolved capability
//! descriptor, a timing policy, a driver and a strategy store together so
//! test bodies can say "mutate this field and verify it" without touching
//! the moving parts. The registry arrives by reference, never as a hidden
//! process-wide table, so fixtures can substitute their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::availability::cross_check_ptp;
use crate::capability::{CapabilityDescriptor, CapabilityRegistry, Section};
use crate::driver::{ControlValue, UiDriver};
use crate::mutation::{
    ExclusiveResult, Finding, MutationOptions, MutationResult, MutationSession,
};
use crate::result::{RelojeroError, RelojeroResult};
use crate::selector::{resolve_control, SelectorRank, SelectorStrategy};
use crate::timing::{poll_until, OperationKind, TimingPolicy};

/// Hardware model context supplied by the surrounding test session.
///
/// Capability-dependent operations fail fast when no model was detected —
/// guessing at a device's capabilities is worse than stopping.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    model: Option<String>,
}

impl SessionContext {
    /// Context for a detected hardware model
    #[must_use]
    pub fn detected(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
        }
    }

    /// Context for a session where detection failed
    #[must_use]
    pub fn undetected() -> Self {
        Self { model: None }
    }

    /// The detected model, if any
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// The detected model, or a hard failure.
    ///
    /// # Errors
    ///
    /// Returns [`RelojeroError::ModelNotDetected`] when the session never
    /// resolved a hardware model.
    pub fn require_model(&self) -> RelojeroResult<&str> {
        self.model
            .as_deref()
            .ok_or(RelojeroError::ModelNotDetected)
    }
}

/// Device-aware façade over one configuration screen at a time.
#[derive(Debug)]
pub struct Page<D: UiDriver> {
    registry: Arc<CapabilityRegistry>,
    descriptor: CapabilityDescriptor,
    policy: TimingPolicy,
    driver: D,
    current_section: Option<Section>,
    /// Port targeted by per-port save controls on multi-interface screens
    active_interface: Option<String>,
    /// Authored overrides for controls the default chains cannot describe
    strategies: BTreeMap<(Section, String), SelectorStrategy>,
    options: MutationOptions,
}

impl<D: UiDriver> Page<D> {
    /// Construct a page for a resolved hardware model.
    ///
    /// # Errors
    ///
    /// Returns [`RelojeroError::UnknownModel`] when the model is absent
    /// from the registry.
    pub fn for_model(
        registry: Arc<CapabilityRegistry>,
        driver: D,
        model: &str,
    ) -> RelojeroResult<Self> {
        let descriptor = registry.resolve(model)?.clone();
        let policy = TimingPolicy::for_descriptor(&descriptor);
        Ok(Self {
            registry,
            descriptor,
            policy,
            driver,
            current_section: None,
            active_interface: None,
            strategies: BTreeMap::new(),
            options: MutationOptions::default(),
        })
    }

    /// Construct a page from the session's detected model.
    ///
    /// # Errors
    ///
    /// Fails fast with [`RelojeroError::ModelNotDetected`] when the
    /// session has no model, or [`RelojeroError::UnknownModel`] when the
    /// detected model is uncatalogued.
    pub fn for_session(
        registry: Arc<CapabilityRegistry>,
        driver: D,
        context: &SessionContext,
    ) -> RelojeroResult<Self> {
        let model = context.require_model()?.to_string();
        Self::for_model(registry, driver, &model)
    }

    /// Replace the mutation options (shrunk budgets, best-effort saves)
    #[must_use]
    pub fn with_mutation_options(mut self, options: MutationOptions) -> Self {
        self.options = options;
        self
    }

    /// Target a specific port for per-port save controls
    #[must_use]
    pub fn with_active_interface(mut self, interface: impl Into<String>) -> Self {
        self.active_interface = Some(interface.into());
        self
    }

    /// Register an authored strategy for a control the default chains
    /// cannot describe
    pub fn register_strategy(&mut self, section: Section, field: &str, strategy: SelectorStrategy) {
        self.strategies.insert((section, field.to_string()), strategy);
    }

    /// The resolved capability descriptor
    #[must_use]
    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    /// The registry this page resolves against
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// The page's timing policy
    #[must_use]
    pub fn policy(&self) -> &TimingPolicy {
        &self.policy
    }

    /// The underlying driver, for assertions in tests
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Whether this model exposes the section
    #[must_use]
    pub fn is_available(&self, section: Section) -> bool {
        self.descriptor.is_section_available(section)
    }

    /// Whether this model supports the named capability
    #[must_use]
    pub fn has_feature(&self, flag: &str) -> bool {
        self.descriptor.has_feature(flag)
    }

    /// Navigate to a configuration section.
    ///
    /// Skips the round-trip when already there; fails fast instead of
    /// attempting a lookup that is guaranteed to fail when the model does
    /// not expose the section.
    ///
    /// # Errors
    ///
    /// Returns [`RelojeroError::SectionUnavailable`] for sections this
    /// model lacks, or a timeout when navigation does not settle within
    /// the adaptive budget.
    pub fn open_section(&mut self, section: Section) -> RelojeroResult<()> {
        if !self.is_available(section) {
            return Err(RelojeroError::SectionUnavailable {
                section: section.as_str().to_string(),
                model: self.descriptor.model.clone(),
            });
        }
        if self.current_section == Some(section) {
            return Ok(());
        }
        let path = section.path();
        self.driver.navigate(&path)?;
        let budget = self.policy.operation_budget(OperationKind::SectionNavigation);
        let report = poll_until(
            budget,
            self.options.poll_interval,
            format!("navigation to {path}"),
            || self.driver.current_path() == Some(path.as_str()),
        );
        if !report.satisfied {
            return Err(RelojeroError::Timeout {
                operation: OperationKind::SectionNavigation.as_str().to_string(),
                budget_ms: budget.as_millis() as u64,
            });
        }
        self.current_section = Some(section);
        Ok(())
    }

    /// Read a field's current value.
    ///
    /// # Errors
    ///
    /// Fails on unavailable sections, unresolvable controls, or driver
    /// errors.
    pub fn read_field(&mut self, section: Section, field: &str) -> RelojeroResult<ControlValue> {
        self.open_section(section)?;
        let strategy = self.field_strategy(section, field, None);
        let budget = self.policy.operation_budget(OperationKind::ElementAppear);
        let resolved =
            resolve_control(&mut self.driver, &strategy, budget, self.options.poll_interval)?;
        self.driver.read_value(&resolved.handle)
    }

    /// Change a field, persist it, verify persistence across reload, and
    /// restore the original value on every exit path.
    ///
    /// # Errors
    ///
    /// Hard errors cover only what happens before the device is dirtied:
    /// unavailable section, constraint rejection, unresolvable controls.
    /// Everything after comes back as findings on the result.
    pub fn mutate_and_verify(
        &mut self,
        section: Section,
        field: &str,
        target: ControlValue,
    ) -> RelojeroResult<MutationResult> {
        self.open_section(section)?;
        if let Some(constraint) = self.descriptor.constraint(section, field) {
            constraint
                .permits(&target)
                .map_err(|reason| RelojeroError::ConstraintViolation {
                    field: field.to_string(),
                    reason,
                })?;
        }

        let field_strategy = self.field_strategy(section, field, Some(&target));
        let save_strategy = self.save_strategy(section);
        let mut session = MutationSession::new(
            &mut self.driver,
            &self.descriptor,
            &self.policy,
            &save_strategy,
            self.options.clone(),
        );
        session.mutate(&field_strategy, &target)
    }

    /// Select one member of a firmware-enforced exclusive checkbox group,
    /// re-deriving the actual selection from the device.
    ///
    /// # Errors
    ///
    /// Hard errors as for [`Self::mutate_and_verify`], plus an unknown
    /// `target` field name.
    pub fn select_exclusive(
        &mut self,
        section: Section,
        group: &[&str],
        target: &str,
    ) -> RelojeroResult<ExclusiveResult> {
        self.open_section(section)?;
        let target_index = group.iter().position(|name| *name == target).ok_or_else(|| {
            RelojeroError::InvalidState {
                message: format!("'{target}' is not a member of the exclusive group"),
            }
        })?;
        let strategies: Vec<SelectorStrategy> = group
            .iter()
            .map(|name| self.field_strategy(section, name, Some(&ControlValue::Checked(true))))
            .collect();
        let save_strategy = self.save_strategy(section);
        let mut session = MutationSession::new(
            &mut self.driver,
            &self.descriptor,
            &self.policy,
            &save_strategy,
            self.options.clone(),
        );
        session.select_exclusive(&strategies, target_index)
    }

    /// Compare the table's PTP claim against the live page.
    ///
    /// Probes for a PTP navigation entry with a short budget and reports a
    /// warning-level finding on disagreement; the live device is
    /// authoritative, so nothing aborts.
    pub fn verify_ptp_capability(&mut self) -> Option<Finding> {
        let probe = SelectorStrategy::new("nav.ptp")
            .with_candidate("a[href='/ptp']", SelectorRank::Role, "nav href")
            .with_candidate("a:has-text('PTP')", SelectorRank::Text, "nav caption")
            .with_candidate("nav a#nav_ptp", SelectorRank::Structural, "nav id");
        // One poll interval per candidate: presence-or-absence, not a wait.
        let budget = self.options.poll_interval * 3;
        let live_visible = resolve_control(
            &mut self.driver,
            &probe,
            budget,
            self.options.poll_interval,
        )
        .is_ok();
        cross_check_ptp(&self.descriptor, live_visible)
    }

    /// Strategy for a field: authored override first, then the default
    /// chain for the target value's control type.
    fn field_strategy(
        &self,
        section: Section,
        field: &str,
        target: Option<&ControlValue>,
    ) -> SelectorStrategy {
        if let Some(authored) = self.strategies.get(&(section, field.to_string())) {
            return authored.clone();
        }
        let strategy = match target {
            Some(ControlValue::Checked(_)) => SelectorStrategy::checkbox(section, field),
            Some(ControlValue::Selected(_)) => SelectorStrategy::dropdown(section, field),
            _ => SelectorStrategy::field(section, field),
        };
        strategy.for_descriptor(&self.descriptor, section, self.active_interface.as_deref())
    }

    fn save_strategy(&self, section: Section) -> SelectorStrategy {
        SelectorStrategy::save_control(
            self.descriptor.series,
            section,
            self.active_interface.as_deref(),
        )
        .for_descriptor(&self.descriptor, section, self.active_interface.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FEATURE_PTP;
    use crate::driver::MockDevice;

    fn registry() -> Arc<CapabilityRegistry> {
        Arc::new(CapabilityRegistry::builtin())
    }

    fn general_device() -> MockDevice {
        MockDevice::new()
            .with_save_control(&["button#button_save"])
            .with_text_field(&["input[name='contact']"], "ops@example.com")
    }

    fn page_for(model: &str, device: MockDevice) -> Page<MockDevice> {
        Page::for_model(registry(), device, model)
            .unwrap()
            .with_mutation_options(MutationOptions::fast())
    }

    mod construction_tests {
        use super::*;

        #[test]
        fn test_for_model_resolves_descriptor() {
            let page = page_for("KRONOS-3R-HVLV-TCXO-A2F", MockDevice::new());
            assert!(page.has_feature(FEATURE_PTP));
            assert!((page.policy().multiplier() - 1.5).abs() < f64::EPSILON);
        }

        #[test]
        fn test_unknown_model_is_rejected() {
            let err = Page::for_model(registry(), MockDevice::new(), "KRONOS-9X").unwrap_err();
            assert!(matches!(err, RelojeroError::UnknownModel { .. }));
        }

        #[test]
        fn test_session_context_fail_fast() {
            let err = Page::for_session(
                registry(),
                MockDevice::new(),
                &SessionContext::undetected(),
            )
            .unwrap_err();
            assert!(matches!(err, RelojeroError::ModelNotDetected));
        }

        #[test]
        fn test_session_context_with_model() {
            let context = SessionContext::detected("KRONOS-2P-HV-2");
            assert_eq!(context.require_model().unwrap(), "KRONOS-2P-HV-2");
            let page = Page::for_session(registry(), MockDevice::new(), &context).unwrap();
            assert_eq!(page.descriptor().model, "KRONOS-2P-HV-2");
        }
    }

    mod availability_tests {
        use super::*;

        #[test]
        fn test_series2_page_reports_no_ptp() {
            let page = page_for("KRONOS-2R-HVXX-A2F", MockDevice::new());
            assert!(!page.is_available(Section::Ptp));
            assert!(page.is_available(Section::Display));
        }

        #[test]
        fn test_opening_unavailable_section_fails_fast() {
            let mut page = page_for("KRONOS-2R-HVXX-A2F", MockDevice::new());
            let err = page.open_section(Section::Ptp).unwrap_err();
            assert!(matches!(
                err,
                RelojeroError::SectionUnavailable { ref section, .. } if section == "ptp"
            ));
        }

        #[test]
        fn test_open_section_is_idempotent() {
            let mut page = page_for("KRONOS-2R-HVXX-A2F", MockDevice::new());
            page.open_section(Section::General).unwrap();
            let generation = page.driver().page_generation();
            page.open_section(Section::General).unwrap();
            assert_eq!(page.driver().page_generation(), generation);
        }
    }

    mod mutation_tests {
        use super::*;
        use crate::mutation::MutationState;

        #[test]
        fn test_mutate_and_verify_end_to_end() {
            let mut page = page_for("KRONOS-2R-HVXX-A2F", general_device());
            let result = page
                .mutate_and_verify(
                    Section::General,
                    "contact",
                    ControlValue::text("Test Engineer test@test.com"),
                )
                .unwrap();

            assert_eq!(result.final_state, MutationState::Saved);
            assert!(result.persisted);
            assert!(result.rollback_succeeded);
            assert_eq!(
                page.driver().committed_value("input[name='contact']"),
                Some(&ControlValue::text("ops@example.com"))
            );
        }

        #[test]
        fn test_constraint_rejection_is_preflight() {
            // 65 characters against the catalogued 64-char limit: rejected
            // before the device is touched, so nothing needs rollback.
            let mut page = page_for("KRONOS-2R-HVXX-A2F", general_device());
            let oversized = "x".repeat(65);
            let err = page
                .mutate_and_verify(Section::General, "contact", ControlValue::text(oversized))
                .unwrap_err();
            assert!(matches!(err, RelojeroError::ConstraintViolation { .. }));
            assert_eq!(
                page.driver().committed_value("input[name='contact']"),
                Some(&ControlValue::text("ops@example.com"))
            );
        }

        #[test]
        fn test_read_field_roundtrip() {
            let mut page = page_for("KRONOS-2R-HVXX-A2F", general_device());
            let value = page.read_field(Section::General, "contact").unwrap();
            assert_eq!(value, ControlValue::text("ops@example.com"));
        }

        #[test]
        fn test_authored_strategy_override() {
            let device = MockDevice::new()
                .with_save_control(&["button#button_save"])
                .with_text_field(&["td#device_contact input"], "ops@example.com");
            let mut page = page_for("KRONOS-2R-HVXX-A2F", device);
            page.register_strategy(
                Section::General,
                "contact",
                SelectorStrategy::new("general.contact").with_candidate(
                    "td#device_contact input",
                    SelectorRank::Structural,
                    "table-layout firmware",
                ),
            );
            let value = page.read_field(Section::General, "contact").unwrap();
            assert_eq!(value, ControlValue::text("ops@example.com"));
        }

        #[test]
        fn test_exclusive_selection_through_page() {
            let mut device = MockDevice::new().with_save_control(&["button#button_save"]);
            for (index, name) in ["mode1", "mode2", "mode3"].iter().enumerate() {
                let selector = format!("input[name='{name}']");
                device = device.with_checkbox(&[selector.as_str()], index == 0);
            }
            let device = device.with_exclusive_group(&[
                "input[name='mode1']",
                "input[name='mode2']",
                "input[name='mode3']",
            ]);
            let mut page = page_for("KRONOS-2R-HVXX-A2F", device);
            let result = page
                .select_exclusive(
                    Section::Display,
                    &["mode1", "mode2", "mode3"],
                    "mode3",
                )
                .unwrap();
            assert_eq!(result.active, vec!["display.mode3".to_string()]);
            assert!(result.persisted);
            assert!(result.rollback_succeeded);
        }

        #[test]
        fn test_unknown_exclusive_target_rejected() {
            let mut page = page_for("KRONOS-2R-HVXX-A2F", general_device());
            let err = page
                .select_exclusive(Section::Display, &["mode1"], "mode9")
                .unwrap_err();
            assert!(matches!(err, RelojeroError::InvalidState { .. }));
        }
    }

    mod ptp_cross_check_tests {
        use super::*;

        #[test]
        fn test_series2_without_live_ptp_is_consistent() {
            let mut page = page_for("KRONOS-2R-HVXX-A2F", MockDevice::new());
            assert!(page.verify_ptp_capability().is_none());
        }

        #[test]
        fn test_series2_with_live_ptp_nav_is_flagged() {
            let device = MockDevice::new().with_text_field(&["a[href='/ptp']"], "PTP");
            let mut page = page_for("KRONOS-2R-HVXX-A2F", device);
            let finding = page.verify_ptp_capability().unwrap();
            assert!(matches!(finding, Finding::CapabilityInconsistency { .. }));
        }

        #[test]
        fn test_series3_without_live_ptp_nav_is_flagged() {
            let mut page = page_for("KRONOS-3R-HVLV-TCXO-A2F", MockDevice::new());
            let finding = page.verify_ptp_capability().unwrap();
            assert!(matches!(finding, Finding::CapabilityInconsistency { .. }));
        }
    }

    mod interface_tests {
        use super::*;

        #[test]
        fn test_per_port_save_strategy_on_series3() {
            let page = page_for("KRONOS-3R-HVLV-TCXO-A2F", MockDevice::new())
                .with_active_interface("eth1");
            let strategy = page.save_strategy(Section::Network);
            assert_eq!(
                strategy.candidates[0].selector,
                "button#button_save_port_eth1"
            );
        }

        #[test]
        fn test_ptp_save_strategy_carries_expansion() {
            let page = page_for("KRONOS-3R-HVLV-TCXO-A2F", MockDevice::new())
                .with_active_interface("eth1");
            let strategy = page.save_strategy(Section::Ptp);
            assert_eq!(strategy.expand_first.as_deref(), Some("a#panel_ptp_eth1"));
        }
    }
}
