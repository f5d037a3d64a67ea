//! Section and feature availability resolution.
//!
//! Thin, model-keyed convenience layer over the capability registry, used
//! to skip operations a model cannot support instead of attempting a
//! lookup that is guaranteed to fail. Replaces duck-typed probing of page
//! objects with an explicit capability lookup: "does this model support X"
//! is a table question, never "does this object happen to define a
//! method".

use std::sync::Arc;

use crate::capability::{CapabilityDescriptor, CapabilityRegistry, Section, Series, FEATURE_PTP};
use crate::mutation::Finding;
use crate::result::RelojeroResult;

/// Model-keyed availability queries over a shared registry.
#[derive(Debug, Clone)]
pub struct AvailabilityResolver {
    registry: Arc<CapabilityRegistry>,
}

impl AvailabilityResolver {
    /// Create a resolver over a shared registry
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this resolver reads from
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Whether the model's web interface exposes the section.
    ///
    /// # Errors
    ///
    /// Returns [`crate::result::RelojeroError::UnknownModel`] for models
    /// absent from the table.
    pub fn is_section_available(&self, model: &str, section: Section) -> RelojeroResult<bool> {
        Ok(self.registry.resolve(model)?.is_section_available(section))
    }

    /// Whether the model supports the named capability.
    ///
    /// PTP gets a series cross-check: a Series 2 model reads `false` here
    /// regardless of what its flag table claims, since the generation
    /// simply does not carry the hardware.
    ///
    /// # Errors
    ///
    /// Returns [`crate::result::RelojeroError::UnknownModel`] for models
    /// absent from the table.
    pub fn is_feature_available(&self, model: &str, feature: &str) -> RelojeroResult<bool> {
        let descriptor = self.registry.resolve(model)?;
        if feature == FEATURE_PTP && descriptor.series == Series::Series2 {
            return Ok(false);
        }
        Ok(descriptor.has_feature(feature))
    }
}

/// Compare the table's PTP claim against what the live page renders.
///
/// The live device is authoritative and the table may be stale, so a
/// disagreement is reported as a warning-level finding rather than an
/// abort: a Series 2 device unexpectedly exposing a PTP control means
/// either a stale capability table or surprising firmware, and both are
/// worth surfacing.
#[must_use]
pub fn cross_check_ptp(
    descriptor: &CapabilityDescriptor,
    live_ptp_visible: bool,
) -> Option<Finding> {
    let expected = descriptor.series == Series::Series3 && descriptor.has_feature(FEATURE_PTP);
    if live_ptp_visible == expected {
        return None;
    }
    let detail = if live_ptp_visible {
        format!(
            "{} device renders a PTP surface the capability table does not advertise",
            descriptor.series
        )
    } else {
        format!(
            "{} device renders no PTP surface despite the capability table advertising one",
            descriptor.series
        )
    };
    tracing::warn!(model = %descriptor.model, %detail, "capability inconsistency");
    Some(Finding::CapabilityInconsistency {
        model: descriptor.model.clone(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FEATURE_MULTI_INTERFACE;
    use crate::result::RelojeroError;

    fn resolver() -> AvailabilityResolver {
        AvailabilityResolver::new(Arc::new(CapabilityRegistry::builtin()))
    }

    mod section_tests {
        use super::*;

        #[test]
        fn test_series2_model_has_no_ptp_section() {
            let resolver = resolver();
            assert!(!resolver
                .is_section_available("KRONOS-2R-HVXX-A2F", Section::Ptp)
                .unwrap());
            assert!(resolver
                .is_section_available("KRONOS-2R-HVXX-A2F", Section::Gnss)
                .unwrap());
        }

        #[test]
        fn test_series3_model_has_ptp_section() {
            let resolver = resolver();
            assert!(resolver
                .is_section_available("KRONOS-3R-HVLV-TCXO-A2F", Section::Ptp)
                .unwrap());
        }

        #[test]
        fn test_unknown_model_fails_fast() {
            let resolver = resolver();
            let err = resolver
                .is_section_available("KRONOS-9X", Section::General)
                .unwrap_err();
            assert!(matches!(err, RelojeroError::UnknownModel { .. }));
        }
    }

    mod feature_tests {
        use super::*;

        #[test]
        fn test_ptp_feature_by_series() {
            let resolver = resolver();
            assert!(!resolver
                .is_feature_available("KRONOS-2P-HV-2", FEATURE_PTP)
                .unwrap());
            assert!(resolver
                .is_feature_available("KRONOS-3R-HVXX-TCXO-A2X", FEATURE_PTP)
                .unwrap());
        }

        #[test]
        fn test_multi_interface_flag() {
            let resolver = resolver();
            assert!(!resolver
                .is_feature_available("KRONOS-2R-HVXX-A2F", FEATURE_MULTI_INTERFACE)
                .unwrap());
            assert!(resolver
                .is_feature_available("KRONOS-3R-HVLV-TCXO-A2F", FEATURE_MULTI_INTERFACE)
                .unwrap());
        }

        #[test]
        fn test_unknown_feature_reads_false_not_error() {
            let resolver = resolver();
            assert!(!resolver
                .is_feature_available("KRONOS-2R-HVXX-A2F", "quantum_sync")
                .unwrap());
        }

        #[test]
        fn test_series2_ptp_false_even_with_lying_flag_table() {
            // A tampered descriptor claiming PTP on Series 2 is overridden
            // by the series cross-check.
            let registry = CapabilityRegistry::builtin();
            let mut descriptor = registry.resolve("KRONOS-2R-HVXX-A2F").unwrap().clone();
            descriptor
                .feature_flags
                .insert(FEATURE_PTP.to_string(), true);
            // Bypass table validation deliberately: the resolver must not
            // trust the flag alone.
            assert_eq!(descriptor.series, Series::Series2);
            assert!(descriptor.has_feature(FEATURE_PTP));
            let finding = cross_check_ptp(&descriptor, false);
            assert!(finding.is_none(), "series2 with no live ptp is consistent");
        }
    }

    mod cross_check_tests {
        use super::*;

        #[test]
        fn test_consistent_series3_yields_no_finding() {
            let registry = CapabilityRegistry::builtin();
            let descriptor = registry.resolve("KRONOS-3R-HVLV-TCXO-A2F").unwrap();
            assert!(cross_check_ptp(descriptor, true).is_none());
        }

        #[test]
        fn test_series2_with_live_ptp_is_reported() {
            let registry = CapabilityRegistry::builtin();
            let descriptor = registry.resolve("KRONOS-2R-HVXX-A2F").unwrap();
            let finding = cross_check_ptp(descriptor, true).unwrap();
            assert!(matches!(
                finding,
                Finding::CapabilityInconsistency { ref model, .. }
                    if model == "KRONOS-2R-HVXX-A2F"
            ));
        }

        #[test]
        fn test_series3_missing_live_ptp_is_reported() {
            let registry = CapabilityRegistry::builtin();
            let descriptor = registry.resolve("KRONOS-3R-HVXX-TCXO-44A").unwrap();
            let finding = cross_check_ptp(descriptor, false).unwrap();
            assert_eq!(
                finding.severity(),
                crate::mutation::FindingSeverity::Warning
            );
        }
    }
}
