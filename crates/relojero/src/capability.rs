//! Capability registry: per-model descriptors of what each hardware
//! generation supports.
//!
//! The registry is the single source of truth for device differences:
//! which configuration sections exist, how much slower a model is, which
//! catalogued quirks its firmware exhibits, and what each field accepts.
//! It is built once (from the built-in table or from JSON) and shared
//! read-only across concurrent test workers. It is never a hidden
//! singleton: every page façade receives it explicitly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::result::{RelojeroError, RelojeroResult};
use crate::timing::OperationKind;

/// Feature flag name for PTP support
pub const FEATURE_PTP: &str = "ptp";
/// Feature flag name for SyncE support
pub const FEATURE_SYNC_E: &str = "sync_e";
/// Feature flag name for the extended GNSS configuration surface
pub const FEATURE_ADVANCED_GNSS: &str = "advanced_gnss";
/// Feature flag name for multi-port network configuration
pub const FEATURE_MULTI_INTERFACE: &str = "multi_interface";

/// Hardware generation of a device model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Series {
    /// Series 2: single network port, no PTP
    Series2,
    /// Series 3: multi-port, PTP-capable
    Series3,
}

impl std::fmt::Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Series2 => write!(f, "Series 2"),
            Self::Series3 => write!(f, "Series 3"),
        }
    }
}

/// Configuration sections of the device web interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// Device name, description, location, contact
    General,
    /// IP / mask / MTU / VLAN, per port on Series 3
    Network,
    /// Timezone and DST rules
    Time,
    /// Constellation selection and antenna delay
    Gnss,
    /// Output signal types and rates
    Outputs,
    /// Front display modes
    Display,
    /// SNMP v1/v3 and traps
    Snmp,
    /// Remote syslog targets
    Syslog,
    /// Access policy (HTTPS enforcement, sessions)
    Access,
    /// Contact information
    Contact,
    /// PTP profiles per port (Series 3 only)
    Ptp,
}

impl Section {
    /// Section identifier as used in navigation and logging
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Network => "network",
            Self::Time => "time",
            Self::Gnss => "gnss",
            Self::Outputs => "outputs",
            Self::Display => "display",
            Self::Snmp => "snmp",
            Self::Syslog => "syslog",
            Self::Access => "access",
            Self::Contact => "contact",
            Self::Ptp => "ptp",
        }
    }

    /// Path of the section on the embedded web server
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}", self.as_str())
    }

    /// All sections a Series 2 model exposes
    #[must_use]
    pub const fn series2_set() -> [Self; 10] {
        [
            Self::General,
            Self::Network,
            Self::Time,
            Self::Gnss,
            Self::Outputs,
            Self::Display,
            Self::Snmp,
            Self::Syslog,
            Self::Access,
            Self::Contact,
        ]
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of value a field accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Free text, optionally length-limited
    Text,
    /// Integer input
    Numeric,
    /// One of a fixed option set
    Enumerated,
}

/// Catalogued constraint for a single (section, field) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConstraint {
    /// Maximum accepted length, where the firmware enforces one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Kind of value the field accepts
    pub kind: FieldKind,
}

impl FieldConstraint {
    /// Text constraint with a maximum length
    #[must_use]
    pub const fn text(max_length: usize) -> Self {
        Self {
            max_length: Some(max_length),
            kind: FieldKind::Text,
        }
    }

    /// Unbounded numeric constraint
    #[must_use]
    pub const fn numeric() -> Self {
        Self {
            max_length: None,
            kind: FieldKind::Numeric,
        }
    }

    /// Enumerated (dropdown) constraint
    #[must_use]
    pub const fn enumerated() -> Self {
        Self {
            max_length: None,
            kind: FieldKind::Enumerated,
        }
    }

    /// Check a candidate value against this constraint.
    ///
    /// # Errors
    ///
    /// Returns the reason the value would be refused by the firmware.
    pub fn permits(&self, value: &crate::driver::ControlValue) -> Result<(), String> {
        use crate::driver::ControlValue;
        match (self.kind, value) {
            (FieldKind::Text, ControlValue::Text(s)) => match self.max_length {
                Some(max) if s.chars().count() > max => {
                    Err(format!("length {} exceeds maximum {max}", s.chars().count()))
                }
                _ => Ok(()),
            },
            (FieldKind::Numeric, ControlValue::Text(s) | ControlValue::Selected(s)) => s
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("'{s}' is not an integer")),
            (FieldKind::Enumerated, ControlValue::Selected(_) | ControlValue::Text(_)) => Ok(()),
            (kind, other) => Err(format!("{other} is not a {kind:?} value")),
        }
    }
}

/// Catalogued model-specific deviation from expected behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "quirk", rename_all = "snake_case")]
pub enum Quirk {
    /// The save control reports enabled at all times on this firmware
    SaveControlNeverDisables,
    /// A save settles via a page reload instead of disabling the control
    SaveTriggersReload,
    /// One operation kind needs an extra multiplicative delay
    ExtraDelay {
        /// Operation the delay applies to
        operation: OperationKind,
        /// Additional multiplicative factor, > 1.0
        factor: f64,
    },
    /// Collapsible panels (PTP per-port settings) start collapsed
    PanelsCollapsedByDefault,
    /// Identical controls repeat per port; selectors must disambiguate
    MultiInterfaceAmbiguity,
    /// HTTP requests redirect to HTTPS in a way older clients mishandle
    HttpToHttpsRedirect,
}

/// Declarative record of what one hardware model supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Hardware model identifier, the registry key
    pub model: String,
    /// Hardware generation
    pub series: Series,
    /// Scales every wait budget for this model, ≥ 1.0
    pub timeout_multiplier: f64,
    /// Sections this model's web interface exposes
    pub available_sections: BTreeSet<Section>,
    /// Capability name → supported; unknown names read as unsupported
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
    /// Per-section field constraints
    #[serde(default)]
    pub field_constraints: BTreeMap<Section, BTreeMap<String, FieldConstraint>>,
    /// Network ports, in device order
    #[serde(default)]
    pub network_interfaces: Vec<String>,
    /// Ports that carry PTP (subset of `network_interfaces`)
    #[serde(default)]
    pub ptp_interfaces: Vec<String>,
    /// Catalogued quirks of this model's firmware
    #[serde(default)]
    pub known_issues: Vec<Quirk>,
}

impl CapabilityDescriptor {
    /// Whether this model exposes the given section
    #[must_use]
    pub fn is_section_available(&self, section: Section) -> bool {
        self.available_sections.contains(&section)
    }

    /// Whether this model supports the named capability.
    ///
    /// Unknown flag names read as `false` rather than erroring, so tables
    /// written before a flag existed keep working.
    #[must_use]
    pub fn has_feature(&self, flag: &str) -> bool {
        self.feature_flags.get(flag).copied().unwrap_or(false)
    }

    /// Catalogued constraint for a field, if any
    #[must_use]
    pub fn constraint(&self, section: Section, field: &str) -> Option<&FieldConstraint> {
        self.field_constraints.get(&section)?.get(field)
    }

    /// Whether a quirk is catalogued for this model
    #[must_use]
    pub fn has_quirk(&self, quirk: &Quirk) -> bool {
        self.known_issues.contains(quirk)
    }

    /// Save control never disables on this firmware
    #[must_use]
    pub fn save_never_disables(&self) -> bool {
        self.has_quirk(&Quirk::SaveControlNeverDisables)
    }

    /// Saves settle via reload on this firmware
    #[must_use]
    pub fn saves_via_reload(&self) -> bool {
        self.has_quirk(&Quirk::SaveTriggersReload)
    }

    /// Extra multiplicative delay for the given operation, 1.0 if none
    #[must_use]
    pub fn extra_delay_factor(&self, operation: OperationKind) -> f64 {
        self.known_issues
            .iter()
            .filter_map(|q| match q {
                Quirk::ExtraDelay {
                    operation: op,
                    factor,
                } if *op == operation => Some(*factor),
                _ => None,
            })
            .product::<f64>()
            .max(1.0)
    }

    /// Check the descriptor's internal invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RelojeroError::InvalidDescriptor`] when sections, feature
    /// flags and series disagree, or the multiplier is below 1.0.
    pub fn validate(&self) -> RelojeroResult<()> {
        let fail = |reason: &str| {
            Err(RelojeroError::InvalidDescriptor {
                model: self.model.clone(),
                reason: reason.to_string(),
            })
        };

        if self.timeout_multiplier < 1.0 {
            return fail("timeout_multiplier must be >= 1.0");
        }
        let ptp_flag = self.has_feature(FEATURE_PTP);
        let ptp_section = self.is_section_available(Section::Ptp);
        match self.series {
            Series::Series2 => {
                if ptp_flag || ptp_section || !self.ptp_interfaces.is_empty() {
                    return fail("Series 2 descriptors never advertise PTP");
                }
            }
            Series::Series3 => {
                if ptp_flag != ptp_section {
                    return fail("ptp feature flag and ptp section must agree");
                }
            }
        }
        for port in &self.ptp_interfaces {
            if !self.network_interfaces.contains(port) {
                return fail("ptp_interfaces must be a subset of network_interfaces");
            }
        }
        Ok(())
    }
}

/// Read-only store of capability descriptors, keyed by model identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityRegistry {
    table: BTreeMap<String, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    /// Build a registry from descriptors, validating each.
    ///
    /// # Errors
    ///
    /// Returns the first descriptor validation failure.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = CapabilityDescriptor>,
    ) -> RelojeroResult<Self> {
        let mut table = BTreeMap::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            table.insert(descriptor.model.clone(), descriptor);
        }
        Ok(Self { table })
    }

    /// Load a registry from a JSON array of descriptors.
    ///
    /// # Errors
    ///
    /// Returns a JSON error for malformed input or a validation error for
    /// an internally inconsistent descriptor.
    pub fn from_json(json: &str) -> RelojeroResult<Self> {
        let descriptors: Vec<CapabilityDescriptor> = serde_json::from_str(json)?;
        Self::from_descriptors(descriptors)
    }

    /// The built-in table of catalogued models.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_descriptors(builtin_descriptors())
            .expect("built-in capability table is internally consistent")
    }

    /// Resolve a model identifier to its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RelojeroError::UnknownModel`] for models absent from the
    /// table; callers must treat this as a hard stop.
    pub fn resolve(&self, model: &str) -> RelojeroResult<&CapabilityDescriptor> {
        self.table
            .get(model)
            .ok_or_else(|| RelojeroError::UnknownModel {
                model: model.to_string(),
            })
    }

    /// All catalogued model identifiers
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Number of catalogued models
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn general_constraints() -> BTreeMap<String, FieldConstraint> {
    let mut fields = BTreeMap::new();
    fields.insert("name".to_string(), FieldConstraint::text(64));
    fields.insert("description".to_string(), FieldConstraint::text(128));
    fields.insert("location".to_string(), FieldConstraint::text(64));
    fields.insert("contact".to_string(), FieldConstraint::text(64));
    fields
}

fn common_constraints() -> BTreeMap<Section, BTreeMap<String, FieldConstraint>> {
    let mut constraints = BTreeMap::new();
    constraints.insert(Section::General, general_constraints());

    let mut network = BTreeMap::new();
    network.insert("mtu".to_string(), FieldConstraint::numeric());
    network.insert("vlan".to_string(), FieldConstraint::numeric());
    constraints.insert(Section::Network, network);

    let mut time = BTreeMap::new();
    time.insert("timezone".to_string(), FieldConstraint::enumerated());
    constraints.insert(Section::Time, time);

    let mut syslog = BTreeMap::new();
    syslog.insert("server".to_string(), FieldConstraint::text(64));
    constraints.insert(Section::Syslog, syslog);

    constraints
}

fn series2_descriptor(model: &str, known_issues: Vec<Quirk>) -> CapabilityDescriptor {
    let mut feature_flags = BTreeMap::new();
    feature_flags.insert(FEATURE_PTP.to_string(), false);
    feature_flags.insert(FEATURE_SYNC_E.to_string(), false);
    feature_flags.insert(FEATURE_ADVANCED_GNSS.to_string(), false);
    feature_flags.insert(FEATURE_MULTI_INTERFACE.to_string(), false);

    CapabilityDescriptor {
        model: model.to_string(),
        series: Series::Series2,
        timeout_multiplier: 1.0,
        available_sections: Section::series2_set().into_iter().collect(),
        feature_flags,
        field_constraints: common_constraints(),
        network_interfaces: vec!["eth0".to_string()],
        ptp_interfaces: vec![],
        known_issues,
    }
}

fn series3_descriptor(
    model: &str,
    timeout_multiplier: f64,
    interfaces: &[&str],
    ptp_ports: &[&str],
    known_issues: Vec<Quirk>,
) -> CapabilityDescriptor {
    let mut feature_flags = BTreeMap::new();
    feature_flags.insert(FEATURE_PTP.to_string(), true);
    feature_flags.insert(FEATURE_SYNC_E.to_string(), true);
    feature_flags.insert(FEATURE_ADVANCED_GNSS.to_string(), true);
    feature_flags.insert(FEATURE_MULTI_INTERFACE.to_string(), interfaces.len() > 1);

    let mut sections: BTreeSet<Section> = Section::series2_set().into_iter().collect();
    sections.insert(Section::Ptp);

    let mut field_constraints = common_constraints();
    let mut ptp = BTreeMap::new();
    ptp.insert("domain".to_string(), FieldConstraint::numeric());
    ptp.insert("priority1".to_string(), FieldConstraint::numeric());
    ptp.insert("profile".to_string(), FieldConstraint::enumerated());
    field_constraints.insert(Section::Ptp, ptp);

    CapabilityDescriptor {
        model: model.to_string(),
        series: Series::Series3,
        timeout_multiplier,
        available_sections: sections,
        feature_flags,
        field_constraints,
        network_interfaces: interfaces.iter().map(ToString::to_string).collect(),
        ptp_interfaces: ptp_ports.iter().map(ToString::to_string).collect(),
        known_issues,
    }
}

/// The five catalogued models: two Series 2, three Series 3.
///
/// Multipliers follow the catalogued issue classes: navigation/unlock
/// timeout history earns 2.0, PTP/multi-port complexity earns 1.5, clean
/// models stay at 1.0.
fn builtin_descriptors() -> Vec<CapabilityDescriptor> {
    vec![
        series2_descriptor("KRONOS-2R-HVXX-A2F", vec![]),
        series2_descriptor("KRONOS-2P-HV-2", vec![Quirk::HttpToHttpsRedirect]),
        series3_descriptor(
            "KRONOS-3R-HVLV-TCXO-A2F",
            1.5,
            &["eth0", "eth1", "eth2", "eth3"],
            &["eth1", "eth2", "eth3"],
            vec![
                Quirk::PanelsCollapsedByDefault,
                Quirk::MultiInterfaceAmbiguity,
            ],
        ),
        series3_descriptor(
            "KRONOS-3R-HVXX-TCXO-44A",
            2.0,
            &["eth0", "eth1", "eth3"],
            &["eth1", "eth3"],
            vec![
                Quirk::PanelsCollapsedByDefault,
                Quirk::MultiInterfaceAmbiguity,
                Quirk::ExtraDelay {
                    operation: OperationKind::SectionNavigation,
                    factor: 1.5,
                },
            ],
        ),
        series3_descriptor(
            "KRONOS-3R-HVXX-TCXO-A2X",
            2.0,
            &["eth0", "eth1", "eth2", "eth3", "eth4"],
            &["eth1", "eth3"],
            vec![
                Quirk::PanelsCollapsedByDefault,
                Quirk::MultiInterfaceAmbiguity,
                Quirk::ExtraDelay {
                    operation: OperationKind::SectionNavigation,
                    factor: 1.5,
                },
            ],
        ),
    ]
}
