//! Abstract automation driver trait and the in-memory mock device.
//!
//! The browser transport is an external collaborator: everything the core
//! needs from it is expressed by the [`UiDriver`] trait, so implementations
//! can be swapped (a CDP bridge, a WebDriver bridge, or the in-memory
//! [`MockDevice`] used to test the core itself). Absence of an element is a
//! first-class `Option`, never an exception analogue.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::result::{RelojeroError, RelojeroResult};

/// Handle to a located UI control.
///
/// Handles are cheap identifiers, not live references: the page behind them
/// is rebuilt on every navigation, so callers re-resolve instead of caching
/// handles across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlHandle {
    /// Driver-scoped identifier for the element
    pub id: String,
    /// Element tag name ("input", "button", "select")
    pub tag: String,
}

impl ControlHandle {
    /// Create a new control handle
    #[must_use]
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
        }
    }
}

/// Value carried by a form control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlValue {
    /// Text input contents
    Text(String),
    /// Checkbox / radio state
    Checked(bool),
    /// Selected option of a dropdown
    Selected(String),
}

impl ControlValue {
    /// Convenience constructor for text values
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Convenience constructor for dropdown selections
    #[must_use]
    pub fn selected(value: impl Into<String>) -> Self {
        Self::Selected(value.into())
    }

    /// Text content, if this is a text or dropdown value
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Selected(s) => Some(s),
            Self::Checked(_) => None,
        }
    }

    /// Checkbox state, if this is a checkbox value
    #[must_use]
    pub const fn as_checked(&self) -> Option<bool> {
        match self {
            Self::Checked(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) | Self::Selected(s) => write!(f, "{s}"),
            Self::Checked(b) => write!(f, "{b}"),
        }
    }
}

/// Abstract driver trait for the automation collaborator.
///
/// Implementations supply element finding, state access and navigation; the
/// core supplies selector fallback, adaptive timing and the mutation
/// protocol on top. All methods are synchronous: the protocol is a strictly
/// sequential state machine and suspension happens only inside the core's
/// bounded polls.
pub trait UiDriver {
    /// Find an element by a single selector expression.
    ///
    /// Returns `None` when nothing matches; hidden elements are still
    /// returned (visibility is a separate query).
    fn find(&self, selector: &str) -> Option<ControlHandle>;

    /// Navigate to a path on the device
    fn navigate(&mut self, path: &str) -> RelojeroResult<()>;

    /// Reload the current page
    fn reload(&mut self) -> RelojeroResult<()>;

    /// Read the current value of a control
    fn read_value(&self, handle: &ControlHandle) -> RelojeroResult<ControlValue>;

    /// Set the value of a control
    fn set_value(&mut self, handle: &ControlHandle, value: &ControlValue) -> RelojeroResult<()>;

    /// Click a control
    fn click(&mut self, handle: &ControlHandle) -> RelojeroResult<()>;

    /// Whether the control is currently enabled
    fn is_enabled(&self, handle: &ControlHandle) -> bool;

    /// Whether the control is currently visible
    fn is_visible(&self, handle: &ControlHandle) -> bool;

    /// Whether the control is currently checked
    fn is_checked(&self, handle: &ControlHandle) -> bool;

    /// Monotonic counter bumped on every navigation or reload.
    ///
    /// Used as the oracle for models whose save operation settles via a
    /// page reload rather than by disabling the save control.
    fn page_generation(&self) -> u64;

    /// Current path, if known
    fn current_path(&self) -> Option<&str>;
}

// ============================================================================
// Mock device
// ============================================================================

/// What a mock control is, for click dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
enum ControlKind {
    Field,
    SaveButton,
    PanelHeader(String),
}

#[derive(Debug, Clone)]
struct MockControl {
    kind: ControlKind,
    tag: String,
    /// Every selector expression this control answers to
    selectors: Vec<String>,
    /// Value committed on the device
    committed: ControlValue,
    /// Value currently shown on the page
    pending: ControlValue,
    visible: bool,
    enabled: bool,
    /// Panel that must be expanded before this control is visible
    panel: Option<String>,
    /// Exclusive group index, for firmware-enforced single selection
    group: Option<usize>,
    /// Simulates a model-conditional field that a reload drops
    hide_on_reload: bool,
}

/// In-memory device page for hermetic protocol tests.
///
/// Simulates the observable behavior of an embedded configuration page: a
/// save control that enables when the form is dirty and disables after a
/// save, values that persist across reload only once saved, collapsible
/// panels, and checkbox groups with firmware-enforced mutual exclusion.
/// Catalogued quirks are switchable so each protocol path is reachable.
#[derive(Debug, Default)]
pub struct MockDevice {
    controls: BTreeMap<String, MockControl>,
    collapsed_panels: BTreeSet<String>,
    save_enabled: bool,
    /// Quirk: save control reports enabled regardless of form state
    save_never_disables: bool,
    /// Fault: save control never enables, even when dirty
    save_stuck_disabled: bool,
    /// Fault: save click is accepted but nothing is committed
    drop_saves: bool,
    /// Quirk: save settles via a page reload instead of disabling the control
    save_triggers_reload: bool,
    generation: u64,
    path: Option<String>,
    next_group: usize,
}

impl MockDevice {
    /// Create an empty mock device
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the save control under the given selector expressions
    #[must_use]
    pub fn with_save_control(mut self, selectors: &[&str]) -> Self {
        let id = selectors[0].to_string();
        self.controls.insert(
            id,
            MockControl {
                kind: ControlKind::SaveButton,
                tag: "button".to_string(),
                selectors: selectors.iter().map(ToString::to_string).collect(),
                committed: ControlValue::Checked(false),
                pending: ControlValue::Checked(false),
                visible: true,
                enabled: true,
                panel: None,
                group: None,
                hide_on_reload: false,
            },
        );
        self
    }

    /// Register a text field with its selector aliases and initial value
    #[must_use]
    pub fn with_text_field(mut self, selectors: &[&str], initial: &str) -> Self {
        self.insert_field(selectors, "input", ControlValue::text(initial));
        self
    }

    /// Register a checkbox
    #[must_use]
    pub fn with_checkbox(mut self, selectors: &[&str], checked: bool) -> Self {
        self.insert_field(selectors, "input", ControlValue::Checked(checked));
        self
    }

    /// Register a dropdown with its selected option
    #[must_use]
    pub fn with_dropdown(mut self, selectors: &[&str], selected: &str) -> Self {
        self.insert_field(selectors, "select", ControlValue::selected(selected));
        self
    }

    /// Register a collapsed panel and its header control
    #[must_use]
    pub fn with_collapsed_panel(mut self, panel: &str, header_selector: &str) -> Self {
        self.collapsed_panels.insert(panel.to_string());
        self.controls.insert(
            header_selector.to_string(),
            MockControl {
                kind: ControlKind::PanelHeader(panel.to_string()),
                tag: "a".to_string(),
                selectors: vec![header_selector.to_string()],
                committed: ControlValue::Checked(false),
                pending: ControlValue::Checked(false),
                visible: true,
                enabled: true,
                panel: None,
                group: None,
                hide_on_reload: false,
            },
        );
        self
    }

    /// Place an already-registered control inside a panel
    #[must_use]
    pub fn inside_panel(mut self, control_id: &str, panel: &str) -> Self {
        if let Some(control) = self.controls.get_mut(control_id) {
            control.panel = Some(panel.to_string());
        }
        self
    }

    /// Make the listed checkboxes a firmware-enforced exclusive group
    #[must_use]
    pub fn with_exclusive_group(mut self, control_ids: &[&str]) -> Self {
        let group = self.next_group;
        self.next_group += 1;
        for id in control_ids {
            if let Some(control) = self.controls.get_mut(*id) {
                control.group = Some(group);
            }
        }
        self
    }

    /// Quirk: the save control reports enabled at all times
    #[must_use]
    pub fn save_never_disables(mut self) -> Self {
        self.save_never_disables = true;
        self.save_enabled = true;
        self
    }

    /// Fault: the save control never enables
    #[must_use]
    pub fn save_stuck_disabled(mut self) -> Self {
        self.save_stuck_disabled = true;
        self
    }

    /// Fault: saves are accepted but silently dropped
    #[must_use]
    pub fn drop_saves(mut self) -> Self {
        self.drop_saves = true;
        self
    }

    /// Quirk: a save settles by reloading the page
    #[must_use]
    pub fn save_triggers_reload(mut self) -> Self {
        self.save_triggers_reload = true;
        self
    }

    /// Drop the control from the page on the next reload
    #[must_use]
    pub fn hide_on_reload(mut self, control_id: &str) -> Self {
        if let Some(control) = self.controls.get_mut(control_id) {
            control.hide_on_reload = true;
        }
        self
    }

    /// Value committed on the device, for test assertions
    #[must_use]
    pub fn committed_value(&self, control_id: &str) -> Option<&ControlValue> {
        self.controls.get(control_id).map(|c| &c.committed)
    }

    /// Number of checked checkboxes among the given controls
    #[must_use]
    pub fn checked_count(&self, control_ids: &[&str]) -> usize {
        control_ids
            .iter()
            .filter_map(|id| self.controls.get(*id))
            .filter(|c| c.pending == ControlValue::Checked(true))
            .count()
    }

    fn insert_field(&mut self, selectors: &[&str], tag: &str, value: ControlValue) {
        let id = selectors[0].to_string();
        self.controls.insert(
            id,
            MockControl {
                kind: ControlKind::Field,
                tag: tag.to_string(),
                selectors: selectors.iter().map(ToString::to_string).collect(),
                committed: value.clone(),
                pending: value,
                visible: true,
                enabled: true,
                panel: None,
                group: None,
                hide_on_reload: false,
            },
        );
    }

    fn dirty(&self) -> bool {
        self.controls
            .values()
            .any(|c| c.kind == ControlKind::Field && c.pending != c.committed)
    }

    fn refresh_save_state(&mut self) {
        if self.save_never_disables {
            self.save_enabled = true;
        } else if self.save_stuck_disabled {
            self.save_enabled = false;
        } else {
            self.save_enabled = self.dirty();
        }
    }

    fn apply_exclusivity(&mut self, id: &str) {
        let Some(group) = self.controls.get(id).and_then(|c| c.group) else {
            return;
        };
        let is_on = self
            .controls
            .get(id)
            .is_some_and(|c| c.pending == ControlValue::Checked(true));
        if !is_on {
            return;
        }
        for (other_id, other) in &mut self.controls {
            if other_id != id && other.group == Some(group) {
                other.pending = ControlValue::Checked(false);
            }
        }
    }

    fn commit_all(&mut self) {
        for control in self.controls.values_mut() {
            if control.kind == ControlKind::Field {
                control.committed = control.pending.clone();
            }
        }
    }

    fn revert_all(&mut self) {
        for control in self.controls.values_mut() {
            if control.kind == ControlKind::Field {
                control.pending = control.committed.clone();
                if control.hide_on_reload {
                    control.visible = false;
                }
            }
        }
    }
}

impl UiDriver for MockDevice {
    fn find(&self, selector: &str) -> Option<ControlHandle> {
        self.controls
            .iter()
            .find(|(_, c)| c.selectors.iter().any(|s| s == selector))
            .map(|(id, c)| ControlHandle::new(id.clone(), c.tag.clone()))
    }

    fn navigate(&mut self, path: &str) -> RelojeroResult<()> {
        self.path = Some(path.to_string());
        self.generation += 1;
        self.revert_all();
        self.refresh_save_state();
        Ok(())
    }

    fn reload(&mut self) -> RelojeroResult<()> {
        self.generation += 1;
        self.revert_all();
        self.refresh_save_state();
        Ok(())
    }

    fn read_value(&self, handle: &ControlHandle) -> RelojeroResult<ControlValue> {
        self.controls
            .get(&handle.id)
            .map(|c| c.pending.clone())
            .ok_or_else(|| RelojeroError::DriverError {
                message: format!("stale handle: {}", handle.id),
            })
    }

    fn set_value(&mut self, handle: &ControlHandle, value: &ControlValue) -> RelojeroResult<()> {
        let control =
            self.controls
                .get_mut(&handle.id)
                .ok_or_else(|| RelojeroError::DriverError {
                    message: format!("stale handle: {}", handle.id),
                })?;
        control.pending = value.clone();
        self.apply_exclusivity(&handle.id);
        self.refresh_save_state();
        Ok(())
    }

    fn click(&mut self, handle: &ControlHandle) -> RelojeroResult<()> {
        let kind = self
            .controls
            .get(&handle.id)
            .map(|c| c.kind.clone())
            .ok_or_else(|| RelojeroError::DriverError {
                message: format!("stale handle: {}", handle.id),
            })?;
        match kind {
            ControlKind::SaveButton => {
                if !self.drop_saves {
                    self.commit_all();
                }
                if self.save_triggers_reload {
                    self.generation += 1;
                    self.revert_all();
                }
                // The device acknowledges the click either way; a dropped
                // save is only observable after reload.
                self.save_enabled = self.save_never_disables;
            }
            ControlKind::PanelHeader(panel) => {
                if !self.collapsed_panels.remove(&panel) {
                    self.collapsed_panels.insert(panel);
                }
            }
            ControlKind::Field => {
                let control = self.controls.get_mut(&handle.id).unwrap();
                if let ControlValue::Checked(state) = control.pending {
                    control.pending = ControlValue::Checked(!state);
                    self.apply_exclusivity(&handle.id);
                    self.refresh_save_state();
                }
            }
        }
        Ok(())
    }

    fn is_enabled(&self, handle: &ControlHandle) -> bool {
        match self.controls.get(&handle.id) {
            Some(c) if c.kind == ControlKind::SaveButton => self.save_enabled,
            Some(c) => c.enabled,
            None => false,
        }
    }

    fn is_visible(&self, handle: &ControlHandle) -> bool {
        self.controls.get(&handle.id).is_some_and(|c| {
            c.visible
                && !c
                    .panel
                    .as_ref()
                    .is_some_and(|p| self.collapsed_panels.contains(p))
        })
    }

    fn is_checked(&self, handle: &ControlHandle) -> bool {
        self.controls
            .get(&handle.id)
            .is_some_and(|c| c.pending == ControlValue::Checked(true))
    }

    fn page_generation(&self) -> u64 {
        self.generation
    }

    fn current_path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> MockDevice {
        MockDevice::new()
            .with_save_control(&["button#button_save"])
            .with_text_field(&["input#contact", "input[name='contact']"], "ops@site")
    }

    mod control_value_tests {
        use super::*;

        #[test]
        fn test_text_accessors() {
            let v = ControlValue::text("hello");
            assert_eq!(v.as_text(), Some("hello"));
            assert_eq!(v.as_checked(), None);
        }

        #[test]
        fn test_checked_accessors() {
            let v = ControlValue::Checked(true);
            assert_eq!(v.as_checked(), Some(true));
            assert_eq!(v.as_text(), None);
        }

        #[test]
        fn test_display() {
            assert_eq!(ControlValue::text("a").to_string(), "a");
            assert_eq!(ControlValue::Checked(false).to_string(), "false");
        }
    }

    mod find_tests {
        use super::*;

        #[test]
        fn test_find_by_alias() {
            let dev = device();
            let by_id = dev.find("input#contact").unwrap();
            let by_name = dev.find("input[name='contact']").unwrap();
            assert_eq!(by_id.id, by_name.id);
        }

        #[test]
        fn test_find_absent_is_none() {
            let dev = device();
            assert!(dev.find("input#nonexistent").is_none());
        }
    }

    mod save_state_tests {
        use super::*;

        #[test]
        fn test_save_disabled_when_pristine() {
            let dev = device();
            let save = dev.find("button#button_save").unwrap();
            assert!(!dev.is_enabled(&save));
        }

        #[test]
        fn test_save_enables_on_change_and_disables_on_save() {
            let mut dev = device();
            let field = dev.find("input#contact").unwrap();
            let save = dev.find("button#button_save").unwrap();

            dev.set_value(&field, &ControlValue::text("new")).unwrap();
            assert!(dev.is_enabled(&save));

            dev.click(&save).unwrap();
            assert!(!dev.is_enabled(&save));
            assert_eq!(
                dev.committed_value("input#contact"),
                Some(&ControlValue::text("new"))
            );
        }

        #[test]
        fn test_unsaved_change_reverts_on_reload() {
            let mut dev = device();
            let field = dev.find("input#contact").unwrap();
            dev.set_value(&field, &ControlValue::text("new")).unwrap();
            dev.reload().unwrap();
            assert_eq!(dev.read_value(&field).unwrap(), ControlValue::text("ops@site"));
        }

        #[test]
        fn test_saved_change_survives_reload() {
            let mut dev = device();
            let field = dev.find("input#contact").unwrap();
            let save = dev.find("button#button_save").unwrap();
            dev.set_value(&field, &ControlValue::text("new")).unwrap();
            dev.click(&save).unwrap();
            dev.reload().unwrap();
            assert_eq!(dev.read_value(&field).unwrap(), ControlValue::text("new"));
        }

        #[test]
        fn test_drop_saves_loses_value_after_reload() {
            let mut dev = device().drop_saves();
            let field = dev.find("input#contact").unwrap();
            let save = dev.find("button#button_save").unwrap();
            dev.set_value(&field, &ControlValue::text("new")).unwrap();
            dev.click(&save).unwrap();
            dev.reload().unwrap();
            assert_eq!(dev.read_value(&field).unwrap(), ControlValue::text("ops@site"));
        }

        #[test]
        fn test_never_disables_quirk() {
            let mut dev = device().save_never_disables();
            let save = dev.find("button#button_save").unwrap();
            assert!(dev.is_enabled(&save));
            dev.click(&save).unwrap();
            assert!(dev.is_enabled(&save));
        }

        #[test]
        fn test_save_triggers_reload_bumps_generation() {
            let mut dev = device().save_triggers_reload();
            let field = dev.find("input#contact").unwrap();
            let save = dev.find("button#button_save").unwrap();
            let before = dev.page_generation();
            dev.set_value(&field, &ControlValue::text("new")).unwrap();
            dev.click(&save).unwrap();
            assert!(dev.page_generation() > before);
            assert_eq!(dev.read_value(&field).unwrap(), ControlValue::text("new"));
        }
    }

    mod exclusivity_tests {
        use super::*;

        fn mode_device() -> MockDevice {
            MockDevice::new()
                .with_save_control(&["button#button_save"])
                .with_checkbox(&["input[name='mode1']"], true)
                .with_checkbox(&["input[name='mode2']"], false)
                .with_checkbox(&["input[name='mode3']"], false)
                .with_exclusive_group(&[
                    "input[name='mode1']",
                    "input[name='mode2']",
                    "input[name='mode3']",
                ])
        }

        #[test]
        fn test_setting_one_unchecks_others() {
            let mut dev = mode_device();
            let mode3 = dev.find("input[name='mode3']").unwrap();
            dev.set_value(&mode3, &ControlValue::Checked(true)).unwrap();

            let mode1 = dev.find("input[name='mode1']").unwrap();
            assert!(!dev.is_checked(&mode1));
            assert!(dev.is_checked(&mode3));
            assert_eq!(
                dev.checked_count(&[
                    "input[name='mode1']",
                    "input[name='mode2']",
                    "input[name='mode3']"
                ]),
                1
            );
        }

        #[test]
        fn test_click_toggles_checkbox() {
            let mut dev = mode_device();
            let mode2 = dev.find("input[name='mode2']").unwrap();
            dev.click(&mode2).unwrap();
            assert!(dev.is_checked(&mode2));
        }
    }

    mod panel_tests {
        use super::*;

        #[test]
        fn test_control_in_collapsed_panel_not_visible() {
            let dev = MockDevice::new()
                .with_text_field(&["input[name='domain']"], "0")
                .with_collapsed_panel("ptp-eth1", "a#panel_ptp_eth1")
                .inside_panel("input[name='domain']", "ptp-eth1");
            let field = dev.find("input[name='domain']").unwrap();
            assert!(!dev.is_visible(&field));
        }

        #[test]
        fn test_expanding_panel_reveals_control() {
            let mut dev = MockDevice::new()
                .with_text_field(&["input[name='domain']"], "0")
                .with_collapsed_panel("ptp-eth1", "a#panel_ptp_eth1")
                .inside_panel("input[name='domain']", "ptp-eth1");
            let header = dev.find("a#panel_ptp_eth1").unwrap();
            dev.click(&header).unwrap();
            let field = dev.find("input[name='domain']").unwrap();
            assert!(dev.is_visible(&field));
        }
    }

    mod hide_on_reload_tests {
        use super::*;

        #[test]
        fn test_field_dropped_by_reload() {
            let mut dev = device().hide_on_reload("input#contact");
            let field = dev.find("input#contact").unwrap();
            assert!(dev.is_visible(&field));
            dev.reload().unwrap();
            assert!(!dev.is_visible(&field));
        }
    }
}
