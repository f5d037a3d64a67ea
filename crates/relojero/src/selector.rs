//! Selector strategies and the fallback resolution engine.
//!
//! Firmware across the two hardware generations does not guarantee stable
//! semantic markup, so a logical control is located through an ordered
//! chain of candidate selectors: role/semantic first, text-anchored next,
//! structural CSS last. Resolution at a lower rank succeeds the operation
//! but is logged, so silent drift of the primary selectors stays
//! observable instead of being either fatal or invisible.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capability::{Quirk, Section, Series};
use crate::driver::{ControlHandle, UiDriver};
use crate::result::{RelojeroError, RelojeroResult};
use crate::timing::poll_until;

/// Priority class of a candidate selector, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorRank {
    /// Semantic identity: stable ids, name attributes, ARIA roles
    Role,
    /// User-facing text: labels, button captions
    Text,
    /// Markup structure: positional CSS, class soup
    Structural,
}

impl SelectorRank {
    /// Rank name for logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Text => "text",
            Self::Structural => "structural",
        }
    }
}

impl std::fmt::Display for SelectorRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One candidate selector inside a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    /// Selector expression passed verbatim to the driver
    pub selector: String,
    /// Priority class of this candidate
    pub rank: SelectorRank,
    /// Why this candidate exists
    pub rationale: String,
}

/// Ordered list of ways to locate one logical control.
///
/// Authored statically per control and resolved fresh on every lookup —
/// the page is rebuilt on every navigation, so nothing is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorStrategy {
    /// Logical control name, used in errors and logs
    pub name: String,
    /// Candidates in priority order
    pub candidates: Vec<SelectorCandidate>,
    /// Panel header to expand first, for panels that start collapsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand_first: Option<String>,
}

impl SelectorStrategy {
    /// Empty strategy for a named logical control
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidates: Vec::new(),
            expand_first: None,
        }
    }

    /// Append a candidate
    #[must_use]
    pub fn with_candidate(
        mut self,
        selector: impl Into<String>,
        rank: SelectorRank,
        rationale: impl Into<String>,
    ) -> Self {
        self.candidates.push(SelectorCandidate {
            selector: selector.into(),
            rank,
            rationale: rationale.into(),
        });
        self
    }

    /// Require a collapsed panel to be expanded before resolution
    #[must_use]
    pub fn with_expansion(mut self, panel_header_selector: impl Into<String>) -> Self {
        self.expand_first = Some(panel_header_selector.into());
        self
    }

    /// Standard chain for a text input field.
    #[must_use]
    pub fn field(section: Section, field: &str) -> Self {
        Self::new(format!("{section}.{field}"))
            .with_candidate(
                format!("input[name='{field}']"),
                SelectorRank::Role,
                "name attribute is the field's stable identity",
            )
            .with_candidate(
                format!("label:has-text('{field}') + input"),
                SelectorRank::Text,
                "label text survives attribute churn",
            )
            .with_candidate(
                format!("#{section} input[id*='{field}']"),
                SelectorRank::Structural,
                "last resort: id fragment inside the section container",
            )
    }

    /// Standard chain for a checkbox.
    #[must_use]
    pub fn checkbox(section: Section, field: &str) -> Self {
        Self::new(format!("{section}.{field}"))
            .with_candidate(
                format!("input[name='{field}']"),
                SelectorRank::Role,
                "name attribute is the checkbox's stable identity",
            )
            .with_candidate(
                format!("label:has-text('{field}') input[type='checkbox']"),
                SelectorRank::Text,
                "label-wrapped checkbox",
            )
            .with_candidate(
                format!("#{section} input[type='checkbox'][id*='{field}']"),
                SelectorRank::Structural,
                "last resort: id fragment inside the section container",
            )
    }

    /// Standard chain for a dropdown.
    #[must_use]
    pub fn dropdown(section: Section, field: &str) -> Self {
        Self::new(format!("{section}.{field}"))
            .with_candidate(
                format!("select[name='{field}']"),
                SelectorRank::Role,
                "name attribute is the dropdown's stable identity",
            )
            .with_candidate(
                format!("label:has-text('{field}') + select"),
                SelectorRank::Text,
                "label text survives attribute churn",
            )
            .with_candidate(
                format!("#{section} select[id*='{field}']"),
                SelectorRank::Structural,
                "last resort: id fragment inside the section container",
            )
    }

    /// Chain for the save control of a section.
    ///
    /// Series 3 network and PTP screens carry one save button per port
    /// (`button#button_save_port_eth1` …); everything else uses the
    /// generic `button#button_save`. Text fallbacks cover firmware
    /// variants labelling the control Save or Apply; the structural
    /// fallback catches restyled panels.
    #[must_use]
    pub fn save_control(series: Series, section: Section, interface: Option<&str>) -> Self {
        let per_port = series == Series::Series3
            && matches!(section, Section::Network | Section::Ptp)
            && interface.is_some();
        let mut strategy = Self::new(format!("{section}.save"));
        if per_port {
            let port = interface.unwrap_or_default();
            strategy = strategy.with_candidate(
                format!("button#button_save_port_{port}"),
                SelectorRank::Role,
                "interface-specific save id on multi-port screens",
            );
        } else {
            strategy = strategy.with_candidate(
                "button#button_save",
                SelectorRank::Role,
                "generic save id",
            );
        }
        strategy
            .with_candidate(
                "button:has-text('Save')",
                SelectorRank::Text,
                "user-facing caption",
            )
            .with_candidate(
                "input[type='submit'][value='Apply']",
                SelectorRank::Text,
                "older firmware labels the control Apply",
            )
            .with_candidate(
                "form .panel-footer button[type='submit']",
                SelectorRank::Structural,
                "last resort: submit button in the form footer",
            )
    }

    /// Attach the collapsed-panel pre-step when the model needs it.
    #[must_use]
    pub fn for_descriptor(
        self,
        descriptor: &crate::capability::CapabilityDescriptor,
        section: Section,
        interface: Option<&str>,
    ) -> Self {
        if section == Section::Ptp && descriptor.has_quirk(&Quirk::PanelsCollapsedByDefault) {
            if let Some(port) = interface {
                return self.with_expansion(format!("a#panel_ptp_{port}"));
            }
        }
        self
    }
}

/// A successfully resolved control, with the rank that found it.
#[derive(Debug, Clone)]
pub struct ResolvedControl {
    /// Driver handle to the element
    pub handle: ControlHandle,
    /// Rank of the winning candidate
    pub rank: SelectorRank,
    /// Index of the winning candidate within the strategy
    pub candidate_index: usize,
    /// The selector expression that matched
    pub selector: String,
}

impl ResolvedControl {
    /// Whether the primary candidate won (no drift observed)
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.candidate_index == 0
    }
}

/// Resolve a strategy against the live page.
///
/// Candidates are tried in priority order, each inside an equal share of
/// the overall budget (floored at one poll interval), and the first one
/// yielding a present, visible element wins. Success at a fallback rank is
/// logged: routine resolution at the structural rank means the semantic
/// selector has gone stale and should be re-authored, even though the
/// operation itself succeeds.
///
/// # Errors
///
/// Returns [`RelojeroError::ElementNotFound`] with every tried selector
/// when the chain is exhausted.
pub fn resolve_control<D: UiDriver>(
    driver: &mut D,
    strategy: &SelectorStrategy,
    budget: Duration,
    poll_interval: Duration,
) -> RelojeroResult<ResolvedControl> {
    if strategy.candidates.is_empty() {
        return Err(RelojeroError::ElementNotFound {
            strategy: strategy.name.clone(),
            tried: vec![],
        });
    }

    expand_panel_if_needed(driver, strategy);

    let per_candidate = budget
        .checked_div(strategy.candidates.len() as u32)
        .unwrap_or(poll_interval)
        .max(poll_interval);

    let mut tried = Vec::with_capacity(strategy.candidates.len());
    for (index, candidate) in strategy.candidates.iter().enumerate() {
        tried.push(candidate.selector.clone());
        let report = poll_until(
            per_candidate,
            poll_interval,
            format!("{} via {}", strategy.name, candidate.selector),
            || {
                driver
                    .find(&candidate.selector)
                    .is_some_and(|h| driver.is_visible(&h))
            },
        );
        if !report.satisfied {
            continue;
        }
        let Some(handle) = driver.find(&candidate.selector) else {
            continue;
        };
        match candidate.rank {
            SelectorRank::Role => {}
            SelectorRank::Text => tracing::info!(
                strategy = %strategy.name,
                selector = %candidate.selector,
                rank = %candidate.rank,
                "resolved via text fallback"
            ),
            SelectorRank::Structural => tracing::warn!(
                strategy = %strategy.name,
                selector = %candidate.selector,
                rank = %candidate.rank,
                "resolved via structural fallback; primary selector has drifted"
            ),
        }
        return Ok(ResolvedControl {
            handle,
            rank: candidate.rank,
            candidate_index: index,
            selector: candidate.selector.clone(),
        });
    }

    Err(RelojeroError::ElementNotFound {
        strategy: strategy.name.clone(),
        tried,
    })
}

/// Expand the strategy's panel when its candidates are all hidden.
///
/// Clicking a header toggles, so the panel is only touched when no
/// candidate is currently visible.
fn expand_panel_if_needed<D: UiDriver>(driver: &mut D, strategy: &SelectorStrategy) {
    let Some(header_selector) = &strategy.expand_first else {
        return;
    };
    let any_visible = strategy
        .candidates
        .iter()
        .any(|c| driver.find(&c.selector).is_some_and(|h| driver.is_visible(&h)));
    if any_visible {
        return;
    }
    if let Some(header) = driver.find(header_selector) {
        if driver.click(&header).is_err() {
            tracing::warn!(
                strategy = %strategy.name,
                header = %header_selector,
                "panel expansion click failed"
            );
        }
    }
}
