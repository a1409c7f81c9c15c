//! Scenario catalog and selection.
//!
//! Scenarios are fixed-shape compositions of backend steps, some routed
//! through the fault-injecting relay. Names are stable identifiers: the
//! `--test-filter` prefix matches against them.

use std::io::Write;

use serde::Serialize;

use crate::output::Render;

/// A harness scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Full round trip base -> target -> base, keeping the stateful partition.
    UpdateKeepStateful,
    /// Same round trip, wiping the stateful partition on each update.
    UpdateWipeStateful,
    /// Update through a relay that cuts the first connections mid-transfer.
    InterruptedUpdate,
    /// Update through a relay that stalls the first connections mid-transfer.
    DelayedUpdate,
    /// Update from a truncated payload; must fail with a hash mismatch.
    PartialUpdate,
    /// Update from a corrupted payload; must fail to inflate.
    CorruptedUpdate,
    /// Single base -> target update followed by verification.
    SimpleUpdate,
}

impl Scenario {
    /// Every scenario, in run order.
    pub const ALL: [Scenario; 7] = [
        Scenario::UpdateKeepStateful,
        Scenario::UpdateWipeStateful,
        Scenario::InterruptedUpdate,
        Scenario::DelayedUpdate,
        Scenario::PartialUpdate,
        Scenario::CorruptedUpdate,
        Scenario::SimpleUpdate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::UpdateKeepStateful => "update_keep_stateful",
            Self::UpdateWipeStateful => "update_wipe_stateful",
            Self::InterruptedUpdate => "interrupted_update",
            Self::DelayedUpdate => "delayed_update",
            Self::PartialUpdate => "partial_update",
            Self::CorruptedUpdate => "corrupted_update",
            Self::SimpleUpdate => "simple_update",
        }
    }

    /// Whether the scenario runs without a filter.
    pub fn is_default(self) -> bool {
        matches!(
            self,
            Self::UpdateKeepStateful
                | Self::UpdateWipeStateful
                | Self::InterruptedUpdate
                | Self::DelayedUpdate
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::UpdateKeepStateful => "base -> target -> base, stateful preserved",
            Self::UpdateWipeStateful => "base -> target -> base, stateful wiped",
            Self::InterruptedUpdate => "update while the relay drops connections",
            Self::DelayedUpdate => "update while the relay stalls connections",
            Self::PartialUpdate => "truncated payload must be rejected",
            Self::CorruptedUpdate => "corrupted payload must be rejected",
            Self::SimpleUpdate => "single full or delta update",
        }
    }
}

/// Picks the scenarios to run.
///
/// Without a filter (or with an empty one) the default set runs. With a
/// filter, every scenario whose name starts with it runs, opt-in ones
/// included. Declaration order is kept.
pub fn select(filter: Option<&str>) -> Vec<Scenario> {
    match filter.filter(|f| !f.is_empty()) {
        None => Scenario::ALL
            .into_iter()
            .filter(|s| s.is_default())
            .collect(),
        Some(prefix) => Scenario::ALL
            .into_iter()
            .filter(|s| s.name().starts_with(prefix))
            .collect(),
    }
}

/// `--list` payload.
#[derive(Debug, Serialize)]
pub struct ScenarioList {
    pub scenarios: Vec<ScenarioEntry>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioEntry {
    pub name: &'static str,
    pub default: bool,
    pub description: &'static str,
}

impl ScenarioList {
    pub fn all() -> Self {
        Self {
            scenarios: Scenario::ALL
                .into_iter()
                .map(|s| ScenarioEntry {
                    name: s.name(),
                    default: s.is_default(),
                    description: s.description(),
                })
                .collect(),
        }
    }
}

impl Render for ScenarioList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "{}", "Scenarios".bold())?;
        for entry in &self.scenarios {
            let marker = if entry.default { "*" } else { " " };
            writeln!(w, "  {marker} {:<22} {}", entry.name, entry.description)?;
        }
        writeln!(w)?;
        writeln!(w, "  * runs by default; others need --test-filter")?;
        Ok(())
    }
}
