//! Controller lifecycle states.

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::str::FromStr;

/// Where a controller version is in its install/activate cycle.
///
/// `Parsed → Installing → Installed → Activating → Active`. A failed install
/// ends in `Redundant`, unless the version was already active, in which case
/// it goes back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Active,
  Redundant,
}

impl LifecycleState {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    }
  }

  /// Whether `next` is a legal step from this state.
  pub fn can_transition_to(self, next: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
      (self, next),
      (Parsed | Redundant | Installed | Active, Installing)
        | (Installing, Installed)
        | (Installing, Redundant)
        | (Installed, Activating)
        | (Activating, Active)
        | (Activating, Redundant)
    )
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for LifecycleState {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "parsed" => Ok(Self::Parsed),
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "activating" => Ok(Self::Activating),
      "active" => Ok(Self::Active),
      "redundant" => Ok(Self::Redundant),
      other => Err(eyre!("Unknown lifecycle state '{}'", other)),
    }
  }
}
