//! Lifecycle state machine shared by resources and the manager.
//!
//! ```text
//! Created ──> Initialized ──> Running <──> Stopped
//!    │             │                          │
//!    └─────────────┴────────> Destroyed <─────┘
//! ```
//!
//! A running resource is stopped before it is destroyed, so `Running` has no
//! direct edge to `Destroyed`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a resource (or of the manager as a whole).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Instantiated, hooks not run yet.
    #[default]
    Created,
    /// `initialize` hook completed.
    Initialized,
    /// `start` hook completed.
    Running,
    /// `stop` hook completed; may be started again.
    Stopped,
    /// Removed from the graph. Terminal.
    Destroyed,
}

impl Lifecycle {
    /// States reachable in one step.
    #[must_use]
    pub fn next_states(self) -> &'static [Lifecycle] {
        match self {
            Self::Created => &[Self::Initialized, Self::Destroyed],
            Self::Initialized => &[Self::Running, Self::Destroyed],
            Self::Running => &[Self::Stopped],
            Self::Stopped => &[Self::Running, Self::Destroyed],
            Self::Destroyed => &[],
        }
    }

    /// Whether `self -> target` is a legal single step.
    #[must_use]
    pub fn can_transition_to(self, target: Lifecycle) -> bool {
        self.next_states().contains(&target)
    }

    /// No transitions leave this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// The `initialize` hook has run and the resource was not destroyed.
    #[must_use]
    pub fn is_initialized(self) -> bool {
        matches!(self, Self::Initialized | Self::Running | Self::Stopped)
    }

    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Name of the hook invoked when entering this state, if any.
    #[must_use]
    pub fn hook_name(self) -> Option<&'static str> {
        match self {
            Self::Initialized => Some("initialize"),
            Self::Running => Some("start"),
            Self::Stopped => Some("stop"),
            Self::Created | Self::Destroyed => None,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "Created",
            Self::Initialized => "Initialized",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Destroyed => "Destroyed",
        };
        f.write_str(s)
    }
}
