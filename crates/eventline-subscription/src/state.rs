//! Subscription lifecycle states.

use std::fmt;

/// Lifecycle state of a catch-up subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Claiming leases and loading checkpoints.
    Initializing,
    /// Replaying records behind the head of the log.
    CatchingUp,
    /// Caught up on every leased partition; polling for new records.
    Live,
    /// Stopped on request. Terminal.
    Stopped,
    /// Halted by an unrecoverable error. Terminal.
    Faulted,
}

impl SubscriptionState {
    /// Returns `true` for states the subscription never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }

    /// Returns `true` if the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SubscriptionState::{CatchingUp, Faulted, Initializing, Live, Stopped};
        match (self, next) {
            (Initializing, CatchingUp) | (CatchingUp, Live) => true,
            (from, Stopped | Faulted) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::CatchingUp => "catching_up",
            Self::Live => "live",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::SubscriptionState::{CatchingUp, Faulted, Initializing, Live, Stopped};

    #[test]
    fn test_happy_path_transitions_are_allowed() {
        assert!(Initializing.can_transition_to(CatchingUp));
        assert!(CatchingUp.can_transition_to(Live));
        assert!(Live.can_transition_to(Stopped));
    }

    #[test]
    fn test_any_non_terminal_state_can_fault_or_stop() {
        for state in [Initializing, CatchingUp, Live] {
            assert!(state.can_transition_to(Faulted), "{state} -> faulted");
            assert!(state.can_transition_to(Stopped), "{state} -> stopped");
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for state in [Stopped, Faulted] {
            for next in [Initializing, CatchingUp, Live, Stopped, Faulted] {
                assert!(!state.can_transition_to(next), "{state} -> {next}");
            }
        }
    }

    #[test]
    fn test_states_cannot_go_backwards() {
        assert!(!Live.can_transition_to(CatchingUp));
        assert!(!CatchingUp.can_transition_to(Initializing));
        assert!(!Initializing.can_transition_to(Live));
    }
}
