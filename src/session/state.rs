//! Node lifecycle state

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Aggregates Satellite streams and owns the authoritative tally.
    Hub,
    /// Contributes one camera to a Hub.
    Satellite,
}

/// Node state machine
///
/// `Init → Connecting → Ready`, with `Error` reachable from every live state.
/// A Satellite that resolved a Hub code continues `Ready → Linking →
/// Streaming`. Any state may be torn down to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    /// Nothing opened yet
    Init,

    /// Transport identity is being opened
    Connecting,

    /// Transport identity is open
    Ready,

    /// Satellite is acquiring its camera and dialing the Hub
    Linking,

    /// Satellite is sending its camera to the Hub
    Streaming,

    /// Transport failed; terminal until the user starts over
    Error,

    /// Torn down
    Closed,
}

impl NodeState {
    pub fn can_transition_to(&self, target: &NodeState) -> bool {
        use NodeState::*;

        match (self, target) {
            (Closed, _) => false,
            (a, b) if a == b => true,
            (_, Closed) => true,

            (Init, Connecting) => true,

            (Connecting, Ready) => true,
            (Connecting, Error) => true,

            (Ready, Linking) => true,
            (Ready, Error) => true,

            (Linking, Streaming) => true,
            // capture refused
            (Linking, Ready) => true,
            (Linking, Error) => true,

            // Hub link dropped
            (Streaming, Ready) => true,
            (Streaming, Error) => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            NodeState::Init => "INIT",
            NodeState::Connecting => "CONNECTING",
            NodeState::Ready => "READY",
            NodeState::Linking => "LINKING",
            NodeState::Streaming => "STREAMING",
            NodeState::Error => "ERROR",
            NodeState::Closed => "CLOSED",
        }
    }

    /// The transport identity is open and usable.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            NodeState::Ready | NodeState::Linking | NodeState::Streaming
        )
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use NodeState::*;

        assert!(Init.can_transition_to(&Connecting));
        assert!(Connecting.can_transition_to(&Ready));
        assert!(Connecting.can_transition_to(&Error));
        assert!(Ready.can_transition_to(&Linking));
        assert!(Linking.can_transition_to(&Streaming));
        assert!(Linking.can_transition_to(&Ready));
        assert!(Streaming.can_transition_to(&Ready));
        assert!(Error.can_transition_to(&Closed));
        assert!(Streaming.can_transition_to(&Closed));
        assert!(Ready.can_transition_to(&Ready));
    }

    #[test]
    fn test_invalid_transitions() {
        use NodeState::*;

        assert!(!Init.can_transition_to(&Ready));
        assert!(!Ready.can_transition_to(&Streaming));
        assert!(!Error.can_transition_to(&Ready));
        assert!(!Closed.can_transition_to(&Init));
        assert!(!Closed.can_transition_to(&Closed));
    }

    #[test]
    fn test_open_states() {
        assert!(NodeState::Ready.is_open());
        assert!(NodeState::Streaming.is_open());
        assert!(!NodeState::Connecting.is_open());
        assert!(!NodeState::Error.is_open());
        assert_eq!(NodeState::Streaming.to_string(), "STREAMING");
    }
}
