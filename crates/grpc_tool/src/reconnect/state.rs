use std::fmt;

/// Lifecycle of an auto-reconnecting connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    /// Dialing and running the work routine until both succeed.
    Acquiring,

    /// A connection is current and the work routine accepted it.
    Active,

    /// A reconnect was requested; waiting for the current connection to become ready.
    Reconnecting,

    /// Terminal. The current connection has been closed.
    Stopped,
}

impl ManagerState {
    pub fn can_transition_to(&self, next: ManagerState) -> bool {
        use ManagerState::*;

        matches!(
            (self, next),
            (Acquiring, Active)
                | (Active, Reconnecting)
                | (Reconnecting, Active)
                | (Reconnecting, Acquiring)
                | (Acquiring | Active | Reconnecting, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == ManagerState::Stopped
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquiring => write!(f, "acquiring"),
            Self::Active => write!(f, "active"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
