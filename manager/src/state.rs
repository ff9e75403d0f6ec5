//! Manager state definitions.

/// Lock manager operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Manager is created but not yet started.
    Starting,
    /// Manager is running and serving lock calls.
    Running,
    /// Manager is shutting down, not accepting new calls.
    ShuttingDown,
    /// Manager is stopped.
    Stopped,
}

impl ManagerState {
    /// Check if the manager is accepting lock calls.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ManagerState::Running)
    }

    /// Check if the manager is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ManagerState::Stopped)
    }
}
