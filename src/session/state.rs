use serde::{Deserialize, Serialize};

/// Session lifecycle state.
///
/// ```text
/// idle -> configuring -> running <-> interrupted
///              |            |             |
///              v            +--> stopping <+
///            idle                 |
///                                 v
///                  configuring <- stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Configuring,
    Running,
    Interrupted,
    Stopping,
    Stopped,
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether `start` may be requested from this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Whether `stop` may be requested from this state
    pub fn can_stop(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted)
    }

    /// Whether the device is live (samples may legitimately arrive)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted)
    }

    /// Validate a single-step transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Configuring)
                | (Stopped, Configuring)
                | (Configuring, Running)
                | (Configuring, Idle)
                | (Running, Interrupted)
                | (Interrupted, Running)
                | (Running, Stopping)
                | (Interrupted, Stopping)
                | (Stopping, Stopped)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Configuring));
        assert!(Stopped.can_transition_to(Configuring));
        assert!(Configuring.can_transition_to(Idle));
        assert!(Interrupted.can_transition_to(Running));

        // stop never skips Stopping
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Interrupted.can_transition_to(Stopped));
        assert!(!Idle.can_transition_to(Running));
        assert!(!Stopping.can_transition_to(Running));
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Stopped.can_start());
        assert!(!SessionState::Running.can_start());
        assert!(SessionState::Interrupted.can_stop());
        assert!(!SessionState::Idle.can_stop());
        assert!(SessionState::Interrupted.is_active());
        assert!(!SessionState::Stopping.is_running());
    }
}
