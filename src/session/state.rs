//! Application lifecycle state machine
//!
//! The transition function is pure: `(state, event) -> state` with no side
//! effects. Session persistence and preset-event emission are driven by the
//! observer of the returned transitions ([`super::SessionClient`]), keeping
//! the machine unit-testable without any I/O.

/// Lifecycle notifications delivered by the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    ApplicationDidMoveToBackground,
    ApplicationWillMoveToForeground,
    ApplicationWillTerminate,
}

/// Application lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    Initializing,
    RunningInForeground,
    RunningInBackground,
    Terminated,
}

impl ApplicationState {
    /// Pure transition function
    ///
    /// `Terminated` is absorbing: events received after termination are
    /// logged and ignored.
    pub fn resolve(current: ApplicationState, event: ActivityEvent) -> ApplicationState {
        if current == ApplicationState::Terminated {
            tracing::warn!(?event, ?current, "Unexpected lifecycle event after termination");
            return current;
        }
        match event {
            ActivityEvent::ApplicationWillTerminate => ApplicationState::Terminated,
            ActivityEvent::ApplicationDidMoveToBackground => ApplicationState::RunningInBackground,
            ActivityEvent::ApplicationWillMoveToForeground => ApplicationState::RunningInForeground,
        }
    }
}

/// Holds the current state and reports transitions to its caller
#[derive(Debug)]
pub struct StateMachine {
    state: ApplicationState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ApplicationState::Initializing,
        }
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    /// Apply an event; returns the new state when it changed, `None` when the
    /// event produced no transition
    pub fn process(&mut self, event: ActivityEvent) -> Option<ApplicationState> {
        let next = ApplicationState::resolve(self.state, event);
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActivityEvent::*;
    use ApplicationState::*;

    #[test]
    fn test_foreground_background_cycle() {
        assert_eq!(
            ApplicationState::resolve(Initializing, ApplicationWillMoveToForeground),
            RunningInForeground
        );
        assert_eq!(
            ApplicationState::resolve(RunningInForeground, ApplicationDidMoveToBackground),
            RunningInBackground
        );
        assert_eq!(
            ApplicationState::resolve(RunningInBackground, ApplicationWillMoveToForeground),
            RunningInForeground
        );
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let terminated = ApplicationState::resolve(RunningInForeground, ApplicationWillTerminate);
        assert_eq!(terminated, Terminated);
        for event in [
            ApplicationDidMoveToBackground,
            ApplicationWillMoveToForeground,
            ApplicationWillTerminate,
        ] {
            assert_eq!(ApplicationState::resolve(Terminated, event), Terminated);
        }
    }

    #[test]
    fn test_state_machine_reports_transitions_only() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.state(), Initializing);

        assert_eq!(
            machine.process(ApplicationWillMoveToForeground),
            Some(RunningInForeground)
        );
        // Same event again: no transition
        assert_eq!(machine.process(ApplicationWillMoveToForeground), None);

        assert_eq!(machine.process(ApplicationWillTerminate), Some(Terminated));
        assert_eq!(machine.process(ApplicationDidMoveToBackground), None);
    }
}
