//! Session loop state machine.

use std::fmt;

use crate::protocol::CommandId;

/// Where the session loop currently is.
///
/// `Listening -> Dispatching -> Listening | Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Blocked on the next 16-byte header.
    #[default]
    Listening,
    /// Running the handler for a command.
    Dispatching(CommandId),
    /// Exit received, cancelled, or aborted. No further reads.
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Listening => write!(f, "LISTENING"),
            LoopState::Dispatching(id) => write!(f, "DISPATCHING({})", id),
            LoopState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Runtime state of one bound session.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub state: LoopState,
    /// Commands dispatched to a handler.
    pub commands_handled: u64,
    /// Frames dropped for a foreign magic or short header.
    pub frames_discarded: u64,
    /// Times the transport was re-bound after a failure.
    pub rebinds: u32,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: LoopState) {
        if self.state == LoopState::Terminated {
            tracing::warn!(to = %new_state, "Ignoring transition out of TERMINATED");
            return;
        }
        if self.state != new_state {
            tracing::trace!(from = %self.state, to = %new_state, "State transition");
        }
        if let LoopState::Dispatching(_) = new_state {
            self.commands_handled += 1;
        }
        self.state = new_state;
    }

    pub fn is_terminated(&self) -> bool {
        self.state == LoopState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut ctx = SessionContext::new();
        assert_eq!(ctx.state, LoopState::Listening);

        ctx.goto_state(LoopState::Dispatching(CommandId::List));
        ctx.goto_state(LoopState::Listening);
        ctx.goto_state(LoopState::Dispatching(CommandId::Exit));
        assert_eq!(ctx.commands_handled, 2);

        ctx.goto_state(LoopState::Terminated);
        assert!(ctx.is_terminated());

        ctx.goto_state(LoopState::Listening);
        assert!(ctx.is_terminated());
    }
}
