//! Events consumed by the playback session loop
use crate::engine::{EngineState, LoadId};

/// Commands from the UI, the control socket and the sleep timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    TogglePlayback,
    Shutdown,
}

/// Focus changes reported by the focus arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Lost,
    TransientLoss,
    Regained,
}

/// What the engine observed about one loaded stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    State(EngineState),
    Failed(String),
}

// Reports carry the load they belong to so stale ones can be dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReport {
    pub load: LoadId,
    pub event: EngineEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Command(Command),
    Engine(EngineReport),
    Focus(FocusChange),
}

impl From<Command> for SessionEvent {
    fn from(command: Command) -> Self {
        SessionEvent::Command(command)
    }
}

impl From<FocusChange> for SessionEvent {
    fn from(change: FocusChange) -> Self {
        SessionEvent::Focus(change)
    }
}
