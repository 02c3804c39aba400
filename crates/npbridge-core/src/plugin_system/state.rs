use std::fmt;

/// Lifecycle of one adapter and the module it owns.
///
/// `Unloaded → Loaded → EntryPointsResolved → Initialized → Active →
/// ShuttingDown → Destroyed`. `ShuttingDown` may be entered from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    Unloaded,
    Loaded,
    EntryPointsResolved,
    Initialized,
    /// At least one session has been created.
    Active,
    ShuttingDown,
    Destroyed,
}

impl AdapterState {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: AdapterState) -> bool {
        use AdapterState::*;
        match (self, next) {
            (Unloaded, Loaded)
            | (Loaded, EntryPointsResolved)
            | (EntryPointsResolved, Initialized)
            | (Initialized, Active)
            | (ShuttingDown, Destroyed) => true,
            (Destroyed, _) => false,
            (ShuttingDown, ShuttingDown) => false,
            (_, ShuttingDown) => true,
            _ => false,
        }
    }

    /// Sessions may only be created once the module table is negotiated and
    /// before shutdown begins.
    pub fn accepts_sessions(self) -> bool {
        matches!(self, AdapterState::Initialized | AdapterState::Active)
    }

    pub fn is_shut_down(self) -> bool {
        matches!(self, AdapterState::ShuttingDown | AdapterState::Destroyed)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
