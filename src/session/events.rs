use std::time::Duration;

use super::Phase;

/// Where the host should scroll, with the Moon target already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollRequest {
    Bottom { delay: Duration },
    Message { id: String, delay: Duration },
}

/// Notifications delivered to the host after session mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The timeline or the typing indicator changed.
    MessagesChanged,
    PhaseChanged(Phase),
    /// The choice set, its hiding flag or the visible count changed.
    ChoicesChanged { visible: usize, hiding: bool },
    Scroll(ScrollRequest),
}
