//! Session state machine: the live timeline, phase, typing indicator and the
//! timed reveal of choices.

mod events;
mod machine;
mod timers;

pub use events::{ScrollRequest, SessionEvent};
pub use machine::{RequestTicket, StorySession};
pub use timers::TimerSet;

use serde::{Deserialize, Serialize};

/// Current mode of the session. Any phase may follow any other; the host
/// decides what is legal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Dialogue,
    Moon,
    Story,
    Choices,
    Finale,
}
