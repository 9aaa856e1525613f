//! Autoscroll policy.
//!
//! A pure mapping from what just changed in the session to where the host
//! should scroll. The core never scrolls itself.

use std::time::Duration;

use crate::session::Phase;

/// Settle delay before scrolling to the Moon message on arc 1, so the choice
/// buttons finish laying out first.
pub const ARC_ONE_CHOICE_DELAY: Duration = Duration::from_millis(1000);
pub const STORY_DELAY: Duration = Duration::from_millis(200);
pub const FINALE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollTarget {
    None,
    Bottom,
    LastMoonMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollDirective {
    pub target: ScrollTarget,
    pub delay: Duration,
}

impl ScrollDirective {
    pub const NONE: ScrollDirective = ScrollDirective {
        target: ScrollTarget::None,
        delay: Duration::ZERO,
    };

    fn bottom(delay: Duration) -> Self {
        Self {
            target: ScrollTarget::Bottom,
            delay,
        }
    }
}

/// What changed since the last evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollInput {
    pub phase: Phase,
    pub current_arc: u32,
    /// A choice set appeared or another choice became visible.
    pub choices_appeared: bool,
    /// A typing indicator was switched on or handed to another author.
    pub typing_started: bool,
    pub message_delta: usize,
}

pub fn autoscroll(input: ScrollInput) -> ScrollDirective {
    let messages_changed = input.message_delta > 0;
    match input.phase {
        Phase::Idle => ScrollDirective::NONE,
        Phase::Dialogue | Phase::Moon => {
            if messages_changed || input.typing_started {
                ScrollDirective::bottom(Duration::ZERO)
            } else {
                ScrollDirective::NONE
            }
        }
        Phase::Story | Phase::Choices => {
            if input.current_arc <= 1 && input.choices_appeared {
                ScrollDirective {
                    target: ScrollTarget::LastMoonMessage,
                    delay: ARC_ONE_CHOICE_DELAY,
                }
            } else if messages_changed || input.typing_started || input.choices_appeared {
                ScrollDirective::bottom(STORY_DELAY)
            } else {
                ScrollDirective::NONE
            }
        }
        Phase::Finale => {
            if messages_changed || input.typing_started || input.choices_appeared {
                ScrollDirective::bottom(FINALE_DELAY)
            } else {
                ScrollDirective::NONE
            }
        }
    }
}
