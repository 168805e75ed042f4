//! Contracts between the core and the view bindings that draw it.

use std::fmt;

use crate::background::ImageRecord;
use crate::timer::{TimerPhase, TimerState};

/// Formats a countdown as zero-padded `MM:SS`.
pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Text of the start/pause control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLabel {
    Start,
    Resume,
    Pause,
}

impl ControlLabel {
    pub fn for_phase(phase: TimerPhase) -> Self {
        match phase {
            TimerPhase::Idle => ControlLabel::Start,
            TimerPhase::Paused => ControlLabel::Resume,
            TimerPhase::Running => ControlLabel::Pause,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlLabel::Start => "Start",
            ControlLabel::Resume => "Resume",
            ControlLabel::Pause => "Pause",
        }
    }

    /// Style hook for the control; both idle and paused look like "start".
    pub fn style_class(self) -> &'static str {
        match self {
            ControlLabel::Start | ControlLabel::Resume => "start",
            ControlLabel::Pause => "pause",
        }
    }
}

impl fmt::Display for ControlLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a timer view needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub state: TimerState,
    pub clock: String,
    pub label: ControlLabel,
}

impl TimerSnapshot {
    pub fn of(state: TimerState) -> Self {
        Self {
            state,
            clock: format_clock(state.seconds_remaining),
            label: ControlLabel::for_phase(state.phase()),
        }
    }
}

pub trait TimerView: Send {
    fn render(&self, snapshot: &TimerSnapshot);
}

impl<F> TimerView for F
where
    F: Fn(&TimerSnapshot) + Send,
{
    fn render(&self, snapshot: &TimerSnapshot) {
        (self)(snapshot)
    }
}

/// Receives the background image to show, or `None` to clear it.
pub trait ImageView: Send {
    fn render(&self, image: Option<&ImageRecord>);
}

impl<F> ImageView for F
where
    F: Fn(Option<&ImageRecord>) + Send,
{
    fn render(&self, image: Option<&ImageRecord>) {
        (self)(image)
    }
}
