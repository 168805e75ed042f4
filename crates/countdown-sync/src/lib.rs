//! Countdown timer with a user supplied background image, kept consistent
//! across every open tab of the page.
//!
//! Each tab owns an in-memory copy of the timer and image state. Local
//! mutations are written to the origin store first and then announced on the
//! shared bus; sibling tabs overwrite their copy from the announcement
//! (last writer wins). A freshly opened tab hydrates from the store because
//! the bus has no replay.
//!
//! Rendering is not done here: view bindings register callbacks on a
//! [`TabContext`] and drive the tab through the returned [`TabHandle`].

pub mod audio;
pub mod background;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod protocol;
pub mod tab;
pub mod timer;
pub mod view;

#[cfg(test)]
mod store_testing;

pub use audio::{AudioCue, AudioGate, SilentCue};
pub use background::{ImageHolder, ImageRecord, ImageRules, ImageUpload};
pub use broadcast::{Broadcaster, BusBroadcaster};
pub use config::SyncConfig;
pub use error::{ImageError, PlaybackBlocked, ProtocolError, SyncError, TabError};
pub use protocol::SyncMessage;
pub use tab::{TabContext, TabHandle, TabSnapshot};
pub use timer::{TickOutcome, TimerMachine, TimerPhase, TimerState};
pub use view::{format_clock, ControlLabel, ImageView, TimerSnapshot, TimerView};
