//! Countdown state machine.
//!
//! `Idle -> Running` on start, `Running -> Paused` on pause, anything back to
//! `Idle` on reset or completion. Every transition a sibling tab should see is
//! persisted and broadcast; ticks are persisted only, since every synchronized
//! tab runs its own identical tick.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tab_store::{JsonStoreExt, KeyValueStore};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::audio::AudioGate;
use crate::broadcast::Broadcaster;
use crate::config::SyncConfig;
use crate::protocol::SyncMessage;
use crate::view::{TimerSnapshot, TimerView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub seconds_remaining: u32,
    pub is_running: bool,
    /// Only meaningful while `is_running`.
    pub is_paused: bool,
}

impl TimerState {
    pub fn idle(seconds_remaining: u32) -> Self {
        Self {
            seconds_remaining,
            is_running: false,
            is_paused: false,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        match (self.is_running, self.is_paused) {
            (false, _) => TimerPhase::Idle,
            (true, true) => TimerPhase::Paused,
            (true, false) => TimerPhase::Running,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.is_running || !self.is_paused
    }

    /// Maps `paused && !running` onto `Idle`, keeping the countdown value.
    pub fn normalized(self) -> Self {
        if self.is_consistent() {
            self
        } else {
            Self::idle(self.seconds_remaining)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerPhase::Idle => "idle",
            TimerPhase::Running => "running",
            TimerPhase::Paused => "paused",
        }
    }
}

/// Lenient shape for hydration: anything missing falls back to defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTimerState {
    #[serde(default, alias = "timeRemaining")]
    seconds_remaining: Option<u32>,
    #[serde(default)]
    is_running: bool,
    #[serde(default)]
    is_paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Countdown moved to the contained value.
    Counted(u32),
    Completed,
    /// The timer was not running; the stray tick disarmed itself.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Announce {
    Broadcast,
    Silent,
}

/// Repeating one-period tick that can be cancelled any number of times.
///
/// The underlying interval is created on first poll after arming so that
/// arming and cancelling work outside a runtime.
#[derive(Debug)]
struct Ticker {
    period: Duration,
    armed: bool,
    interval: Option<Interval>,
}

impl Ticker {
    fn new(period: Duration) -> Self {
        Self {
            period,
            armed: false,
            interval: None,
        }
    }

    fn arm(&mut self) {
        self.armed = true;
        self.interval = None;
    }

    fn cancel(&mut self) {
        self.armed = false;
        self.interval = None;
    }

    fn is_armed(&self) -> bool {
        self.armed
    }

    async fn tick(&mut self) {
        if !self.armed {
            return std::future::pending().await;
        }
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
    }
}

pub struct TimerMachine {
    state: TimerState,
    default_seconds: u32,
    storage_key: String,
    store: Arc<dyn KeyValueStore>,
    broadcaster: Arc<dyn Broadcaster>,
    audio: AudioGate,
    ticker: Ticker,
    views: Vec<Box<dyn TimerView>>,
}

impl TimerMachine {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn KeyValueStore>,
        broadcaster: Arc<dyn Broadcaster>,
        audio: AudioGate,
    ) -> Self {
        Self {
            state: TimerState::idle(config.default_seconds),
            default_seconds: config.default_seconds,
            storage_key: config.timer_key.clone(),
            store,
            broadcaster,
            audio,
            ticker: Ticker::new(config.tick_interval),
            views: Vec::new(),
        }
    }

    pub fn add_view(&mut self, view: Box<dyn TimerView>) {
        self.views.push(view);
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn phase(&self) -> TimerPhase {
        self.state.phase()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot::of(self.state)
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_armed()
    }

    pub fn audio(&self) -> &AudioGate {
        &self.audio
    }

    /// Restores the persisted state. A running countdown resumes ticking
    /// locally without being announced again.
    pub fn hydrate(&mut self) {
        match self.store.load_json::<StoredTimerState>(&self.storage_key) {
            Ok(Some(stored)) => {
                let loaded = TimerState {
                    seconds_remaining: stored.seconds_remaining.unwrap_or(self.default_seconds),
                    is_running: stored.is_running,
                    is_paused: stored.is_paused,
                };
                if !loaded.is_consistent() {
                    warn!(
                        target: "countdown.timer",
                        seconds_remaining = loaded.seconds_remaining,
                        "stored timer was paused but not running; restoring as idle"
                    );
                }
                self.state = loaded.normalized();
            }
            Ok(None) => {}
            Err(err) => {
                warn!(target: "countdown.timer", error = %err, "ignoring unreadable timer state");
            }
        }
        self.ticker.cancel();
        if self.state.phase() == TimerPhase::Running {
            self.ticker.arm();
        }
        debug!(
            target: "countdown.timer",
            phase = self.state.phase().as_str(),
            seconds_remaining = self.state.seconds_remaining,
            "timer hydrated"
        );
        self.render();
    }

    pub fn start(&mut self) {
        if self.state.phase() == TimerPhase::Running {
            debug!(target: "countdown.timer", "start ignored; already running");
            return;
        }
        self.state.is_running = true;
        self.state.is_paused = false;
        self.audio.on_countdown_start();
        self.ticker.arm();
        self.render();
        self.commit(Announce::Broadcast);
        info!(
            target: "countdown.timer",
            seconds_remaining = self.state.seconds_remaining,
            "countdown started"
        );
    }

    pub fn pause(&mut self) {
        if self.state.phase() != TimerPhase::Running {
            debug!(
                target: "countdown.timer",
                phase = self.state.phase().as_str(),
                "pause ignored; not running"
            );
            return;
        }
        self.state.is_paused = true;
        self.ticker.cancel();
        self.render();
        self.commit(Announce::Broadcast);
        info!(
            target: "countdown.timer",
            seconds_remaining = self.state.seconds_remaining,
            "countdown paused"
        );
    }

    pub fn reset(&mut self) {
        self.ticker.cancel();
        self.state = TimerState::idle(self.default_seconds);
        self.render();
        self.commit(Announce::Broadcast);
        info!(target: "countdown.timer", "countdown reset");
    }

    pub fn toggle(&mut self) {
        match self.state.phase() {
            TimerPhase::Idle | TimerPhase::Paused => self.start(),
            TimerPhase::Running => self.pause(),
        }
    }

    pub fn on_user_gesture(&mut self) {
        self.audio.on_user_gesture();
    }

    /// Resolves at the next tick while running; pends forever otherwise.
    pub async fn next_tick(&mut self) {
        self.ticker.tick().await;
    }

    pub fn on_tick(&mut self) -> TickOutcome {
        if self.state.phase() != TimerPhase::Running {
            self.ticker.cancel();
            return TickOutcome::Skipped;
        }
        if self.state.seconds_remaining == 0 {
            self.complete();
            return TickOutcome::Completed;
        }
        self.state.seconds_remaining -= 1;
        self.render();
        self.commit(Announce::Silent);
        TickOutcome::Counted(self.state.seconds_remaining)
    }

    /// Applies a sibling's announcement, last writer wins. Returns `false`
    /// for messages that are not timer updates.
    pub fn reconcile(&mut self, message: &SyncMessage) -> bool {
        let SyncMessage::TimerUpdate(incoming) = message else {
            return false;
        };
        if !incoming.is_consistent() {
            warn!(
                target: "countdown.timer",
                seconds_remaining = incoming.seconds_remaining,
                "peer sent paused-but-not-running timer; treating as idle"
            );
        }
        self.state = incoming.normalized();
        self.ticker.cancel();
        if self.state.phase() == TimerPhase::Running {
            self.ticker.arm();
        }
        debug!(
            target: "countdown.timer",
            phase = self.state.phase().as_str(),
            seconds_remaining = self.state.seconds_remaining,
            "timer reconciled from sibling"
        );
        self.render();
        true
    }

    pub fn shutdown(&mut self) {
        self.ticker.cancel();
    }

    fn complete(&mut self) {
        self.ticker.cancel();
        self.state = TimerState::idle(self.default_seconds);
        self.render();
        self.commit(Announce::Broadcast);
        self.audio.notify_completion();
        info!(target: "countdown.timer", "countdown completed");
    }

    fn commit(&self, announce: Announce) {
        if let Err(err) = self.store.save_json(&self.storage_key, &self.state) {
            warn!(target: "countdown.timer", error = %err, "failed to persist timer state");
        }
        if announce == Announce::Broadcast {
            let message = SyncMessage::TimerUpdate(self.state);
            if let Err(err) = self.broadcaster.broadcast(&message) {
                warn!(target: "countdown.timer", error = %err, "failed to broadcast timer state");
            }
        }
    }

    fn render(&self) {
        if self.views.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for view in &self.views {
            view.render(&snapshot);
        }
    }
}
