use std::sync::Arc;

use tracing::{debug, info};

use crate::error::PlaybackBlocked;

/// Playable notification sound owned by the view layer.
pub trait AudioCue: Send + Sync {
    fn play(&self) -> Result<(), PlaybackBlocked>;

    /// Stops playback and rewinds to the beginning.
    fn stop(&self);

    /// Asks the platform for permission to play later. Cues that can unlock
    /// without sounding override this.
    fn prime(&self) -> Result<(), PlaybackBlocked> {
        self.play()?;
        self.stop();
        Ok(())
    }
}

/// Cue for headless tabs; always plays.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCue;

impl AudioCue for SilentCue {
    fn play(&self) -> Result<(), PlaybackBlocked> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Tracks whether the platform has let this tab play sound yet.
///
/// Platforms refuse playback until a user gesture has been seen, so the gate
/// primes the cue (play, then stop at once) on the first gesture and again on
/// every countdown start while still locked. Failures are logged and dropped.
pub struct AudioGate {
    cue: Arc<dyn AudioCue>,
    unlocked: bool,
    gesture_seen: bool,
}

impl AudioGate {
    pub fn new(cue: Arc<dyn AudioCue>) -> Self {
        Self {
            cue,
            unlocked: false,
            gesture_seen: false,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Only the first gesture counts, whether or not it unlocks audio.
    pub fn on_user_gesture(&mut self) {
        if self.gesture_seen {
            return;
        }
        self.gesture_seen = true;
        if !self.unlocked {
            self.prime("user gesture");
        }
    }

    pub fn on_countdown_start(&mut self) {
        if !self.unlocked {
            self.prime("countdown start");
        }
    }

    pub fn notify_completion(&mut self) {
        match self.cue.play() {
            Ok(()) => {
                self.unlocked = true;
                debug!(target: "countdown.audio", "completion cue played");
            }
            Err(err) => {
                info!(target: "countdown.audio", error = %err, "could not play completion cue");
            }
        }
    }

    fn prime(&mut self, trigger: &'static str) {
        match self.cue.prime() {
            Ok(()) => {
                self.unlocked = true;
                debug!(target: "countdown.audio", trigger, "audio enabled");
            }
            Err(err) => {
                debug!(target: "countdown.audio", trigger, error = %err, "audio could not be enabled");
            }
        }
    }
}

impl std::fmt::Debug for AudioGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGate")
            .field("unlocked", &self.unlocked)
            .field("gesture_seen", &self.gesture_seen)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::CountingCue;
    use super::*;

    #[test]
    fn first_gesture_primes_once() {
        let cue = Arc::new(CountingCue::default());
        let mut gate = AudioGate::new(cue.clone());
        gate.on_user_gesture();
        gate.on_user_gesture();
        assert!(gate.is_unlocked());
        assert_eq!(cue.plays(), 1);
        assert_eq!(cue.stops(), 1);
    }

    #[test]
    fn blocked_gesture_is_not_retried_but_start_tries_again() {
        let cue = Arc::new(CountingCue::blocked());
        let mut gate = AudioGate::new(cue.clone());
        gate.on_user_gesture();
        gate.on_user_gesture();
        assert_eq!(cue.plays(), 1);
        assert!(!gate.is_unlocked());

        cue.blocked.store(false, Ordering::SeqCst);
        gate.on_countdown_start();
        assert!(gate.is_unlocked());
        assert_eq!(cue.plays(), 2);

        gate.on_countdown_start();
        assert_eq!(cue.plays(), 2, "already unlocked, no further priming");
    }

    struct QuietPrime(CountingCue);

    impl AudioCue for QuietPrime {
        fn play(&self) -> Result<(), PlaybackBlocked> {
            self.0.play()
        }

        fn stop(&self) {
            self.0.stop()
        }

        fn prime(&self) -> Result<(), PlaybackBlocked> {
            Ok(())
        }
    }

    #[test]
    fn cue_with_silent_prime_only_sounds_on_completion() {
        let cue = Arc::new(QuietPrime(CountingCue::default()));
        let mut gate = AudioGate::new(cue.clone());
        gate.on_user_gesture();
        gate.on_countdown_start();
        assert!(gate.is_unlocked());
        assert_eq!(cue.0.plays(), 0);

        gate.notify_completion();
        assert_eq!(cue.0.plays(), 1);
    }

    #[test]
    fn completion_failure_is_swallowed() {
        let cue = Arc::new(CountingCue::blocked());
        let mut gate = AudioGate::new(cue.clone());
        gate.notify_completion();
        assert!(!gate.is_unlocked());
        assert_eq!(cue.stops(), 0);
    }
}
