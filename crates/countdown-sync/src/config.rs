use std::env;
use std::time::Duration;

use crate::background::ImageRules;

pub const DEFAULT_SECONDS: u32 = 10 * 60;
pub const DEFAULT_CHANNEL: &str = "timer-sync";
pub const TIMER_STATE_KEY: &str = "timerState";
pub const TIMER_IMAGE_KEY: &str = "timerImage";

/// Settings shared by every tab of one origin.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Countdown value restored by reset and completion.
    pub default_seconds: u32,
    pub tick_interval: Duration,
    /// Bus channel carrying both timer and image messages.
    pub channel: String,
    pub timer_key: String,
    pub image_key: String,
    pub image: ImageRules,
}

impl SyncConfig {
    /// Load configuration from `COUNTDOWN_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|val| val.trim().parse::<u64>().ok());

        let default_seconds = parsed("COUNTDOWN_DEFAULT_SECONDS")
            .and_then(|secs| u32::try_from(secs).ok())
            .unwrap_or(defaults.default_seconds);
        let tick_interval = parsed("COUNTDOWN_TICK_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval);
        let max_bytes = parsed("COUNTDOWN_IMAGE_MAX_BYTES")
            .and_then(|bytes| usize::try_from(bytes).ok())
            .unwrap_or(defaults.image.max_bytes);
        let non_empty = |name: &str, fallback: String| {
            lookup(name)
                .filter(|val| !val.trim().is_empty())
                .unwrap_or(fallback)
        };

        Self {
            default_seconds,
            tick_interval,
            channel: non_empty("COUNTDOWN_CHANNEL", defaults.channel),
            timer_key: non_empty("COUNTDOWN_TIMER_KEY", defaults.timer_key),
            image_key: non_empty("COUNTDOWN_IMAGE_KEY", defaults.image_key),
            image: ImageRules {
                max_bytes,
                ..defaults.image
            },
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_seconds: DEFAULT_SECONDS,
            tick_interval: Duration::from_secs(1),
            channel: DEFAULT_CHANNEL.to_string(),
            timer_key: TIMER_STATE_KEY.to_string(),
            image_key: TIMER_IMAGE_KEY.to_string(),
            image: ImageRules::default(),
        }
    }
}
