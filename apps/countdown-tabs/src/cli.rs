use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "countdown-tabs",
    version,
    about = "Countdown timer with a background image, shared by several tabs"
)]
pub struct Cli {
    /// Number of tabs to open at startup.
    #[arg(long, env = "COUNTDOWN_TABS", default_value_t = 2)]
    pub tabs: usize,

    /// Keep origin storage in this JSON file so state survives restarts.
    #[arg(long, env = "COUNTDOWN_STORE")]
    pub store: Option<PathBuf>,

    /// Countdown length in seconds (overrides COUNTDOWN_DEFAULT_SECONDS).
    #[arg(long)]
    pub default_seconds: Option<u32>,

    /// Do not ring the terminal bell when the countdown completes.
    #[arg(long, default_value_t = false)]
    pub mute: bool,

    #[arg(long, value_enum, env = "COUNTDOWN_LOG_LEVEL", default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "COUNTDOWN_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}
