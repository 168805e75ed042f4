//! Terminal view bindings: each tab prints what a page would render, and
//! stdin lines stand in for clicks and file drops.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use countdown_sync::{
    AudioCue, ControlLabel, ImageRecord, ImageUpload, PlaybackBlocked, SyncConfig, TabContext,
    TabError, TabHandle, TimerSnapshot,
};
use parking_lot::Mutex;
use tab_bus::LocalBus;
use tab_store::KeyValueStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

pub const HELP: &str = "\
commands:
  <tab> start|pause|reset|toggle   drive the countdown of a tab
  <tab> image <path>               upload a 400x200 JPG or PNG background
  <tab> remove                     remove the background image
  <tab> status                     print what the tab shows
  open                             open another tab
  close <tab>                      close a tab
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabAction {
    Start,
    Pause,
    Reset,
    Toggle,
    Status,
    Remove,
    Image(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Tab { index: usize, action: TabAction },
    Open,
    Close(usize),
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{0}` is not a tab number")]
    BadTab(String),
    #[error("missing argument: {0}")]
    Missing(&'static str),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or(ParseError::Empty)?;
        match head {
            "help" | "?" => Ok(ConsoleCommand::Help),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            "open" => Ok(ConsoleCommand::Open),
            "close" => {
                let tab = words.next().ok_or(ParseError::Missing("tab number"))?;
                Ok(ConsoleCommand::Close(parse_tab(tab)?))
            }
            tab => {
                let index = parse_tab(tab)?;
                let verb = words.next().ok_or(ParseError::Missing("action"))?;
                let action = match verb {
                    "start" => TabAction::Start,
                    "pause" => TabAction::Pause,
                    "reset" => TabAction::Reset,
                    "toggle" => TabAction::Toggle,
                    "status" => TabAction::Status,
                    "remove" => TabAction::Remove,
                    "image" => {
                        let rest: Vec<&str> = words.collect();
                        if rest.is_empty() {
                            return Err(ParseError::Missing("image path"));
                        }
                        TabAction::Image(PathBuf::from(rest.join(" ")))
                    }
                    other => return Err(ParseError::Unknown(other.to_string())),
                };
                Ok(ConsoleCommand::Tab { index, action })
            }
        }
    }
}

fn parse_tab(word: &str) -> Result<usize, ParseError> {
    word.parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ParseError::BadTab(word.to_string()))
}

/// MIME type a browser would report for a dropped file.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Rings the terminal bell.
pub struct TerminalBell {
    muted: bool,
}

impl TerminalBell {
    pub fn new(muted: bool) -> Self {
        Self { muted }
    }
}

impl AudioCue for TerminalBell {
    fn play(&self) -> Result<(), PlaybackBlocked> {
        if self.muted {
            return Err(PlaybackBlocked::new("muted"));
        }
        let mut out = std::io::stdout();
        out.write_all(b"\x07")
            .and_then(|_| out.flush())
            .map_err(|err| PlaybackBlocked::new(err.to_string()))
    }

    fn stop(&self) {}

    // Unlocking is silent; the bell only rings at completion.
    fn prime(&self) -> Result<(), PlaybackBlocked> {
        if self.muted {
            return Err(PlaybackBlocked::new("muted"));
        }
        Ok(())
    }
}

pub struct Console {
    config: SyncConfig,
    bus: Arc<LocalBus>,
    store: Arc<dyn KeyValueStore>,
    cue: Arc<dyn AudioCue>,
    tabs: Vec<Option<TabHandle>>,
}

impl Console {
    pub fn new(
        config: SyncConfig,
        bus: Arc<LocalBus>,
        store: Arc<dyn KeyValueStore>,
        cue: Arc<dyn AudioCue>,
    ) -> Self {
        Self {
            config,
            bus,
            store,
            cue,
            tabs: Vec::new(),
        }
    }

    pub fn open_tab(&mut self) -> usize {
        let number = self.tabs.len() + 1;
        let last_label: Mutex<Option<ControlLabel>> = Mutex::new(None);
        let handle = TabContext::new(
            self.config.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
        )
        .with_audio(Arc::clone(&self.cue))
        .on_timer(move |snapshot: &TimerSnapshot| {
            let mut last = last_label.lock();
            // Ticks only move the clock; print when the control changes.
            if *last != Some(snapshot.label) {
                *last = Some(snapshot.label);
                println!("[tab {number}] {} ({})", snapshot.clock, snapshot.label);
            }
        })
        .on_image(move |image: Option<&ImageRecord>| match image {
            Some(record) => println!(
                "[tab {number}] background set ({}, {} bytes encoded)",
                record.mime_type().unwrap_or("unknown"),
                record.as_str().len()
            ),
            None => println!("[tab {number}] no background"),
        })
        .launch();
        debug!(tab = number, endpoint = handle.id(), "console tab opened");
        self.tabs.push(Some(handle));
        number
    }

    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line.context("failed to read stdin")?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match ConsoleCommand::parse(&line) {
                Ok(ConsoleCommand::Quit) => break,
                Ok(command) => self.execute(command).await,
                Err(err) => println!("{err}; type `help`"),
            }
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        for (slot, tab) in self.tabs.iter_mut().enumerate() {
            if let Some(handle) = tab.take() {
                if let Err(err) = handle.shutdown().await {
                    warn!(tab = slot + 1, error = %err, "tab did not shut down cleanly");
                }
            }
        }
    }

    async fn execute(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => {}
            ConsoleCommand::Open => {
                let number = self.open_tab();
                println!("opened tab {number}");
            }
            ConsoleCommand::Close(index) => match self.take_tab(index) {
                Some(handle) => {
                    if let Err(err) = handle.shutdown().await {
                        warn!(tab = index, error = %err, "tab did not shut down cleanly");
                    }
                    debug!(
                        tab = index,
                        subscribers = self.bus.subscriber_count(&self.config.channel),
                        "console tab closed"
                    );
                    println!("closed tab {index}");
                }
                None => println!("no open tab {index}"),
            },
            ConsoleCommand::Tab { index, action } => {
                let Some(handle) = self.tab(index) else {
                    println!("no open tab {index}");
                    return;
                };
                if let Err(err) = drive(index, handle, action).await {
                    println!("[tab {index}] {err}");
                }
            }
        }
    }

    fn tab(&self, index: usize) -> Option<&TabHandle> {
        self.tabs.get(index.checked_sub(1)?)?.as_ref()
    }

    fn take_tab(&mut self, index: usize) -> Option<TabHandle> {
        self.tabs.get_mut(index.checked_sub(1)?)?.take()
    }
}

async fn drive(index: usize, handle: &TabHandle, action: TabAction) -> Result<()> {
    match action {
        TabAction::Start => handle.start()?,
        TabAction::Pause => handle.pause()?,
        TabAction::Reset => handle.reset()?,
        TabAction::Toggle => handle.toggle()?,
        TabAction::Remove => match handle.remove_image().await {
            Ok(()) => {}
            Err(TabError::Image(err)) => println!("[tab {index}] {err}"),
            Err(err) => return Err(err.into()),
        },
        TabAction::Status => {
            let snapshot = handle.snapshot().await?;
            let image = snapshot
                .image
                .as_ref()
                .and_then(ImageRecord::mime_type)
                .unwrap_or("none");
            println!(
                "[tab {index}] {} ({}) background: {image}",
                snapshot.timer.clock, snapshot.timer.label
            );
        }
        TabAction::Image(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("could not read {}", path.display()))?;
            let upload = ImageUpload::new(bytes, guess_mime(&path));
            match handle.submit(upload).await {
                Ok(_) => {}
                Err(TabError::Image(err)) => println!("[tab {index}] {err}"),
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}
