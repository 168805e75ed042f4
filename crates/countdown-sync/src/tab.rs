//! One open tab: its state holders, its bus endpoint and the single task that
//! serializes everything that can happen to them.

use std::sync::Arc;

use tab_bus::{Bus, BusEndpoint, BusError, BusMessage, BusResult, EndpointId};
use tab_store::KeyValueStore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{AudioCue, AudioGate, SilentCue};
use crate::background::{ImageHolder, ImageRecord, ImageUpload};
use crate::broadcast::{Broadcaster, BusBroadcaster};
use crate::config::SyncConfig;
use crate::error::{ImageError, TabError};
use crate::protocol::SyncMessage;
use crate::timer::TimerMachine;
use crate::view::{ImageView, TimerSnapshot, TimerView};

/// Explicit startup context handed to the view bindings of one tab.
pub struct TabContext<B: Bus + 'static> {
    config: SyncConfig,
    bus: Arc<B>,
    store: Arc<dyn KeyValueStore>,
    audio: Arc<dyn AudioCue>,
    timer_views: Vec<Box<dyn TimerView>>,
    image_views: Vec<Box<dyn ImageView>>,
}

impl<B: Bus + 'static> TabContext<B> {
    pub fn new(config: SyncConfig, bus: Arc<B>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            bus,
            store,
            audio: Arc::new(SilentCue),
            timer_views: Vec::new(),
            image_views: Vec::new(),
        }
    }

    pub fn with_audio(mut self, cue: Arc<dyn AudioCue>) -> Self {
        self.audio = cue;
        self
    }

    pub fn on_timer<V: TimerView + 'static>(mut self, view: V) -> Self {
        self.timer_views.push(Box::new(view));
        self
    }

    pub fn on_image<V: ImageView + 'static>(mut self, view: V) -> Self {
        self.image_views.push(Box::new(view));
        self
    }

    /// Opens the bus endpoint, hydrates from the store and spawns the tab
    /// loop. Must be called from within a tokio runtime.
    pub fn launch(self) -> TabHandle {
        let endpoint = BusEndpoint::open(Arc::clone(&self.bus), &self.config.channel);
        let id = endpoint.id();
        let broadcaster: Arc<dyn Broadcaster> =
            Arc::new(BusBroadcaster::new(endpoint.publisher()));

        let mut timer = TimerMachine::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&broadcaster),
            AudioGate::new(self.audio),
        );
        for view in self.timer_views {
            timer.add_view(view);
        }
        let mut image = ImageHolder::new(&self.config, self.store, broadcaster);
        for view in self.image_views {
            image.add_view(view);
        }

        // The bus has no replay, so the store is the only source at startup.
        timer.hydrate();
        image.hydrate();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (encoded_tx, encoded_rx) = mpsc::unbounded_channel();
        let runtime = TabRuntime {
            id,
            endpoint,
            timer,
            image,
            commands: commands_rx,
            encoded_tx,
            encoded_rx,
        };
        let task = tokio::spawn(runtime.run());
        info!(target: "countdown.tab", tab = id, channel = %self.config.channel, "tab launched");

        TabHandle {
            id,
            commands: commands_tx,
            task,
        }
    }
}

/// What a tab currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSnapshot {
    pub tab: EndpointId,
    pub timer: TimerSnapshot,
    pub image: Option<ImageRecord>,
}

enum Command {
    Start,
    Pause,
    Reset,
    Toggle,
    Remove {
        reply: oneshot::Sender<Result<(), TabError>>,
    },
    UserGesture,
    Submit {
        upload: ImageUpload,
        reply: oneshot::Sender<Result<ImageRecord, TabError>>,
    },
    Snapshot {
        reply: oneshot::Sender<TabSnapshot>,
    },
    Shutdown,
}

impl Command {
    fn is_user_gesture(&self) -> bool {
        !matches!(self, Command::Snapshot { .. } | Command::Shutdown)
    }
}

struct Encoded {
    result: Result<ImageRecord, ImageError>,
    reply: oneshot::Sender<Result<ImageRecord, TabError>>,
}

/// Operations exposed to the view bindings of one tab.
pub struct TabHandle {
    id: EndpointId,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl TabHandle {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn start(&self) -> Result<(), TabError> {
        self.send(Command::Start)
    }

    pub fn pause(&self) -> Result<(), TabError> {
        self.send(Command::Pause)
    }

    pub fn reset(&self) -> Result<(), TabError> {
        self.send(Command::Reset)
    }

    pub fn toggle(&self) -> Result<(), TabError> {
        self.send(Command::Toggle)
    }

    /// Clears the image in every tab. Fails without touching anything when
    /// the store cannot drop the stored record.
    pub async fn remove_image(&self) -> Result<(), TabError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove { reply })?;
        rx.await.map_err(|_| TabError::Closed)?
    }

    /// Reports a click or key press anywhere on the page.
    pub fn user_gesture(&self) -> Result<(), TabError> {
        self.send(Command::UserGesture)
    }

    /// Validates and stores an image. Decoding happens off the tab loop, so
    /// ticks and sibling updates keep flowing meanwhile.
    pub async fn submit(&self, upload: ImageUpload) -> Result<ImageRecord, TabError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { upload, reply })?;
        rx.await.map_err(|_| TabError::Closed)?
    }

    pub async fn snapshot(&self) -> Result<TabSnapshot, TabError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| TabError::Closed)
    }

    /// Releases the bus subscription, stops the tick and waits for the loop.
    pub async fn shutdown(self) -> Result<(), TabError> {
        let _ = self.commands.send(Command::Shutdown);
        self.task
            .await
            .map_err(|err| TabError::Task(err.to_string()))
    }

    fn send(&self, command: Command) -> Result<(), TabError> {
        self.commands.send(command).map_err(|_| TabError::Closed)
    }
}

struct TabRuntime<B: Bus> {
    id: EndpointId,
    endpoint: BusEndpoint<B>,
    timer: TimerMachine,
    image: ImageHolder,
    commands: mpsc::UnboundedReceiver<Command>,
    encoded_tx: mpsc::UnboundedSender<Encoded>,
    encoded_rx: mpsc::UnboundedReceiver<Encoded>,
}

impl<B: Bus + 'static> TabRuntime<B> {
    async fn run(mut self) {
        debug!(target: "countdown.tab", tab = self.id, "tab loop started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command),
                },
                Some(encoded) = self.encoded_rx.recv() => self.finish_submit(encoded),
                inbound = self.endpoint.recv(), if self.endpoint.is_open() => {
                    self.handle_inbound(inbound)
                }
                _ = self.timer.next_tick() => {
                    self.timer.on_tick();
                }
            }
        }
        self.timer.shutdown();
        self.endpoint.close();
        info!(target: "countdown.tab", tab = self.id, "tab closed");
    }

    fn handle_command(&mut self, command: Command) {
        if command.is_user_gesture() {
            self.timer.on_user_gesture();
        }
        match command {
            Command::Start => self.timer.start(),
            Command::Pause => self.timer.pause(),
            Command::Reset => self.timer.reset(),
            Command::Toggle => self.timer.toggle(),
            Command::Remove { reply } => {
                let outcome = self.image.remove();
                if let Err(err) = &outcome {
                    warn!(target: "countdown.image", tab = self.id, error = %err, "image removal failed");
                }
                let _ = reply.send(outcome.map_err(TabError::from));
            }
            Command::UserGesture => {}
            Command::Submit { upload, reply } => self.spawn_encode(upload, reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            // Consumed by the loop before dispatch.
            Command::Shutdown => {}
        }
    }

    fn spawn_encode(
        &self,
        upload: ImageUpload,
        reply: oneshot::Sender<Result<ImageRecord, TabError>>,
    ) {
        let rules = self.image.rules().clone();
        let done = self.encoded_tx.clone();
        let tab = self.id;
        debug!(
            target: "countdown.image",
            tab,
            mime = %upload.mime_type,
            size = upload.size(),
            "validating upload"
        );
        tokio::spawn(async move {
            let result = rules.prepare(upload).await;
            if done.send(Encoded { result, reply }).is_err() {
                debug!(target: "countdown.image", tab, "tab closed before upload finished");
            }
        });
    }

    fn finish_submit(&mut self, encoded: Encoded) {
        let Encoded { result, reply } = encoded;
        let outcome = result.and_then(|record| {
            self.image.accept(record.clone())?;
            Ok(record)
        });
        if let Err(err) = &outcome {
            info!(target: "countdown.image", tab = self.id, error = %err, "upload rejected");
        }
        let _ = reply.send(outcome.map_err(TabError::from));
    }

    fn handle_inbound(&mut self, inbound: BusResult<BusMessage>) {
        let message = match inbound {
            Ok(message) => message,
            Err(BusError::Closed) => {
                warn!(target: "countdown.tab", tab = self.id, "bus closed; tab continues unsynchronized");
                self.endpoint.close();
                return;
            }
            Err(err) => {
                warn!(target: "countdown.tab", tab = self.id, error = %err, "bus receive failed");
                return;
            }
        };
        let decoded = match SyncMessage::decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(
                    target: "countdown.tab",
                    tab = self.id,
                    origin = message.origin,
                    error = %err,
                    "dropping undecodable sync message"
                );
                return;
            }
        };
        let handled = self.timer.reconcile(&decoded) || self.image.reconcile(&decoded);
        debug!(
            target: "countdown.tab",
            tab = self.id,
            origin = message.origin,
            kind = decoded.kind(),
            handled,
            "sync message applied"
        );
    }

    fn snapshot(&self) -> TabSnapshot {
        TabSnapshot {
            tab: self.id,
            timer: self.timer.snapshot(),
            image: self.image.current().cloned(),
        }
    }
}
