use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use countdown_sync::{
    AudioCue, ControlLabel, ImageError, ImageUpload, PlaybackBlocked, SyncConfig, SyncMessage,
    TabContext, TabError, TabHandle, TabSnapshot, TimerPhase, TimerSnapshot, TimerState,
};
use image::{ImageFormat, RgbImage};
use tab_bus::{BusEndpoint, LocalBus};
use tab_store::{InMemoryStore, JsonStoreExt, KeyValueStore, StoreError};
use tokio::time::{sleep, timeout};

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::new(width, height)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn open_tab(bus: &Arc<LocalBus>, store: &Arc<InMemoryStore>) -> TabHandle {
    open_tab_with(SyncConfig::default(), bus, store)
}

fn open_tab_with(config: SyncConfig, bus: &Arc<LocalBus>, store: &Arc<InMemoryStore>) -> TabHandle {
    TabContext::new(config, Arc::clone(bus), store.clone()).launch()
}

async fn eventually(tab: &TabHandle, check: impl Fn(&TabSnapshot) -> bool) -> TabSnapshot {
    timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = tab.snapshot().await.expect("tab alive");
            if check(&snapshot) {
                return snapshot;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition reached in time")
}

#[tokio::test]
async fn start_in_one_tab_flips_the_label_in_another() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let labels: Arc<Mutex<Vec<ControlLabel>>> = Arc::new(Mutex::new(Vec::new()));

    let a = open_tab(&bus, &store);
    let sink = labels.clone();
    let b = TabContext::new(SyncConfig::default(), bus.clone(), store.clone())
        .on_timer(move |snapshot: &TimerSnapshot| sink.lock().unwrap().push(snapshot.label))
        .launch();

    assert_eq!(b.snapshot().await.unwrap().timer.label, ControlLabel::Start);

    a.start().unwrap();
    let seen = eventually(&b, |snap| snap.timer.label == ControlLabel::Pause).await;
    assert!(seen.timer.state.is_running);
    assert!(!seen.timer.state.is_paused);

    let labels = labels.lock().unwrap();
    assert_eq!(labels.first(), Some(&ControlLabel::Start));
    assert_eq!(labels.last(), Some(&ControlLabel::Pause));

    let persisted: TimerState = store.load_json("timerState").unwrap().unwrap();
    assert!(persisted.is_running);
}

#[tokio::test]
async fn pause_and_reset_propagate() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let a = open_tab(&bus, &store);
    let b = open_tab(&bus, &store);

    a.start().unwrap();
    eventually(&b, |snap| snap.timer.state.phase() == TimerPhase::Running).await;
    b.pause().unwrap();
    let paused = eventually(&a, |snap| snap.timer.label == ControlLabel::Resume).await;
    assert!(paused.timer.state.is_running && paused.timer.state.is_paused);

    a.reset().unwrap();
    let reset = eventually(&b, |snap| snap.timer.state == TimerState::idle(600)).await;
    assert_eq!(reset.timer.clock, "10:00");
}

#[tokio::test]
async fn late_tab_hydrates_from_the_store() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let a = open_tab(&bus, &store);
    a.start().unwrap();
    a.pause().unwrap();
    let before = a.snapshot().await.unwrap();
    assert_eq!(before.timer.state.phase(), TimerPhase::Paused);

    let late = open_tab(&bus, &store);
    let snapshot = late.snapshot().await.unwrap();
    assert_eq!(snapshot.timer.state, before.timer.state);
    assert_eq!(snapshot.timer.label, ControlLabel::Resume);
}

#[tokio::test(start_paused = true)]
async fn ticks_stay_local_to_each_tab() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let mut spy = BusEndpoint::open(bus.clone(), "timer-sync");
    let a = open_tab(&bus, &store);
    let b = open_tab(&bus, &store);

    a.start().unwrap();
    sleep(Duration::from_millis(3500)).await;

    assert_eq!(a.snapshot().await.unwrap().timer.state.seconds_remaining, 597);
    assert_eq!(b.snapshot().await.unwrap().timer.state.seconds_remaining, 597);

    let mut heard = Vec::new();
    while let Ok(Ok(message)) = timeout(Duration::from_millis(10), spy.recv()).await {
        heard.push(SyncMessage::decode(&message.payload).unwrap());
    }
    assert_eq!(
        heard,
        vec![SyncMessage::TimerUpdate(TimerState {
            seconds_remaining: 600,
            is_running: true,
            is_paused: false,
        })]
    );
}

#[tokio::test(start_paused = true)]
async fn completion_returns_every_tab_to_idle() {
    let config = SyncConfig {
        default_seconds: 3,
        ..SyncConfig::default()
    };
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let a = open_tab_with(config.clone(), &bus, &store);
    let b = open_tab_with(config, &bus, &store);

    a.start().unwrap();
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(a.snapshot().await.unwrap().timer.clock, "00:01");

    sleep(Duration::from_secs(3)).await;
    for tab in [&a, &b] {
        let snapshot = tab.snapshot().await.unwrap();
        assert_eq!(snapshot.timer.state, TimerState::idle(3));
        assert_eq!(snapshot.timer.label, ControlLabel::Start);
    }
    let persisted: TimerState = store.load_json("timerState").unwrap().unwrap();
    assert_eq!(persisted, TimerState::idle(3));
}

#[tokio::test]
async fn image_upload_and_removal_propagate() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let a = open_tab(&bus, &store);
    let b = open_tab(&bus, &store);

    let record = a
        .submit(ImageUpload::new(png(400, 200), "image/png"))
        .await
        .expect("valid upload");
    let seen = eventually(&b, |snap| snap.image.is_some()).await;
    assert_eq!(seen.image.as_ref(), Some(&record));
    assert_eq!(store.get("timerImage").unwrap().as_deref(), Some(record.as_str()));

    a.remove_image().await.unwrap();
    eventually(&b, |snap| snap.image.is_none()).await;
    a.remove_image().await.unwrap();
    assert!(a.snapshot().await.unwrap().image.is_none());
    assert_eq!(store.get("timerImage").unwrap(), None);
}

#[tokio::test]
async fn rejected_upload_keeps_the_current_image() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let a = open_tab(&bus, &store);
    let original = a
        .submit(ImageUpload::new(png(400, 200), "image/png"))
        .await
        .unwrap();

    let err = a
        .submit(ImageUpload::new(png(401, 200), "image/png"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TabError::Image(ImageError::DimensionMismatch {
            actual_width: 401,
            ..
        })
    ));

    let err = a
        .submit(ImageUpload::new(vec![0u8; 16], "image/webp"))
        .await
        .unwrap_err();
    assert!(matches!(err, TabError::Image(ImageError::UnsupportedType { .. })));

    assert_eq!(a.snapshot().await.unwrap().image, Some(original.clone()));
    assert_eq!(store.get("timerImage").unwrap().as_deref(), Some(original.as_str()));
}

#[tokio::test]
async fn malformed_bus_traffic_is_ignored() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let tab = open_tab(&bus, &store);
    let rogue = BusEndpoint::open(bus.clone(), "timer-sync");

    rogue
        .publish(Bytes::from_static(
            br#"{"secondsRemaining":1,"isRunning":true,"isPaused":false}"#,
        ))
        .unwrap();
    rogue.publish(Bytes::from_static(b"not json")).unwrap();
    rogue
        .publish(
            SyncMessage::TimerUpdate(TimerState {
                seconds_remaining: 42,
                is_running: false,
                is_paused: true,
            })
            .encode()
            .unwrap(),
        )
        .unwrap();

    let snapshot = eventually(&tab, |snap| snap.timer.state.seconds_remaining == 42).await;
    assert_eq!(snapshot.timer.state, TimerState::idle(42));
}

#[tokio::test]
async fn shutdown_releases_the_tab() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let a = open_tab(&bus, &store);
    let b = open_tab(&bus, &store);
    assert_eq!(bus.subscriber_count("timer-sync"), 2);

    a.shutdown().await.expect("clean shutdown");
    assert_eq!(bus.subscriber_count("timer-sync"), 1);

    b.start().unwrap();
    let snapshot = b.snapshot().await.unwrap();
    assert_eq!(snapshot.timer.state.phase(), TimerPhase::Running);
}

#[derive(Default)]
struct CountingCue {
    plays: AtomicUsize,
}

impl AudioCue for CountingCue {
    fn play(&self) -> Result<(), PlaybackBlocked> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {}
}

#[tokio::test]
async fn first_gesture_primes_audio_once() {
    let bus = Arc::new(LocalBus::new());
    let store = InMemoryStore::new();
    let cue = Arc::new(CountingCue::default());
    let tab = TabContext::new(SyncConfig::default(), bus, store)
        .with_audio(cue.clone())
        .launch();

    tab.user_gesture().unwrap();
    tab.user_gesture().unwrap();
    tab.start().unwrap();
    tab.snapshot().await.unwrap();
    assert_eq!(cue.plays.load(Ordering::SeqCst), 1);
}

/// Origin store that keeps records it was asked to drop.
#[derive(Default)]
struct StickyStore {
    inner: InMemoryStore,
}

impl KeyValueStore for StickyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear()
    }
}

#[tokio::test]
async fn failed_removal_keeps_the_image_everywhere() {
    let bus = Arc::new(LocalBus::new());
    let store = Arc::new(StickyStore::default());
    let a = TabContext::new(SyncConfig::default(), bus.clone(), store.clone()).launch();
    let b = TabContext::new(SyncConfig::default(), bus.clone(), store.clone()).launch();

    let record = a
        .submit(ImageUpload::new(png(400, 200), "image/png"))
        .await
        .unwrap();
    eventually(&b, |snap| snap.image.is_some()).await;

    let err = a.remove_image().await.unwrap_err();
    assert!(matches!(err, TabError::Image(ImageError::Store(_))));
    assert_eq!(a.snapshot().await.unwrap().image, Some(record.clone()));
    assert_eq!(b.snapshot().await.unwrap().image, Some(record.clone()));
    assert_eq!(store.get("timerImage").unwrap().as_deref(), Some(record.as_str()));
}
