//! Background image: validation, encoding and cross-tab state.

use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tab_store::KeyValueStore;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::SyncConfig;
use crate::error::ImageError;
use crate::protocol::SyncMessage;
use crate::view::ImageView;

/// Constraints an upload must satisfy before it is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRules {
    pub allowed_types: Vec<String>,
    pub max_bytes: usize,
    pub width: u32,
    pub height: u32,
}

impl Default for ImageRules {
    fn default() -> Self {
        Self {
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/jpg".to_string(),
                "image/png".to_string(),
            ],
            max_bytes: 5 * 1024 * 1024,
            width: 400,
            height: 200,
        }
    }
}

impl ImageRules {
    pub fn check_type(&self, mime_type: &str) -> Result<(), ImageError> {
        if self.allowed_types.iter().any(|allowed| allowed == mime_type) {
            Ok(())
        } else {
            Err(ImageError::UnsupportedType {
                mime: mime_type.to_string(),
            })
        }
    }

    pub fn check_size(&self, size: usize) -> Result<(), ImageError> {
        if size > self.max_bytes {
            return Err(ImageError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        Ok(())
    }

    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), ImageError> {
        if (width, height) != (self.width, self.height) {
            return Err(ImageError::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: width,
                actual_height: height,
            });
        }
        Ok(())
    }

    /// Runs every check in order (type, size, dimensions) and encodes the
    /// upload. The first failing check wins.
    pub fn validate(&self, upload: &ImageUpload) -> Result<ImageRecord, ImageError> {
        self.check_type(&upload.mime_type)?;
        self.check_size(upload.size())?;
        let (width, height) = probe_dimensions(&upload.bytes)?;
        self.check_dimensions(width, height)?;
        Ok(ImageRecord::encode(&upload.mime_type, &upload.bytes))
    }

    /// Like [`validate`](Self::validate), with the decode and encode work
    /// moved off the calling task.
    pub async fn prepare(&self, upload: ImageUpload) -> Result<ImageRecord, ImageError> {
        self.check_type(&upload.mime_type)?;
        self.check_size(upload.size())?;
        let rules = self.clone();
        tokio::task::spawn_blocking(move || rules.validate(&upload))
            .await
            .map_err(|err| ImageError::Decode(format!("image worker failed: {err}")))?
    }
}

/// Reads width and height from the image header without a full decode.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| ImageError::Decode(err.to_string()))?
        .into_dimensions()
        .map_err(|err| ImageError::Decode(err.to_string()))
}

/// A file picked or dropped by the user.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl ImageUpload {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Stored form of an accepted image: a `data:<mime>;base64,<payload>` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRecord(String);

impl ImageRecord {
    pub fn encode(mime_type: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{mime_type};base64,{}", STANDARD.encode(bytes)))
    }

    /// Wraps an already encoded URI as received from storage or a sibling.
    pub fn from_data_uri(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn mime_type(&self) -> Option<&str> {
        let rest = self.0.strip_prefix("data:")?;
        rest.split_once(';').map(|(mime, _)| mime)
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let (_, payload) = self
            .0
            .split_once(";base64,")
            .ok_or_else(|| ImageError::Decode("not a base64 data URI".to_string()))?;
        STANDARD
            .decode(payload)
            .map_err(|err| ImageError::Decode(err.to_string()))
    }
}

/// One tab's copy of the background image.
pub struct ImageHolder {
    current: Option<ImageRecord>,
    rules: ImageRules,
    storage_key: String,
    store: Arc<dyn KeyValueStore>,
    broadcaster: Arc<dyn Broadcaster>,
    views: Vec<Box<dyn ImageView>>,
}

impl ImageHolder {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn KeyValueStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            current: None,
            rules: config.image.clone(),
            storage_key: config.image_key.clone(),
            store,
            broadcaster,
            views: Vec::new(),
        }
    }

    pub fn add_view(&mut self, view: Box<dyn ImageView>) {
        self.views.push(view);
    }

    pub fn rules(&self) -> &ImageRules {
        &self.rules
    }

    pub fn current(&self) -> Option<&ImageRecord> {
        self.current.as_ref()
    }

    pub fn hydrate(&mut self) {
        match self.store.get(&self.storage_key) {
            Ok(stored) => {
                self.current = stored
                    .filter(|uri| !uri.is_empty())
                    .map(ImageRecord::from_data_uri);
            }
            Err(err) => {
                warn!(target: "countdown.image", error = %err, "ignoring unreadable stored image");
            }
        }
        debug!(target: "countdown.image", present = self.current.is_some(), "image hydrated");
        self.render();
    }

    /// Persists an already validated record, shows it, and announces it.
    /// Nothing changes if the store rejects the write.
    pub fn accept(&mut self, record: ImageRecord) -> Result<(), ImageError> {
        self.store.set(&self.storage_key, record.as_str())?;
        let message = SyncMessage::ImageUpdated {
            image: record.clone(),
        };
        info!(
            target: "countdown.image",
            mime = record.mime_type().unwrap_or("unknown"),
            encoded_len = record.as_str().len(),
            "image updated"
        );
        self.current = Some(record);
        self.render();
        if let Err(err) = self.broadcaster.broadcast(&message) {
            warn!(target: "countdown.image", error = %err, "failed to broadcast image update");
        }
        Ok(())
    }

    /// Clears the image. Removing an absent image still announces the removal.
    /// Nothing changes if the store cannot drop the record.
    pub fn remove(&mut self) -> Result<(), ImageError> {
        self.store.remove(&self.storage_key)?;
        self.current = None;
        self.render();
        if let Err(err) = self.broadcaster.broadcast(&SyncMessage::ImageRemoved) {
            warn!(target: "countdown.image", error = %err, "failed to broadcast image removal");
        }
        info!(target: "countdown.image", "image removed");
        Ok(())
    }

    /// Applies a sibling's image announcement without re-validating it.
    /// Returns `false` for messages that are not about the image.
    pub fn reconcile(&mut self, message: &SyncMessage) -> bool {
        match message {
            SyncMessage::ImageUpdated { image } => {
                self.current = Some(image.clone());
            }
            SyncMessage::ImageRemoved => {
                self.current = None;
            }
            SyncMessage::TimerUpdate(_) => return false,
        }
        debug!(
            target: "countdown.image",
            kind = message.kind(),
            "image reconciled from sibling"
        );
        self.render();
        true
    }

    fn render(&self) {
        for view in &self.views {
            view.render(self.current.as_ref());
        }
    }
}
