use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::background::ImageRecord;
use crate::error::ProtocolError;
use crate::timer::TimerState;

/// Everything a tab announces to its siblings. Every message carries an
/// explicit `type` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    TimerUpdate(TimerState),
    ImageUpdated { image: ImageRecord },
    ImageRemoved,
}

impl SyncMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::TimerUpdate(_) => "timerUpdate",
            SyncMessage::ImageUpdated { .. } => "imageUpdated",
            SyncMessage::ImageRemoved => "imageRemoved",
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
