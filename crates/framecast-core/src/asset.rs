// ── Rendering assets & the single-slot buffer ──

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One inbound rendering asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMessage {
    pub payload: Bytes,
    pub arrival_time: DateTime<Utc>,
    pub source_topic: String,
}

impl AssetMessage {
    /// Stamp an asset with the current time.
    pub fn new(source_topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            arrival_time: Utc::now(),
            source_topic: source_topic.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Latest-wins buffer holding at most one pending asset.
#[derive(Debug, Default)]
pub struct AssetSlot {
    pending: Option<AssetMessage>,
}

impl AssetSlot {
    /// Store `asset`, returning the older pending asset it replaced.
    pub fn put(&mut self, asset: AssetMessage) -> Option<AssetMessage> {
        self.pending.replace(asset)
    }

    pub fn take(&mut self) -> Option<AssetMessage> {
        self.pending.take()
    }

    pub fn peek(&self) -> Option<&AssetMessage> {
        self.pending.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
    }
}
