use std::sync::Arc;

/// Discriminates the three payload kinds a `LiveSource` fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
    Script,
}

/// Immutable media message: payload bytes plus the metadata every consumer
/// (RTMP writer, HTTP-FLV cache, GOP cache, cross-protocol bridge) needs.
///
/// Cloning is cheap (`Arc<[u8]>` share), and a packet is never mutated after
/// it is handed to a `LiveSource` — consumers observe the same bytes.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    payload: Arc<[u8]>,
    pub timestamp_ms: u32,
    pub stream_id: u32,
    pub kind: PacketKind,
    /// True for AVC/HEVC/AAC sequence headers and the `onMetaData` script tag.
    pub is_sequence_header: bool,
}

impl MediaPacket {
    #[must_use]
    pub fn wrap(data: impl Into<Arc<[u8]>>, stream_id: u32, kind: PacketKind, timestamp_ms: u32) -> Self {
        Self {
            payload: data.into(),
            timestamp_ms,
            stream_id,
            kind,
            is_sequence_header: false,
        }
    }

    #[must_use]
    pub fn sequence_header(mut self) -> Self {
        self.is_sequence_header = true;
        self
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn is_audio(&self) -> bool {
        matches!(self.kind, PacketKind::Audio)
    }

    #[must_use]
    pub fn is_video(&self) -> bool {
        matches!(self.kind, PacketKind::Video)
    }
}
