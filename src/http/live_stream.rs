use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::HttpStreamError;
use crate::hooks::PostHookWorker;
use crate::media::{MediaPacket, PacketKind};
use crate::rtmp::drain_batch;

/// Container/encoder selected by the request's file extension (§4.7 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEncoder {
    Flv,
    Ts,
    Aac,
    Mp3,
}

impl StreamEncoder {
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "flv" => Some(Self::Flv),
            "ts" => Some(Self::Ts),
            "aac" => Some(Self::Aac),
            "mp3" => Some(Self::Mp3),
            _ => None,
        }
    }

    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Flv => "video/x-flv",
            Self::Ts => "video/mp2t",
            Self::Aac => "audio/x-aac",
            Self::Mp3 => "audio/mpeg",
        }
    }
}

/// Matches a request path against a vhost's `[vhost]/[app]/[stream].ext`
/// template, returning `(app, stream, encoder)` on success.
#[must_use]
pub fn match_dynamic_mount(path: &str) -> Option<(String, String, StreamEncoder)> {
    let path = path.trim_start_matches('/');
    let (stem, ext) = path.rsplit_once('.')?;
    let encoder = StreamEncoder::from_extension(ext)?;
    let mut segments: Vec<&str> = stem.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    let stream = segments.pop()?.to_string();
    let app = segments.join("/");
    Some((app, stream, encoder))
}

/// FLV's "fast writer": on the first batch, peek at packet kinds to decide
/// whether audio and/or video are present, then bake that into the FLV
/// file header flags (bit 0 = video, bit 2 = audio) instead of always
/// claiming both.
#[must_use]
pub fn guess_av_flags(first_batch: &[MediaPacket]) -> u8 {
    let has_video = first_batch.iter().any(MediaPacket::is_video);
    let has_audio = first_batch.iter().any(MediaPacket::is_audio);
    (u8::from(has_video)) | (u8::from(has_audio) << 2)
}

/// Builds the 9-byte FLV file header plus the trailing 4-byte `PreviousTagSize0`.
#[must_use]
pub fn flv_file_header(av_flags: u8) -> Vec<u8> {
    let mut header = vec![b'F', b'L', b'V', 1, av_flags, 0, 0, 0, 9];
    header.extend_from_slice(&0u32.to_be_bytes());
    header
}

/// Lifecycle state of a mounted HTTP-FLV/TS/AAC/MP3 stream handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Enabled,
    /// Unmount requested; refuses new attaches, existing viewers draining.
    Disposing,
}

/// One HTTP live-stream mount. Holds the lifecycle flag shared between the
/// serving loop(s) and the async-destroy hook.
pub struct LiveStreamMount {
    state: Mutex<MountState>,
    encoder: StreamEncoder,
}

impl LiveStreamMount {
    #[must_use]
    pub fn new(encoder: StreamEncoder) -> Self {
        Self {
            state: Mutex::new(MountState::Enabled),
            encoder,
        }
    }

    #[must_use]
    pub fn encoder(&self) -> StreamEncoder {
        self.encoder
    }

    #[must_use]
    pub fn state(&self) -> MountState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Errors
    /// Returns `HttpStreamError::Eof` if the mount is disposing and must
    /// refuse a new viewer attach.
    pub fn check_attachable(&self) -> Result<(), HttpStreamError> {
        match self.state() {
            MountState::Enabled => Ok(()),
            MountState::Disposing => Err(HttpStreamError::Eof),
        }
    }

    /// Enqueues the async unmount on the post-hook worker: marks the mount
    /// disposing so further attaches are refused and existing servers can
    /// detect it and wind down (§4.7 "Async destroy").
    pub fn begin_destroy(self: &Arc<Self>, worker: &PostHookWorker) {
        let this = self.clone();
        worker.submit(move || {
            *this.state.lock().unwrap_or_else(|e| e.into_inner()) = MountState::Disposing;
        });
    }
}

/// One serving tick: pulls a batch from the consumer, and if non-empty,
/// serializes each packet as an FLV tag. Returns `None` (caller sleeps
/// `mw_sleep`) when the batch was empty.
#[must_use]
pub fn serve_flv_tick(rx: &Receiver<MediaPacket>, max_batch: usize) -> Option<Vec<u8>> {
    let batch = drain_batch(rx, max_batch);
    if batch.is_empty() {
        return None;
    }
    let mut out = Vec::new();
    for pkt in &batch {
        let tag = encode_flv_tag(pkt);
        out.extend_from_slice(&tag);
    }
    Some(out)
}

fn encode_flv_tag(pkt: &MediaPacket) -> Vec<u8> {
    // Packets arriving here are already FLV-tag-body bytes produced by a
    // frame builder; this only affixes the FLV tag header + PreviousTagSize.
    let tag_type: u8 = match pkt.kind {
        PacketKind::Audio => 8,
        PacketKind::Video => 9,
        PacketKind::Script => 18,
    };
    let body = pkt.payload();
    let mut out = Vec::with_capacity(11 + body.len() + 4);
    out.push(tag_type);
    let len = body.len() as u32;
    out.extend_from_slice(&len.to_be_bytes()[1..]); // 3-byte data size
    out.extend_from_slice(&pkt.timestamp_ms.to_be_bytes()[1..]); // 3-byte ts
    out.push((pkt.timestamp_ms >> 24) as u8); // ts extended byte
    out.extend_from_slice(&[0, 0, 0]); // StreamID, always 0
    out.extend_from_slice(body);
    let tag_size = 11 + body.len() as u32;
    out.extend_from_slice(&tag_size.to_be_bytes());
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::log::NoopLogSink;
    use std::sync::mpsc;

    #[test]
    fn dynamic_mount_parses_app_stream_and_encoder() {
        let (app, stream, enc) = match_dynamic_mount("/live/mystream.flv").unwrap();
        assert_eq!(app, "live");
        assert_eq!(stream, "mystream");
        assert_eq!(enc, StreamEncoder::Flv);
    }

    #[test]
    fn dynamic_mount_rejects_unknown_extension() {
        assert!(match_dynamic_mount("/live/mystream.mp4").is_none());
    }

    #[test]
    fn dynamic_mount_rejects_shallow_path() {
        assert!(match_dynamic_mount("/mystream.flv").is_none());
    }

    #[test]
    fn guess_av_flags_detects_both_present() {
        let batch = vec![
            MediaPacket::wrap(vec![], 1, PacketKind::Audio, 0),
            MediaPacket::wrap(vec![], 1, PacketKind::Video, 0),
        ];
        assert_eq!(guess_av_flags(&batch), 0b101);
    }

    #[test]
    fn guess_av_flags_video_only() {
        let batch = vec![MediaPacket::wrap(vec![], 1, PacketKind::Video, 0)];
        assert_eq!(guess_av_flags(&batch), 0b001);
    }

    #[test]
    fn disposing_mount_refuses_new_attach() {
        let mount = Arc::new(LiveStreamMount::new(StreamEncoder::Flv));
        let worker = PostHookWorker::start(NoopLogSink);
        mount.begin_destroy(&worker);
        worker.stop();
        assert!(matches!(
            mount.check_attachable(),
            Err(HttpStreamError::Eof)
        ));
    }

    #[test]
    fn serve_tick_returns_none_when_empty() {
        let (_tx, rx) = mpsc::channel::<MediaPacket>();
        assert!(serve_flv_tick(&rx, 128).is_none());
    }

    #[test]
    fn serve_tick_encodes_queued_packets_into_flv_tags() {
        let (tx, rx) = mpsc::channel();
        tx.send(MediaPacket::wrap(vec![1, 2, 3], 1, PacketKind::Video, 40))
            .unwrap();
        let out = serve_flv_tick(&rx, 128).unwrap();
        assert_eq!(out[0], 9); // video tag type
        let size = u32::from_be_bytes([0, out[1], out[2], out[3]]);
        assert_eq!(size, 3);
    }
}
