use crate::error::GbError;
use crate::gb::ps::{PsContext, TsMessage};
use crate::rtp::parse_rtp_header;

/// Drive interval for a GB session's state check (spec §4.8).
pub const DRIVE_INTERVAL_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GbState {
    /// No media connection yet.
    Init,
    /// Media TCP connection is up; PS packs are being served.
    Established,
}

/// Per-device GB28181 session. Bound to a media connection out-of-band via
/// `/gb/v1/publish/`, keyed by the SSRC carried in the first RTP packet on
/// that connection.
pub struct GbSession {
    pub device_id: String,
    pub ssrc: u32,
    state: GbState,
    ps: PsContext,
    bound: bool,
    /// Set once the first RTP packet's SSRC has been recorded into `ssrc`.
    ssrc_bound: bool,
}

impl GbSession {
    #[must_use]
    pub fn new(device_id: String, ssrc: u32) -> Self {
        Self {
            device_id,
            ssrc,
            state: GbState::Init,
            ps: PsContext::new(),
            bound: false,
            ssrc_bound: ssrc != 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> GbState {
        self.state
    }

    /// Called once the media TCP connection for this SSRC is confirmed up.
    pub fn on_media_connected(&mut self) {
        self.bound = true;
        self.state = GbState::Established;
    }

    /// Called when the underlying media transport disconnects; reverts to
    /// `Init` so a future reconnect can re-establish.
    pub fn on_media_disconnected(&mut self) {
        self.bound = false;
        self.state = GbState::Init;
    }

    /// Feeds one already-depacketized PS payload (RTP header already
    /// stripped by the caller) through the recoverable PS demuxer, grouping
    /// all video PES of a pack into one handler call. Kept for callers that
    /// have already done their own RTP parsing; `decode_rtp` below is the
    /// entry point that does the parsing itself.
    pub fn feed_ps_payload(
        &mut self,
        payload: &[u8],
        mut on_video_pack: impl FnMut(&[TsMessage]),
        mut on_audio_message: impl FnMut(&TsMessage),
    ) -> Result<(), GbError> {
        if self.state != GbState::Established {
            return Err(GbError::PsMedia("session not established".into()));
        }
        self.ps.decode_payload(
            payload,
            |_pack_id, msgs| {
                let video: Vec<TsMessage> = msgs.iter().filter(|m| m.is_video).cloned().collect();
                if !video.is_empty() {
                    on_video_pack(&video);
                }
                for m in msgs.iter().filter(|m| !m.is_video) {
                    on_audio_message(m);
                }
            },
            |_attempt| {},
        )
    }

    /// Decodes one RTP-over-TCP chunk (spec §4.8): `buf` holds
    /// `reserved_prefix_len` bytes of PS payload carried over from the prior
    /// call, followed by one full RTP packet. The RTP header is parsed off
    /// the wire (reusing `rtp::packet`); on the first packet seen by this
    /// session the header's SSRC is recorded. The carried-over bytes and the
    /// new RTP payload are handed to the PS demuxer together, as if the
    /// payload pointer had been walked back by `reserved_prefix_len`.
    ///
    /// Returns the `reserved_prefix_len` to pass on the next call.
    pub fn decode_rtp(
        &mut self,
        buf: &[u8],
        reserved_prefix_len: usize,
        mut on_video_pack: impl FnMut(&[TsMessage]),
        mut on_audio_message: impl FnMut(&TsMessage),
    ) -> Result<usize, GbError> {
        if self.state != GbState::Established {
            return Err(GbError::PsMedia("session not established".into()));
        }
        let carried_over = buf
            .get(..reserved_prefix_len)
            .ok_or_else(|| GbError::PsHeader("reserved prefix exceeds buffer length".into()))?;
        let rtp_bytes = &buf[reserved_prefix_len..];
        let (header, header_len) = parse_rtp_header(rtp_bytes)
            .ok_or_else(|| GbError::PsHeader("malformed RTP header".into()))?;

        if !self.ssrc_bound {
            self.ssrc = header.ssrc;
            self.ssrc_bound = true;
        }

        let new_payload = &rtp_bytes[header_len..];
        let joined;
        let payload: &[u8] = if carried_over.is_empty() {
            new_payload
        } else {
            joined = [carried_over, new_payload].concat();
            &joined
        };

        self.ps.decode_payload(
            payload,
            |_pack_id, msgs| {
                let video: Vec<TsMessage> = msgs.iter().filter(|m| m.is_video).cloned().collect();
                if !video.is_empty() {
                    on_video_pack(&video);
                }
                for m in msgs.iter().filter(|m| !m.is_video) {
                    on_audio_message(m);
                }
            },
            |_attempt| {},
        )?;

        Ok(0)
    }
}

/// Parses the big-endian 16-bit RFC 4571 length prefix. Zero length is a
/// fatal protocol violation.
pub fn read_rfc4571_len(prefix: [u8; 2]) -> Result<u16, GbError> {
    let len = u16::from_be_bytes(prefix);
    if len == 0 {
        return Err(GbError::EmptyFrame);
    }
    Ok(len)
}
