use byteorder::{BigEndian, ByteOrder};

use crate::error::GbError;

/// RTP payloads larger than this are logged but still processed while a
/// pack parses cleanly; any payload over this size seen at the moment a
/// parse failure puts the context into (or keeps it in) recover mode is
/// unrecoverable, whether this is the first failure or a later one.
pub const LARGE_PACKET: usize = 1500;
/// Consecutive failed recovery scans before the session is declared fatal.
pub const MAX_RECOVER: u32 = 16;

const PACK_START: [u8; 4] = [0x00, 0x00, 0x01, 0xBA];
const PES_START_PREFIX: [u8; 3] = [0x00, 0x00, 0x01];

/// One demuxed PES payload, ready for the GB muxer.
#[derive(Debug, Clone)]
pub struct TsMessage {
    pub is_video: bool,
    pub stream_id: u8,
    pub dts: i64,
    pub pts: i64,
    pub payload: Vec<u8>,
}

/// Trace counters mirroring SRS's `total_recovered_`/`media_recovered_`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsStats {
    pub total_recovered: u32,
    pub media_recovered: u32,
}

/// Recoverable MPEG-PS decode state for one GB28181 media connection.
pub struct PsContext {
    recovering: bool,
    recover_attempts: u32,
    pack_id: u64,
    last_dts: i64,
    stats: PsStats,
}

impl Default for PsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PsContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            recovering: false,
            recover_attempts: 0,
            pack_id: 0,
            last_dts: 0,
            stats: PsStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> PsStats {
        self.stats
    }

    #[must_use]
    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    /// Feeds one RTP payload (already stripped of its RTP header) into the
    /// context. `on_pack_flush` is invoked once per completed pack with its
    /// id and the messages accumulated for it; `on_recover_mode` is invoked
    /// with the 1-based attempt count each time a recovery scan happens.
    pub fn decode_payload(
        &mut self,
        data: &[u8],
        mut on_pack_flush: impl FnMut(u64, &[TsMessage]),
        mut on_recover_mode: impl FnMut(u32),
    ) -> Result<(), GbError> {
        if data.is_empty() {
            return Err(GbError::EmptyFrame);
        }

        if self.recovering {
            if data.len() > LARGE_PACKET {
                return Err(GbError::LargePacketUnrecoverable { len: data.len() });
            }
            match find_pack_start(data) {
                Some(pos) => {
                    self.leave_recover_mode();
                    return self.parse_pack(&data[pos..], &mut on_pack_flush);
                }
                None => return self.register_recovery_attempt(&mut on_recover_mode),
            }
        }

        match self.parse_pack(data, &mut on_pack_flush) {
            Ok(()) => {
                self.recover_attempts = 0;
                Ok(())
            }
            Err(_) => {
                if data.len() > LARGE_PACKET {
                    self.recovering = true;
                    return Err(GbError::LargePacketUnrecoverable { len: data.len() });
                }
                self.recovering = true;
                let res = self.register_recovery_attempt(&mut on_recover_mode)?;
                // The same chunk may carry garbage followed by a valid pack
                // (e.g. a single buffer with injected noise before a real
                // pack start); scan it immediately rather than waiting for
                // the next call.
                if let Some(pos) = find_pack_start(data).filter(|&p| p > 0) {
                    self.leave_recover_mode();
                    return self.parse_pack(&data[pos..], &mut on_pack_flush);
                }
                Ok(res)
            }
        }
    }

    fn leave_recover_mode(&mut self) {
        self.recovering = false;
        self.recover_attempts = 0;
    }

    fn register_recovery_attempt(
        &mut self,
        on_recover_mode: &mut impl FnMut(u32),
    ) -> Result<(), GbError> {
        self.recover_attempts += 1;
        if self.recover_attempts == 1 {
            self.stats.media_recovered += 1;
        }
        self.stats.total_recovered += 1;
        on_recover_mode(self.recover_attempts);
        if self.recover_attempts > MAX_RECOVER {
            return Err(GbError::RecoveryExhausted {
                attempts: self.recover_attempts,
            });
        }
        Ok(())
    }

    fn parse_pack(
        &mut self,
        data: &[u8],
        on_pack_flush: &mut impl FnMut(u64, &[TsMessage]),
    ) -> Result<(), GbError> {
        if data.len() < 14 || data[0..4] != PACK_START {
            return Err(GbError::PsHeader("missing pack start code".into()));
        }
        self.pack_id += 1;
        let pack_id = self.pack_id;

        // Fixed 14-byte pack header (ISO/IEC 13818-1): start code, SCR,
        // mux rate, and a stuffing length in the low 3 bits of byte 13.
        let stuffing = (data[13] & 0x07) as usize;
        let mut pos = 14 + stuffing;

        let mut messages = Vec::new();
        while pos + 4 <= data.len() {
            if data[pos..pos + 3] != PES_START_PREFIX {
                break;
            }
            let stream_id = data[pos + 3];
            if stream_id == 0xBA {
                break; // next pack begins here; caller feeds it separately
            }
            if stream_id == 0xB9 {
                break; // MPEG program end code
            }

            let msg = self.parse_pes(&data[pos..], stream_id)?;
            pos += msg.consumed;
            if let Some(m) = msg.message {
                messages.push(m);
            }
        }

        on_pack_flush(pack_id, &messages);
        Ok(())
    }

    fn parse_pes(&mut self, data: &[u8], stream_id: u8) -> Result<ParsedPes, GbError> {
        if data.len() < 9 {
            return Err(GbError::PsMedia("truncated PES header".into()));
        }
        let pes_len = BigEndian::read_u16(&data[4..6]) as usize;
        let flags = data[7];
        let header_data_len = data[8] as usize;
        let payload_start = 9 + header_data_len;
        if payload_start > data.len() {
            return Err(GbError::PsMedia("PES header longer than buffer".into()));
        }

        let has_pts = flags & 0x80 != 0;
        let has_dts = flags & 0x40 != 0;
        let mut pts = 0i64;
        let mut dts = 0i64;
        if has_pts && 9 + 5 <= data.len() {
            pts = read_33bit_ts(&data[9..14]);
        }
        if has_dts && 9 + 10 <= data.len() {
            dts = read_33bit_ts(&data[14..19]);
        } else if has_pts {
            dts = pts;
        }
        if dts == 0 {
            dts = self.last_dts; // sticky timing: inherit last message's DTS
        }
        self.last_dts = dts;

        let payload_end = if pes_len > 0 && 6 + pes_len <= data.len() {
            6 + pes_len
        } else {
            data.len()
        };
        let payload = data.get(payload_start..payload_end).unwrap_or(&[]).to_vec();
        let consumed = payload_end.max(payload_start);

        let is_video = (0xE0..=0xEF).contains(&stream_id);
        let is_audio = (0xC0..=0xDF).contains(&stream_id);
        let message = if is_video || is_audio {
            Some(TsMessage {
                is_video,
                stream_id,
                dts,
                pts,
                payload,
            })
        } else {
            None
        };

        Ok(ParsedPes { consumed, message })
    }
}

struct ParsedPes {
    consumed: usize,
    message: Option<TsMessage>,
}

fn find_pack_start(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == PACK_START)
}

fn read_33bit_ts(b: &[u8]) -> i64 {
    let v = (i64::from(b[0] & 0x0E) << 29)
        | (i64::from(b[1]) << 22)
        | (i64::from(b[2] & 0xFE) << 14)
        | (i64::from(b[3]) << 7)
        | i64::from(b[4] >> 1);
    v
}
