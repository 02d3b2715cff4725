use std::fmt;

use crate::rtp::cache::VideoPacketCache;

/// Failures from walking the cache forward to find an access-unit boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The walk consumed the whole cache without a marker bit or timestamp
    /// change resolving the boundary — a hard failure, not "not ready yet".
    CacheOverflow,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheOverflow => write!(f, "frame detector cache overflow"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Result of walking the cache forward from a candidate frame start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostSn {
    /// A complete access unit was found; carries its last seq.
    Complete(u16),
    /// The walk hit an empty slot; carries the missing seq (NACK candidate).
    Missing(u16),
    /// No marker and no timestamp change within `capacity - 1` slots.
    Overflow,
}

/// Result handed back by `FrameDetector::detect_frame`.
#[derive(Debug, Clone, Copy)]
pub struct DetectResult {
    pub start: u16,
    pub end: Option<u16>,
    pub ready: bool,
}

/// `true` if `a` precedes `b` in RTP sequence-number space, accounting for
/// 16-bit wraparound (the usual "serial number arithmetic" comparison).
#[must_use]
fn seq_lt(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// Walks cache slots starting at `start_seq`, applying the completion rules
/// in order: (a) marker bit set → end of access unit; (b) timestamp differs
/// from `key_ts` → the frame ended at the previous slot. Neither rule firing
/// within `capacity - 1` steps is reported as overflow.
#[must_use]
pub fn find_next_lost_sn(cache: &VideoPacketCache, start_seq: u16, key_ts: u32) -> LostSn {
    let steps = (cache.capacity() as u16).saturating_sub(1).max(1);
    let mut seq = start_seq;
    for _ in 0..steps {
        match cache.get_packet(seq) {
            None => return LostSn::Missing(seq),
            Some(pkt) => {
                if pkt.marker {
                    return LostSn::Complete(seq);
                }
                if pkt.timestamp != key_ts {
                    return LostSn::Complete(seq.wrapping_sub(1));
                }
            }
        }
        seq = seq.wrapping_add(1);
    }
    LostSn::Overflow
}

/// `true` iff, over the closed interval `[start_seq, end_seq]`, the count of
/// FU-A start fragments equals the count of FU-A end fragments.
/// Non-fragmented packets contribute 0 to both counts. Invalid ranges
/// (`end_seq` precedes `start_seq` modulo wrap) return `false` without
/// asserting.
#[must_use]
pub fn check_frame_complete(cache: &VideoPacketCache, start_seq: u16, end_seq: u16) -> bool {
    if (end_seq.wrapping_sub(start_seq) as i16) < 0 {
        return false;
    }

    let mut starts = 0u32;
    let mut ends = 0u32;
    let mut seq = start_seq;
    loop {
        if let Some(pkt) = cache.get_packet(seq) {
            if pkt.is_fu_fragment() {
                if pkt.fu_start {
                    starts += 1;
                }
                if pkt.fu_end {
                    ends += 1;
                }
            }
        }
        if seq == end_seq {
            break;
        }
        seq = seq.wrapping_add(1);
    }
    starts == ends
}

/// Per-SSRC access-unit boundary tracker.
///
/// `key_frame_ts = None` means "no active keyframe group" (spec's `-1`
/// sentinel).
pub struct FrameDetector {
    header_sn: u16,
    lost_sn: u16,
    key_frame_ts: Option<u32>,
}

impl Default for FrameDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDetector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            header_sn: 0,
            lost_sn: 0,
            key_frame_ts: None,
        }
    }

    #[must_use]
    pub fn header_sn(&self) -> u16 {
        self.header_sn
    }

    #[must_use]
    pub fn key_frame_ts(&self) -> Option<u32> {
        self.key_frame_ts
    }

    /// Idempotent for the same RTP timestamp; on a new timestamp resets the
    /// whole tracking triple, discarding any previously accumulated
    /// lower-timestamp packets (the keyframe recovery rule: a fresh IDR
    /// always wins).
    pub fn on_keyframe_start(&mut self, pkt_seq: u16, pkt_timestamp: u32) {
        if self.key_frame_ts != Some(pkt_timestamp) {
            self.header_sn = pkt_seq;
            self.lost_sn = pkt_seq.wrapping_add(1);
            self.key_frame_ts = Some(pkt_timestamp);
        }
    }

    /// Clears the active keyframe timestamp while preserving `header_sn`.
    pub fn on_keyframe_detached(&mut self) {
        self.key_frame_ts = None;
    }

    /// The packet at `seq` has arrived. Returns the frame range if complete.
    /// Cache overflow (no marker, no timestamp change within the whole
    /// cache) is a hard failure, not a "not ready yet" result.
    pub fn detect_frame(
        &mut self,
        seq: u16,
        cache: &VideoPacketCache,
    ) -> Result<DetectResult, FrameError> {
        if seq_lt(seq, self.header_sn) {
            self.header_sn = seq;
        }
        let key_ts = self.key_frame_ts.unwrap_or(0);
        match find_next_lost_sn(cache, self.header_sn, key_ts) {
            LostSn::Complete(end) => Ok(DetectResult {
                start: self.header_sn,
                end: Some(end),
                ready: true,
            }),
            LostSn::Missing(lost) => {
                self.lost_sn = lost;
                Ok(DetectResult {
                    start: self.header_sn,
                    end: None,
                    ready: false,
                })
            }
            LostSn::Overflow => Err(FrameError::CacheOverflow),
        }
    }

    /// Forces `header_sn = from_seq` then repeats `detect_frame`'s walk.
    pub fn detect_next_frame(
        &mut self,
        from_seq: u16,
        cache: &VideoPacketCache,
    ) -> Result<DetectResult, FrameError> {
        self.header_sn = from_seq;
        self.detect_frame(from_seq, cache)
    }

    #[must_use]
    pub fn is_lost_sn(&self, seq: u16) -> bool {
        seq == self.lost_sn
    }
}
