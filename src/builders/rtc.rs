//! WebRTC RTP → FLV-tag frame builder (spec §4.3 "RTC-to-RTMP").
//!
//! By the time an `RtpPacket` reaches this builder, FU-A fragments have
//! already been stripped of their FU indicator/header bytes and carry the
//! reconstructed original `nalu_type`; this builder's job is cache-backed
//! reassembly and FLV framing, not RFC 6184 bit-level fragment parsing.

use crate::builders::flv::{self, AvcPacketType, FrameType};
use crate::media::{MediaPacket, PacketKind};
use crate::rtp::cache::VideoPacketCache;
use crate::rtp::frame_detector::{FrameDetector, FrameError, check_frame_complete};
use crate::rtp::packet::{PayloadType, RtpPacket};

const NALU_SPS: u8 = 7;
const NALU_PPS: u8 = 8;
const NALU_IDR: u8 = 5;

/// Per-SSRC depacketizer + frame builder. Owns the reorder cache and
/// boundary detector for one video track.
pub struct RtcFrameBuilder {
    cache: VideoPacketCache,
    detector: FrameDetector,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    stream_id: u32,
    in_progress_fu: Option<Vec<u8>>,
}

impl RtcFrameBuilder {
    #[must_use]
    pub fn new(stream_id: u32, cache_capacity: usize) -> Self {
        Self {
            cache: VideoPacketCache::new(cache_capacity),
            detector: FrameDetector::new(),
            sps: None,
            pps: None,
            stream_id,
            in_progress_fu: None,
        }
    }

    /// Feeds one RTP packet; returns zero or more ready `MediaPacket`s (a
    /// sequence header, a frame, or both). Fails if the boundary walk
    /// overflows the reorder cache (spec §4.2) instead of spinning forever
    /// waiting for "ready".
    pub fn push_rtp(&mut self, pkt: RtpPacket) -> Result<Vec<MediaPacket>, FrameError> {
        // Empty-payload policy: header-only RAW/FU-A packets are dropped,
        // never forwarded as frames.
        if pkt.payload.is_empty() && !matches!(pkt.kind, PayloadType::StapA) {
            return Ok(Vec::new());
        }

        let seq = pkt.seq;
        let ts = pkt.timestamp;
        let is_keyframe_marker = pkt.nalu_type == NALU_SPS || pkt.nalu_type == NALU_IDR;
        self.cache.store_packet(pkt);

        if is_keyframe_marker {
            self.detector.on_keyframe_start(seq, ts);
        }

        let result = self.detector.detect_frame(seq, &self.cache)?;
        let Some(end) = result.end else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        if result.ready && check_frame_complete(&self.cache, result.start, end) {
            out = self.emit_frame(result.start, end, ts);
        }
        self.detector.detect_next_frame(end.wrapping_add(1), &self.cache)?;
        Ok(out)
    }

    fn emit_frame(&mut self, start: u16, end: u16, ts: u32) -> Vec<MediaPacket> {
        let mut nalus: Vec<Vec<u8>> = Vec::new();
        let mut sps_pps_changed = false;
        let mut saw_idr = false;
        let mut seq = start;

        loop {
            if let Some(pkt) = self.cache.take_packet(seq) {
                match pkt.kind {
                    PayloadType::Raw => match pkt.nalu_type {
                        NALU_SPS => {
                            if self.sps.as_deref() != Some(pkt.payload.as_slice()) {
                                self.sps = Some(pkt.payload);
                                sps_pps_changed = true;
                            }
                        }
                        NALU_PPS => {
                            if self.pps.as_deref() != Some(pkt.payload.as_slice()) {
                                self.pps = Some(pkt.payload);
                                sps_pps_changed = true;
                            }
                        }
                        nalu_type => {
                            saw_idr |= nalu_type == NALU_IDR;
                            nalus.push(pkt.payload);
                        }
                    },
                    PayloadType::StapA => {
                        for (nalu_type, nalu_payload) in split_stap_a(&pkt.payload) {
                            match nalu_type {
                                NALU_SPS => {
                                    if self.sps.as_deref() != Some(nalu_payload.as_slice()) {
                                        self.sps = Some(nalu_payload);
                                        sps_pps_changed = true;
                                    }
                                }
                                NALU_PPS => {
                                    if self.pps.as_deref() != Some(nalu_payload.as_slice()) {
                                        self.pps = Some(nalu_payload);
                                        sps_pps_changed = true;
                                    }
                                }
                                nalu_type => {
                                    saw_idr |= nalu_type == NALU_IDR;
                                    nalus.push(nalu_payload);
                                }
                            }
                        }
                    }
                    PayloadType::FuAV1 | PayloadType::FuAV2 => {
                        if pkt.fu_start {
                            self.in_progress_fu = Some(pkt.payload);
                        } else if let Some(buf) = self.in_progress_fu.as_mut() {
                            buf.extend_from_slice(&pkt.payload);
                        }
                        if pkt.fu_end {
                            saw_idr |= pkt.nalu_type == NALU_IDR;
                            if let Some(buf) = self.in_progress_fu.take() {
                                nalus.push(buf);
                            }
                        }
                    }
                }
            }
            if seq == end {
                break;
            }
            seq = seq.wrapping_add(1);
        }

        let mut out = Vec::new();
        let ts_ms = ts / 90;

        if sps_pps_changed {
            if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                let body = build_avc_sequence_header_tag(sps, pps);
                out.push(
                    MediaPacket::wrap(body, self.stream_id, PacketKind::Video, ts_ms)
                        .sequence_header(),
                );
            }
        }

        if !nalus.is_empty() {
            let refs: Vec<&[u8]> = nalus.iter().map(Vec::as_slice).collect();
            let frame_type = if saw_idr { FrameType::Key } else { FrameType::Inter };
            let tag = flv::write_avc_video_tag(frame_type, AvcPacketType::Nalu, 0, &refs);
            out.push(MediaPacket::wrap(tag, self.stream_id, PacketKind::Video, ts_ms));
        }

        out
    }
}

/// Splits a STAP-A aggregate (RFC 6184 §5.7.1) into its inner NALUs: a
/// 1-byte aggregate header octet followed by a repeating
/// `[u16 length][length bytes of NALU]` sequence. Each inner NALU carries
/// its own 1-byte NAL header; `nalu_type` is pulled from its low 5 bits and
/// stripped, so the returned payload matches the convention `RtpPacket`
/// already uses for a standalone `Raw` NALU (type carried separately from
/// the payload bytes). Stops at the first truncated or zero-length entry.
fn split_stap_a(payload: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    if payload.is_empty() {
        return out;
    }
    let mut pos = 1usize;
    while pos + 2 <= payload.len() {
        let len = usize::from(u16::from_be_bytes([payload[pos], payload[pos + 1]]));
        pos += 2;
        if len == 0 || pos + len > payload.len() {
            break;
        }
        let nalu = &payload[pos..pos + len];
        pos += len;
        let Some((&header, body)) = nalu.split_first() else {
            continue;
        };
        out.push((header & 0x1F, body.to_vec()));
    }
    out
}

/// Minimal `avcC` (AVCDecoderConfigurationRecord) wrapped in its FLV tag.
fn build_avc_sequence_header_tag(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut record = vec![
        1,                                       // configurationVersion
        sps.first().copied().unwrap_or(0x42),    // profile_idc
        sps.get(1).copied().unwrap_or(0),        // profile_compat
        sps.get(2).copied().unwrap_or(0x1E),     // level_idc
        0xFF,                                    // reserved(6) + lengthSizeMinusOne(2) = 3
        0xE1,                                    // reserved(3) + numOfSps(5) = 1
    ];
    record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    record.extend_from_slice(sps);
    record.push(1); // numOfPps
    record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    record.extend_from_slice(pps);

    let tag_header = flv::write_avc_video_tag(FrameType::Key, AvcPacketType::SequenceHeader, 0, &[]);
    let mut out = tag_header;
    out.extend_from_slice(&record);
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn raw(seq: u16, ts: u32, marker: bool, nalu_type: u8, payload: Vec<u8>) -> RtpPacket {
        RtpPacket {
            seq,
            timestamp: ts,
            ssrc: 1,
            marker,
            payload_type_id: 96,
            kind: PayloadType::Raw,
            nalu_type,
            payload,
            fu_start: false,
            fu_end: false,
        }
    }

    fn fua(seq: u16, ts: u32, marker: bool, nalu_type: u8, start: bool, end: bool, payload: Vec<u8>) -> RtpPacket {
        RtpPacket {
            seq,
            timestamp: ts,
            ssrc: 1,
            marker,
            payload_type_id: 96,
            kind: PayloadType::FuAV1,
            nalu_type,
            payload,
            fu_start: start,
            fu_end: end,
        }
    }

    /// Builds a STAP-A packet (RFC 6184 §5.7.1) aggregating `nalus`, each a
    /// `(nal_header_byte, body)` pair where the header byte's low 5 bits
    /// carry the NALU type.
    fn stap_a(seq: u16, ts: u32, marker: bool, nalus: &[(u8, &[u8])]) -> RtpPacket {
        let mut payload = vec![0x78]; // STAP-A aggregate header octet (NRI=3, type=24)
        for (header, body) in nalus {
            let mut nalu = vec![*header];
            nalu.extend_from_slice(body);
            payload.extend_from_slice(&(nalu.len() as u16).to_be_bytes());
            payload.extend_from_slice(&nalu);
        }
        RtpPacket {
            seq,
            timestamp: ts,
            ssrc: 1,
            marker,
            payload_type_id: 96,
            kind: PayloadType::StapA,
            nalu_type: 24,
            payload,
            fu_start: false,
            fu_end: false,
        }
    }

    #[test]
    fn publish_one_keyframe_emits_sequence_header_then_frame() {
        let mut b = RtcFrameBuilder::new(1, 512);

        let mut out = b.push_rtp(raw(1, 1000, false, NALU_SPS, vec![0x42, 0, 0x1E])).unwrap();
        assert!(out.is_empty());
        out = b.push_rtp(raw(2, 1000, false, NALU_PPS, vec![0xCE, 0x3C])).unwrap();
        assert!(out.is_empty());
        out = b.push_rtp(raw(3, 1000, true, NALU_IDR, vec![1, 2, 3, 4])).unwrap();

        assert_eq!(out.len(), 2);
        assert!(out[0].is_sequence_header);
        assert!(!out[1].is_sequence_header);
    }

    #[test]
    fn fua_reassembly_produces_single_nalu() {
        let mut b = RtcFrameBuilder::new(1, 512);
        let mut out = b.push_rtp(fua(1, 2000, false, NALU_IDR, true, false, vec![1, 2])).unwrap();
        assert!(out.is_empty());
        out = b.push_rtp(fua(2, 2000, true, NALU_IDR, false, true, vec![3, 4])).unwrap();
        assert_eq!(out.len(), 1);
        let nalus = flv::split_length_prefixed_nalus(out[0].payload(), 5);
        assert_eq!(nalus[0], vec![1, 2, 3, 4]);
    }

    #[test]
    fn header_only_packet_is_dropped_not_forwarded() {
        let mut b = RtcFrameBuilder::new(1, 512);
        let out = b.push_rtp(raw(1, 3000, true, NALU_IDR, vec![])).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn stap_a_deaggregates_sps_pps_idr_into_one_keyframe() {
        let mut b = RtcFrameBuilder::new(1, 512);

        let sps_header = 0x67; // nal_ref_idc=3, type=7 (SPS)
        let pps_header = 0x68; // nal_ref_idc=3, type=8 (PPS)
        let idr_header = 0x65; // nal_ref_idc=3, type=5 (IDR)
        let pkt = stap_a(
            1,
            1000,
            true,
            &[
                (sps_header, &[0x42, 0, 0x1E]),
                (pps_header, &[0xCE, 0x3C]),
                (idr_header, &[1, 2, 3, 4]),
            ],
        );

        let out = b.push_rtp(pkt).unwrap();

        assert_eq!(out.len(), 2);
        assert!(out[0].is_sequence_header);
        assert!(!out[1].is_sequence_header);
        let nalus = flv::split_length_prefixed_nalus(out[1].payload(), 5);
        assert_eq!(nalus[0], vec![1, 2, 3, 4]);
    }

    #[test]
    fn split_stap_a_strips_nal_header_byte_from_each_inner_nalu() {
        let items = split_stap_a(&stap_a(1, 0, false, &[(0x67, &[0xAA, 0xBB])]).payload);
        assert_eq!(items, vec![(7u8, vec![0xAA, 0xBB])]);
    }
}
