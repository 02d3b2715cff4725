//! SRT MPEG-TS PES → FLV-tag frame builder (spec §4.3 "SRT-to-RTMP").

use crate::builders::flv::{self, AvcPacketType, FrameType};
use crate::media::{MediaPacket, PacketKind};

const NALU_SEI: u8 = 6;
const NALU_AUD: u8 = 9;
const NALU_SPS: u8 = 7;
const NALU_PPS: u8 = 8;
const NALU_IDR: u8 = 5;

/// Splits an AnnexB byte stream on `00 00 00 01` / `00 00 01` start codes.
#[must_use]
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i..i + 3] == [0, 0, 1] {
            let code_len = if i > 0 && data[i - 1] == 0 { 4 } else { 3 };
            starts.push((i + 3, code_len));
            i += 3;
        } else {
            i += 1;
        }
    }
    let mut out = Vec::new();
    for (idx, &(start, _)) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).map_or(data.len(), |&(s, len)| s - len);
        if start < end {
            out.push(&data[start..end]);
        }
    }
    out
}

/// Per-SSRC-equivalent video builder: tracks SPS/PPS across PES messages.
pub struct SrtVideoBuilder {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    stream_id: u32,
}

impl SrtVideoBuilder {
    #[must_use]
    pub fn new(stream_id: u32) -> Self {
        Self {
            sps: None,
            pps: None,
            stream_id,
        }
    }

    /// `dts`/`pts` are 90 kHz PES timestamps; FLV ts = dts/90, cts = (pts-dts)/90.
    pub fn push_pes(&mut self, dts: i64, pts: i64, payload: &[u8]) -> Vec<MediaPacket> {
        let mut nalus: Vec<Vec<u8>> = Vec::new();
        let mut sps_pps_changed = false;
        let mut saw_idr = false;

        for nalu in split_annexb(payload) {
            let Some(&first) = nalu.first() else { continue };
            let nalu_type = first & 0x1F;
            match nalu_type {
                NALU_SEI | NALU_AUD => continue,
                NALU_SPS => {
                    if self.sps.as_deref() != Some(nalu) {
                        self.sps = Some(nalu.to_vec());
                        sps_pps_changed = true;
                    }
                }
                NALU_PPS => {
                    if self.pps.as_deref() != Some(nalu) {
                        self.pps = Some(nalu.to_vec());
                        sps_pps_changed = true;
                    }
                }
                t => {
                    saw_idr |= t == NALU_IDR;
                    nalus.push(nalu.to_vec());
                }
            }
        }

        let mut out = Vec::new();
        let ts_ms = (dts / 90) as u32;
        let cts_ms = ((pts - dts) / 90) as i32;

        if sps_pps_changed {
            if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                out.push(
                    MediaPacket::wrap(
                        build_avc_sequence_header_tag(sps, pps),
                        self.stream_id,
                        PacketKind::Video,
                        ts_ms,
                    )
                    .sequence_header(),
                );
            }
        }

        if !nalus.is_empty() {
            let refs: Vec<&[u8]> = nalus.iter().map(Vec::as_slice).collect();
            let frame_type = if saw_idr { FrameType::Key } else { FrameType::Inter };
            let tag = flv::write_avc_video_tag(frame_type, AvcPacketType::Nalu, cts_ms, &refs);
            out.push(MediaPacket::wrap(tag, self.stream_id, PacketKind::Video, ts_ms));
        }

        out
    }
}

fn build_avc_sequence_header_tag(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut record = vec![
        1,
        sps.first().copied().unwrap_or(0x42),
        sps.get(1).copied().unwrap_or(0),
        sps.get(2).copied().unwrap_or(0x1E),
        0xFF,
        0xE1,
    ];
    record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    record.extend_from_slice(sps);
    record.push(1);
    record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    record.extend_from_slice(pps);

    let mut out = flv::write_avc_video_tag(FrameType::Key, AvcPacketType::SequenceHeader, 0, &[]);
    out.extend_from_slice(&record);
    out
}

/// ADTS header fields needed to build an AAC `AudioSpecificConfig`.
struct AdtsHeader {
    profile_object_type: u8,
    sampling_freq_index: u8,
    channel_config: u8,
    header_len: usize,
}

fn parse_adts_header(data: &[u8]) -> Option<AdtsHeader> {
    if data.len() < 7 || data[0] != 0xFF || (data[1] & 0xF0) != 0xF0 {
        return None;
    }
    let has_crc = data[1] & 0x01 == 0; // protection_absent == 0 means CRC present
    let profile_object_type = ((data[2] >> 6) & 0x03) + 1;
    let sampling_freq_index = (data[2] >> 2) & 0x0F;
    let channel_config = ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03);
    Some(AdtsHeader {
        profile_object_type,
        sampling_freq_index,
        channel_config,
        header_len: if has_crc { 9 } else { 7 },
    })
}

/// Per-track audio builder: emits one AAC sequence header, then raw payloads.
pub struct SrtAudioBuilder {
    stream_id: u32,
    sequence_header_sent: bool,
}

impl SrtAudioBuilder {
    #[must_use]
    pub fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            sequence_header_sent: false,
        }
    }

    pub fn push_adts(&mut self, dts: i64, frame: &[u8]) -> Vec<MediaPacket> {
        let Some(hdr) = parse_adts_header(frame) else {
            return Vec::new();
        };
        if hdr.header_len > frame.len() {
            return Vec::new();
        }
        let ts_ms = (dts / 90) as u32;
        let mut out = Vec::new();

        if !self.sequence_header_sent {
            let asc = audio_specific_config(&hdr);
            out.push(
                MediaPacket::wrap(
                    flv::write_aac_audio_tag(0, &asc),
                    self.stream_id,
                    PacketKind::Audio,
                    ts_ms,
                )
                .sequence_header(),
            );
            self.sequence_header_sent = true;
        }

        let raw = &frame[hdr.header_len..];
        out.push(MediaPacket::wrap(
            flv::write_aac_audio_tag(1, raw),
            self.stream_id,
            PacketKind::Audio,
            ts_ms,
        ));
        out
    }
}

fn audio_specific_config(hdr: &AdtsHeader) -> [u8; 2] {
    let b0 = (hdr.profile_object_type << 3) | (hdr.sampling_freq_index >> 1);
    let b1 = ((hdr.sampling_freq_index & 0x01) << 7) | (hdr.channel_config << 3);
    [b0, b1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annexb_nalu(nalu_type: u8, rest: &[u8]) -> Vec<u8> {
        let mut v = vec![0, 0, 0, 1, nalu_type];
        v.extend_from_slice(rest);
        v
    }

    #[test]
    fn splits_multiple_annexb_nalus() {
        let mut stream = annexb_nalu(7, &[1, 2, 3]);
        stream.extend_from_slice(&annexb_nalu(8, &[4, 5]));
        let nalus = split_annexb(&stream);
        assert_eq!(nalus.len(), 2);
        assert_eq!(nalus[0], &[7, 1, 2, 3]);
        assert_eq!(nalus[1], &[8, 4, 5]);
    }

    #[test]
    fn keyframe_pes_emits_sequence_header_then_frame() {
        let mut b = SrtVideoBuilder::new(1);
        let mut stream = annexb_nalu(NALU_SPS, &[0x42, 0, 0x1E]);
        stream.extend_from_slice(&annexb_nalu(NALU_PPS, &[0xCE]));
        stream.extend_from_slice(&annexb_nalu(NALU_IDR, &[1, 2, 3]));

        let out = b.push_pes(0, 0, &stream);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_sequence_header);
        assert!(!out[1].is_sequence_header);
    }

    #[test]
    fn sei_and_aud_are_dropped() {
        let mut b = SrtVideoBuilder::new(1);
        let mut stream = annexb_nalu(NALU_AUD, &[0]);
        stream.extend_from_slice(&annexb_nalu(NALU_SEI, &[1, 2]));
        stream.extend_from_slice(&annexb_nalu(1, &[9, 9]));

        let out = b.push_pes(900, 900, &stream);
        assert_eq!(out.len(), 1);
        let nalus = flv::split_length_prefixed_nalus(out[0].payload(), 5);
        assert_eq!(nalus, vec![vec![1, 9, 9]]);
    }

    #[test]
    fn cts_reflects_pts_minus_dts() {
        let mut b = SrtVideoBuilder::new(1);
        let stream = annexb_nalu(1, &[1]);
        let out = b.push_pes(0, 9000, &stream);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp_ms, 0);
    }

    #[test]
    fn adts_first_frame_emits_sequence_header() {
        let mut b = SrtAudioBuilder::new(2);
        // AAC-LC, 44100 Hz (index 4), stereo.
        let adts = [0xFF, 0xF1, (1 << 6) | (4 << 2) | (1 >> 2), (1 << 6), 0, 0, 0, 0xAA, 0xBB];
        let out = b.push_adts(0, &adts);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_sequence_header);
        assert_eq!(out[1].payload()[2..], [0xAA, 0xBB]);
    }
}
