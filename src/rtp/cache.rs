use crate::rtp::packet::RtpPacket;

/// Fixed-size ring cache of in-flight RTP packets for one SSRC, indexed by
/// `seq % capacity`. A slot holds at most one packet, and holds a packet iff
/// its stored sequence number matches the slot index under the modulus —
/// the cache never needs to scan to know whether a slot is stale.
pub struct VideoPacketCache {
    slots: Vec<Option<RtpPacket>>,
    capacity: u32,
}

impl VideoPacketCache {
    /// `capacity` should be ≥ 512 per spec; smaller values are accepted for
    /// tests but make wraparound collisions more likely in real traffic.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity: capacity as u32,
        }
    }

    fn index(&self, seq: u16) -> usize {
        (u32::from(seq) % self.capacity) as usize
    }

    /// Places `pkt` at slot `pkt.seq % N`, releasing any previous occupant.
    pub fn store_packet(&mut self, pkt: RtpPacket) {
        let idx = self.index(pkt.seq);
        self.slots[idx] = Some(pkt);
    }

    /// Returns the slot's packet if its stored seq matches `seq`.
    #[must_use]
    pub fn get_packet(&self, seq: u16) -> Option<&RtpPacket> {
        let idx = self.index(seq);
        self.slots[idx].as_ref().filter(|p| p.seq == seq)
    }

    /// Same as `get_packet`, but also vacates the slot.
    pub fn take_packet(&mut self, seq: u16) -> Option<RtpPacket> {
        let idx = self.index(seq);
        if self.slots[idx].as_ref().is_some_and(|p| p.seq == seq) {
            self.slots[idx].take()
        } else {
            None
        }
    }

    /// Releases every slot.
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(seq: u16, ts: u32) -> RtpPacket {
        use crate::rtp::packet::PayloadType;
        RtpPacket {
            seq,
            timestamp: ts,
            ssrc: 7,
            marker: false,
            payload_type_id: 96,
            kind: PayloadType::Raw,
            nalu_type: 1,
            payload: vec![],
            fu_start: false,
            fu_end: false,
        }
    }

    #[test]
    fn store_then_get_round_trips() {
        let mut cache = VideoPacketCache::new(16);
        cache.store_packet(pkt(5, 1000));
        assert_eq!(cache.get_packet(5).map(|p| p.seq), Some(5));
    }

    #[test]
    fn overwrite_releases_old_occupant() {
        let mut cache = VideoPacketCache::new(16);
        cache.store_packet(pkt(5, 1000));
        cache.store_packet(pkt(21, 2000)); // same slot (5 % 16 == 21 % 16)
        assert!(cache.get_packet(5).is_none());
        assert_eq!(cache.get_packet(21).map(|p| p.timestamp), Some(2000));
    }

    #[test]
    fn take_packet_vacates_slot() {
        let mut cache = VideoPacketCache::new(16);
        cache.store_packet(pkt(3, 1000));
        let taken = cache.take_packet(3);
        assert!(taken.is_some());
        assert!(cache.get_packet(3).is_none());
        assert!(cache.take_packet(3).is_none());
    }

    #[test]
    fn take_missing_slot_returns_none_not_error() {
        let mut cache = VideoPacketCache::new(16);
        assert!(cache.take_packet(999).is_none());
    }

    #[test]
    fn clear_all_releases_every_slot() {
        let mut cache = VideoPacketCache::new(8);
        for s in 0..8 {
            cache.store_packet(pkt(s, u32::from(s)));
        }
        cache.clear_all();
        for s in 0..8 {
            assert!(cache.get_packet(s).is_none());
        }
    }
}
