use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::RtmpError;
use crate::media::MediaPacket;

/// Process-wide mutual exclusion across protocols: before any publisher
/// (RTMP, WebRTC, SRT, GB28181) may bind to a `LiveSource`, it must acquire
/// this token for the stream URL. Acquisition is a single lock-guarded
/// hashset check — it never suspends.
#[derive(Default)]
pub struct StreamPublishToken {
    held: Mutex<HashSet<String>>,
}

impl StreamPublishToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `RtmpError::StreamBusy` if the URL already has a publisher.
    pub fn acquire(&self, stream_url: &str) -> Result<(), RtmpError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.contains(stream_url) {
            return Err(RtmpError::StreamBusy(stream_url.to_string()));
        }
        held.insert(stream_url.to_string());
        Ok(())
    }

    pub fn release(&self, stream_url: &str) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(stream_url);
    }

    #[must_use]
    pub fn is_held(&self, stream_url: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(stream_url)
    }
}

struct Consumer {
    id: u64,
    tx: mpsc::Sender<MediaPacket>,
}

/// Capability interface for a cross-protocol mirror (§9 "capability
/// interfaces"): a `LiveSource` optionally owns one, started on publish and
/// freed on unpublish, fed every distributed frame exactly once. Used to
/// bridge e.g. an RTMP publish into a parallel WebRTC or SRT egress path
/// without `LiveSource` itself knowing anything about those protocols.
pub trait CrossProtocolBridge: Send {
    fn start(&mut self, stream_url: &str);
    fn push_frame(&mut self, pkt: &MediaPacket);
    fn stop(&mut self);
}

/// Publisher-to-consumer fan-out for one stream URL, with a small GOP cache
/// replayed to newly attached consumers.
pub struct LiveSource {
    pub stream_url: String,
    pub source_id: u64,
    pub pre_source_id: u64,
    can_publish: bool,
    next_consumer_id: u64,
    consumers: Vec<Consumer>,
    gop_cache: VecDeque<MediaPacket>,
    gop_cache_cap: usize,
    stream_die_at: Option<Instant>,
    bridge: Option<Box<dyn CrossProtocolBridge>>,
}

impl LiveSource {
    #[must_use]
    pub fn new(stream_url: impl Into<String>, source_id: u64, gop_cache_cap: usize) -> Self {
        Self {
            stream_url: stream_url.into(),
            source_id,
            pre_source_id: source_id,
            can_publish: true,
            next_consumer_id: 0,
            consumers: Vec::new(),
            gop_cache: VecDeque::new(),
            gop_cache_cap,
            stream_die_at: None,
            bridge: None,
        }
    }

    #[must_use]
    pub fn can_publish(&self) -> bool {
        self.can_publish
    }

    /// Registers a cross-protocol bridge to start on the next `on_publish`
    /// (or `on_edge_start_publish`) and free on the next `on_unpublish`.
    /// Replaces any bridge already pending or running.
    pub fn set_bridge(&mut self, bridge: Box<dyn CrossProtocolBridge>) {
        self.bridge = Some(bridge);
    }

    #[must_use]
    pub fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn on_publish(&mut self) {
        self.can_publish = false;
        self.stream_die_at = None;
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.start(&self.stream_url);
        }
    }

    /// Edge-mode equivalent of `on_publish` (§4.5): a pulled upstream
    /// publish also optionally starts the bridge.
    pub fn on_edge_start_publish(&mut self) {
        self.on_publish();
    }

    pub fn on_unpublish(&mut self) {
        self.can_publish = true;
        self.gop_cache.clear();
        if let Some(mut bridge) = self.bridge.take() {
            bridge.stop();
        }
        if self.consumers.is_empty() {
            self.stream_die_at = Some(Instant::now());
        }
    }

    /// Allocates a consumer bound to this source; resets `stream_die_at`.
    #[must_use]
    pub fn create_consumer(&mut self) -> (u64, mpsc::Receiver<MediaPacket>) {
        let id = self.next_consumer_id;
        self.next_consumer_id += 1;
        let (tx, rx) = mpsc::channel();
        self.consumers.push(Consumer { id, tx });
        self.stream_die_at = None;
        (id, rx)
    }

    /// Replays the GOP cache into the given consumer's queue. No-op if the
    /// consumer id is unknown or the cache is empty.
    pub fn consumer_dumps(&self, consumer_id: u64) {
        if let Some(c) = self.consumers.iter().find(|c| c.id == consumer_id) {
            for pkt in &self.gop_cache {
                let _ = c.tx.send(pkt.clone());
            }
        }
    }

    pub fn on_consumer_destroy(&mut self, consumer_id: u64) {
        self.consumers.retain(|c| c.id != consumer_id);
        if self.consumers.is_empty() && self.can_publish {
            self.stream_die_at = Some(Instant::now());
        }
    }

    /// Distributes a packet to every consumer and retains it in the GOP
    /// cache (sequence headers and frames since the last keyframe).
    pub fn on_frame(&mut self, pkt: MediaPacket) {
        if self.gop_cache_cap > 0 {
            if pkt.is_video() && !pkt.is_sequence_header && self.is_keyframe_boundary(&pkt) {
                self.gop_cache.clear();
            }
            self.gop_cache.push_back(pkt.clone());
            while self.gop_cache.len() > self.gop_cache_cap {
                self.gop_cache.pop_front();
            }
        }
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.push_frame(&pkt);
        }
        for c in &self.consumers {
            let _ = c.tx.send(pkt.clone());
        }
    }

    fn is_keyframe_boundary(&self, pkt: &MediaPacket) -> bool {
        pkt.payload().first().is_some_and(|b| (b >> 4) == 1) // FLV frame_type 1 == key
    }

    #[must_use]
    pub fn stream_is_dead(&self, death_delay: Duration) -> bool {
        self.can_publish
            && self.consumers.is_empty()
            && self
                .stream_die_at
                .is_some_and(|t| t.elapsed() > death_delay)
    }
}

/// Keyed registry of `LiveSource`s. `fetch_or_create` is a single
/// lock-guarded hashmap operation: no I/O happens between "inserted" and
/// "attachable", so two concurrent fetchers for the same URL can never
/// observe or create a duplicate.
#[derive(Default)]
pub struct LiveSourcePool {
    sources: Mutex<HashMap<String, Arc<Mutex<LiveSource>>>>,
    next_id: Mutex<u64>,
}

impl LiveSourcePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fetch_or_create(&self, stream_url: &str, gop_cache_cap: usize) -> Arc<Mutex<LiveSource>> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources
            .entry(stream_url.to_string())
            .or_insert_with(|| {
                let mut id_guard = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
                let id = *id_guard;
                *id_guard += 1;
                Arc::new(Mutex::new(LiveSource::new(stream_url, id, gop_cache_cap)))
            })
            .clone()
    }

    pub fn remove_if_dead(&self, stream_url: &str, death_delay: Duration) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(src) = sources.get(stream_url) {
            let dead = src.lock().unwrap_or_else(|e| e.into_inner()).stream_is_dead(death_delay);
            if dead {
                sources.remove(stream_url);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PacketKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBridge {
        started: Arc<AtomicUsize>,
        frames: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    impl CrossProtocolBridge for CountingBridge {
        fn start(&mut self, _stream_url: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn push_frame(&mut self, _pkt: &MediaPacket) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
        fn stop(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn bridge_starts_on_publish_receives_each_frame_once_and_frees_on_unpublish() {
        let started = Arc::new(AtomicUsize::new(0));
        let frames = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));

        let mut src = LiveSource::new("live/s", 0, 16);
        src.set_bridge(Box::new(CountingBridge {
            started: started.clone(),
            frames: frames.clone(),
            stopped: stopped.clone(),
        }));
        assert!(src.has_bridge());

        src.on_publish();
        assert_eq!(started.load(Ordering::SeqCst), 1);

        src.on_frame(MediaPacket::wrap(vec![0x10], 1, PacketKind::Video, 0));
        src.on_frame(MediaPacket::wrap(vec![0x20], 1, PacketKind::Video, 1));
        assert_eq!(frames.load(Ordering::SeqCst), 2);

        src.on_unpublish();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(!src.has_bridge());

        // Unpublish already freed the bridge: further frames are not mirrored.
        src.on_frame(MediaPacket::wrap(vec![0x30], 1, PacketKind::Video, 2));
        assert_eq!(frames.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn single_publisher_invariant() {
        let token = StreamPublishToken::new();
        assert!(token.acquire("live/s").is_ok());
        assert!(matches!(
            token.acquire("live/s"),
            Err(RtmpError::StreamBusy(_))
        ));
        token.release("live/s");
        assert!(token.acquire("live/s").is_ok());
    }

    #[test]
    fn fetch_or_create_returns_same_instance_for_same_url() {
        let pool = LiveSourcePool::new();
        let a = pool.fetch_or_create("live/s", 16);
        let b = pool.fetch_or_create("live/s", 16);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_urls_get_different_sources() {
        let pool = LiveSourcePool::new();
        let a = pool.fetch_or_create("live/a", 16);
        let b = pool.fetch_or_create("live/b", 16);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn publish_clears_can_publish_unpublish_restores_it() {
        let mut src = LiveSource::new("live/s", 0, 16);
        assert!(src.can_publish());
        src.on_publish();
        assert!(!src.can_publish());
        src.on_unpublish();
        assert!(src.can_publish());
    }

    #[test]
    fn death_delay_keeps_source_alive_until_elapsed() {
        let mut src = LiveSource::new("live/s", 0, 16);
        src.on_publish();
        src.on_unpublish(); // sets stream_die_at (no consumers)
        assert!(!src.stream_is_dead(Duration::from_secs(3)));
        assert!(src.stream_is_dead(Duration::from_millis(0)));
    }

    #[test]
    fn consumer_destroy_on_empty_list_marks_for_cleanup() {
        let mut src = LiveSource::new("live/s", 0, 16);
        src.on_publish();
        let (id, _rx) = src.create_consumer();
        assert!(!src.stream_is_dead(Duration::from_millis(0)));
        src.on_consumer_destroy(id);
        src.on_unpublish();
        assert!(src.stream_is_dead(Duration::from_millis(0)));
    }

    #[test]
    fn consumer_dumps_replays_gop_cache() {
        let mut src = LiveSource::new("live/s", 0, 16);
        let (id, rx) = src.create_consumer();
        src.on_frame(MediaPacket::wrap(vec![0x10], 1, PacketKind::Video, 0));
        src.consumer_dumps(id);
        let received = rx.try_recv();
        assert!(received.is_ok());
    }
}
