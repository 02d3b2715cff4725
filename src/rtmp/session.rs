use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::edge::forwarder::{ForwardKind, Forwarder, OriginWriter};
use crate::error::{ControlCode, RtmpError, SessionError};
use crate::live::{LiveSource, LiveSourcePool, StreamPublishToken};
use crate::media::{MediaPacket, PacketKind};
use crate::rtmp::proto::Amf0Command;
use std::sync::{Arc, Mutex};

pub const DEFAULT_VHOST: &str = "__defaultVhost__";

/// Client classification from `identify_client` (§4.6 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Play,
    FmlePublish,
    FlashPublish,
    HaivisionPublish,
}

/// Classifies a publish/play command and resolves the stream name,
/// guessing it from the app name when the client left it empty (common
/// with FMLE-style single-path publishers).
#[must_use]
pub fn identify_client(command_name: &str, app: &str, stream: &str) -> (ClientRole, String) {
    let role = match command_name {
        "play" => ClientRole::Play,
        "FCPublish" | "publish" if app.contains("haivision") => ClientRole::HaivisionPublish,
        "FCPublish" => ClientRole::FmlePublish,
        _ => ClientRole::FlashPublish,
    };
    let resolved = if stream.is_empty() {
        app.to_string()
    } else {
        stream.to_string()
    };
    (role, resolved)
}

/// Resolves and validates the vhost a connection's `tcUrl` named.
///
/// # Errors
/// `RtmpError::VhostDisabled` if the named vhost exists but is turned off.
/// A vhost with no matching `[vhost_name]` section still resolves (the INI
/// config has no explicit vhost registry), falling back to
/// [`DEFAULT_VHOST`] only when `vhost_name` is empty.
pub fn resolve_vhost<'a>(cfg: &Config, vhost_name: &'a str) -> Result<&'a str, RtmpError> {
    let name = if vhost_name.is_empty() {
        DEFAULT_VHOST
    } else {
        vhost_name
    };
    if !cfg.vhost_enabled(name) {
        return Err(RtmpError::VhostDisabled(name.to_string()));
    }
    Ok(name)
}

/// Tracks publisher liveness against the vhost's `publish_1stpkt_timeout`
/// / `publish_normal_timeout` configuration (§4.6 "Publishing loop").
pub struct IdleGuard {
    started_at: Instant,
    last_msg_at: Option<Instant>,
}

impl IdleGuard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            last_msg_at: None,
        }
    }

    pub fn on_message(&mut self) {
        self.last_msg_at = Some(Instant::now());
    }

    /// # Errors
    /// Returns `SessionError::Control(ControlCode::KickoffForIdle)` once the
    /// applicable timeout (first-packet or steady-state) has elapsed.
    pub fn check(&self, cfg: &Config, vhost: &str) -> Result<(), SessionError> {
        let now = Instant::now();
        match self.last_msg_at {
            None => {
                let limit = Duration::from_millis(cfg.publish_1stpkt_timeout_ms(vhost));
                if now.duration_since(self.started_at) > limit {
                    return Err(SessionError::Control(ControlCode::KickoffForIdle));
                }
            }
            Some(last) => {
                let limit = Duration::from_millis(cfg.publish_normal_timeout_ms(vhost));
                if now.duration_since(last) > limit {
                    return Err(SessionError::Control(ControlCode::KickoffForIdle));
                }
            }
        }
        Ok(())
    }
}

impl Default for IdleGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// What the publishing loop should do with an inbound AMF0 command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Not a recognized unpublish signal; ignore and keep publishing.
    Ignored,
    /// `FCUnpublish`/`closeStream`: acknowledge then re-enter identify.
    Republish,
}

/// Classifies an inbound AMF0 command message received while publishing.
#[must_use]
pub fn classify_publish_command(cmd: &Amf0Command) -> CommandOutcome {
    match cmd.name.as_str() {
        "FCUnpublish" | "closeStream" | "unpublish" => CommandOutcome::Republish,
        _ => CommandOutcome::Ignored,
    }
}

/// Acquires the publish-exclusivity token and the `LiveSource` for
/// `stream_url` as one step, releasing the token again if source lookup
/// somehow fails (it never does today, but keeps the pair atomic in spirit).
///
/// # Errors
/// Propagates `RtmpError::StreamBusy` from the token if another publisher
/// already holds this stream.
pub fn acquire_for_publish(
    token: &StreamPublishToken,
    pool: &LiveSourcePool,
    stream_url: &str,
    gop_cache_cap: usize,
) -> Result<Arc<Mutex<LiveSource>>, RtmpError> {
    token.acquire(stream_url)?;
    let source = pool.fetch_or_create(stream_url, gop_cache_cap);
    source.lock().unwrap_or_else(|e| e.into_inner()).on_publish();
    Ok(source)
}

pub fn release_publish(token: &StreamPublishToken, source: &Arc<Mutex<LiveSource>>, stream_url: &str) {
    source.lock().unwrap_or_else(|e| e.into_inner()).on_unpublish();
    token.release(stream_url);
}

/// Pulls up to `max` queued packets without blocking (the "merged write"
/// batch, §4.6 "Playing loop"). Returns an empty vec if the consumer has
/// nothing buffered right now; the caller sleeps `mw_sleep` in that case.
pub fn drain_batch(rx: &Receiver<MediaPacket>, max: usize) -> Vec<MediaPacket> {
    let mut batch = Vec::with_capacity(max.min(32));
    while batch.len() < max {
        match rx.try_recv() {
            Ok(pkt) => batch.push(pkt),
            Err(_) => break,
        }
    }
    batch
}

/// Enforces a client-requested playback duration limit, if any.
pub struct PlayDuration {
    limit: Option<Duration>,
    started_at: Instant,
}

impl PlayDuration {
    #[must_use]
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            limit,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn exceeded(&self) -> bool {
        self.limit
            .is_some_and(|l| self.started_at.elapsed() >= l)
    }
}

/// A caller-implemented seam for origin-cluster redirect (§4.6 "Redirect
/// behavior"). Resolving `/api/v1/clusters` is an HTTP-API concern outside
/// this crate's scope; this trait only defines the control-flow boundary.
pub trait ClusterLookup {
    /// Returns `Some((host, port))` of a better origin for `stream_url`, or
    /// `None` to keep serving locally.
    fn lookup(&self, vhost: &str, stream_url: &str) -> Option<(String, u16)>;
}

/// A caller-implemented seam for token-traverse edge auth (§4.6
/// "Token-traverse edge auth"): opens a throwaway RTMP connection per
/// configured origin and replays the `connect` command, authorizing the
/// client if any origin accepts.
pub trait TraverseAuth {
    fn authorize(&self, vhost: &str, stream_url: &str) -> bool;
}

/// What a publishing `RtmpSession` forwards frames to: a local fan-out
/// source, or (edge mode) a forwarder proxying to the upstream origin.
pub enum PublishTarget {
    Local(Arc<Mutex<LiveSource>>),
    Edge(Arc<Forwarder>),
}

/// Per-connection driver sequencing the handshake-to-branch flow (§4.6).
/// Transport I/O (handshake bytes, chunk (de)serialization) stays with the
/// caller; `RtmpSession` owns only the phases that are session state:
/// identify → vhost check → acquire-token/fetch-source → publish/play.
pub struct RtmpSession {
    pub role: ClientRole,
    pub vhost: String,
    pub stream_url: String,
    idle: IdleGuard,
    publish_target: Option<PublishTarget>,
}

impl RtmpSession {
    /// Phases 5-6: classifies the client and resolves its vhost.
    ///
    /// # Errors
    /// Propagates `RtmpError::VhostDisabled` from `resolve_vhost`.
    pub fn identify(
        cfg: &Config,
        command_name: &str,
        app: &str,
        stream: &str,
    ) -> Result<Self, RtmpError> {
        let (role, stream_name) = identify_client(command_name, app, stream);
        let vhost = resolve_vhost(cfg, app)?.to_string();
        Ok(Self {
            role,
            stream_url: format!("{vhost}/{stream_name}"),
            vhost,
            idle: IdleGuard::new(),
            publish_target: None,
        })
    }

    /// Phases 7-8 for a publisher: in edge mode (`cfg.is_edge`), starts a
    /// `Forwarder` proxying to the upstream origin instead of acquiring a
    /// local `LiveSource` — `make_writer` is only invoked in that branch.
    ///
    /// # Errors
    /// Propagates `RtmpError::StreamBusy` from the publish token.
    pub fn start_publishing(
        &mut self,
        cfg: &Config,
        token: &StreamPublishToken,
        pool: &LiveSourcePool,
        make_writer: impl FnOnce() -> Box<dyn OriginWriter>,
    ) -> Result<(), RtmpError> {
        if cfg.is_edge(&self.vhost) {
            let forwarder = Arc::new(Forwarder::new());
            forwarder.start(make_writer());
            self.publish_target = Some(PublishTarget::Edge(forwarder));
        } else {
            let gop_cache_cap = cfg.gop_cache_frames(&self.vhost);
            let source = acquire_for_publish(token, pool, &self.stream_url, gop_cache_cap)?;
            self.publish_target = Some(PublishTarget::Local(source));
        }
        Ok(())
    }

    /// Publishing loop (§4.6 "Publishing loop"): routes one received frame,
    /// enforcing the idle-kickoff timers first. In edge mode the frame is
    /// proxied upstream instead of fanned out locally.
    ///
    /// # Errors
    /// `SessionError::Control(ControlCode::KickoffForIdle)` once the
    /// applicable timeout elapses; `SessionError::Fatal` on a sticky
    /// forwarder send error.
    pub fn run_publishing_step(
        &mut self,
        cfg: &Config,
        kind: PacketKind,
        pkt: MediaPacket,
    ) -> Result<(), SessionError> {
        self.idle.check(cfg, &self.vhost)?;
        self.idle.on_message();
        match self.publish_target.as_ref() {
            Some(PublishTarget::Edge(forwarder)) => {
                let fwd_kind = match kind {
                    PacketKind::Audio => ForwardKind::Audio,
                    PacketKind::Video => ForwardKind::Video,
                    PacketKind::Script => ForwardKind::Data,
                };
                forwarder.proxy(fwd_kind, pkt)?;
            }
            Some(PublishTarget::Local(source)) => {
                source.lock().unwrap_or_else(|e| e.into_inner()).on_frame(pkt);
            }
            None => {}
        }
        Ok(())
    }

    /// Classifies an inbound AMF0 command received while publishing;
    /// surfaces `ControlCode::Republish` so the outer loop re-enters
    /// `identify`.
    ///
    /// # Errors
    /// `SessionError::Control(ControlCode::Republish)` on
    /// `FCUnpublish`/`closeStream`/`unpublish`.
    pub fn handle_publish_command(cmd: &Amf0Command) -> Result<(), SessionError> {
        if classify_publish_command(cmd) == CommandOutcome::Republish {
            return Err(SessionError::Control(ControlCode::Republish));
        }
        Ok(())
    }

    /// Releases whatever `start_publishing` acquired: the publish token and
    /// local source, or the forwarder's worker thread.
    pub fn stop_publishing(&mut self, token: &StreamPublishToken) {
        match self.publish_target.take() {
            Some(PublishTarget::Local(source)) => {
                release_publish(token, &source, &self.stream_url);
            }
            Some(PublishTarget::Edge(forwarder)) => {
                forwarder.stop();
            }
            None => {}
        }
    }

    /// Playing loop (§4.6 "Playing loop"): one merged-write batch pull.
    #[must_use]
    pub fn run_playing_batch(&self, rx: &Receiver<MediaPacket>, cfg: &Config) -> Vec<MediaPacket> {
        drain_batch(rx, cfg.mw_msgs(&self.vhost))
    }

    /// Origin-cluster redirect hook (§4.6 "Redirect behavior"): only
    /// consulted when `cfg.origin_cluster(vhost)` is enabled.
    ///
    /// # Errors
    /// `SessionError::Control(ControlCode::Redirect)` if `lookup` names a
    /// better origin for this stream.
    pub fn try_cluster_redirect(
        &self,
        cfg: &Config,
        lookup: &dyn ClusterLookup,
    ) -> Result<(), SessionError> {
        if cfg.origin_cluster(&self.vhost) && lookup.lookup(&self.vhost, &self.stream_url).is_some() {
            return Err(SessionError::Control(ControlCode::Redirect));
        }
        Ok(())
    }

    /// Token-traverse edge auth hook (§4.6 "Token-traverse edge auth"):
    /// only consulted when edge mode and token-traverse are both enabled.
    ///
    /// # Errors
    /// `RtmpError::TokenUnavailable` if no configured origin authorizes
    /// this publish.
    pub fn traverse_authorize(&self, cfg: &Config, auth: &dyn TraverseAuth) -> Result<(), RtmpError> {
        if cfg.is_edge(&self.vhost)
            && cfg.token_traverse(&self.vhost)
            && !auth.authorize(&self.vhost, &self.stream_url)
        {
            return Err(RtmpError::TokenUnavailable(self.stream_url.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::media::PacketKind;
    use std::sync::mpsc;

    #[test]
    fn identify_client_guesses_stream_from_app_when_empty() {
        let (role, stream) = identify_client("play", "live", "");
        assert_eq!(role, ClientRole::Play);
        assert_eq!(stream, "live");
    }

    #[test]
    fn identify_client_keeps_explicit_stream_name() {
        let (_, stream) = identify_client("publish", "live", "mystream");
        assert_eq!(stream, "mystream");
    }

    #[test]
    fn resolve_vhost_rejects_disabled() {
        let mut cfg = Config::empty();
        let mut sec = std::collections::HashMap::new();
        sec.insert("enabled".to_string(), "off".to_string());
        cfg.sections.insert("live".to_string(), sec);

        assert!(matches!(
            resolve_vhost(&cfg, "live"),
            Err(RtmpError::VhostDisabled(_))
        ));
    }

    #[test]
    fn resolve_vhost_falls_back_to_default_when_empty() {
        let cfg = Config::empty();
        assert_eq!(resolve_vhost(&cfg, "").unwrap(), DEFAULT_VHOST);
    }

    #[test]
    fn idle_guard_trips_after_first_packet_timeout() {
        let cfg = Config::empty();
        let mut guard = IdleGuard::new();
        guard.started_at = Instant::now() - Duration::from_millis(20_001);
        assert!(guard.check(&cfg, "live").is_err());
    }

    #[test]
    fn idle_guard_uses_steady_state_timeout_after_first_message() {
        let cfg = Config::empty();
        let mut guard = IdleGuard::new();
        guard.on_message();
        guard.last_msg_at = Some(Instant::now() - Duration::from_millis(5001));
        assert!(guard.check(&cfg, "live").is_err());
    }

    #[test]
    fn classify_publish_command_detects_unpublish() {
        let cmd = Amf0Command {
            name: "FCUnpublish".to_string(),
            transaction_id: 0.0,
            args: vec![],
        };
        assert_eq!(classify_publish_command(&cmd), CommandOutcome::Republish);
    }

    #[test]
    fn acquire_for_publish_is_mutually_exclusive() {
        let token = StreamPublishToken::new();
        let pool = LiveSourcePool::new();
        let a = acquire_for_publish(&token, &pool, "live/s", 16);
        assert!(a.is_ok());
        let b = acquire_for_publish(&token, &pool, "live/s", 16);
        assert!(matches!(b, Err(RtmpError::StreamBusy(_))));
    }

    #[test]
    fn drain_batch_respects_max_and_preserves_order() {
        let (tx, rx) = mpsc::channel();
        for i in 0..5u32 {
            tx.send(MediaPacket::wrap(vec![i as u8], 1, PacketKind::Video, i))
                .unwrap();
        }
        let batch = drain_batch(&rx, 3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].timestamp_ms, 0);
        assert_eq!(batch[2].timestamp_ms, 2);
    }

    #[test]
    fn drain_batch_returns_empty_when_nothing_queued() {
        let (_tx, rx) = mpsc::channel::<MediaPacket>();
        assert!(drain_batch(&rx, 128).is_empty());
    }

    #[test]
    fn play_duration_exceeded_once_limit_elapses() {
        let pd = PlayDuration {
            limit: Some(Duration::from_millis(1)),
            started_at: Instant::now() - Duration::from_millis(2),
        };
        assert!(pd.exceeded());
        let unbounded = PlayDuration::new(None);
        assert!(!unbounded.exceeded());
    }

    struct RecordingWriter {
        out: mpsc::Sender<Vec<MediaPacket>>,
    }

    impl OriginWriter for RecordingWriter {
        fn connect(&mut self) -> Result<(), String> {
            Ok(())
        }
        fn write_batch(&mut self, msgs: &[MediaPacket]) -> Result<(), String> {
            let _ = self.out.send(msgs.to_vec());
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn local_vhost_cfg() -> Config {
        Config::empty()
    }

    fn edge_vhost_cfg() -> Config {
        let mut cfg = Config::empty();
        let mut sec = std::collections::HashMap::new();
        sec.insert("edge".to_string(), "on".to_string());
        cfg.sections.insert("live".to_string(), sec);
        cfg
    }

    #[test]
    fn identify_resolves_role_vhost_and_stream_url() {
        let cfg = local_vhost_cfg();
        let s = RtmpSession::identify(&cfg, "publish", "live", "cam1").unwrap();
        assert_eq!(s.role, ClientRole::FlashPublish);
        assert_eq!(s.vhost, "live");
        assert_eq!(s.stream_url, "live/cam1");
    }

    #[test]
    fn local_mode_publishing_routes_frames_to_the_source() {
        let cfg = local_vhost_cfg();
        let token = StreamPublishToken::new();
        let pool = LiveSourcePool::new();
        let mut s = RtmpSession::identify(&cfg, "publish", "live", "cam1").unwrap();

        s.start_publishing(&cfg, &token, &pool, || unreachable!("not edge mode"))
            .unwrap();

        let source = pool.fetch_or_create("live/cam1", 16);
        let (_id, rx) = source.lock().unwrap().create_consumer();

        s.run_publishing_step(
            &cfg,
            PacketKind::Video,
            MediaPacket::wrap(vec![1, 2, 3], 1, PacketKind::Video, 0),
        )
        .unwrap();

        assert!(rx.try_recv().is_ok());
        s.stop_publishing(&token);
        assert!(!token.is_held("live/cam1"));
    }

    #[test]
    fn edge_mode_publishing_proxies_to_the_forwarder_instead_of_a_local_source() {
        let cfg = edge_vhost_cfg();
        let token = StreamPublishToken::new();
        let pool = LiveSourcePool::new();
        let mut s = RtmpSession::identify(&cfg, "publish", "live", "cam1").unwrap();

        let (out_tx, out_rx) = mpsc::channel();
        s.start_publishing(&cfg, &token, &pool, || {
            Box::new(RecordingWriter { out: out_tx })
        })
        .unwrap();

        // Edge mode never touches the publish token or the local source pool.
        assert!(!token.is_held("live/cam1"));

        s.run_publishing_step(
            &cfg,
            PacketKind::Video,
            MediaPacket::wrap(vec![9, 9], 1, PacketKind::Video, 0),
        )
        .unwrap();
        s.stop_publishing(&token);

        let batch = out_rx.recv().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload(), &[9, 9]);
    }

    struct AlwaysRedirect;
    impl ClusterLookup for AlwaysRedirect {
        fn lookup(&self, _vhost: &str, _stream_url: &str) -> Option<(String, u16)> {
            Some(("origin.example".to_string(), 1935))
        }
    }

    #[test]
    fn cluster_redirect_only_fires_when_origin_cluster_is_enabled() {
        let cfg = local_vhost_cfg();
        let s = RtmpSession::identify(&cfg, "publish", "live", "cam1").unwrap();
        // origin_cluster unset: lookup is never consulted, no redirect.
        assert!(s.try_cluster_redirect(&cfg, &AlwaysRedirect).is_ok());

        let mut cfg = Config::empty();
        let mut sec = std::collections::HashMap::new();
        sec.insert("origin_cluster".to_string(), "on".to_string());
        cfg.sections.insert("live".to_string(), sec);
        let s = RtmpSession::identify(&cfg, "publish", "live", "cam1").unwrap();
        let err = s.try_cluster_redirect(&cfg, &AlwaysRedirect).unwrap_err();
        assert_eq!(err.control(), Some(ControlCode::Redirect));
    }

    struct DenyAuth;
    impl TraverseAuth for DenyAuth {
        fn authorize(&self, _vhost: &str, _stream_url: &str) -> bool {
            false
        }
    }

    #[test]
    fn traverse_authorize_only_checked_in_edge_plus_token_traverse_mode() {
        let edge_only = edge_vhost_cfg();
        let s = RtmpSession::identify(&edge_only, "publish", "live", "cam1").unwrap();
        // edge but no token_traverse: auth is never consulted.
        assert!(s.traverse_authorize(&edge_only, &DenyAuth).is_ok());

        let mut cfg = edge_vhost_cfg();
        cfg.sections
            .get_mut("live")
            .unwrap()
            .insert("token_traverse".to_string(), "on".to_string());
        let s = RtmpSession::identify(&cfg, "publish", "live", "cam1").unwrap();
        assert!(matches!(
            s.traverse_authorize(&cfg, &DenyAuth),
            Err(RtmpError::TokenUnavailable(_))
        ));
    }
}
