//! Protocol and session core of a live-streaming media server: RTMP
//! ingest/egress, the edge pull/push forwarder, a WebRTC-to-RTMP frame
//! builder, an SRT-to-RTMP frame builder, and a GB28181 MPEG-PS
//! depacketizer with recovery.

/// Frame builders: RTP→AnnexB→FLV (WebRTC) and MTS/PES→FLV (SRT).
pub mod builders;
/// INI-style configuration with vhost-scoped typed accessors.
pub mod config;
/// Edge pull ingester and push forwarder.
pub mod edge;
/// Per-module error enums and the top-level `SessionError` classification.
pub mod error;
/// GB28181 MPEG-PS depacketizer and per-device session state.
pub mod gb;
/// Async fire-and-forget post-hook worker.
pub mod hooks;
/// Dynamic HTTP-FLV/TS/AAC/MP3 mount and routing.
pub mod http;
/// Publisher-to-consumer fan-out with GOP cache and publish-token mutual exclusion.
pub mod live;
/// Logging utilities, feature-gated by verbosity level.
pub mod log;
/// The shared media packet model every protocol's frame builder produces.
pub mod media;
/// RTP packet model, reorder cache, and frame-boundary detection.
pub mod rtp;
/// RTMP handshake, AMF0 codec, and per-connection session state machine.
pub mod rtmp;
