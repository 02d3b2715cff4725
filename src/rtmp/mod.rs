pub mod handshake;
pub mod proto;
pub mod session;

pub use handshake::server_handshake;
pub use proto::{Amf0Command, Amf0Value};
pub use session::{
    acquire_for_publish, classify_publish_command, drain_batch, identify_client, release_publish,
    resolve_vhost, ClientRole, ClusterLookup, CommandOutcome, IdleGuard, PlayDuration,
    PublishTarget, RtmpSession, TraverseAuth, DEFAULT_VHOST,
};
