pub mod forwarder;
pub mod ingester;

pub use forwarder::{ForwardKind, Forwarder, OriginWriter};
pub use ingester::{IngestMessage, IngestState, Ingester, OriginList, UpstreamSource};
