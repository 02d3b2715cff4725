pub mod source;

pub use source::{CrossProtocolBridge, LiveSource, LiveSourcePool, StreamPublishToken};
