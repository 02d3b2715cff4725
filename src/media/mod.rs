pub mod packet;

pub use packet::{MediaPacket, PacketKind};
