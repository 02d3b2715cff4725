pub mod cache;
pub mod frame_detector;
pub mod packet;

pub use cache::VideoPacketCache;
pub use frame_detector::{
    DetectResult, FrameDetector, FrameError, LostSn, check_frame_complete, find_next_lost_sn,
};
pub use packet::{PayloadType, RtpHeader, RtpPacket, parse_rtp_header};
