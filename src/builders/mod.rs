pub mod flv;
pub mod rtc;
pub mod srt;

pub use rtc::RtcFrameBuilder;
pub use srt::{SrtAudioBuilder, SrtVideoBuilder};
