pub mod live_stream;
pub mod router;

pub use live_stream::{
    flv_file_header, guess_av_flags, match_dynamic_mount, serve_flv_tick, LiveStreamMount,
    MountState, StreamEncoder,
};
pub use router::{check_basic_auth, cors_headers, is_cors_preflight, AuthOutcome, Router, RouteMatch};
