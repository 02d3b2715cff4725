pub mod ps;
pub mod session;

pub use ps::{PsContext, PsStats, TsMessage};
pub use session::{GbSession, GbState};
