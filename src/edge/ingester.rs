use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::EdgeError;
use crate::media::MediaPacket;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const PULSE: Duration = Duration::from_millis(500);
pub const RETRY_SLEEP: Duration = Duration::from_secs(3);
pub const MAX_REDIRECTS: u32 = 3;

/// Play-side state machine (§4.5 "Ingester (pull)"). The publish side
/// (`Init`/`Publish`) is tracked by the owning `RtmpSession`, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Init,
    Play,
    IngestConnected,
    IngestStopping,
}

/// A classified message read from the upstream origin.
#[derive(Debug, Clone)]
pub enum IngestMessage {
    Audio(MediaPacket),
    Video(MediaPacket),
    Metadata(MediaPacket),
    /// `onStatus` with `level=error` and an `ex.redirect2` (or legacy
    /// `ex.redirect`) property: the target to reconnect to.
    Redirect(String),
}

/// Capability interface for the upstream connection: RTMP `play` or
/// HTTP-FLV `GET`, whichever protocol was selected for this cycle.
pub trait UpstreamSource: Send {
    /// # Errors
    /// Returns an error string describing the connect failure.
    fn connect(&mut self, origin: &str) -> Result<(), String>;
    /// Returns `Ok(None)` on a steady-state read timeout (the 500 ms pulse);
    /// `Ok(Some(Eof))`-equivalent upstream closes should surface as `Err`.
    ///
    /// # Errors
    /// Returns an error string on a transport or decode failure.
    fn read_message(&mut self) -> Result<Option<IngestMessage>, String>;
    fn close(&mut self);
}

/// Round-robin origin selection across a vhost's configured server list.
pub struct OriginList {
    servers: Vec<String>,
    next: AtomicUsize,
}

impl OriginList {
    #[must_use]
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            next: AtomicUsize::new(0),
        }
    }

    /// Returns the next origin in round-robin order, or `None` if empty.
    pub fn next(&self) -> Option<&str> {
        if self.servers.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        Some(self.servers[i].as_str())
    }
}

/// Pull ingester: owns the play-side state machine and drives one upstream
/// connection per cycle, following `onStatus` redirects inline.
pub struct Ingester {
    state: IngestState,
    origins: OriginList,
}

impl Ingester {
    #[must_use]
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            state: IngestState::Init,
            origins: OriginList::new(servers),
        }
    }

    #[must_use]
    pub fn state(&self) -> IngestState {
        self.state
    }

    /// # Panics
    /// Panics if called outside `Init`.
    pub fn on_client_play(&mut self) {
        assert_eq!(self.state, IngestState::Init);
        self.state = IngestState::Play;
    }

    /// # Panics
    /// Panics if called outside `Play`.
    pub fn on_ingest_play(&mut self) {
        assert_eq!(self.state, IngestState::Play);
        self.state = IngestState::IngestConnected;
    }

    pub fn on_all_clients_gone(&mut self) {
        if self.state == IngestState::IngestConnected {
            self.state = IngestState::IngestStopping;
        }
    }

    pub fn on_stopped(&mut self) {
        self.state = IngestState::Init;
    }

    /// Runs one full cycle: select an origin, connect (following up to
    /// [`MAX_REDIRECTS`] chained redirects), then read and forward messages
    /// until the upstream closes or errors. Callers own the retry-sleep
    /// loop and coroutine scheduling; this call returns on any terminal
    /// condition for the cycle.
    ///
    /// # Errors
    /// Returns `EdgeError::Connect` if no origin is configured or the
    /// connect handshake fails after redirects are exhausted;
    /// `EdgeError::TooManyRedirects` if the redirect chain exceeds
    /// [`MAX_REDIRECTS`]; `EdgeError::Upstream` on a read failure.
    pub fn run_cycle(
        &mut self,
        source: &mut dyn UpstreamSource,
        mut on_forward: impl FnMut(IngestMessage),
    ) -> Result<(), EdgeError> {
        let mut target = self
            .origins
            .next()
            .ok_or_else(|| EdgeError::Connect("no origin configured".into()))?
            .to_string();

        let mut redirects = 0u32;
        loop {
            source
                .connect(&target)
                .map_err(EdgeError::Connect)?;
            self.on_ingest_play();

            loop {
                match source.read_message() {
                    Ok(Some(IngestMessage::Redirect(next))) => {
                        redirects += 1;
                        if redirects > MAX_REDIRECTS {
                            source.close();
                            return Err(EdgeError::TooManyRedirects);
                        }
                        source.close();
                        target = next;
                        break; // reconnect immediately to `target`
                    }
                    Ok(Some(msg)) => on_forward(msg),
                    Ok(None) => {} // pulse: nothing to forward this tick
                    Err(e) => {
                        source.close();
                        return Err(EdgeError::Upstream(e));
                    }
                }
                if self.state == IngestState::IngestStopping {
                    source.close();
                    self.on_stopped();
                    return Ok(());
                }
            }
        }
    }
}
