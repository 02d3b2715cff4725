use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::EdgeError;
use crate::media::MediaPacket;

/// Per-spec connect/send timeouts (§4.5 "Forwarder (push)").
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(150);
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum messages written per `sendmsg` batch.
pub const BATCH_SIZE: usize = 128;

/// RTMP message classification the forwarder needs to filter control traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    Audio,
    Video,
    Data,
    /// set-chunk-size, window-ack, ack — never proxied.
    Control,
}

/// Capability interface for the origin connection (§9 "capability
/// interfaces"): a forwarder only needs to connect, write batches, and close.
pub trait OriginWriter: Send {
    /// # Errors
    /// Returns an error string describing the transport failure.
    fn connect(&mut self) -> Result<(), String>;
    /// # Errors
    /// Returns an error string on write failure.
    fn write_batch(&mut self, msgs: &[MediaPacket]) -> Result<(), String>;
    fn close(&mut self);
}

enum Queued {
    Msg(MediaPacket),
    Stop,
}

/// Push forwarder: proxies a publisher's messages to an origin RTMP
/// connection via a bounded queue drained in batches by a worker thread.
pub struct Forwarder {
    tx: Mutex<Option<mpsc::Sender<Queued>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Forwarder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tx: Mutex::new(None),
            worker: Mutex::new(None),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts the worker thread owning `writer`. Calling `start` while
    /// already started is a no-op after a prior `stop`.
    pub fn start(&self, mut writer: Box<dyn OriginWriter>) {
        let (tx, rx) = mpsc::channel::<Queued>();
        let last_error = self.last_error.clone();

        let handle = thread::Builder::new()
            .name("edge-forwarder".into())
            .spawn(move || {
                if let Err(e) = writer.connect() {
                    *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e);
                    return;
                }
                let mut batch = Vec::with_capacity(BATCH_SIZE);
                loop {
                    match rx.recv() {
                        Ok(Queued::Msg(m)) => {
                            batch.push(m);
                            // Drain whatever else is immediately available, up to the batch cap.
                            while batch.len() < BATCH_SIZE {
                                match rx.try_recv() {
                                    Ok(Queued::Msg(m)) => batch.push(m),
                                    Ok(Queued::Stop) | Err(_) => break,
                                }
                            }
                            if let Err(e) = writer.write_batch(&batch) {
                                *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e);
                                break;
                            }
                            batch.clear();
                        }
                        Ok(Queued::Stop) | Err(_) => break,
                    }
                }
                writer.close();
            })
            .ok();

        *self.tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    /// Pushes a publisher message onto the queue. Control messages
    /// (set-chunk-size, window-ack, ack) are dropped, never proxied.
    ///
    /// # Errors
    /// Returns the sticky error recorded by a prior send failure; callers
    /// must `stop()` then `start()` again to clear it.
    pub fn proxy(&self, kind: ForwardKind, msg: MediaPacket) -> Result<(), EdgeError> {
        if kind == ForwardKind::Control {
            return Ok(());
        }
        if let Some(err) = self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(EdgeError::Send(err));
        }
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(Queued::Msg(msg));
        }
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(Queued::Stop);
        }
        if let Some(h) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = h.join();
        }
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}
