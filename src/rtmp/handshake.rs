use std::io::{self, Read, Write};

use rand::RngCore;

use crate::error::RtmpError;

const RTMP_VERSION: u8 = 3;
const HANDSHAKE_SIZE: usize = 1536;

/// Performs the server side of the plain (non-digest) RTMP handshake:
/// read C0+C1, write S0+S1+S2 (S2 echoes C1), read C2. The transport
/// (plaintext or TLS) is already established by the caller.
///
/// # Errors
/// Returns `RtmpError::Handshake` on an unsupported version byte or a
/// transport I/O failure.
pub fn server_handshake<S: Read + Write>(stream: &mut S) -> Result<(), RtmpError> {
    let mut c0 = [0u8; 1];
    read_exact(stream, &mut c0)?;
    if c0[0] != RTMP_VERSION {
        return Err(RtmpError::Handshake(format!(
            "unsupported client version {}",
            c0[0]
        )));
    }

    let mut c1 = [0u8; HANDSHAKE_SIZE];
    read_exact(stream, &mut c1)?;

    let s0 = [RTMP_VERSION];
    let s1 = random_handshake_block();
    let s2 = c1; // plain handshake: S2 echoes C1 verbatim

    write_all(stream, &s0)?;
    write_all(stream, &s1)?;
    write_all(stream, &s2)?;

    let mut c2 = [0u8; HANDSHAKE_SIZE];
    read_exact(stream, &mut c2)?;

    Ok(())
}

fn random_handshake_block() -> [u8; HANDSHAKE_SIZE] {
    let mut block = [0u8; HANDSHAKE_SIZE];
    // First 8 bytes are time + zero per the Adobe spec; the rest is random
    // padding that the plain handshake never validates.
    rand::thread_rng().fill_bytes(&mut block[8..]);
    block
}

fn read_exact<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<(), RtmpError> {
    stream
        .read_exact(buf)
        .map_err(|e: io::Error| RtmpError::Handshake(e.to_string()))
}

fn write_all<S: Write>(stream: &mut S, buf: &[u8]) -> Result<(), RtmpError> {
    stream
        .write_all(buf)
        .map_err(|e: io::Error| RtmpError::Handshake(e.to_string()))
}
