use crate::error::RtmpError;

/// RTMP message type ids (Adobe RTMP spec, per-module grounding table).
pub const MSG_TYPE_AUDIO: u8 = 8;
pub const MSG_TYPE_VIDEO: u8 = 9;
pub const MSG_TYPE_AMF0_DATA: u8 = 18;
pub const MSG_TYPE_AMF0_COMMAND: u8 = 20;
pub const MSG_TYPE_AMF3_DATA: u8 = 15;
pub const MSG_TYPE_AMF3_COMMAND: u8 = 17;
pub const MSG_TYPE_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_TYPE_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_TYPE_SET_PEER_BANDWIDTH: u8 = 6;

pub const DEFAULT_CHUNK_SIZE: u32 = 128;
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;

/// AMF0 type markers (ISO/IEC subset actually exercised by `connect`,
/// `publish`, `play`, `onStatus`, `onMetaData`).
mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
}

/// A decoded AMF0 value.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Null,
    Undefined,
    Object(Vec<(String, Amf0Value)>),
    EcmaArray(Vec<(String, Amf0Value)>),
}

impl Amf0Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn object_get(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Self::Object(fields) | Self::EcmaArray(fields) => {
                fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Number(n) => {
                out.push(marker::NUMBER);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Self::Boolean(b) => {
                out.push(marker::BOOLEAN);
                out.push(u8::from(*b));
            }
            Self::String(s) => {
                out.push(marker::STRING);
                encode_amf_string(s, out);
            }
            Self::Null => out.push(marker::NULL),
            Self::Undefined => out.push(marker::UNDEFINED),
            Self::Object(fields) => {
                out.push(marker::OBJECT);
                encode_fields(fields, out);
            }
            Self::EcmaArray(fields) => {
                out.push(marker::ECMA_ARRAY);
                out.extend_from_slice(&(fields.len() as u32).to_be_bytes());
                encode_fields(fields, out);
            }
        }
    }

    /// # Errors
    /// Returns `RtmpError::Amf` if the buffer is truncated or the marker is
    /// not one of the recognized AMF0 types used by command/data messages.
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), RtmpError> {
        let (&marker, rest) = buf
            .split_first()
            .ok_or_else(|| RtmpError::Amf("empty buffer".into()))?;
        match marker {
            marker::NUMBER => {
                let (bytes, rest) = take(rest, 8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(bytes);
                Ok((Self::Number(f64::from_be_bytes(arr)), rest))
            }
            marker::BOOLEAN => {
                let (bytes, rest) = take(rest, 1)?;
                Ok((Self::Boolean(bytes[0] != 0), rest))
            }
            marker::STRING => decode_amf_string(rest).map(|(s, r)| (Self::String(s), r)),
            marker::NULL => Ok((Self::Null, rest)),
            marker::UNDEFINED => Ok((Self::Undefined, rest)),
            marker::OBJECT => decode_fields(rest).map(|(f, r)| (Self::Object(f), r)),
            marker::ECMA_ARRAY => {
                let (_, rest) = take(rest, 4)?; // associative-array count, unused
                decode_fields(rest).map(|(f, r)| (Self::EcmaArray(f), r))
            }
            other => Err(RtmpError::Amf(format!("unsupported AMF0 marker 0x{other:02x}"))),
        }
    }
}

fn take(buf: &[u8], n: usize) -> Result<(&[u8], &[u8]), RtmpError> {
    if buf.len() < n {
        return Err(RtmpError::Amf("truncated AMF0 value".into()));
    }
    Ok(buf.split_at(n))
}

fn encode_amf_string(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn decode_amf_string(buf: &[u8]) -> Result<(String, &[u8]), RtmpError> {
    let (len_bytes, rest) = take(buf, 2)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let (bytes, rest) = take(rest, len)?;
    let s = String::from_utf8_lossy(bytes).into_owned();
    Ok((s, rest))
}

fn encode_fields(fields: &[(String, Amf0Value)], out: &mut Vec<u8>) {
    for (k, v) in fields {
        encode_amf_string(k, out);
        v.encode(out);
    }
    out.extend_from_slice(&[0x00, 0x00, marker::OBJECT_END]);
}

fn decode_fields(mut buf: &[u8]) -> Result<(Vec<(String, Amf0Value)>, &[u8]), RtmpError> {
    let mut fields = Vec::new();
    loop {
        if buf.len() >= 3 && buf[0] == 0 && buf[1] == 0 && buf[2] == marker::OBJECT_END {
            return Ok((fields, &buf[3..]));
        }
        let (key, rest) = decode_amf_string(buf)?;
        let (value, rest) = Amf0Value::decode(rest)?;
        fields.push((key, value));
        buf = rest;
    }
}

/// A decoded AMF0 command message: `commandName`, `transactionId`, and the
/// remaining positional arguments (command object, stream-name string, ...).
#[derive(Debug, Clone)]
pub struct Amf0Command {
    pub name: String,
    pub transaction_id: f64,
    pub args: Vec<Amf0Value>,
}

impl Amf0Command {
    /// # Errors
    /// Returns `RtmpError::Amf` if the payload does not start with a
    /// command-name string followed by a numeric transaction id.
    pub fn decode(mut buf: &[u8]) -> Result<Self, RtmpError> {
        let (name_val, rest) = Amf0Value::decode(buf)?;
        buf = rest;
        let name = name_val
            .as_str()
            .ok_or_else(|| RtmpError::Amf("command name is not a string".into()))?
            .to_string();
        let (txn_val, rest) = Amf0Value::decode(buf)?;
        buf = rest;
        let transaction_id = txn_val
            .as_f64()
            .ok_or_else(|| RtmpError::Amf("transaction id is not a number".into()))?;
        let mut args = Vec::new();
        while !buf.is_empty() {
            let (v, rest) = Amf0Value::decode(buf)?;
            args.push(v);
            buf = rest;
        }
        Ok(Self {
            name,
            transaction_id,
            args,
        })
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Amf0Value::String(self.name.clone()).encode(&mut out);
        Amf0Value::Number(self.transaction_id).encode(&mut out);
        for arg in &self.args {
            arg.encode(&mut out);
        }
        out
    }

    /// The `streamName` argument of a `publish`/`play` command, if present
    /// as the first string-typed positional argument.
    #[must_use]
    pub fn stream_name(&self) -> Option<&str> {
        self.args.iter().find_map(Amf0Value::as_str)
    }
}
