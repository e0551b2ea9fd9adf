//! OSC 1.0 message encoding and decoding
//!
//! Only the subset AbletonOSC speaks is supported: int32/int64, float32/float64,
//! strings, booleans and nil. Bundles are flattened into their messages.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::{BridgeError, BridgeResult};

const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// A single OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Bool(bool),
    Nil,
}

impl OscArg {
    fn type_tag(&self) -> u8 {
        match self {
            OscArg::Int(_) => b'i',
            OscArg::Long(_) => b'h',
            OscArg::Float(_) => b'f',
            OscArg::Double(_) => b'd',
            OscArg::Str(_) => b's',
            OscArg::Bool(true) => b'T',
            OscArg::Bool(false) => b'F',
            OscArg::Nil => b'N',
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OscArg::Int(v) => Some(i64::from(*v)),
            OscArg::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OscArg::Int(v) => Some(f64::from(*v)),
            OscArg::Long(v) => Some(*v as f64),
            OscArg::Float(v) => Some(f64::from(*v)),
            OscArg::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Booleans arrive either as T/F tags or as 0/1 integers depending on the
    /// AbletonOSC version
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OscArg::Bool(b) => Some(*b),
            OscArg::Int(v) => Some(*v != 0),
            OscArg::Long(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Equality that ignores the numeric width, so an echoed `i` matches an `h`
    pub fn loosely_eq(&self, other: &OscArg) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscArg::Int(v) => write!(f, "{}", v),
            OscArg::Long(v) => write!(f, "{}", v),
            OscArg::Float(v) => write!(f, "{}", v),
            OscArg::Double(v) => write!(f, "{}", v),
            OscArg::Str(s) => write!(f, "{:?}", s),
            OscArg::Bool(b) => write!(f, "{}", b),
            OscArg::Nil => f.write_str("nil"),
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<u32> for OscArg {
    fn from(v: u32) -> Self {
        // Track indices never get near i32::MAX; widen instead of wrapping
        i32::try_from(v).map(OscArg::Int).unwrap_or(OscArg::Long(i64::from(v)))
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<f64> for OscArg {
    /// AbletonOSC reads float32 fine and some builds reject `d`
    fn from(v: f64) -> Self {
        OscArg::Float(v as f32)
    }
}

impl From<bool> for OscArg {
    fn from(v: bool) -> Self {
        OscArg::Bool(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::Str(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::Str(v)
    }
}

/// An OSC message: address pattern plus ordered arguments
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Encode into a single UDP datagram
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        write_padded_str(&mut buf, self.address.as_bytes());

        let mut tags = Vec::with_capacity(self.args.len() + 1);
        tags.push(b',');
        tags.extend(self.args.iter().map(OscArg::type_tag));
        write_padded_str(&mut buf, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => buf.put_i32(*v),
                OscArg::Long(v) => buf.put_i64(*v),
                OscArg::Float(v) => buf.put_f32(*v),
                OscArg::Double(v) => buf.put_f64(*v),
                OscArg::Str(s) => write_padded_str(&mut buf, s.as_bytes()),
                OscArg::Bool(_) | OscArg::Nil => {},
            }
        }

        buf.freeze()
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Decode a datagram into its messages (one, or several for a bundle)
pub fn decode_packet(data: &[u8]) -> BridgeResult<Vec<OscMessage>> {
    let mut out = Vec::new();
    decode_into(data, &mut out)?;
    Ok(out)
}

fn decode_into(data: &[u8], out: &mut Vec<OscMessage>) -> BridgeResult<()> {
    if data.starts_with(BUNDLE_TAG) {
        let mut reader = Reader::new(data);
        reader.take(BUNDLE_TAG.len())?;
        reader.take(8)?; // time tag, ignored
        while !reader.is_empty() {
            let size = reader.read_i32()?;
            let size = usize::try_from(size)
                .map_err(|_| malformed(format!("negative bundle element size {}", size)))?;
            let element = reader.take(size)?;
            decode_into(element, out)?;
        }
        return Ok(());
    }

    out.push(decode_message(data)?);
    Ok(())
}

fn decode_message(data: &[u8]) -> BridgeResult<OscMessage> {
    let mut reader = Reader::new(data);
    let address = reader.read_str()?;
    if !address.starts_with('/') {
        return Err(malformed(format!("address {:?} does not start with '/'", address)));
    }

    // Pre-1.0 senders may omit the type tag string entirely
    if reader.is_empty() {
        return Ok(OscMessage::new(address, Vec::new()));
    }

    let tags = reader.read_str()?;
    let tags = tags
        .strip_prefix(',')
        .ok_or_else(|| malformed(format!("type tags {:?} missing ','", tags)))?;

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(reader.read_i32()?),
            'h' => OscArg::Long(i64::from_be_bytes(reader.take_array::<8>()?)),
            'f' => OscArg::Float(f32::from_be_bytes(reader.take_array::<4>()?)),
            'd' => OscArg::Double(f64::from_be_bytes(reader.take_array::<8>()?)),
            's' | 'S' => OscArg::Str(reader.read_str()?),
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            'N' | 'I' => OscArg::Nil,
            other => return Err(malformed(format!("unsupported type tag '{}'", other))),
        };
        args.push(arg);
    }

    Ok(OscMessage::new(address, args))
}

fn malformed(detail: String) -> BridgeError {
    BridgeError::Protocol(format!("malformed OSC packet: {}", detail))
}

fn write_padded_str(buf: &mut BytesMut, s: &[u8]) {
    buf.put_slice(s);
    let pad = 4 - (s.len() % 4);
    buf.put_bytes(0, pad);
}

/// Cursor over a datagram with OSC alignment rules
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> BridgeResult<&'a [u8]> {
        if self.data.len() < n {
            return Err(malformed(format!(
                "needed {} bytes, {} left",
                n,
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> BridgeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_i32(&mut self) -> BridgeResult<i32> {
        Ok(i32::from_be_bytes(self.take_array::<4>()?))
    }

    fn read_str(&mut self) -> BridgeResult<String> {
        let nul = self
            .data
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| malformed("unterminated string".to_string()))?;
        let padded = (nul + 4) & !3;
        let raw = self.take(padded.min(self.data.len()))?;
        String::from_utf8(raw[..nul].to_vec())
            .map_err(|_| malformed("string is not valid UTF-8".to_string()))
    }
}
