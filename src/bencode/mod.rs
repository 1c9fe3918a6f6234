//! Bencode encoding and decoding
//!
//! Bencode is the serialization format used by `.torrent` files and HTTP
//! tracker responses. It has four value types: integers, byte strings,
//! lists and dictionaries with byte-string keys.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

const INT: u8 = b'i';
const LIST: u8 = b'l';
const DICT: u8 = b'd';
const END: u8 = b'e';
const SEP: u8 = b':';

/// Deepest list/dictionary nesting accepted by the decoder
pub const MAX_DEPTH: usize = 256;

/// Error types for bencode decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BencodeError {
    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    #[error("Data is not bencode: unexpected byte 0x{byte:02x} at offset {offset}")]
    InvalidMarker { byte: u8, offset: usize },

    #[error("Expected digit in string length, got 0x{byte:02x} at offset {offset}")]
    InvalidLength { byte: u8, offset: usize },

    #[error("Invalid integer `{0}`")]
    InvalidInteger(String),

    #[error("Dictionary key must be a byte string (offset {0})")]
    NonBytesKey(usize),

    #[error("Trailing data after value at offset {0}")]
    TrailingData(usize),

    #[error("Nesting too deep at offset {0}")]
    TooDeep(usize),
}

pub type Result<T> = std::result::Result<T, BencodeError>;

/// A decoded bencode value
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Create an empty dictionary
    pub fn dict() -> Self {
        Value::Dict(BTreeMap::new())
    }

    /// Insert into a dictionary value, returning it for chaining.
    ///
    /// Non-dictionary values are returned unchanged.
    pub fn with(mut self, key: impl AsRef<[u8]>, value: impl Into<Value>) -> Self {
        if let Value::Dict(map) = &mut self {
            map.insert(key.as_ref().to_vec(), value.into());
        }
        self
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string interpreted as UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a key if this value is a dictionary
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key.as_bytes()))
    }

    /// Append the encoded form of this value to `out`
    pub fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(i) => {
                out.push(INT);
                out.extend_from_slice(i.to_string().as_bytes());
                out.push(END);
            }
            Value::Bytes(b) => encode_bytes(b, out),
            Value::List(items) => {
                out.push(LIST);
                for item in items {
                    item.encode_to(out);
                }
                out.push(END);
            }
            Value::Dict(map) => {
                // BTreeMap iterates keys in byte order, as bencode requires
                out.push(DICT);
                for (key, value) in map {
                    encode_bytes(key, out);
                    value.encode_to(out);
                }
                out.push(END);
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => write!(f, "<{} bytes>", b.len()),
            },
            Value::List(l) => f.debug_list().entries(l).finish(),
            Value::Dict(d) => f
                .debug_map()
                .entries(d.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)))
                .finish(),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(s.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

fn encode_bytes(b: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b.len().to_string().as_bytes());
    out.push(SEP);
    out.extend_from_slice(b);
}

/// Encode a value into a new buffer
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode_to(&mut out);
    out
}

/// Decode exactly one value; trailing bytes are rejected
pub fn decode(buf: &[u8]) -> Result<Value> {
    let (value, used) = decode_prefix(buf)?;
    if used != buf.len() {
        return Err(BencodeError::TrailingData(used));
    }
    Ok(value)
}

/// Decode one value from the start of `buf`, returning it with the number of bytes consumed
pub fn decode_prefix(buf: &[u8]) -> Result<(Value, usize)> {
    let mut decoder = Decoder::new(buf);
    let value = decoder.value()?;
    Ok((value, decoder.pos))
}

/// Find the raw encoded bytes of `key` in a top-level dictionary.
///
/// The info hash must be computed over the exact bytes found in the file,
/// so this walks the dictionary without re-encoding anything.
pub fn raw_dict_value<'a>(buf: &'a [u8], key: &[u8]) -> Result<Option<&'a [u8]>> {
    let mut decoder = Decoder::new(buf);
    match decoder.peek()? {
        DICT => decoder.enter()?,
        byte => {
            return Err(BencodeError::InvalidMarker {
                byte,
                offset: decoder.pos,
            })
        }
    }

    while decoder.peek()? != END {
        let key_offset = decoder.pos;
        let k = match decoder.value()? {
            Value::Bytes(k) => k,
            _ => return Err(BencodeError::NonBytesKey(key_offset)),
        };
        let start = decoder.pos;
        decoder.skip()?;
        if k == key {
            return Ok(Some(&buf[start..decoder.pos]));
        }
    }
    Ok(None)
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }

    /// Step into a list or dictionary
    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(BencodeError::TooDeep(self.pos));
        }
        self.depth += 1;
        self.pos += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
        self.pos += 1;
    }

    fn peek(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof(self.pos))
    }

    fn value(&mut self) -> Result<Value> {
        match self.peek()? {
            INT => self.int().map(Value::Int),
            LIST => {
                self.enter()?;
                let mut items = Vec::new();
                while self.peek()? != END {
                    items.push(self.value()?);
                }
                self.leave();
                Ok(Value::List(items))
            }
            DICT => {
                self.enter()?;
                let mut map = BTreeMap::new();
                while self.peek()? != END {
                    let key_offset = self.pos;
                    let key = match self.value()? {
                        Value::Bytes(k) => k,
                        _ => return Err(BencodeError::NonBytesKey(key_offset)),
                    };
                    let value = self.value()?;
                    map.insert(key, value);
                }
                self.leave();
                Ok(Value::Dict(map))
            }
            b'0'..=b'9' => self.bytes().map(|b| Value::Bytes(b.to_vec())),
            byte => Err(BencodeError::InvalidMarker {
                byte,
                offset: self.pos,
            }),
        }
    }

    /// Advance past one value without building it
    fn skip(&mut self) -> Result<()> {
        match self.peek()? {
            INT => self.int().map(|_| ()),
            LIST | DICT => {
                self.enter()?;
                while self.peek()? != END {
                    self.skip()?;
                }
                self.leave();
                Ok(())
            }
            b'0'..=b'9' => self.bytes().map(|_| ()),
            byte => Err(BencodeError::InvalidMarker {
                byte,
                offset: self.pos,
            }),
        }
    }

    fn int(&mut self) -> Result<i64> {
        self.pos += 1;
        let start = self.pos;
        let end = self.buf[start..]
            .iter()
            .position(|&b| b == END)
            .map(|i| start + i)
            .ok_or(BencodeError::UnexpectedEof(self.buf.len()))?;
        let text = String::from_utf8_lossy(&self.buf[start..end]);
        let value = text
            .parse::<i64>()
            .map_err(|_| BencodeError::InvalidInteger(text.to_string()))?;
        self.pos = end + 1;
        Ok(value)
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let mut len: usize = 0;
        loop {
            let byte = self.peek()?;
            match byte {
                SEP => break,
                b'0'..=b'9' => {
                    len = len
                        .checked_mul(10)
                        .and_then(|l| l.checked_add(usize::from(byte - b'0')))
                        .ok_or_else(|| BencodeError::InvalidInteger("string length".to_string()))?;
                }
                _ => {
                    return Err(BencodeError::InvalidLength {
                        byte,
                        offset: self.pos,
                    })
                }
            }
            self.pos += 1;
        }
        self.pos += 1;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(BencodeError::UnexpectedEof(self.buf.len()))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }
}
