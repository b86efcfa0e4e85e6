// Canonical packing and the binary codec
//
// Packing turns a resource dict into the one byte string that represents
// it: tagged values, big-endian integers, u64 length prefixes, map entries
// sorted bytewise by key, resource fields in declared order. The digest of
// a resource is the SHA-256 of exactly these bytes, so every rule here is
// load-bearing for identity.
//
// Refs pack as their target digest, never the referred-to content. A ref
// can only exist after its target was hashed, which is what makes the
// committed graph a DAG by construction.

use std::collections::BTreeSet;

use crate::digest::{Digest, Hasher};
use crate::error::PackingError;
use crate::types::TypeKey;
use crate::value::{RefValue, ResourceDict, Value};

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
// 0x04 is reserved for a variable-length bignum encoding; the in-memory
// model is i64, so it is never produced.
const TAG_FLOAT: u8 = 0x05;
const TAG_STR: u8 = 0x06;
const TAG_BYTES: u8 = 0x07;
const TAG_LIST: u8 = 0x08;
const TAG_MAP: u8 = 0x09;
const TAG_RES: u8 = 0x0a;
const TAG_REF: u8 = 0x0b;
const TAG_TYPE: u8 = 0x0c;

/// Nesting ceiling for packed values. The owned value tree cannot form
/// reference cycles, so a depth check is the totality guarantee.
pub const MAX_DEPTH: usize = 128;

/// The canonical bit pattern all NaNs collapse to.
const CANONICAL_NAN: u64 = 0x7ff8_0000_0000_0000;

/// A resource in packed form: its canonical bytes, their digest, and the
/// digests of every ref embedded in it.
#[derive(Clone, Debug)]
pub struct Packed {
    pub digest: Digest,
    pub bytes: Vec<u8>,
    pub links: BTreeSet<Digest>,
}

/// Pack a resource dict into its canonical form.
pub fn pack(dict: &ResourceDict) -> Result<Packed, PackingError> {
    let mut encoder = Encoder::default();
    encoder.encode_resource(dict, 0)?;
    let mut hasher = Hasher::new();
    hasher.update(&encoder.out);
    Ok(Packed {
        digest: hasher.finalize(),
        bytes: encoder.out,
        links: encoder.links,
    })
}

/// Decode canonical bytes back into a resource dict.
pub fn unpack(bytes: &[u8]) -> Result<ResourceDict, PackingError> {
    let mut decoder = Decoder { input: bytes, pos: 0 };
    let value = decoder.decode_value(0)?;
    if decoder.pos != bytes.len() {
        return Err(PackingError::TrailingBytes(bytes.len() - decoder.pos));
    }
    match value {
        Value::Resource(dict) => Ok(*dict),
        other => Err(PackingError::NotAResource(other.kind())),
    }
}

#[derive(Default)]
struct Encoder {
    out: Vec<u8>,
    links: BTreeSet<Digest>,
}

impl Encoder {
    fn encode_value(&mut self, value: &Value, depth: usize) -> Result<(), PackingError> {
        if depth > MAX_DEPTH {
            return Err(PackingError::DepthExceeded(MAX_DEPTH));
        }
        match value {
            Value::Null => self.out.push(TAG_NULL),
            Value::Bool(false) => self.out.push(TAG_FALSE),
            Value::Bool(true) => self.out.push(TAG_TRUE),
            Value::Int(i) => {
                self.out.push(TAG_INT);
                self.out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Float(x) => {
                self.out.push(TAG_FLOAT);
                self.out.extend_from_slice(&canonical_float_bits(*x).to_be_bytes());
            }
            Value::Str(s) => {
                self.out.push(TAG_STR);
                self.encode_str(s);
            }
            Value::Bytes(b) => {
                self.out.push(TAG_BYTES);
                self.encode_len(b.len());
                self.out.extend_from_slice(b);
            }
            Value::List(items) => {
                self.out.push(TAG_LIST);
                self.encode_len(items.len());
                for item in items {
                    self.encode_value(item, depth + 1)?;
                }
            }
            Value::Map(entries) => {
                // BTreeMap iteration is bytewise-ascending over UTF-8 keys.
                self.out.push(TAG_MAP);
                self.encode_len(entries.len());
                for (key, entry) in entries {
                    self.encode_str(key);
                    self.encode_value(entry, depth + 1)?;
                }
            }
            Value::Resource(dict) => self.encode_resource(dict, depth)?,
            Value::TypeRef(key) => {
                self.out.push(TAG_TYPE);
                self.encode_str(key.type_id().as_str());
            }
            Value::Ref(RefValue { digest }) => {
                self.out.push(TAG_REF);
                self.out.extend_from_slice(digest.as_bytes());
                self.links.insert(*digest);
            }
        }
        Ok(())
    }

    fn encode_resource(&mut self, dict: &ResourceDict, depth: usize) -> Result<(), PackingError> {
        if depth > MAX_DEPTH {
            return Err(PackingError::DepthExceeded(MAX_DEPTH));
        }
        self.out.push(TAG_RES);
        self.encode_str(dict.type_key().type_id().as_str());
        self.encode_len(dict.fields().len());
        for (name, value) in dict.fields() {
            self.encode_str(name);
            self.encode_value(value, depth + 1)?;
        }
        Ok(())
    }

    fn encode_str(&mut self, s: &str) {
        self.encode_len(s.len());
        self.out.extend_from_slice(s.as_bytes());
    }

    fn encode_len(&mut self, len: usize) {
        self.out.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Collapse NaNs to one bit pattern and negative zero to positive zero, so
/// semantically equal doubles cannot hash differently.
fn canonical_float_bits(x: f64) -> u64 {
    if x.is_nan() {
        CANONICAL_NAN
    } else if x == 0.0 {
        0
    } else {
        x.to_bits()
    }
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn decode_value(&mut self, depth: usize) -> Result<Value, PackingError> {
        if depth > MAX_DEPTH {
            return Err(PackingError::DepthExceeded(MAX_DEPTH));
        }
        let tag_pos = self.pos;
        let tag = self.take_byte()?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_INT => Ok(Value::Int(i64::from_be_bytes(self.take_array()?))),
            TAG_FLOAT => Ok(Value::Float(f64::from_bits(u64::from_be_bytes(
                self.take_array()?,
            )))),
            TAG_STR => Ok(Value::Str(self.take_str()?)),
            TAG_BYTES => {
                let len = self.take_len()?;
                Ok(Value::Bytes(self.take_bytes(len)?.to_vec()))
            }
            TAG_LIST => {
                let count = self.take_len()?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(self.decode_value(depth + 1)?);
                }
                Ok(Value::List(items))
            }
            TAG_MAP => {
                let count = self.take_len()?;
                let mut entries = std::collections::BTreeMap::new();
                for _ in 0..count {
                    let key = self.take_str()?;
                    let entry = self.decode_value(depth + 1)?;
                    entries.insert(key, entry);
                }
                Ok(Value::Map(entries))
            }
            TAG_RES => {
                let type_id = self.take_str()?;
                let type_key = TypeKey::from_type_id(&type_id)?;
                let count = self.take_len()?;
                let mut dict = ResourceDict::new(type_key);
                for _ in 0..count {
                    let name = self.take_str()?;
                    let value = self.decode_value(depth + 1)?;
                    dict.push_field(name, value);
                }
                Ok(Value::resource(dict))
            }
            TAG_REF => {
                let bytes: [u8; Digest::LEN] = self.take_array()?;
                Ok(Value::Ref(RefValue::new(Digest::from_bytes(bytes))))
            }
            TAG_TYPE => {
                let type_id = self.take_str()?;
                Ok(Value::TypeRef(TypeKey::from_type_id(&type_id)?))
            }
            other => Err(PackingError::UnknownTag(other, tag_pos)),
        }
    }

    fn take_byte(&mut self) -> Result<u8, PackingError> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or(PackingError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], PackingError> {
        if self.input.len() - self.pos < len {
            return Err(PackingError::InvalidLength(len as u64));
        }
        let slice = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PackingError> {
        let slice = self.take_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take_len(&mut self) -> Result<usize, PackingError> {
        let len = u64::from_be_bytes(self.take_array()?);
        if len > (self.input.len() - self.pos) as u64 {
            return Err(PackingError::InvalidLength(len));
        }
        Ok(len as usize)
    }

    fn take_str(&mut self) -> Result<String, PackingError> {
        let len = self.take_len()?;
        let bytes = self.take_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PackingError::InvalidUtf8)
    }
}

// --- On-disk framing (filesystem backend) ---

const MAGIC: [u8; 4] = *b"CHRN";
const FORMAT_VERSION: u16 = 1;

/// Wrap canonical bytes with the on-disk header.
pub fn frame(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 6);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

/// Strip and check the on-disk header.
pub fn unframe(data: &[u8]) -> Result<&[u8], PackingError> {
    if data.len() < 6 {
        return Err(PackingError::BadFraming("object shorter than header".into()));
    }
    if data[..4] != MAGIC {
        return Err(PackingError::BadFraming("bad magic bytes".into()));
    }
    let version = u16::from_be_bytes([data[4], data[5]]);
    if version != FORMAT_VERSION {
        return Err(PackingError::BadFraming(format!(
            "unsupported format version {}",
            version
        )));
    }
    Ok(&data[6..])
}
