use std::fmt::{Display, Formatter};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use gridref_error::{GridRefResult, gridref_err};
use serde::de::{Error as _, SeqAccess, Visitor};
use serde::ser::{Error as _, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix marking an inline value whose payload is base64 encoded binary.
pub const BASE64_PREFIX: &str = "base64:";

/// A value stored literally in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InlineValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl InlineValue {
    /// Encode raw bytes as a text-safe inline value.
    ///
    /// ASCII payloads are stored as-is, anything else is base64 armored with [`BASE64_PREFIX`].
    pub fn encode(bytes: &[u8]) -> Self {
        if bytes.is_ascii() {
            InlineValue::Text(bytes.iter().map(|b| char::from(*b)).collect())
        } else {
            InlineValue::Text(format!("{BASE64_PREFIX}{}", STANDARD.encode(bytes)))
        }
    }

    /// The raw bytes this value stands for, undoing any base64 armoring.
    pub fn decode(&self) -> GridRefResult<Vec<u8>> {
        let raw = match self {
            InlineValue::Text(text) => text.as_bytes(),
            InlineValue::Bytes(bytes) => bytes.as_slice(),
        };
        match raw.strip_prefix(BASE64_PREFIX.as_bytes()) {
            Some(armored) => Ok(STANDARD.decode(armored)?),
            None => Ok(raw.to_vec()),
        }
    }

    /// Borrow the value as text, failing for byte payloads that are not valid UTF-8.
    pub fn as_text(&self) -> GridRefResult<&str> {
        match self {
            InlineValue::Text(text) => Ok(text),
            InlineValue::Bytes(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| gridref_err!(Manifest: "inline bytes are not valid UTF-8: {e}")),
        }
    }

    /// Convert into the text form required by the persisted manifest.
    pub fn into_text(self) -> GridRefResult<Self> {
        match self {
            InlineValue::Text(_) => Ok(self),
            InlineValue::Bytes(bytes) => String::from_utf8(bytes)
                .map(InlineValue::Text)
                .map_err(|e| {
                    gridref_err!(
                        Manifest: "binary inline value must be {}-armored before it reaches the manifest: {}",
                        BASE64_PREFIX,
                        e
                    )
                }),
        }
    }
}

/// A byte range within an external resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub uri: String,
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(uri: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            uri: uri.into(),
            offset,
            length,
        }
    }
}

impl Display for ByteRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}..{}]", self.uri, self.offset, self.offset + self.length)
    }
}

/// A single manifest entry.
///
/// Serialized as a JSON string for inline values, `[uri, offset, length]` for byte ranges and
/// `[uri]` for a reference to a whole resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefValue {
    Inline(InlineValue),
    Range(ByteRange),
    Whole(String),
}

impl RefValue {
    pub fn text(text: impl Into<String>) -> Self {
        RefValue::Inline(InlineValue::Text(text.into()))
    }

    pub fn range(uri: impl Into<String>, offset: u64, length: u64) -> Self {
        RefValue::Range(ByteRange::new(uri, offset, length))
    }

    pub fn as_inline(&self) -> Option<&InlineValue> {
        match self {
            RefValue::Inline(inline) => Some(inline),
            _ => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, RefValue::Inline(_))
    }

    /// The URI of a referenced resource, if any.
    pub fn uri(&self) -> Option<&str> {
        match self {
            RefValue::Inline(_) => None,
            RefValue::Range(range) => Some(&range.uri),
            RefValue::Whole(uri) => Some(uri),
        }
    }

    pub(crate) fn map_uri(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            RefValue::Inline(_) => self,
            RefValue::Range(range) => RefValue::Range(ByteRange {
                uri: f(range.uri),
                ..range
            }),
            RefValue::Whole(uri) => RefValue::Whole(f(uri)),
        }
    }

    /// Convert byte payloads into text, see [`InlineValue::into_text`].
    pub fn into_text(self) -> GridRefResult<Self> {
        match self {
            RefValue::Inline(inline) => inline.into_text().map(RefValue::Inline),
            other => Ok(other),
        }
    }
}

impl Serialize for RefValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RefValue::Inline(inline) => serializer.serialize_str(inline.as_text().map_err(S::Error::custom)?),
            RefValue::Range(range) => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(&range.uri)?;
                seq.serialize_element(&range.offset)?;
                seq.serialize_element(&range.length)?;
                seq.end()
            }
            RefValue::Whole(uri) => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element(uri)?;
                seq.end()
            }
        }
    }
}

struct RefValueVisitor;

impl<'de> Visitor<'de> for RefValueVisitor {
    type Value = RefValue;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("an inline string, [uri] or [uri, offset, length]")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(RefValue::text(v))
    }

    fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(RefValue::text(v))
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(RefValue::Inline(InlineValue::Bytes(v.to_vec())))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let uri: String = seq
            .next_element()?
            .ok_or_else(|| A::Error::invalid_length(0, &self))?;
        let Some(offset) = seq.next_element::<u64>()? else {
            return Ok(RefValue::Whole(uri));
        };
        let length: u64 = seq
            .next_element()?
            .ok_or_else(|| A::Error::invalid_length(2, &self))?;
        if seq.next_element::<serde::de::IgnoredAny>()?.is_some() {
            return Err(A::Error::invalid_length(4, &self));
        }
        Ok(RefValue::range(uri, offset, length))
    }
}

impl<'de> Deserialize<'de> for RefValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RefValueVisitor)
    }
}
