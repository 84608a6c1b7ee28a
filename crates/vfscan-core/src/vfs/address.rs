//! Virtual address grammar
//!
//! Every unit of content in an evidence set is named by a printable
//! address. A root address names a file native to the evidence (for
//! example an inode number); a derived address appends one segment per
//! container layer:
//!
//! ```text
//! 42            root file 42
//! 42|Z3         fourth member of the zip archive stored in 42
//! 42|Z3|G0      the gunzipped content of that member
//! 42|o1024:512  512 bytes carved from offset 1024 of 42
//! 42|m2         third attachment of the mail message stored in 42
//! ```
//!
//! A segment is a one-character driver tag followed by a payload that only
//! the driver understands. Payload bytes `|` and `%` are percent-escaped so
//! any payload can be appended without failing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Separates the root and each derived segment
pub const SEGMENT_DELIMITER: char = '|';

/// Identifies the layer driver that produced a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DriverTag {
    /// Member of a zip archive, payload is the member index
    Zip,
    /// Decompressed gzip stream, payload is the stream index
    Gzip,
    /// Entry of a tar archive, payload is the entry index
    Tar,
    /// Leaf part of a MIME message, payload is the part index
    Mime,
    /// Byte range of the parent, payload is `offset:length`
    Offset,
}

impl DriverTag {
    pub fn code(self) -> char {
        match self {
            DriverTag::Zip => 'Z',
            DriverTag::Gzip => 'G',
            DriverTag::Tar => 'T',
            DriverTag::Mime => 'm',
            DriverTag::Offset => 'o',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'Z' => Some(DriverTag::Zip),
            'G' => Some(DriverTag::Gzip),
            'T' => Some(DriverTag::Tar),
            'm' => Some(DriverTag::Mime),
            'o' => Some(DriverTag::Offset),
            _ => None,
        }
    }
}

impl fmt::Display for DriverTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Why an address string could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("{input:?} has an empty root")]
    EmptyRoot { input: String },

    #[error("{input:?} cannot be a root, it contains the segment delimiter")]
    DelimiterInRoot { input: String },

    #[error("{input:?} has an empty segment at position {position}")]
    EmptySegment { input: String, position: usize },

    #[error("{input:?} uses unknown driver tag {tag:?}")]
    UnknownDriver { input: String, tag: char },

    #[error("{input:?} contains an invalid escape sequence")]
    BadEscape { input: String },
}

/// One derived layer: a driver tag plus its (unescaped) payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressSegment {
    tag: DriverTag,
    payload: String,
}

impl AddressSegment {
    pub fn new(tag: DriverTag, payload: impl Into<String>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    pub fn tag(&self) -> DriverTag {
        self.tag
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    fn decode(raw: &str, input: &str, position: usize) -> Result<Self, AddressError> {
        let mut chars = raw.chars();
        let code = chars.next().ok_or_else(|| AddressError::EmptySegment {
            input: input.to_string(),
            position,
        })?;
        let tag = DriverTag::from_code(code).ok_or_else(|| AddressError::UnknownDriver {
            input: input.to_string(),
            tag: code,
        })?;
        let payload = unescape(chars.as_str()).ok_or_else(|| AddressError::BadEscape {
            input: input.to_string(),
        })?;
        Ok(Self { tag, payload })
    }
}

impl fmt::Display for AddressSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag.code(), escape(&self.payload))
    }
}

/// Printable, totally ordered identifier of a file in the virtual filesystem
///
/// Equality and ordering are those of the printed form. Addresses are
/// immutable and cheap to clone; deriving a child never touches the parent.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualAddress {
    text: Arc<str>,
}

impl VirtualAddress {
    /// Address of a file native to the evidence container
    pub fn root(id: impl AsRef<str>) -> Result<Self, AddressError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(AddressError::EmptyRoot {
                input: id.to_string(),
            });
        }
        if id.contains(SEGMENT_DELIMITER) {
            return Err(AddressError::DelimiterInRoot {
                input: id.to_string(),
            });
        }
        Ok(Self { text: id.into() })
    }

    /// Append one segment. Deterministic: equal inputs print identically.
    pub fn derive(&self, tag: DriverTag, payload: &str) -> Self {
        let text = format!(
            "{}{}{}{}",
            self.text,
            SEGMENT_DELIMITER,
            tag.code(),
            escape(payload)
        );
        Self { text: text.into() }
    }

    /// Parse a printed address, validating every segment
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let mut parts = input.split(SEGMENT_DELIMITER);
        let root = parts.next().unwrap_or_default();
        if root.is_empty() {
            return Err(AddressError::EmptyRoot {
                input: input.to_string(),
            });
        }
        for (position, raw) in parts.enumerate() {
            AddressSegment::decode(raw, input, position)?;
        }
        Ok(Self { text: input.into() })
    }

    /// The root address this one is ultimately backed by
    pub fn root_of(&self) -> VirtualAddress {
        match self.text.find(SEGMENT_DELIMITER) {
            Some(end) => Self {
                text: self.text[..end].into(),
            },
            None => self.clone(),
        }
    }

    /// The root identifier as a plain string
    pub fn root_id(&self) -> &str {
        match self.text.find(SEGMENT_DELIMITER) {
            Some(end) => &self.text[..end],
            None => &self.text,
        }
    }

    pub fn is_root(&self) -> bool {
        !self.text.contains(SEGMENT_DELIMITER)
    }

    /// The segment appended last, if this is a derived address
    pub fn last_segment(&self) -> Option<AddressSegment> {
        let start = self.text.rfind(SEGMENT_DELIMITER)?;
        AddressSegment::decode(&self.text[start + 1..], &self.text, self.depth() - 1).ok()
    }

    /// All derived segments, nearest to the root first
    pub fn segments(&self) -> Vec<AddressSegment> {
        self.text
            .split(SEGMENT_DELIMITER)
            .skip(1)
            .enumerate()
            .filter_map(|(position, raw)| AddressSegment::decode(raw, &self.text, position).ok())
            .collect()
    }

    /// Number of derived segments
    pub fn depth(&self) -> usize {
        self.text.matches(SEGMENT_DELIMITER).count()
    }

    /// The address one layer up, `None` for roots
    pub fn parent(&self) -> Option<VirtualAddress> {
        let end = self.text.rfind(SEGMENT_DELIMITER)?;
        Some(Self {
            text: self.text[..end].into(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({})", self.text)
    }
}

impl FromStr for VirtualAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VirtualAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for VirtualAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

fn escape(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    for c in payload.chars() {
        match c {
            '%' => out.push_str("%25"),
            SEGMENT_DELIMITER => out.push_str("%7C"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        // only the forms `escape` writes, so equal payloads print equally
        let hex: String = chars.by_ref().take(2).collect();
        match hex.as_str() {
            "25" => out.push('%'),
            "7C" => out.push(SEGMENT_DELIMITER),
            _ => return None,
        }
    }
    Some(out)
}
