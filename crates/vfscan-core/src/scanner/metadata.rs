//! Per-address facts shared by the scanners of one pass

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::Attribute;

/// Kinds of fact a scanner can publish for later scanners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactKey {
    /// MIME-like content type, e.g. `application/zip`
    ContentType,
    /// Short human-readable description of the magic number
    Magic,
    /// Name of the file as known to its container
    FileName,
    /// Hex MD5 digest of the logical content
    Md5,
}

impl FactKey {
    pub const ALL: [FactKey; 4] = [
        FactKey::ContentType,
        FactKey::Magic,
        FactKey::FileName,
        FactKey::Md5,
    ];

    /// Attribute key under which the fact is persisted
    pub fn as_str(self) -> &'static str {
        match self {
            FactKey::ContentType => "content-type",
            FactKey::Magic => "magic",
            FactKey::FileName => "file-name",
            FactKey::Md5 => "md5",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fact {
    ContentType(String),
    Magic(String),
    FileName(String),
    Md5(String),
}

impl Fact {
    pub fn key(&self) -> FactKey {
        match self {
            Fact::ContentType(_) => FactKey::ContentType,
            Fact::Magic(_) => FactKey::Magic,
            Fact::FileName(_) => FactKey::FileName,
            Fact::Md5(_) => FactKey::Md5,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Fact::ContentType(v) | Fact::Magic(v) | Fact::FileName(v) | Fact::Md5(v) => v,
        }
    }

    pub fn from_key(key: FactKey, value: impl Into<String>) -> Self {
        let value = value.into();
        match key {
            FactKey::ContentType => Fact::ContentType(value),
            FactKey::Magic => Fact::Magic(value),
            FactKey::FileName => Fact::FileName(value),
            FactKey::Md5 => Fact::Md5(value),
        }
    }
}

/// Append-only fact map for one address in one pass
///
/// The first scanner to record a fact wins; later writes of the same key
/// are dropped so a scanner can never overwrite what an earlier one in the
/// run order decided.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    facts: BTreeMap<FactKey, Fact>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from attributes persisted by earlier passes
    pub fn from_attributes<'a>(attributes: impl IntoIterator<Item = &'a Attribute>) -> Self {
        let mut metadata = Self::new();
        for attr in attributes {
            if let Some(key) = FactKey::parse(&attr.key) {
                metadata.record(Fact::from_key(key, attr.value.clone()));
            }
        }
        metadata
    }

    /// Returns false when the key was already set
    pub fn record(&mut self, fact: Fact) -> bool {
        match self.facts.entry(fact.key()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(fact);
                true
            }
        }
    }

    pub fn get(&self, key: FactKey) -> Option<&str> {
        self.facts.get(&key).map(Fact::value)
    }

    pub fn contains(&self, key: FactKey) -> bool {
        self.facts.contains_key(&key)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(FactKey::ContentType)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.get(FactKey::FileName)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}
