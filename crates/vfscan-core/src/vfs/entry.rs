//! Directory entries of the virtual filesystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::VirtualAddress;

/// What an address is when browsing the file tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file, scanned
    File,
    /// Plain directory, never scanned
    Directory,
    /// A file that was expanded into members. Browsed like a directory,
    /// its raw bytes stay scannable.
    Container,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Container => "container",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntryKind::File),
            "directory" => Some(EntryKind::Directory),
            "container" => Some(EntryKind::Container),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub changed: Option<DateTime<Utc>>,
}

/// Name and attributes recorded for one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDirectoryEntry {
    pub address: VirtualAddress,
    /// Address of the containing directory or container, if any
    pub parent: Option<VirtualAddress>,
    pub name: String,
    /// Path of the containing directory, always starting with `/`
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub timestamps: Timestamps,
    pub allocated: bool,
}

impl VirtualDirectoryEntry {
    pub fn file(address: VirtualAddress, path: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            address,
            parent: None,
            name: name.into(),
            path: normalize_path(&path.into()),
            kind: EntryKind::File,
            size,
            timestamps: Timestamps::default(),
            allocated: true,
        }
    }

    pub fn directory(address: VirtualAddress, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Directory,
            ..Self::file(address, path, name, 0)
        }
    }

    pub fn with_parent(mut self, parent: VirtualAddress) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Full path of this entry inside the virtual filesystem
    pub fn full_path(&self) -> String {
        if self.path.ends_with('/') {
            format!("{}{}", self.path, self.name)
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// Directories carry no content of their own
    pub fn is_scannable(&self) -> bool {
        self.kind != EntryKind::Directory
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
