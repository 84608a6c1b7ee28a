//! Content sources: where the bytes of an address come from

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::error::{Result, ScanError};

use super::drivers::{open_layer, DriverLimits};
use super::{
    Allocation, ContentStream, FileStream, MemoryStream, Timestamps, VirtualAddress,
    VirtualDirectoryEntry,
};

/// An evidence set: lists its native files and opens them by root address
pub trait EvidenceSource: Send + Sync {
    /// Identifier of the evidence set
    fn name(&self) -> &str;

    /// Directory entries of every native file and directory
    fn roots(&self) -> Result<Vec<VirtualDirectoryEntry>>;

    fn open_root(&self, root: &VirtualAddress) -> Result<Box<dyn ContentStream>>;
}

fn not_found(root: &VirtualAddress) -> ScanError {
    ScanError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no root file {}", root),
    ))
}

/// Resolves any address, root or derived, into a readable stream
#[derive(Clone)]
pub struct VfsSource {
    evidence: Arc<dyn EvidenceSource>,
    limits: DriverLimits,
}

impl VfsSource {
    pub fn new(evidence: Arc<dyn EvidenceSource>, limits: DriverLimits) -> Self {
        Self { evidence, limits }
    }

    pub fn evidence(&self) -> &dyn EvidenceSource {
        self.evidence.as_ref()
    }

    /// Open the root, then let each segment's driver peel one layer
    pub fn open(&self, address: &VirtualAddress) -> Result<Box<dyn ContentStream>> {
        let mut current = address.root_of();
        let mut stream = self.evidence.open_root(&current)?;
        for segment in address.segments() {
            current = current.derive(segment.tag(), segment.payload());
            stream = open_layer(stream, &current, &segment, self.limits)?;
        }
        Ok(stream)
    }
}

/// Files mounted on the examiner's disk
///
/// A directory is walked in sorted order and every file or directory gets
/// a numeric root address, so the same tree yields the same addresses on
/// every run. A single image file becomes root `1`.
pub struct MountedSource {
    name: String,
    entries: Vec<VirtualDirectoryEntry>,
    paths: HashMap<VirtualAddress, PathBuf>,
}

impl MountedSource {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path)
            .with_context(|| format!("Failed to stat evidence {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut source = Self {
            name,
            entries: Vec::new(),
            paths: HashMap::new(),
        };

        if meta.is_dir() {
            source.walk(path, "/", None)?;
        } else {
            source.add_file(path, "/", None, &meta)?;
        }

        tracing::info!(
            "Mounted evidence {} with {} entries",
            path.display(),
            source.entries.len()
        );
        Ok(source)
    }

    fn next_address(&self) -> anyhow::Result<VirtualAddress> {
        Ok(VirtualAddress::root((self.entries.len() + 1).to_string())?)
    }

    fn walk(&mut self, dir: &Path, vpath: &str, parent: Option<VirtualAddress>) -> anyhow::Result<()> {
        let mut children: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .collect::<io::Result<Vec<_>>>()?;
        children.sort_by_key(|e| e.file_name());

        for child in children {
            let path = child.path();
            let meta = fs::symlink_metadata(&path)?;
            if meta.is_dir() {
                let address = self.next_address()?;
                let name = child.file_name().to_string_lossy().into_owned();
                let mut entry = VirtualDirectoryEntry::directory(address.clone(), vpath, name)
                    .with_timestamps(timestamps(&meta));
                entry.parent = parent.clone();
                let child_path = entry.full_path();
                self.entries.push(entry);
                self.walk(&path, &child_path, Some(address))?;
            } else if meta.is_file() {
                self.add_file(&path, vpath, parent.clone(), &meta)?;
            } else {
                tracing::debug!("Skipping special file {}", path.display());
            }
        }
        Ok(())
    }

    fn add_file(
        &mut self,
        path: &Path,
        vpath: &str,
        parent: Option<VirtualAddress>,
        meta: &fs::Metadata,
    ) -> anyhow::Result<()> {
        let address = self.next_address()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut entry = VirtualDirectoryEntry::file(address.clone(), vpath, name, meta.len())
            .with_timestamps(timestamps(meta));
        entry.parent = parent;
        self.paths.insert(address, path.to_path_buf());
        self.entries.push(entry);
        Ok(())
    }
}

fn timestamps(meta: &fs::Metadata) -> Timestamps {
    Timestamps {
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        accessed: meta.accessed().ok().map(DateTime::<Utc>::from),
        changed: meta.created().ok().map(DateTime::<Utc>::from),
    }
}

impl EvidenceSource for MountedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn roots(&self) -> Result<Vec<VirtualDirectoryEntry>> {
        Ok(self.entries.clone())
    }

    fn open_root(&self, root: &VirtualAddress) -> Result<Box<dyn ContentStream>> {
        let path = self.paths.get(root).ok_or_else(|| not_found(root))?;
        Ok(Box::new(FileStream::open(path)?))
    }
}

struct MemoryFile {
    data: Vec<u8>,
    slack: Vec<u8>,
    next_unit: Vec<u8>,
    allocation: Option<Allocation>,
}

/// Evidence held in memory, with optional slack and extent lists
#[derive(Default)]
pub struct MemorySource {
    name: String,
    entries: Vec<VirtualDirectoryEntry>,
    files: HashMap<VirtualAddress, MemoryFile>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a root file named `name` in directory `path`
    pub fn with_file(mut self, root: &str, path: &str, name: &str, data: Vec<u8>) -> Result<Self> {
        let address = VirtualAddress::root(root)?;
        self.entries.push(VirtualDirectoryEntry::file(
            address.clone(),
            path,
            name,
            data.len() as u64,
        ));
        self.files.insert(
            address,
            MemoryFile {
                data,
                slack: Vec::new(),
                next_unit: Vec::new(),
                allocation: None,
            },
        );
        Ok(self)
    }

    pub fn with_directory(mut self, root: &str, path: &str, name: &str) -> Result<Self> {
        let address = VirtualAddress::root(root)?;
        self.entries
            .push(VirtualDirectoryEntry::directory(address, path, name));
        Ok(self)
    }

    /// Slack of the last unit of `root` plus the start of the unit after it
    pub fn with_slack(mut self, root: &str, slack: Vec<u8>, next_unit: Vec<u8>) -> Result<Self> {
        let address = VirtualAddress::root(root)?;
        let file = self.files.get_mut(&address).ok_or_else(|| not_found(&address))?;
        file.slack = slack;
        file.next_unit = next_unit;
        Ok(self)
    }

    pub fn with_allocation(mut self, root: &str, allocation: Allocation) -> Result<Self> {
        let address = VirtualAddress::root(root)?;
        let file = self.files.get_mut(&address).ok_or_else(|| not_found(&address))?;
        file.allocation = Some(allocation);
        Ok(self)
    }
}

impl EvidenceSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn roots(&self) -> Result<Vec<VirtualDirectoryEntry>> {
        Ok(self.entries.clone())
    }

    fn open_root(&self, root: &VirtualAddress) -> Result<Box<dyn ContentStream>> {
        let file = self.files.get(root).ok_or_else(|| not_found(root))?;
        let mut stream = MemoryStream::new(file.data.clone())
            .with_slack(file.slack.clone(), file.next_unit.clone());
        if let Some(allocation) = &file.allocation {
            stream = stream.with_allocation(allocation.clone());
        }
        Ok(Box::new(stream))
    }
}
