//! Persistence of completion records, directory entries and scanner results
//!
//! The orchestrator only needs the small contract of [`Store`]; any engine
//! can sit behind it. Two implementations ship with the crate: a SQLite
//! database for real runs and an in-memory store for tests and dry runs.

pub mod database;
pub mod memory;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vfs::{AddressGlob, VirtualAddress, VirtualDirectoryEntry};

pub use database::SqliteStore;
pub use memory::MemoryStore;

/// One persisted result of a scanner for an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub scanner: String,
    pub key: String,
    pub value: String,
}

/// Record/key-value store used by a run
///
/// Every method reports an unreachable backend as
/// [`ScanError::StoreUnavailable`](crate::ScanError::StoreUnavailable).
pub trait Store: Send + Sync {
    /// Has `scanner` already finished for `address`?
    fn get_completion(&self, address: &VirtualAddress, scanner: &str) -> Result<bool>;

    /// Record that `scanner` finished for `address`. Idempotent.
    fn set_completion(&self, address: &VirtualAddress, scanner: &str) -> Result<()>;

    /// Drop the completion records of `scanner` for every matching address
    fn clear_completions(&self, glob: &AddressGlob, scanner: &str) -> Result<usize>;

    /// Number of completion records, optionally for one scanner only
    fn count_completions(&self, scanner: Option<&str>) -> Result<usize>;

    /// Insert or replace the entry keyed by its address
    fn put_directory_entry(&self, entry: &VirtualDirectoryEntry) -> Result<()>;

    fn get_directory_entry(&self, address: &VirtualAddress) -> Result<Option<VirtualDirectoryEntry>>;

    /// Entries whose parent is `parent`, or top-level entries for `None`,
    /// ordered by address
    fn children(&self, parent: Option<&VirtualAddress>) -> Result<Vec<VirtualDirectoryEntry>>;

    fn count_directory_entries(&self) -> Result<usize>;

    /// Insert or replace the value of (`address`, `scanner`, `key`)
    fn put_attribute(&self, address: &VirtualAddress, scanner: &str, key: &str, value: &str) -> Result<()>;

    /// All attributes of an address, ordered by scanner then key
    fn attributes(&self, address: &VirtualAddress) -> Result<Vec<Attribute>>;

    /// Drop the attributes `scanner` wrote for every matching address
    fn clear_attributes(&self, glob: &AddressGlob, scanner: &str) -> Result<usize>;
}
