//! Virtual filesystem: addresses, directory entries and content access
pub mod address;
pub mod drivers;
pub mod entry;
pub mod glob;
pub mod interner;
pub mod source;
pub mod stream;

pub use address::{AddressError, AddressSegment, DriverTag, VirtualAddress, SEGMENT_DELIMITER};
pub use drivers::{DriverLimits, RangePayload};
pub use entry::{EntryKind, Timestamps, VirtualDirectoryEntry};
pub use glob::AddressGlob;
pub use interner::{AddressId, AddressInterner};
pub use source::{EvidenceSource, MemorySource, MountedSource, VfsSource};
pub use stream::{Allocation, ContentStream, Extent, FileStream, MemoryStream, RangeStream};
