//! Tar archive expansion

use std::fs::File;
use std::io::Seek;

use crate::error::{Result, ScanError};
use crate::scanner::expander::{ContainerExpander, ExpanderFactory, MemberDescriptor, Members};
use crate::scanner::{FactKey, Metadata, ScanCx, ScannerDescriptor, ScannerFactory, ScannerKind};
use crate::vfs::drivers::{list_tar, read_tar_member};
use crate::vfs::{DriverTag, EntryKind, Timestamps, VirtualDirectoryEntry};

pub const DESCRIPTOR: ScannerDescriptor = ScannerDescriptor {
    name: "TarExpand",
    description: "Exposes the entries of tar archives",
    kind: ScannerKind::Expander,
    order: 99,
    enabled_by_default: true,
    depends: &["TypeDetect"],
    provides: &[],
    consumes: &[FactKey::ContentType],
};

pub fn factory() -> Box<dyn ScannerFactory> {
    Box::new(ExpanderFactory::new(TarExpander))
}

pub struct TarExpander;

impl ContainerExpander for TarExpander {
    fn tag(&self) -> DriverTag {
        DriverTag::Tar
    }

    fn is_relevant(&self, metadata: &Metadata, _entry: &VirtualDirectoryEntry) -> bool {
        metadata.content_type() == Some("application/x-tar")
    }

    fn enumerate_members<'a>(&'a self, container: File, cx: &'a ScanCx<'_>) -> Result<Members<'a>> {
        let listing = list_tar(&container, cx.address())?;
        let limits = cx.run().config().driver_limits();
        tracing::debug!(address = %cx.address(), entries = listing.len(), "Expanding tar");

        // headers first, then each entry is read again from the start
        Ok(Box::new(listing.into_iter().map(move |member| -> Result<MemberDescriptor> {
            let member = member?;
            let payload = member.index.to_string();
            let mut descriptor = MemberDescriptor::file(&member.name, payload.clone(), member.size);
            descriptor.timestamps = Timestamps {
                modified: member.modified,
                ..Default::default()
            };
            if member.is_dir {
                descriptor.kind = EntryKind::Directory;
                return Ok(descriptor);
            }

            let member_address = cx.address().derive(DriverTag::Tar, &payload);
            let mut reader = &container;
            reader
                .rewind()
                .map_err(|e| ScanError::decode(&member_address, e))?;
            descriptor.content = Some(read_tar_member(reader, member.index, &member_address, limits)?);
            Ok(descriptor)
        })))
    }
}
