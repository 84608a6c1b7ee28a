//! ZIP archive expansion

use std::fs::File;

use zip::ZipArchive;

use crate::error::{Result, ScanError};
use crate::scanner::expander::{ContainerExpander, ExpanderFactory, MemberDescriptor, Members};
use crate::scanner::{FactKey, Metadata, ScanCx, ScannerDescriptor, ScannerFactory, ScannerKind};
use crate::vfs::drivers::read_zip_member;
use crate::vfs::{DriverTag, EntryKind, Timestamps, VirtualDirectoryEntry};

pub const DESCRIPTOR: ScannerDescriptor = ScannerDescriptor {
    name: "ArchiveExpand",
    description: "Exposes the members of ZIP archives",
    kind: ScannerKind::Expander,
    order: 99,
    enabled_by_default: true,
    depends: &["TypeDetect"],
    provides: &[],
    consumes: &[FactKey::ContentType],
};

pub fn factory() -> Box<dyn ScannerFactory> {
    Box::new(ExpanderFactory::new(ZipExpander))
}

pub struct ZipExpander;

impl ContainerExpander for ZipExpander {
    fn tag(&self) -> DriverTag {
        DriverTag::Zip
    }

    fn is_relevant(&self, metadata: &Metadata, _entry: &VirtualDirectoryEntry) -> bool {
        metadata.content_type() == Some("application/zip")
    }

    fn enumerate_members<'a>(&'a self, container: File, cx: &'a ScanCx<'_>) -> Result<Members<'a>> {
        let mut archive =
            ZipArchive::new(container).map_err(|e| ScanError::decode(cx.address(), e))?;
        let limits = cx.run().config().driver_limits();
        tracing::debug!(address = %cx.address(), members = archive.len(), "Expanding zip");

        Ok(Box::new((0..archive.len()).map(move |index| {
            let member_address = cx.address().derive(DriverTag::Zip, &index.to_string());
            let member = read_zip_member(&mut archive, index, &member_address, limits)?;
            let mut descriptor = MemberDescriptor::file(&member.name, index.to_string(), member.size);
            descriptor.timestamps = Timestamps {
                modified: member.modified,
                ..Default::default()
            };
            if member.is_dir {
                descriptor.kind = EntryKind::Directory;
            } else {
                descriptor.content = Some(member.data);
            }
            Ok(descriptor)
        })))
    }
}
