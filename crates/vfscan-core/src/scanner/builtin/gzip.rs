//! Gzip stream expansion

use std::fs::File;

use crate::error::Result;
use crate::scanner::expander::{ContainerExpander, ExpanderFactory, MemberDescriptor, Members};
use crate::scanner::{FactKey, Metadata, ScanCx, ScannerDescriptor, ScannerFactory, ScannerKind};
use crate::vfs::drivers::gunzip;
use crate::vfs::{DriverTag, VirtualDirectoryEntry};

pub const DESCRIPTOR: ScannerDescriptor = ScannerDescriptor {
    name: "GzipExpand",
    description: "Exposes the decompressed content of gzip streams",
    kind: ScannerKind::Expander,
    order: 99,
    enabled_by_default: true,
    depends: &["TypeDetect"],
    provides: &[],
    consumes: &[FactKey::ContentType],
};

/// Payload of the single member of a gzip stream
pub const MEMBER_PAYLOAD: &str = "0";

pub fn factory() -> Box<dyn ScannerFactory> {
    Box::new(ExpanderFactory::new(GzipExpander))
}

pub struct GzipExpander;

/// Name of the decompressed file: the header name, else the container
/// name without `.gz`, else `Uncompressed`
pub fn member_name(header_name: Option<&str>, parent_name: &str) -> String {
    if let Some(name) = header_name.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    match parent_name.strip_suffix(".gz") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => "Uncompressed".to_string(),
    }
}

impl ContainerExpander for GzipExpander {
    fn tag(&self) -> DriverTag {
        DriverTag::Gzip
    }

    fn is_relevant(&self, metadata: &Metadata, _entry: &VirtualDirectoryEntry) -> bool {
        metadata.content_type() == Some("application/gzip")
    }

    fn enumerate_members<'a>(&'a self, container: File, cx: &'a ScanCx<'_>) -> Result<Members<'a>> {
        let member_address = cx.address().derive(DriverTag::Gzip, MEMBER_PAYLOAD);
        let inflated = gunzip(container, &member_address, cx.run().config().driver_limits())?;

        let name = member_name(inflated.name.as_deref(), &cx.entry().name);
        let mut member = MemberDescriptor::file(&name, MEMBER_PAYLOAD, inflated.data.len() as u64);
        member.timestamps = inflated.timestamps();
        member.content = Some(inflated.data);
        Ok(Box::new(std::iter::once(Ok(member))))
    }
}
