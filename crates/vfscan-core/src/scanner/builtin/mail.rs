//! RFC 2822 message expansion: every leaf MIME part becomes a child

use std::fs::File;

use crate::error::Result;
use crate::scanner::expander::{ContainerExpander, ExpanderFactory, MemberDescriptor, Members};
use crate::scanner::{FactKey, Metadata, ScanCx, ScannerDescriptor, ScannerFactory, ScannerKind};
use crate::vfs::drivers::{mime_parts, read_bounded};
use crate::vfs::{DriverTag, Timestamps, VirtualDirectoryEntry};

pub const DESCRIPTOR: ScannerDescriptor = ScannerDescriptor {
    name: "MailExpand",
    description: "Exposes the parts and attachments of mail messages",
    kind: ScannerKind::Expander,
    order: 99,
    enabled_by_default: true,
    depends: &["TypeDetect"],
    provides: &[],
    consumes: &[FactKey::ContentType],
};

pub fn factory() -> Box<dyn ScannerFactory> {
    Box::new(ExpanderFactory::new(MailExpander))
}

pub struct MailExpander;

/// Attachment name, else a name built from the part index
pub fn part_name(name: Option<&str>, index: usize) -> String {
    match name.map(|n| n.trim_matches('/')).filter(|n| !n.is_empty()) {
        // only the last component, names are not paths here
        Some(name) => name.rsplit('/').next().unwrap_or(name).to_string(),
        None => format!("Attachment {}", index),
    }
}

impl ContainerExpander for MailExpander {
    fn tag(&self) -> DriverTag {
        DriverTag::Mime
    }

    fn is_relevant(&self, metadata: &Metadata, _entry: &VirtualDirectoryEntry) -> bool {
        metadata.content_type() == Some("message/rfc822")
    }

    fn enumerate_members<'a>(&'a self, container: File, cx: &'a ScanCx<'_>) -> Result<Members<'a>> {
        let limits = cx.run().config().driver_limits();
        let raw = read_bounded(container, cx.address(), limits, "message")?;
        let message = mime_parts(&raw, cx.address())?;

        if let Some(subject) = &message.subject {
            cx.record_attribute("subject", subject)?;
        }
        if let Some(date) = message.date {
            cx.record_attribute("date", &date.to_rfc3339())?;
        }
        tracing::debug!(address = %cx.address(), parts = message.parts.len(), "Expanding mail");

        let timestamps = Timestamps {
            modified: message.date,
            ..Default::default()
        };
        Ok(Box::new(message.parts.into_iter().enumerate().map(move |(index, part)| -> Result<MemberDescriptor> {
            let part = part?;
            let name = part_name(part.name.as_deref(), index);
            let mut member = MemberDescriptor::file(&name, index.to_string(), part.data.len() as u64);
            member.timestamps = timestamps.clone();
            member.content = Some(part.data);
            Ok(member)
        })))
    }
}
