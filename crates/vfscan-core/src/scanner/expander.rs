//! The pattern shared by every container expander
//!
//! An expander copies the container into a shared temp object while the
//! orchestrator streams it, then enumerates the members in `finish` and
//! feeds each one back into the orchestrator as a child address.

use std::fs::File;
use std::sync::Arc;

use crate::error::Result;
use crate::run::TempHandle;
use crate::vfs::{
    ContentStream, DriverTag, EntryKind, MemoryStream, Timestamps, VirtualDirectoryEntry,
};

use super::{Interest, Metadata, ScanCx, ScanInstance, ScannerFactory};

/// One member found inside a container
#[derive(Debug, Clone)]
pub struct MemberDescriptor {
    pub name: String,
    /// Directory of the member inside the container, `""` for the top
    pub path: String,
    pub size: u64,
    pub timestamps: Timestamps,
    /// Segment payload that re-derives the member from the container
    pub payload: String,
    pub kind: EntryKind,
    /// Member bytes when decoding already produced them
    pub content: Option<Vec<u8>>,
}

impl MemberDescriptor {
    /// Split a member path such as `docs/a.txt` into directory and name
    pub fn file(full_name: &str, payload: impl Into<String>, size: u64) -> Self {
        let trimmed = full_name.trim_end_matches('/');
        let (path, name) = match trimmed.rsplit_once('/') {
            Some((path, name)) => (path.to_string(), name.to_string()),
            None => (String::new(), trimmed.to_string()),
        };
        Self {
            name,
            path,
            size,
            timestamps: Timestamps::default(),
            payload: payload.into(),
            kind: EntryKind::File,
            content: None,
        }
    }
}

pub type Members<'a> = Box<dyn Iterator<Item = Result<MemberDescriptor>> + 'a>;

/// A container format the expansion driver can open
pub trait ContainerExpander: Send + Sync + 'static {
    /// Segment tag of the members this expander produces
    fn tag(&self) -> DriverTag;

    /// Cheap check, usually on the detected content type
    fn is_relevant(&self, metadata: &Metadata, entry: &VirtualDirectoryEntry) -> bool;

    /// Lazily list the members of the buffered container. An `Err` item is
    /// one bad member; an `Err` return means the container is unreadable.
    fn enumerate_members<'a>(&'a self, container: File, cx: &'a ScanCx<'_>) -> Result<Members<'a>>;
}

/// Factory wrapping a [`ContainerExpander`]
pub struct ExpanderFactory<E> {
    expander: Arc<E>,
}

impl<E: ContainerExpander> ExpanderFactory<E> {
    pub fn new(expander: E) -> Self {
        Self {
            expander: Arc::new(expander),
        }
    }
}

impl<E: ContainerExpander> ScannerFactory for ExpanderFactory<E> {
    fn new_instance(&self, _entry: &VirtualDirectoryEntry) -> Box<dyn ScanInstance> {
        Box::new(ExpanderInstance {
            expander: self.expander.clone(),
            temp: None,
        })
    }
}

struct ExpanderInstance<E> {
    expander: Arc<E>,
    temp: Option<TempHandle>,
}

impl<E: ContainerExpander> ScanInstance for ExpanderInstance<E> {
    fn process(&mut self, chunk: &[u8], metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<Interest> {
        if self.temp.is_none() {
            if !self.expander.is_relevant(metadata, cx.entry()) {
                return Ok(Interest::Ignore);
            }
            let handle = cx.run().temp().acquire(cx.address(), cx.entry().size)?;
            self.temp = Some(handle);
        }
        if let Some(temp) = &self.temp {
            temp.append(chunk)?;
        }
        Ok(Interest::Continue)
    }

    fn finish(&mut self, _metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()> {
        let Some(temp) = self.temp.take() else {
            return Ok(());
        };
        if !temp.object().is_complete() {
            tracing::debug!(address = %cx.address(), "Temp copy incomplete, re-reading");
            let mut content = cx.open_content()?;
            temp.object().fill_from(&mut content)?;
        }
        expand(self.expander.as_ref(), temp.object().reopen()?, cx)
    }
}

/// Enumerate, record and scan every member, then mark the parent a container
///
/// Bad members and unreadable containers are logged; only fatal errors
/// leave this function.
pub fn expand<E: ContainerExpander + ?Sized>(expander: &E, container: File, cx: &ScanCx<'_>) -> Result<()> {
    let run = cx.run();
    let parent = cx.entry();
    let parent_path = parent.full_path();

    match expander.enumerate_members(container, cx) {
        Ok(members) => {
            for member in members {
                match member {
                    Ok(member) => {
                        let address = cx.address().derive(expander.tag(), &member.payload);
                        let path = if member.path.is_empty() {
                            parent_path.clone()
                        } else {
                            format!("{}/{}", parent_path.trim_end_matches('/'), member.path)
                        };
                        let mut entry = VirtualDirectoryEntry::file(address, path, member.name, member.size)
                            .with_timestamps(member.timestamps);
                        entry.kind = member.kind;

                        let content = member
                            .content
                            .map(|data| Box::new(MemoryStream::new(data)) as Box<dyn ContentStream>);
                        cx.scan_child(entry, content)?;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        run.log().record_error(&e, cx.address(), Some(cx.scanner()));
                        run.stats().member_failed();
                    }
                }
            }
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            run.log().record_error(&e, cx.address(), Some(cx.scanner()));
            run.stats().member_failed();
        }
    }

    cx.mark_container()
}
