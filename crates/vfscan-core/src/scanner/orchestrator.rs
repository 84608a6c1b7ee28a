//! Drives one address through every pending scanner
//!
//! The content is read once, in chunks, and each chunk is handed to every
//! instance that is still interested. Reading stops as soon as nobody is.
//! Then comes one slack pass, one `finish` per remaining instance and the
//! completion records that make the next pass skip what is done.

use std::any::Any;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::run::{RunContext, ScanEventKind};
use crate::vfs::{ContentStream, EntryKind, VirtualAddress, VirtualDirectoryEntry};

use super::resolver::ScanSet;
use super::{Fact, Interest, Metadata, ScanInstance, ScannerDescriptor, ScannerKind};

/// What happened to an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// At least one scanner ran
    Scanned { completed: usize, failed: usize },
    /// Every scanner of the set already has a completion record
    AlreadyComplete,
    /// Directories are never scanned
    NotScannable,
    /// Resource bound hit, nothing was read
    Skipped,
    /// No entry or no content for the address
    Missing,
}

/// View of the run handed to a scanner instance
pub struct ScanCx<'a> {
    run: &'a RunContext,
    entry: &'a VirtualDirectoryEntry,
    scan_set: &'a ScanSet,
    scanner: &'static str,
    kind: ScannerKind,
}

impl<'a> ScanCx<'a> {
    pub(crate) fn new(
        run: &'a RunContext,
        entry: &'a VirtualDirectoryEntry,
        scan_set: &'a ScanSet,
        descriptor: &ScannerDescriptor,
    ) -> Self {
        Self {
            run,
            entry,
            scan_set,
            scanner: descriptor.name,
            kind: descriptor.kind,
        }
    }

    pub fn address(&self) -> &VirtualAddress {
        &self.entry.address
    }

    pub fn entry(&self) -> &VirtualDirectoryEntry {
        self.entry
    }

    pub fn run(&self) -> &RunContext {
        self.run
    }

    /// Scanner set active for this address
    pub fn scan_set(&self) -> &ScanSet {
        self.scan_set
    }

    /// Name of the scanner this context was built for
    pub fn scanner(&self) -> &'static str {
        self.scanner
    }

    /// Persist a result of this scanner for this address
    pub fn record_attribute(&self, key: &str, value: &str) -> Result<()> {
        self.run
            .store()
            .put_attribute(self.address(), self.scanner, key, value)
    }

    /// Re-open the content of this address from its root
    pub fn open_content(&self) -> Result<Box<dyn ContentStream>> {
        self.run.source().open(self.address())
    }

    /// Scanners that run on children this scanner creates
    ///
    /// The scanner itself never runs again below its own output, and
    /// carved ranges are never carved again by any carver.
    pub fn child_scan_set(&self) -> ScanSet {
        match self.kind {
            ScannerKind::Carver => self.scan_set.without_kind(ScannerKind::Carver),
            _ => self.scan_set.without(self.scanner),
        }
    }

    /// Record a child entry and scan it
    ///
    /// `content` may carry bytes the caller already decoded; otherwise the
    /// child is opened again through its address. Returns false when the
    /// child lies beyond the configured depth and was dropped.
    pub fn scan_child(
        &self,
        mut child: VirtualDirectoryEntry,
        content: Option<Box<dyn ContentStream>>,
    ) -> Result<bool> {
        let max_depth = self.run.config().max_depth;
        let depth = child.address.depth();
        if depth > max_depth {
            self.run.log().record(
                ScanEventKind::DepthLimited,
                &child.address,
                Some(self.scanner),
                format!("depth {} exceeds limit {}", depth, max_depth),
            );
            return Ok(false);
        }

        let store = self.run.store();
        child.parent = Some(self.address().clone());
        if let Some(existing) = store.get_directory_entry(&child.address)? {
            if existing.kind == EntryKind::Container && child.kind == EntryKind::File {
                child.kind = EntryKind::Container;
            }
        }
        store.put_directory_entry(&child)?;
        self.run.stats().member_added();

        if child.is_scannable() {
            let scan_set = self.child_scan_set();
            scan_address(self.run, &child.address, &scan_set, content)?;
        }
        Ok(true)
    }

    /// Turn this address into a container node of the file tree
    pub fn mark_container(&self) -> Result<()> {
        let store = self.run.store();
        let mut entry = store
            .get_directory_entry(self.address())?
            .unwrap_or_else(|| self.entry.clone());
        if entry.kind != EntryKind::Container {
            entry.kind = EntryKind::Container;
            store.put_directory_entry(&entry)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Processing,
    Ignoring,
    Failed,
    Finished,
}

struct Slot {
    descriptor: ScannerDescriptor,
    instance: Box<dyn ScanInstance>,
    state: SlotState,
}

impl Slot {
    fn is_processing(&self) -> bool {
        self.state == SlotState::Processing
    }

    /// Record a non-fatal failure and retire the instance. Fatal errors
    /// are handed back to abort the run.
    fn fail(&mut self, run: &RunContext, address: &VirtualAddress, error: ScanError) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }
        run.log()
            .record_error(&error, address, Some(self.descriptor.name));
        self.state = SlotState::Failed;
        Ok(())
    }
}

/// Run every scanner of `scan_set` that has not completed on `address`
///
/// Errors of a single scanner are logged and retire that scanner only;
/// store errors are returned.
pub fn scan_address(
    run: &RunContext,
    address: &VirtualAddress,
    scan_set: &ScanSet,
    preloaded: Option<Box<dyn ContentStream>>,
) -> Result<ScanOutcome> {
    let store = run.store();
    let Some(entry) = store.get_directory_entry(address)? else {
        run.log()
            .record(ScanEventKind::MissingContent, address, None, "no directory entry");
        return Ok(ScanOutcome::Missing);
    };
    if !entry.is_scannable() {
        return Ok(ScanOutcome::NotScannable);
    }

    let mut pending = Vec::new();
    for descriptor in scan_set.iter() {
        if !store.get_completion(address, descriptor.name)? {
            pending.push(*descriptor);
        }
    }
    if pending.is_empty() {
        tracing::trace!(address = %address, "Nothing left to run");
        return Ok(ScanOutcome::AlreadyComplete);
    }

    let mut stream = match preloaded {
        Some(stream) => stream,
        None => match run.source().open(address) {
            Ok(stream) => stream,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                run.log().record_error(&e, address, None);
                run.stats().file_skipped();
                return Ok(ScanOutcome::Missing);
            }
        },
    };

    if let Some(reason) = resource_bound(run.config(), &*stream) {
        run.log()
            .record(ScanEventKind::ResourceBound, address, None, reason);
        run.stats().file_skipped();
        return Ok(ScanOutcome::Skipped);
    }

    tracing::debug!(
        address = %address,
        path = %entry.full_path(),
        "Scanning with {:?}",
        pending.iter().map(|d| d.name).collect::<Vec<_>>()
    );

    let mut metadata = Metadata::from_attributes(&store.attributes(address)?);
    if !entry.name.is_empty() {
        metadata.record(Fact::FileName(entry.name.clone()));
    }

    let mut slots = Vec::with_capacity(pending.len());
    for descriptor in pending {
        match run.factory(descriptor.name) {
            Ok(factory) => slots.push(Slot {
                descriptor,
                instance: factory.new_instance(&entry),
                state: SlotState::Processing,
            }),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                run.log().record_error(&e, address, Some(descriptor.name));
            }
        }
    }

    let chunk_size = run.config().chunk_size;
    let mut chunk = Vec::with_capacity(chunk_size);
    let mut offset = 0u64;
    loop {
        if !slots.iter().any(Slot::is_processing) {
            tracing::trace!(address = %address, offset, "No interest left");
            break;
        }

        chunk.clear();
        let read = Read::by_ref(&mut stream)
            .take(chunk_size as u64)
            .read_to_end(&mut chunk);
        match read {
            Ok(0) => break,
            Ok(n) => {
                tracing::trace!(address = %address, offset, len = n, "Chunk");
                offset += n as u64;
            }
            Err(e) => {
                run.log().record(
                    ScanEventKind::DecodeError,
                    address,
                    None,
                    format!("read failed at offset {}: {}", offset, e),
                );
                break;
            }
        }

        for slot in slots.iter_mut().filter(|s| s.is_processing()) {
            let cx = ScanCx::new(run, &entry, scan_set, &slot.descriptor);
            let instance = &mut slot.instance;
            match guarded(&slot.descriptor, address, || {
                instance.process(&chunk, &mut metadata, &cx)
            }) {
                Ok(Interest::Continue) => {}
                Ok(Interest::Ignore) => slot.state = SlotState::Ignoring,
                Err(e) => slot.fail(run, address, e)?,
            }
        }
    }

    if slots.iter().any(Slot::is_processing) {
        match stream.read_slack(run.config().slack_overread) {
            Ok(slack) if !slack.is_empty() => {
                tracing::trace!(address = %address, len = slack.len(), "Slack");
                for slot in slots.iter_mut().filter(|s| s.is_processing()) {
                    let cx = ScanCx::new(run, &entry, scan_set, &slot.descriptor);
                    let instance = &mut slot.instance;
                    if let Err(e) = guarded(&slot.descriptor, address, || {
                        instance.slack(&slack, &mut metadata, &cx)
                    }) {
                        slot.fail(run, address, e)?;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(address = %address, "Slack unreadable: {}", e),
        }
    }

    for slot in slots.iter_mut().filter(|s| s.is_processing()) {
        let cx = ScanCx::new(run, &entry, scan_set, &slot.descriptor);
        let instance = &mut slot.instance;
        match guarded(&slot.descriptor, address, || instance.finish(&mut metadata, &cx)) {
            Ok(()) => slot.state = SlotState::Finished,
            Err(e) => slot.fail(run, address, e)?,
        }
    }

    let mut completed = 0;
    let mut failed = 0;
    for slot in &slots {
        match slot.state {
            SlotState::Finished | SlotState::Ignoring => {
                store.set_completion(address, slot.descriptor.name)?;
                completed += 1;
            }
            SlotState::Failed => failed += 1,
            SlotState::Processing => {}
        }
    }
    run.stats().file_scanned();

    Ok(ScanOutcome::Scanned { completed, failed })
}

/// Reason to leave a file unread, if any
fn resource_bound(config: &ScanConfig, stream: &dyn ContentStream) -> Option<String> {
    let size = stream.size();
    if size > config.max_file_size {
        return Some(format!("size {} exceeds {}", size, config.max_file_size));
    }
    let allocation = stream.allocation()?;
    if allocation.extents.len() > config.max_extents {
        return Some(format!(
            "{} extents exceed {}",
            allocation.extents.len(),
            config.max_extents
        ));
    }
    let allocated = allocation.allocated_bytes();
    if allocated > 0 && allocated < size {
        return Some(format!("only {} of {} bytes allocated", allocated, size));
    }
    None
}

/// Call into scanner code, turning a panic into [`ScanError::ScannerPanic`]
fn guarded<T>(
    descriptor: &ScannerDescriptor,
    address: &VirtualAddress,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(ScanError::ScannerPanic {
            scanner: descriptor.name.to_string(),
            address: address.to_string(),
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
