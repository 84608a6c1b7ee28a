//! Scanner traits, descriptors and the registry they are selected from
//!
//! A scanner is a factory (one per run) that hands out an instance per
//! scanned address. The orchestrator streams the address through every
//! pending instance in run order; expanders and carvers create child
//! addresses from inside their instances and scan those in turn.

pub mod builtin;
pub mod carver;
pub mod expander;
pub mod metadata;
pub mod orchestrator;
pub mod resolver;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Result, ScanError};
use crate::run::RunContext;
use crate::store::Store;
use crate::vfs::{AddressGlob, VirtualDirectoryEntry};

pub use carver::{CarveRule, SignatureCarver};
pub use expander::{ContainerExpander, ExpanderFactory, MemberDescriptor};
pub use metadata::{Fact, FactKey, Metadata};
pub use orchestrator::{scan_address, ScanCx, ScanOutcome};
pub use resolver::{resolve, ScanSet};

/// Role of a scanner in the recursion guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    /// Only reads content
    Analyzer,
    /// Exposes container members as child addresses
    Expander,
    /// Exposes signature hits as byte-range child addresses
    Carver,
}

impl fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScannerKind::Analyzer => "analyzer",
            ScannerKind::Expander => "expander",
            ScannerKind::Carver => "carver",
        })
    }
}

/// Static description of a registered scanner
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScannerDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ScannerKind,
    /// Lower runs earlier
    pub order: i32,
    pub enabled_by_default: bool,
    /// Scanners that must run before this one
    pub depends: &'static [&'static str],
    /// Facts this scanner records
    pub provides: &'static [FactKey],
    /// Facts this scanner reads
    pub consumes: &'static [FactKey],
}

/// Whether an instance wants more chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Continue,
    Ignore,
}

/// Per-address state of one scanner
///
/// `process` sees the content chunk by chunk until it returns
/// [`Interest::Ignore`]. `slack` is called at most once, `finish` exactly
/// once unless the instance ignored or failed before.
pub trait ScanInstance: Send {
    fn process(&mut self, chunk: &[u8], metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<Interest>;

    fn slack(&mut self, _data: &[u8], _metadata: &mut Metadata, _cx: &ScanCx<'_>) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self, metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()>;
}

/// Run-wide state of one scanner
pub trait ScannerFactory: Send + Sync {
    /// Called once, the first time the scanner is needed in a run
    fn prepare(&self, _run: &RunContext) -> Result<()> {
        Ok(())
    }

    /// Called once at the end of the run
    fn destroy(&self, _run: &RunContext) {}

    /// Undo what `scanner` stored for the addresses matching `glob`
    fn reset(&self, scanner: &str, glob: &AddressGlob, store: &dyn Store) -> Result<usize> {
        store.clear_attributes(glob, scanner)
    }

    fn new_instance(&self, entry: &VirtualDirectoryEntry) -> Box<dyn ScanInstance>;
}

type Constructor = Arc<dyn Fn() -> Box<dyn ScannerFactory> + Send + Sync>;

/// A descriptor plus the way to build its factory
#[derive(Clone)]
pub struct Registration {
    pub descriptor: ScannerDescriptor,
    create: Constructor,
}

impl Registration {
    pub fn create(&self) -> Box<dyn ScannerFactory> {
        (self.create)()
    }
}

/// The set of scanners a run can select from, in declaration order
#[derive(Clone, Default)]
pub struct ScannerRegistry {
    entries: Vec<Registration>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every scanner shipped with the crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, descriptor: ScannerDescriptor, create: F) -> Result<()>
    where
        F: Fn() -> Box<dyn ScannerFactory> + Send + Sync + 'static,
    {
        if self.get(descriptor.name).is_some() {
            return Err(ScanError::Config(format!(
                "scanner {} registered twice",
                descriptor.name
            )));
        }
        self.push(descriptor, create);
        Ok(())
    }

    pub(crate) fn push<F>(&mut self, descriptor: ScannerDescriptor, create: F)
    where
        F: Fn() -> Box<dyn ScannerFactory> + Send + Sync + 'static,
    {
        self.entries.push(Registration {
            descriptor,
            create: Arc::new(create),
        });
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.entries.iter().find(|r| r.descriptor.name == name)
    }

    /// Declaration index, used to break order ties
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|r| r.descriptor.name == name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ScannerDescriptor> {
        self.entries.iter().map(|r| &r.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
