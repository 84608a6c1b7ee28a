//! Digests of the logical content

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::scanner::{
    Fact, FactKey, Interest, Metadata, ScanCx, ScanInstance, ScannerDescriptor, ScannerFactory,
    ScannerKind,
};
use crate::vfs::VirtualDirectoryEntry;

pub const MD5_DESCRIPTOR: ScannerDescriptor = ScannerDescriptor {
    name: "Md5Sum",
    description: "MD5 hash of every file",
    kind: ScannerKind::Analyzer,
    order: 10,
    enabled_by_default: true,
    depends: &[],
    provides: &[FactKey::Md5],
    consumes: &[],
};

pub const SHA256_DESCRIPTOR: ScannerDescriptor = ScannerDescriptor {
    name: "Sha256Sum",
    description: "SHA-256 hash of every file",
    kind: ScannerKind::Analyzer,
    order: 10,
    enabled_by_default: false,
    depends: &[],
    provides: &[],
    consumes: &[],
};

pub fn md5_factory() -> Box<dyn ScannerFactory> {
    Box::new(Md5Factory)
}

pub fn sha256_factory() -> Box<dyn ScannerFactory> {
    Box::new(Sha256Factory)
}

struct Md5Factory;

impl ScannerFactory for Md5Factory {
    fn new_instance(&self, _entry: &VirtualDirectoryEntry) -> Box<dyn ScanInstance> {
        Box::new(Md5Scan {
            context: md5::Context::new(),
        })
    }
}

struct Md5Scan {
    context: md5::Context,
}

impl ScanInstance for Md5Scan {
    fn process(&mut self, chunk: &[u8], _metadata: &mut Metadata, _cx: &ScanCx<'_>) -> Result<Interest> {
        self.context.consume(chunk);
        Ok(Interest::Continue)
    }

    fn finish(&mut self, metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()> {
        let context = std::mem::replace(&mut self.context, md5::Context::new());
        let hex = format!("{:x}", context.compute());
        metadata.record(Fact::Md5(hex.clone()));
        cx.record_attribute(FactKey::Md5.as_str(), &hex)
    }
}

struct Sha256Factory;

impl ScannerFactory for Sha256Factory {
    fn new_instance(&self, _entry: &VirtualDirectoryEntry) -> Box<dyn ScanInstance> {
        Box::new(Sha256Scan {
            hasher: Sha256::new(),
        })
    }
}

struct Sha256Scan {
    hasher: Sha256,
}

impl ScanInstance for Sha256Scan {
    fn process(&mut self, chunk: &[u8], _metadata: &mut Metadata, _cx: &ScanCx<'_>) -> Result<Interest> {
        self.hasher.update(chunk);
        Ok(Interest::Continue)
    }

    fn finish(&mut self, _metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()> {
        let hex = format!("{:x}", self.hasher.finalize_reset());
        cx.record_attribute("sha256", &hex)
    }
}
