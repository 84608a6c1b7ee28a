//! Recursive scanning of forensic evidence
//!
//! Every file of an evidence set gets a [`VirtualAddress`]. Scanners run
//! over each address in a resolved order; expanders and carvers derive new
//! addresses for container members and signature hits and feed them back
//! through the same scanners. Completion is recorded per address and
//! scanner, so an interrupted run picks up where it stopped.

pub mod config;
pub mod error;
pub mod run;
pub mod scanner;
pub mod store;
pub mod vfs;

use std::path::Path;
use std::sync::Arc;

pub use config::ScanConfig;
pub use error::{Result, ScanError};
pub use run::{ResetSummary, RunContext, RunSummary, ScanEventKind, ScanLog, ScanProgress, ScanRun};
pub use scanner::{resolve, ScanSet, ScannerDescriptor, ScannerKind, ScannerRegistry};
pub use store::{Attribute, MemoryStore, SqliteStore, Store};
pub use vfs::{
    AddressError, AddressGlob, DriverTag, EntryKind, EvidenceSource, MountedSource, VirtualAddress,
    VirtualDirectoryEntry,
};

/// Run built on a mounted evidence path and its SQLite database
///
/// `db` defaults to `~/.vfscan/<evidence name>.db`.
pub fn open_run(
    evidence: &Path,
    db: Option<&Path>,
    config: ScanConfig,
    log: Option<&Path>,
) -> anyhow::Result<ScanRun> {
    use anyhow::Context;

    config.validate()?;
    let source = MountedSource::open(evidence)?;
    let db_path = match db {
        Some(path) => path.to_path_buf(),
        None => SqliteStore::default_path(source.name())?,
    };
    let store = SqliteStore::open(&db_path)?;
    tracing::info!("Using database {}", db_path.display());

    let run_id = uuid::Uuid::new_v4();
    let scan_log = match log {
        Some(path) => ScanLog::with_file(run_id.to_string(), path)
            .with_context(|| format!("Failed to open run log {}", path.display()))?,
        None => ScanLog::new(run_id.to_string()),
    };

    let ctx = RunContext::with_log(
        config,
        Arc::new(source),
        Arc::new(store),
        ScannerRegistry::builtin(),
        scan_log,
        run_id,
    );
    Ok(ScanRun::new(ctx))
}
