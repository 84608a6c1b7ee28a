//! One scan run over one evidence set

pub mod log;
pub mod temp;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::scanner::{resolve, scan_address, ScannerFactory, ScannerRegistry};
use crate::store::Store;
use crate::vfs::{AddressGlob, EvidenceSource, VfsSource};

pub use log::{ScanEvent, ScanEventKind, ScanLog};
pub use temp::{TempHandle, TempObject, TempRegistry};

/// Counters shared by every worker of a run
#[derive(Debug, Default)]
pub struct RunStats {
    files_scanned: AtomicUsize,
    files_skipped: AtomicUsize,
    members_added: AtomicUsize,
    members_failed: AtomicUsize,
    carved: AtomicUsize,
}

impl RunStats {
    pub fn file_scanned(&self) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn member_added(&self) {
        self.members_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn member_failed(&self) {
        self.members_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn carved(&self) {
        self.carved.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a scanner may reach during a run
///
/// Passed explicitly down the orchestrator so that runs over different
/// evidence sets never share factories, temp files or logs.
pub struct RunContext {
    run_id: Uuid,
    config: ScanConfig,
    source: VfsSource,
    store: Arc<dyn Store>,
    registry: ScannerRegistry,
    factories: Mutex<HashMap<&'static str, Arc<dyn ScannerFactory>>>,
    temp: TempRegistry,
    log: ScanLog,
    stats: RunStats,
}

impl RunContext {
    pub fn new(
        config: ScanConfig,
        evidence: Arc<dyn EvidenceSource>,
        store: Arc<dyn Store>,
        registry: ScannerRegistry,
    ) -> Self {
        let run_id = Uuid::new_v4();
        Self::with_log(config, evidence, store, registry, ScanLog::new(run_id.to_string()), run_id)
    }

    /// Same as [`RunContext::new`] with a caller-built run log
    pub fn with_log(
        config: ScanConfig,
        evidence: Arc<dyn EvidenceSource>,
        store: Arc<dyn Store>,
        registry: ScannerRegistry,
        log: ScanLog,
        run_id: Uuid,
    ) -> Self {
        let source = VfsSource::new(evidence, config.driver_limits());
        let temp = TempRegistry::new(config.temp_dir.clone());
        Self {
            run_id,
            config,
            source,
            store,
            registry,
            factories: Mutex::new(HashMap::new()),
            temp,
            log,
            stats: RunStats::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn source(&self) -> &VfsSource {
        &self.source
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn registry(&self) -> &ScannerRegistry {
        &self.registry
    }

    pub fn temp(&self) -> &TempRegistry {
        &self.temp
    }

    pub fn log(&self) -> &ScanLog {
        &self.log
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// The run's factory for `name`, created and prepared on first use
    ///
    /// `prepare` runs under the factory table lock and must not ask for
    /// other factories.
    pub fn factory(&self, name: &str) -> Result<Arc<dyn ScannerFactory>> {
        let registration = self
            .registry
            .get(name)
            .ok_or_else(|| ScanError::UnknownScanner(name.to_string()))?;

        let mut factories = self.factories.lock();
        if let Some(factory) = factories.get(registration.descriptor.name) {
            return Ok(factory.clone());
        }

        let factory: Arc<dyn ScannerFactory> = Arc::from(registration.create());
        factory.prepare(self)?;
        tracing::debug!(scanner = name, "Prepared scanner");
        factories.insert(registration.descriptor.name, factory.clone());
        Ok(factory)
    }

    /// Destroy every factory created so far
    pub fn destroy_factories(&self) {
        let factories: Vec<_> = self.factories.lock().drain().collect();
        for (name, factory) in factories {
            factory.destroy(self);
            tracing::debug!(scanner = name, "Destroyed scanner");
        }
    }
}

/// Progress of a run, reported after each root
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub roots_done: usize,
    pub roots_total: usize,
    pub address: String,
}

/// Final report of [`ScanRun::scan`]
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub evidence: String,
    pub scanners: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub roots: usize,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub members_added: usize,
    pub members_failed: usize,
    pub carved: usize,
    pub events: BTreeMap<ScanEventKind, usize>,
}

/// What a reset removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub completions: usize,
    pub side_effects: usize,
}

pub struct ScanRun {
    ctx: RunContext,
    progress_callback: Option<Box<dyn Fn(ScanProgress) + Send + Sync>>,
}

impl ScanRun {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            progress_callback: None,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(ScanProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Scan every root of the evidence set with the requested scanners
    ///
    /// Only a fatal error (the store going away) aborts the run; everything
    /// else ends up in the run log and the summary.
    pub fn scan<S: AsRef<str>>(&self, requested: &[S]) -> Result<RunSummary> {
        let ctx = &self.ctx;
        let scan_set = resolve(requested, ctx.registry())?;
        let started_at = Utc::now();
        let start = Instant::now();
        let evidence = ctx.source().evidence().name().to_string();

        tracing::info!(
            "Starting run {} over {} with {:?}",
            ctx.run_id(),
            evidence,
            scan_set.names()
        );

        let roots = ctx.source().evidence().roots()?;
        for root in &roots {
            // an earlier pass may already have turned the root into a container
            if ctx.store().get_directory_entry(&root.address)?.is_none() {
                ctx.store().put_directory_entry(root)?;
            }
        }

        let targets: Vec<_> = roots.iter().filter(|e| e.is_scannable()).collect();
        let total = targets.len();
        let done = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ctx.config().workers.unwrap_or(0))
            .build()
            .map_err(|e| ScanError::Config(format!("worker pool: {}", e)))?;

        let outcome: Result<()> = pool.install(|| {
            targets.par_iter().try_for_each(|entry| {
                scan_address(ctx, &entry.address, &scan_set, None)?;
                let roots_done = done.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(callback) = &self.progress_callback {
                    callback(ScanProgress {
                        roots_done,
                        roots_total: total,
                        address: entry.address.to_string(),
                    });
                }
                Ok(())
            })
        });

        ctx.destroy_factories();
        outcome?;

        let stats = ctx.stats();
        let summary = RunSummary {
            run_id: ctx.run_id(),
            evidence,
            scanners: scan_set.names().into_iter().map(String::from).collect(),
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            roots: roots.len(),
            files_scanned: stats.files_scanned.load(Ordering::Relaxed),
            files_skipped: stats.files_skipped.load(Ordering::Relaxed),
            members_added: stats.members_added.load(Ordering::Relaxed),
            members_failed: stats.members_failed.load(Ordering::Relaxed),
            carved: stats.carved.load(Ordering::Relaxed),
            events: ctx.log().counts(),
        };

        tracing::info!(
            "Run {} finished: {} files scanned, {} skipped, {} members, {} failed, {} carved",
            summary.run_id,
            summary.files_scanned,
            summary.files_skipped,
            summary.members_added,
            summary.members_failed,
            summary.carved
        );
        Ok(summary)
    }

    /// Forget that `scanner` ran on matching addresses and undo its results
    pub fn reset(&self, scanner: &str, glob: &AddressGlob) -> Result<ResetSummary> {
        let ctx = &self.ctx;
        let factory = ctx.factory(scanner)?;
        let completions = ctx.store().clear_completions(glob, scanner)?;
        let side_effects = factory.reset(scanner, glob, ctx.store())?;
        ctx.destroy_factories();

        tracing::info!(
            "Reset {} on {}: {} completions, {} results removed",
            scanner,
            glob.as_str(),
            completions,
            side_effects
        );
        Ok(ResetSummary {
            completions,
            side_effects,
        })
    }
}
