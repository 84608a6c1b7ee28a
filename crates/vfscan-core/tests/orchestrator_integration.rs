/// Orchestrator contract: failure isolation, slack delivery, short-circuit,
/// resource bounds, resume and reset
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use vfscan_core::scanner::{
    scan_address, Interest, Metadata, ScanCx, ScanInstance, ScanOutcome, ScannerFactory,
};
use vfscan_core::vfs::{Allocation, ContentStream, Extent, MemorySource, MemoryStream};
use vfscan_core::{
    resolve, AddressGlob, EvidenceSource, MemoryStore, Result, RunContext, ScanConfig, ScanError,
    ScanEventKind, ScanRun, ScannerDescriptor, ScannerKind, ScannerRegistry, Store, VirtualAddress,
    VirtualDirectoryEntry,
};

fn addr(s: &str) -> VirtualAddress {
    VirtualAddress::parse(s).unwrap()
}

fn descriptor(name: &'static str, order: i32) -> ScannerDescriptor {
    ScannerDescriptor {
        name,
        description: "test scanner",
        kind: ScannerKind::Analyzer,
        order,
        enabled_by_default: false,
        depends: &[],
        provides: &[],
        consumes: &[],
    }
}

/// What a test scanner does with its chunks
#[derive(Clone, Copy)]
enum Behaviour {
    Fail,
    Panic,
    /// Ignore after this many chunks
    IgnoreAfter(usize),
    /// Keep every chunk, write the chunk count and slack out in `finish`
    Record,
}

struct TestFactory {
    behaviour: Behaviour,
    chunks: Arc<AtomicUsize>,
}

impl ScannerFactory for TestFactory {
    fn new_instance(&self, _entry: &VirtualDirectoryEntry) -> Box<dyn ScanInstance> {
        Box::new(TestScan {
            behaviour: self.behaviour,
            chunks: self.chunks.clone(),
            seen: 0,
            slack: None,
        })
    }
}

struct TestScan {
    behaviour: Behaviour,
    chunks: Arc<AtomicUsize>,
    seen: usize,
    slack: Option<Vec<u8>>,
}

impl ScanInstance for TestScan {
    fn process(&mut self, _chunk: &[u8], _metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<Interest> {
        self.seen += 1;
        self.chunks.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Fail => Err(ScanError::ScannerFailure {
                scanner: cx.scanner().to_string(),
                address: cx.address().to_string(),
                reason: "always fails".to_string(),
            }),
            Behaviour::Panic => panic!("scanner blew up"),
            Behaviour::IgnoreAfter(n) if self.seen >= n => Ok(Interest::Ignore),
            _ => Ok(Interest::Continue),
        }
    }

    fn slack(&mut self, data: &[u8], _metadata: &mut Metadata, _cx: &ScanCx<'_>) -> Result<()> {
        self.slack = Some(data.to_vec());
        Ok(())
    }

    fn finish(&mut self, _metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()> {
        cx.record_attribute("chunks", &self.seen.to_string())?;
        if let Some(slack) = &self.slack {
            cx.record_attribute("slack", &String::from_utf8_lossy(slack))?;
        }
        Ok(())
    }
}

/// Builtin registry plus one test scanner per (name, behaviour)
fn registry_with(scanners: &[(&'static str, Behaviour, Arc<AtomicUsize>)]) -> ScannerRegistry {
    let mut registry = ScannerRegistry::builtin();
    for (i, (name, behaviour, chunks)) in scanners.iter().enumerate() {
        let behaviour = *behaviour;
        let chunks = chunks.clone();
        registry
            .register(descriptor(name, 20 + i as i32), move || {
                Box::new(TestFactory {
                    behaviour,
                    chunks: chunks.clone(),
                }) as Box<dyn ScannerFactory>
            })
            .unwrap();
    }
    registry
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn attribute(store: &dyn Store, address: &str, scanner: &str, key: &str) -> Option<String> {
    store
        .attributes(&addr(address))
        .unwrap()
        .into_iter()
        .find(|a| a.scanner == scanner && a.key == key)
        .map(|a| a.value)
}

fn context(
    source: impl EvidenceSource + 'static,
    store: Arc<MemoryStore>,
    registry: ScannerRegistry,
    config: ScanConfig,
) -> RunContext {
    RunContext::new(config, Arc::new(source), store, registry)
}

#[test]
fn test_failing_scanner_does_not_block_others() {
    let source = MemorySource::new("case")
        .with_file("1", "/", "a.txt", b"some content".to_vec())
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(&[
        ("Broken", Behaviour::Fail, counter()),
        ("Explodes", Behaviour::Panic, counter()),
    ]);
    let run = ScanRun::new(context(source, store.clone(), registry, ScanConfig::default()));

    let summary = run.scan(&["Broken", "Explodes", "Md5Sum"]).unwrap();

    assert!(store.get_completion(&addr("1"), "Md5Sum").unwrap());
    assert!(attribute(store.as_ref(), "1", "Md5Sum", "md5").is_some());
    assert!(!store.get_completion(&addr("1"), "Broken").unwrap());
    assert!(!store.get_completion(&addr("1"), "Explodes").unwrap());

    let log = run.context().log();
    let failures = log.events_of(ScanEventKind::ScannerFailure);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].scanner.as_deref(), Some("Broken"));
    assert_eq!(failures[0].address, "1");
    let panics = log.events_of(ScanEventKind::ScannerPanic);
    assert_eq!(panics.len(), 1);
    assert!(panics[0].message.contains("scanner blew up"));
    assert_eq!(summary.files_scanned, 1);
}

#[test]
fn test_failed_scanner_is_retried_on_next_pass() {
    let source = || {
        MemorySource::new("case")
            .with_file("1", "/", "a.txt", b"some content".to_vec())
            .unwrap()
    };
    let store = Arc::new(MemoryStore::new());
    let md5_runs = |store: &Arc<MemoryStore>| store.count_completions(Some("Md5Sum")).unwrap();

    let broken = counter();
    let registry = registry_with(&[("Broken", Behaviour::Fail, broken.clone())]);
    ScanRun::new(context(source(), store.clone(), registry, ScanConfig::default()))
        .scan(&["Broken", "Md5Sum"])
        .unwrap();
    assert_eq!(broken.load(Ordering::SeqCst), 1);
    assert_eq!(md5_runs(&store), 1);

    // only the failed scanner runs again
    let registry = registry_with(&[("Broken", Behaviour::Fail, broken.clone())]);
    let ctx = context(source(), store.clone(), registry, ScanConfig::default());
    let set = resolve(&["Broken", "Md5Sum"], ctx.registry()).unwrap();
    let outcome = scan_address(&ctx, &addr("1"), &set, None).unwrap();
    assert_eq!(outcome, ScanOutcome::Scanned { completed: 0, failed: 1 });
    assert_eq!(broken.load(Ordering::SeqCst), 2);
    assert_eq!(md5_runs(&store), 1);
}

#[test]
fn test_slack_reaches_interested_scanners_only() {
    let source = MemorySource::new("case")
        .with_file("1", "/", "a.bin", b"logical bytes".to_vec())
        .unwrap()
        .with_slack("1", b"slack".to_vec(), b"NEXTUNIT".to_vec())
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(&[
        ("Recorder", Behaviour::Record, counter()),
        ("Quitter", Behaviour::IgnoreAfter(1), counter()),
    ]);
    let config = ScanConfig {
        slack_overread: 4,
        ..ScanConfig::default()
    };
    let run = ScanRun::new(context(source, store.clone(), registry, config));

    run.scan(&["Recorder", "Quitter"]).unwrap();

    let s = store.as_ref();
    assert_eq!(attribute(s, "1", "Recorder", "slack").as_deref(), Some("slackNEXT"));
    assert_eq!(attribute(s, "1", "Quitter", "slack"), None);
    // an ignoring scanner still counts as done
    assert!(store.get_completion(&addr("1"), "Quitter").unwrap());
    assert!(store.get_completion(&addr("1"), "Recorder").unwrap());
}

#[test]
fn test_chunks_are_fixed_size_and_slack_has_no_default_effect() {
    let source = MemorySource::new("case")
        .with_file("1", "/", "a.bin", vec![7u8; 10])
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let registry = registry_with(&[("Recorder", Behaviour::Record, counter())]);
    let config = ScanConfig {
        chunk_size: 4,
        ..ScanConfig::default()
    };

    ScanRun::new(context(source, store.clone(), registry, config))
        .scan(&["Recorder"])
        .unwrap();

    assert_eq!(attribute(store.as_ref(), "1", "Recorder", "chunks").as_deref(), Some("3"));
    assert_eq!(attribute(store.as_ref(), "1", "Recorder", "slack"), None);
}

/// Evidence whose single file reports how many bytes were read from it
struct CountingSource {
    data: Vec<u8>,
    read: Arc<AtomicU64>,
}

struct CountingStream {
    inner: MemoryStream,
    read: Arc<AtomicU64>,
}

impl Read for CountingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}

impl Seek for CountingStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl ContentStream for CountingStream {
    fn size(&self) -> u64 {
        self.inner.size()
    }
}

impl EvidenceSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    fn roots(&self) -> Result<Vec<VirtualDirectoryEntry>> {
        Ok(vec![VirtualDirectoryEntry::file(
            addr("1"),
            "/",
            "big.bin",
            self.data.len() as u64,
        )])
    }

    fn open_root(&self, _root: &VirtualAddress) -> Result<Box<dyn ContentStream>> {
        Ok(Box::new(CountingStream {
            inner: MemoryStream::new(self.data.clone()),
            read: self.read.clone(),
        }))
    }
}

#[test]
fn test_reading_stops_once_nobody_is_interested() {
    let read = Arc::new(AtomicU64::new(0));
    let source = CountingSource {
        data: vec![0u8; 64],
        read: read.clone(),
    };
    let store = Arc::new(MemoryStore::new());
    let quitter = counter();
    let registry = registry_with(&[("Quitter", Behaviour::IgnoreAfter(2), quitter.clone())]);
    let config = ScanConfig {
        chunk_size: 8,
        ..ScanConfig::default()
    };

    ScanRun::new(context(source, store.clone(), registry, config))
        .scan(&["Quitter", "TypeDetect"])
        .unwrap();

    assert_eq!(quitter.load(Ordering::SeqCst), 2);
    assert_eq!(read.load(Ordering::SeqCst), 16);
    assert!(store.get_completion(&addr("1"), "TypeDetect").unwrap());
}

#[test]
fn test_oversized_and_fragmented_files_are_skipped() {
    let fragmented = Allocation {
        block_size: 1,
        extents: (0..5).map(|i| Extent::new(i * 2, 1)).collect(),
    };
    let source = MemorySource::new("case")
        .with_file("1", "/", "big.bin", vec![1u8; 32])
        .unwrap()
        .with_file("2", "/", "frag.bin", vec![2u8; 5])
        .unwrap()
        .with_allocation("2", fragmented)
        .unwrap()
        .with_file("3", "/", "small.bin", vec![3u8; 5])
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let config = ScanConfig {
        max_file_size: 16,
        max_extents: 4,
        ..ScanConfig::default()
    };
    let run = ScanRun::new(context(source, store.clone(), ScannerRegistry::builtin(), config));

    let summary = run.scan(&["Md5Sum"]).unwrap();

    assert!(!store.get_completion(&addr("1"), "Md5Sum").unwrap());
    assert!(!store.get_completion(&addr("2"), "Md5Sum").unwrap());
    assert!(store.get_completion(&addr("3"), "Md5Sum").unwrap());
    assert_eq!(summary.files_skipped, 2);
    assert_eq!(summary.files_scanned, 1);

    let mut skipped: Vec<_> = run
        .context()
        .log()
        .events_of(ScanEventKind::ResourceBound)
        .into_iter()
        .map(|e| e.address)
        .collect();
    skipped.sort();
    assert_eq!(skipped, vec!["1", "2"]);
}

#[test]
fn test_reset_clears_one_scanner_on_matching_addresses() {
    let source = || {
        MemorySource::new("case")
            .with_file("1", "/", "a.txt", b"first".to_vec())
            .unwrap()
            .with_file("2", "/", "b.txt", b"second".to_vec())
            .unwrap()
    };
    let store = Arc::new(MemoryStore::new());
    let fresh_run = || {
        ScanRun::new(context(
            source(),
            store.clone(),
            ScannerRegistry::builtin(),
            ScanConfig::default(),
        ))
    };

    fresh_run().scan(&["Md5Sum", "TypeDetect"]).unwrap();
    assert_eq!(store.count_completions(Some("Md5Sum")).unwrap(), 2);

    let glob = AddressGlob::new("1").unwrap();
    let reset = fresh_run().reset("Md5Sum", &glob).unwrap();
    assert_eq!(reset.completions, 1);
    assert_eq!(reset.side_effects, 1);
    assert!(!store.get_completion(&addr("1"), "Md5Sum").unwrap());
    assert!(attribute(store.as_ref(), "1", "Md5Sum", "md5").is_none());
    assert!(store.get_completion(&addr("2"), "Md5Sum").unwrap());
    assert!(store.get_completion(&addr("1"), "TypeDetect").unwrap());

    let summary = fresh_run().scan(&["Md5Sum", "TypeDetect"]).unwrap();
    assert_eq!(summary.files_scanned, 1);
    assert_eq!(
        attribute(store.as_ref(), "1", "Md5Sum", "md5").as_deref(),
        Some(format!("{:x}", md5::compute(b"first")).as_str())
    );
}

#[test]
fn test_unknown_scanner_is_rejected_before_scanning() {
    let source = MemorySource::new("case")
        .with_file("1", "/", "a.txt", b"first".to_vec())
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let run = ScanRun::new(context(
        source,
        store.clone(),
        ScannerRegistry::builtin(),
        ScanConfig::default(),
    ));

    let err = run.scan(&["NoSuchScanner"]).unwrap_err();
    assert!(matches!(err, ScanError::UnknownScanner(name) if name == "NoSuchScanner"));
    assert_eq!(store.count_directory_entries().unwrap(), 0);
}
