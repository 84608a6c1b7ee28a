/// End-to-end runs over in-memory evidence: containers, recursion guards,
/// depth limit and carving
use std::io::{Cursor, Write};
use std::sync::Arc;

use flate2::{Compression, GzBuilder};
use vfscan_core::vfs::MemorySource;
use vfscan_core::{
    EntryKind, MemoryStore, RunContext, ScanConfig, ScanEventKind, ScanRun, ScannerRegistry, Store,
    VirtualAddress,
};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const REPORT: &[u8] = b"0123456789";
const BROKEN: &[u8] = b"BROKEN-MEMBER-CONTENT";

fn zip_of(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Zip with `report.txt` and a member whose CRC no longer matches
fn archive_with_corrupt_member() -> Vec<u8> {
    let mut data = zip_of(&[("report.txt", REPORT), ("broken.bin", BROKEN)]);
    let at = data
        .windows(BROKEN.len())
        .position(|w| w == BROKEN)
        .unwrap();
    data[at] ^= 0xff;
    data
}

fn gzip_of(name: &str, data: &[u8]) -> Vec<u8> {
    let mut encoder = GzBuilder::new()
        .filename(name)
        .write(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn tar_of(entries: &[(&str, tar::EntryType, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, kind, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(*kind);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        if *kind == tar::EntryType::Symlink {
            header.set_link_name("a.txt").unwrap();
        }
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn run_over(source: MemorySource, store: Arc<MemoryStore>, config: ScanConfig) -> ScanRun {
    let ctx = RunContext::new(config, Arc::new(source), store, ScannerRegistry::builtin());
    ScanRun::new(ctx)
}

fn addr(s: &str) -> VirtualAddress {
    VirtualAddress::parse(s).unwrap()
}

fn attribute(store: &dyn Store, address: &str, key: &str) -> Option<String> {
    store
        .attributes(&addr(address))
        .unwrap()
        .into_iter()
        .find(|a| a.key == key)
        .map(|a| a.value)
}

#[test]
fn test_archive_with_corrupt_member() {
    let source = MemorySource::new("case")
        .with_file("42", "/", "evidence.zip", archive_with_corrupt_member())
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let run = run_over(source, store.clone(), ScanConfig::default());

    let summary = run.scan(&["TypeDetect", "Md5Sum", "ArchiveExpand"]).unwrap();

    let root = store.get_directory_entry(&addr("42")).unwrap().unwrap();
    assert_eq!(root.kind, EntryKind::Container);

    let report = store.get_directory_entry(&addr("42|Z0")).unwrap().unwrap();
    assert_eq!(report.name, "report.txt");
    assert_eq!(report.size, 10);
    assert_eq!(report.parent, Some(addr("42")));
    assert_eq!(report.full_path(), "/evidence.zip/report.txt");

    assert!(store.get_completion(&addr("42|Z0"), "Md5Sum").unwrap());
    assert_eq!(
        attribute(store.as_ref(), "42|Z0", "md5").as_deref(),
        Some("781e5e245d69b566979b86e28d23f2c7")
    );
    assert_eq!(
        attribute(store.as_ref(), "42|Z0", "content-type").as_deref(),
        Some("text/plain")
    );

    // the corrupt member is skipped, the archive itself still completes
    assert!(store.get_directory_entry(&addr("42|Z1")).unwrap().is_none());
    assert!(store.get_completion(&addr("42"), "ArchiveExpand").unwrap());
    assert_eq!(run.context().log().events_of(ScanEventKind::DecodeError).len(), 1);
    assert_eq!(summary.members_added, 1);
    assert_eq!(summary.members_failed, 1);
    assert_eq!(summary.events.get(&ScanEventKind::DecodeError), Some(&1));
}

#[test]
fn test_second_run_changes_nothing() {
    let source = || {
        MemorySource::new("case")
            .with_file("42", "/", "evidence.zip", archive_with_corrupt_member())
            .unwrap()
            .with_file("43", "/", "notes.txt", b"plain notes".to_vec())
            .unwrap()
    };
    let store = Arc::new(MemoryStore::new());

    let first = run_over(source(), store.clone(), ScanConfig::default())
        .scan(&["all"])
        .unwrap();
    let entries = store.count_directory_entries().unwrap();
    let completions = store.count_completions(None).unwrap();
    let children = store.children(Some(&addr("42"))).unwrap();
    assert!(first.files_scanned >= 3);

    let second = run_over(source(), store.clone(), ScanConfig::default())
        .scan(&["all"])
        .unwrap();
    assert_eq!(second.files_scanned, 0);
    assert_eq!(second.members_added, 0);
    assert_eq!(store.count_directory_entries().unwrap(), entries);
    assert_eq!(store.count_completions(None).unwrap(), completions);
    assert_eq!(store.children(Some(&addr("42"))).unwrap(), children);

    // the root stays a container even though roots are listed as files
    let root = store.get_directory_entry(&addr("42")).unwrap().unwrap();
    assert_eq!(root.kind, EntryKind::Container);
}

#[test]
fn test_archive_inside_archive_is_expanded_once() {
    let inner = zip_of(&[("a.txt", b"inner text")]);
    let outer = zip_of(&[("inner.zip", &inner)]);
    let source = MemorySource::new("case")
        .with_file("1", "/", "outer.zip", outer)
        .unwrap();
    let store = Arc::new(MemoryStore::new());

    run_over(source, store.clone(), ScanConfig::default())
        .scan(&["ArchiveExpand"])
        .unwrap();

    let inner_entry = store.get_directory_entry(&addr("1|Z0")).unwrap().unwrap();
    assert_eq!(inner_entry.name, "inner.zip");
    assert_eq!(inner_entry.kind, EntryKind::File);
    assert_eq!(
        attribute(store.as_ref(), "1|Z0", "content-type").as_deref(),
        Some("application/zip")
    );
    assert!(store.get_directory_entry(&addr("1|Z0|Z0")).unwrap().is_none());
    assert!(!store.get_completion(&addr("1|Z0"), "ArchiveExpand").unwrap());
}

#[test]
fn test_gzip_then_zip_chain() {
    let bundle = zip_of(&[("docs/a.txt", b"alpha"), ("b.txt", b"bravo")]);
    let source = MemorySource::new("case")
        .with_file("1", "/exports", "bundle.zip.gz", gzip_of("bundle.zip", &bundle))
        .unwrap();
    let store = Arc::new(MemoryStore::new());

    let summary = run_over(source, store.clone(), ScanConfig::default())
        .scan(&["all"])
        .unwrap();

    let inflated = store.get_directory_entry(&addr("1|G0")).unwrap().unwrap();
    assert_eq!(inflated.name, "bundle.zip");
    assert_eq!(inflated.kind, EntryKind::Container);
    assert_eq!(inflated.size, bundle.len() as u64);

    let nested = store.get_directory_entry(&addr("1|G0|Z0")).unwrap().unwrap();
    assert_eq!(nested.name, "a.txt");
    assert_eq!(nested.full_path(), "/exports/bundle.zip.gz/bundle.zip/docs/a.txt");
    assert!(store.get_completion(&addr("1|G0|Z1"), "Md5Sum").unwrap());

    let names: Vec<_> = store
        .children(Some(&addr("1|G0")))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert_eq!(summary.members_added, 3);
}

#[test]
fn test_depth_limit_stops_expansion() {
    let bundle = zip_of(&[("a.txt", b"alpha")]);
    let source = MemorySource::new("case")
        .with_file("1", "/", "bundle.zip.gz", gzip_of("bundle.zip", &bundle))
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let config = ScanConfig {
        max_depth: 1,
        ..ScanConfig::default()
    };
    let run = run_over(source, store.clone(), config);

    run.scan(&["all"]).unwrap();

    assert!(store.get_directory_entry(&addr("1|G0")).unwrap().is_some());
    assert!(store.get_directory_entry(&addr("1|G0|Z0")).unwrap().is_none());
    let limited = run.context().log().events_of(ScanEventKind::DepthLimited);
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].address, "1|G0|Z0");
}

#[test]
fn test_carved_png_becomes_child() {
    let junk = b"header junk 0123".to_vec();
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(b"pixels-pixels");
    png.extend_from_slice(b"IEND\xae\x42\x60\x82");
    let mut blob = junk.clone();
    blob.extend_from_slice(&png);
    blob.extend_from_slice(b"trailing garbage");

    let source = MemorySource::new("case")
        .with_file("1", "/", "blob.bin", blob)
        .unwrap();
    let store = Arc::new(MemoryStore::new());

    let summary = run_over(source, store.clone(), ScanConfig::default())
        .scan(&["CarveScan", "Md5Sum"])
        .unwrap();

    let child = format!("1|o{}:{}", junk.len(), png.len());
    let entry = store.get_directory_entry(&addr(&child)).unwrap().unwrap();
    assert_eq!(entry.name, format!("{}.png", junk.len()));
    assert_eq!(entry.size, png.len() as u64);
    assert_eq!(entry.full_path(), format!("/blob.bin/{}.png", junk.len()));
    assert_eq!(summary.carved, 1);

    // the carved bytes are scanned by everything except carvers
    let expected = format!("{:x}", md5::compute(&png));
    assert_eq!(attribute(store.as_ref(), &child, "md5"), Some(expected));
    assert!(!store.get_completion(&addr(&child), "CarveScan").unwrap());
    assert!(store.get_completion(&addr("1"), "CarveScan").unwrap());
}

#[test]
fn test_corrupt_and_empty_zips_are_childless_containers() {
    let mut corrupt = b"PK\x03\x04".to_vec();
    corrupt.extend_from_slice(&[0xa5; 200]);
    let empty = zip_of(&[]);
    let source = MemorySource::new("case")
        .with_file("1", "/", "corrupt.zip", corrupt)
        .unwrap()
        .with_file("2", "/", "empty.zip", empty)
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let run = run_over(source, store.clone(), ScanConfig::default());

    run.scan(&["all"]).unwrap();

    for root in ["1", "2"] {
        let entry = store.get_directory_entry(&addr(root)).unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Container, "{}", root);
        assert!(store.children(Some(&addr(root))).unwrap().is_empty());
        assert!(store.get_completion(&addr(root), "ArchiveExpand").unwrap());
    }
    let errors = run.context().log().events_of(ScanEventKind::DecodeError);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].address, "1");
}

#[test]
fn test_carve_finds_signatures_across_chunk_edges() {
    let junk = b"0123456789abcdef0123456789".to_vec();
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(b"pixels");
    png.extend_from_slice(b"IEND\xae\x42\x60\x82");
    let mut blob = junk.clone();
    blob.extend_from_slice(&png);
    blob.extend_from_slice(b"tail");
    let child = format!("1|o{}:{}", junk.len(), png.len());

    // header at 26..34, trailer at 40..48
    for chunk_size in [4, 8, 13, 16, 17, 29, 43] {
        let source = MemorySource::new("case")
            .with_file("1", "/", "blob.bin", blob.clone())
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = ScanConfig {
            chunk_size,
            ..ScanConfig::default()
        };

        let summary = run_over(source, store.clone(), config)
            .scan(&["CarveScan"])
            .unwrap();

        assert_eq!(summary.carved, 1, "chunk size {}", chunk_size);
        let entry = store.get_directory_entry(&addr(&child)).unwrap();
        assert!(entry.is_some(), "chunk size {}", chunk_size);
    }
}

#[test]
fn test_tar_entries_become_children() {
    let inner = zip_of(&[("c.txt", b"charlie")]);
    let bundle = tar_of(&[
        ("docs/", tar::EntryType::Directory, b""),
        ("docs/a.txt", tar::EntryType::Regular, b"alpha"),
        ("docs/link", tar::EntryType::Symlink, b""),
        ("b.zip", tar::EntryType::Regular, &inner),
    ]);
    let source = MemorySource::new("case")
        .with_file("5", "/backup", "bundle.tar", bundle)
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    let run = run_over(source, store.clone(), ScanConfig::default());

    run.scan(&["all"]).unwrap();

    let root = store.get_directory_entry(&addr("5")).unwrap().unwrap();
    assert_eq!(root.kind, EntryKind::Container);
    assert!(store.get_completion(&addr("5"), "TarExpand").unwrap());

    let docs = store.get_directory_entry(&addr("5|T0")).unwrap().unwrap();
    assert_eq!(docs.kind, EntryKind::Directory);

    let a = store.get_directory_entry(&addr("5|T1")).unwrap().unwrap();
    assert_eq!(a.full_path(), "/backup/bundle.tar/docs/a.txt");
    assert_eq!(a.size, 5);
    assert!(a.timestamps.modified.is_some());
    assert_eq!(
        attribute(store.as_ref(), "5|T1", "md5"),
        Some(format!("{:x}", md5::compute(b"alpha")))
    );

    // the link keeps its index but gets no node
    assert!(store.get_directory_entry(&addr("5|T2")).unwrap().is_none());

    let zipped = store.get_directory_entry(&addr("5|T3")).unwrap().unwrap();
    assert_eq!(zipped.kind, EntryKind::Container);
    let nested = store.get_directory_entry(&addr("5|T3|Z0")).unwrap().unwrap();
    assert_eq!(nested.full_path(), "/backup/bundle.tar/b.zip/c.txt");
    assert!(run.context().log().events_of(ScanEventKind::DecodeError).is_empty());
}

#[test]
fn test_mail_parts_become_children() {
    let message = concat!(
        "From: analyst@example.com\r\n",
        "To: case@example.com\r\n",
        "Subject: weekly export\r\n",
        "Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/mixed; boundary=\"part-boundary\"\r\n",
        "\r\n",
        "--part-boundary\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "Export attached.\r\n",
        "--part-boundary\r\n",
        "Content-Type: text/plain\r\n",
        "Content-Disposition: attachment; filename=\"notes.txt\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "aGVsbG8gYXR0YWNobWVudA==\r\n",
        "--part-boundary--\r\n",
    );
    let source = MemorySource::new("case")
        .with_file("7", "/mail", "export.eml", message.as_bytes().to_vec())
        .unwrap();
    let store = Arc::new(MemoryStore::new());

    let summary = run_over(source, store.clone(), ScanConfig::default())
        .scan(&["all"])
        .unwrap();

    let root = store.get_directory_entry(&addr("7")).unwrap().unwrap();
    assert_eq!(root.kind, EntryKind::Container);
    assert_eq!(
        attribute(store.as_ref(), "7", "content-type").as_deref(),
        Some("message/rfc822")
    );
    assert_eq!(
        attribute(store.as_ref(), "7", "subject").as_deref(),
        Some("weekly export")
    );

    let body = store.get_directory_entry(&addr("7|m0")).unwrap().unwrap();
    assert_eq!(body.name, "Attachment 0");
    assert!(body.timestamps.modified.is_some());

    let notes = store.get_directory_entry(&addr("7|m1")).unwrap().unwrap();
    assert_eq!(notes.name, "notes.txt");
    assert_eq!(notes.full_path(), "/mail/export.eml/notes.txt");
    assert_eq!(notes.size, 16);
    assert_eq!(
        attribute(store.as_ref(), "7|m1", "md5"),
        Some(format!("{:x}", md5::compute(b"hello attachment")))
    );
    assert_eq!(summary.members_added, 2);
}
