//! Content type detection from the first chunk

use crate::error::Result;
use crate::scanner::{
    Fact, FactKey, Interest, Metadata, ScanCx, ScanInstance, ScannerDescriptor, ScannerFactory,
    ScannerKind,
};
use crate::vfs::VirtualDirectoryEntry;

pub const DESCRIPTOR: ScannerDescriptor = ScannerDescriptor {
    name: "TypeDetect",
    description: "Detects the content type from magic numbers",
    kind: ScannerKind::Analyzer,
    order: 0,
    enabled_by_default: true,
    depends: &[],
    provides: &[FactKey::ContentType, FactKey::Magic],
    consumes: &[],
};

pub const OCTET_STREAM: &str = "application/octet-stream";

/// (prefix, content type, description)
const SIGNATURES: &[(&[u8], &str, &str)] = &[
    (b"PK\x03\x04", "application/zip", "Zip archive data"),
    (b"PK\x05\x06", "application/zip", "Zip archive data (empty)"),
    (b"\x1f\x8b", "application/gzip", "gzip compressed data"),
    (b"\xff\xd8\xff", "image/jpeg", "JPEG image data"),
    (b"\x89PNG\r\n\x1a\n", "image/png", "PNG image data"),
    (b"GIF87a", "image/gif", "GIF image data, version 87a"),
    (b"GIF89a", "image/gif", "GIF image data, version 89a"),
    (b"%PDF-", "application/pdf", "PDF document"),
    (b"\x7fELF", "application/x-executable", "ELF executable"),
    (b"MZ", "application/x-dosexec", "PE32 executable"),
];

/// Offset of the `ustar` magic inside a tar header block
const TAR_MAGIC_OFFSET: usize = 257;

/// Header names a mail message may open with
const MAIL_HEADERS: &[&str] = &[
    "received",
    "from",
    "message-id",
    "to",
    "subject",
    "return-path",
    "date",
    "mime-version",
];

/// Content type and description of a leading block of bytes
pub fn detect(data: &[u8]) -> (&'static str, &'static str) {
    if data.is_empty() {
        return ("application/x-empty", "empty");
    }
    for &(prefix, content_type, magic) in SIGNATURES {
        if data.starts_with(prefix) {
            return (content_type, magic);
        }
    }
    if data.get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5) == Some(b"ustar".as_slice()) {
        return ("application/x-tar", "POSIX tar archive");
    }
    if is_text(data) {
        if is_mail(data) {
            ("message/rfc822", "RFC 822 mail text")
        } else {
            ("text/plain", "ASCII text")
        }
    } else {
        (OCTET_STREAM, "data")
    }
}

/// The first line is a header field a message would start with
fn is_mail(data: &[u8]) -> bool {
    let line = data.split(|&b| b == b'\n').next().unwrap_or_default();
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return false;
    };
    let name = String::from_utf8_lossy(&line[..colon]).to_ascii_lowercase();
    MAIL_HEADERS.contains(&name.as_str())
}

/// Most of the first KiB is printable
fn is_text(data: &[u8]) -> bool {
    let sample = &data[..data.len().min(1024)];
    if sample.contains(&0) {
        return false;
    }
    let printable = sample
        .iter()
        .filter(|&&b| (0x20..=0x7e).contains(&b) || matches!(b, b'\t' | b'\n' | b'\r') || b >= 0x80)
        .count();
    printable * 10 > sample.len() * 8
}

pub struct TypeDetectFactory;

impl ScannerFactory for TypeDetectFactory {
    fn new_instance(&self, _entry: &VirtualDirectoryEntry) -> Box<dyn ScanInstance> {
        Box::new(TypeDetect { seen: false })
    }
}

struct TypeDetect {
    seen: bool,
}

impl TypeDetect {
    fn record(&mut self, data: &[u8], metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()> {
        self.seen = true;
        let (content_type, magic) = detect(data);
        metadata.record(Fact::ContentType(content_type.to_string()));
        metadata.record(Fact::Magic(magic.to_string()));
        cx.record_attribute(FactKey::ContentType.as_str(), content_type)?;
        cx.record_attribute(FactKey::Magic.as_str(), magic)
    }
}

impl ScanInstance for TypeDetect {
    fn process(&mut self, chunk: &[u8], metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<Interest> {
        self.record(chunk, metadata, cx)?;
        Ok(Interest::Ignore)
    }

    fn finish(&mut self, metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()> {
        if !self.seen {
            self.record(&[], metadata, cx)?;
        }
        Ok(())
    }
}
