//! Carving rules for common file formats

use crate::scanner::carver::{CarveRule, SignatureCarver};
use crate::scanner::{ScannerDescriptor, ScannerFactory, ScannerKind};

pub const DESCRIPTOR: ScannerDescriptor = ScannerDescriptor {
    name: "CarveScan",
    description: "Carves JPEG, PNG, GIF, PDF and ZIP files out of raw content",
    kind: ScannerKind::Carver,
    order: 300,
    enabled_by_default: false,
    depends: &[],
    provides: &[],
    consumes: &[],
};

const MIB: u64 = 1024 * 1024;

pub fn default_rules() -> Vec<CarveRule> {
    vec![
        CarveRule {
            name: "jpeg",
            extension: "jpg",
            header: b"\xff\xd8\xff",
            footer: Some(b"\xff\xd9"),
            trailer: 0,
            max_length: 10 * MIB,
        },
        CarveRule {
            name: "png",
            extension: "png",
            header: b"\x89PNG\r\n\x1a\n",
            footer: Some(b"IEND\xae\x42\x60\x82"),
            trailer: 0,
            max_length: 10 * MIB,
        },
        CarveRule {
            name: "gif",
            extension: "gif",
            header: b"GIF89a",
            footer: Some(b"\x00\x3b"),
            trailer: 0,
            max_length: 5 * MIB,
        },
        CarveRule {
            name: "gif",
            extension: "gif",
            header: b"GIF87a",
            footer: Some(b"\x00\x3b"),
            trailer: 0,
            max_length: 5 * MIB,
        },
        CarveRule {
            name: "pdf",
            extension: "pdf",
            header: b"%PDF-",
            footer: Some(b"%%EOF"),
            trailer: 0,
            max_length: 20 * MIB,
        },
        // end of central directory record: signature plus 18 fixed bytes
        CarveRule {
            name: "zip",
            extension: "zip",
            header: b"PK\x03\x04",
            footer: Some(b"PK\x05\x06"),
            trailer: 18,
            max_length: 20 * MIB,
        },
    ]
}

pub fn factory() -> Box<dyn ScannerFactory> {
    Box::new(SignatureCarver::new(default_rules()))
}
