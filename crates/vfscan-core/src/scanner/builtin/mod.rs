//! Scanners shipped with the crate

pub mod archive;
pub mod carvers;
pub mod gzip;
pub mod hashing;
pub mod mail;
pub mod tarball;
pub mod type_detect;

use super::{ScannerFactory, ScannerRegistry};

/// Add every built-in scanner, in declaration order
pub(crate) fn register(registry: &mut ScannerRegistry) {
    registry.push(type_detect::DESCRIPTOR, || {
        Box::new(type_detect::TypeDetectFactory) as Box<dyn ScannerFactory>
    });
    registry.push(hashing::MD5_DESCRIPTOR, hashing::md5_factory);
    registry.push(hashing::SHA256_DESCRIPTOR, hashing::sha256_factory);
    registry.push(gzip::DESCRIPTOR, gzip::factory);
    registry.push(archive::DESCRIPTOR, archive::factory);
    registry.push(tarball::DESCRIPTOR, tarball::factory);
    registry.push(mail::DESCRIPTOR, mail::factory);
    registry.push(carvers::DESCRIPTOR, carvers::factory);
}
