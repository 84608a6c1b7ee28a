//! Layer drivers: re-derive a segment's content from its parent's content
//!
//! Expanders produce segments while they enumerate a container; the same
//! helpers are used here to open a derived address again later, from
//! nothing but the address itself.

use std::io::{Read, Seek};

use chrono::{DateTime, NaiveDate, Utc};
use flate2::read::GzDecoder;
use mailparse::{MailHeaderMap, ParsedMail};
use tar::Archive;
use zip::ZipArchive;

use crate::error::{Result, ScanError};

use super::{
    AddressSegment, ContentStream, DriverTag, MemoryStream, RangeStream, Timestamps, VirtualAddress,
};

/// Bounds applied while decoding a layer into memory
#[derive(Debug, Clone, Copy)]
pub struct DriverLimits {
    pub max_member_size: u64,
}

/// Apply one segment on top of its parent's content
pub fn open_layer(
    parent: Box<dyn ContentStream>,
    address: &VirtualAddress,
    segment: &AddressSegment,
    limits: DriverLimits,
) -> Result<Box<dyn ContentStream>> {
    match segment.tag() {
        DriverTag::Zip => {
            let index = parse_index(address, segment.payload())?;
            let mut archive = ZipArchive::new(parent).map_err(|e| ScanError::decode(address, e))?;
            let member = read_zip_member(&mut archive, index, address, limits)?;
            Ok(Box::new(MemoryStream::new(member.data)))
        }
        DriverTag::Gzip => {
            let inflated = gunzip(parent, address, limits)?;
            Ok(Box::new(MemoryStream::new(inflated.data)))
        }
        DriverTag::Tar => {
            let index = parse_index(address, segment.payload())?;
            let data = read_tar_member(parent, index, address, limits)?;
            Ok(Box::new(MemoryStream::new(data)))
        }
        DriverTag::Mime => {
            let index = parse_index(address, segment.payload())?;
            let raw = read_bounded(parent, address, limits, "message")?;
            let part = mime_parts(&raw, address)?
                .parts
                .into_iter()
                .nth(index)
                .ok_or_else(|| ScanError::decode(address, format!("no MIME part {}", index)))??;
            Ok(Box::new(MemoryStream::new(part.data)))
        }
        DriverTag::Offset => {
            let range = RangePayload::parse(segment.payload())
                .ok_or_else(|| ScanError::decode(address, "range payload must be offset:length"))?;
            Ok(Box::new(RangeStream::new(parent, range.offset, range.length)))
        }
    }
}

/// Payload of an `o` segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePayload {
    pub offset: u64,
    pub length: u64,
}

impl RangePayload {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn parse(payload: &str) -> Option<Self> {
        let (offset, length) = payload.split_once(':')?;
        Some(Self {
            offset: offset.parse().ok()?,
            length: length.parse().ok()?,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.offset, self.length)
    }
}

/// Read everything, failing once more than `max_member_size` bytes arrive
///
/// Sizes claimed by container headers are not trusted for allocation.
pub fn read_bounded<R: Read>(
    reader: R,
    address: &VirtualAddress,
    limits: DriverLimits,
    what: &str,
) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader
        .take(limits.max_member_size + 1)
        .read_to_end(&mut data)
        .map_err(|e| ScanError::decode(address, format!("{}: {}", what, e)))?;
    if data.len() as u64 > limits.max_member_size {
        return Err(ScanError::ResourceBound {
            address: address.to_string(),
            reason: format!("{} exceeds {} bytes", what, limits.max_member_size),
        });
    }
    Ok(data)
}

fn parse_index(address: &VirtualAddress, payload: &str) -> Result<usize> {
    payload
        .parse()
        .map_err(|_| ScanError::decode(address, format!("bad member index {:?}", payload)))
}

/// A decoded zip member
#[derive(Debug)]
pub struct ZipMember {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub data: Vec<u8>,
}

/// Decode member `index` completely. Directories come back with no data.
pub fn read_zip_member<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    address: &VirtualAddress,
    limits: DriverLimits,
) -> Result<ZipMember> {
    let mut file = archive
        .by_index(index)
        .map_err(|e| ScanError::decode(address, format!("member {}: {}", index, e)))?;
    let name = file.name().to_string();
    let size = file.size();
    let is_dir = file.is_dir();
    let modified = zip_timestamp(file.last_modified());

    if size > limits.max_member_size {
        return Err(ScanError::ResourceBound {
            address: address.to_string(),
            reason: format!("member {} is {} bytes", name, size),
        });
    }

    let data = if is_dir {
        Vec::new()
    } else {
        read_bounded(&mut file, address, limits, &format!("member {}", name))?
    };

    Ok(ZipMember {
        name,
        is_dir,
        size,
        modified,
        data,
    })
}

fn zip_timestamp(modified: impl Into<Option<zip::DateTime>>) -> Option<DateTime<Utc>> {
    let t = modified.into()?;
    NaiveDate::from_ymd_opt(t.year() as i32, t.month() as u32, t.day() as u32)?
        .and_hms_opt(t.hour() as u32, t.minute() as u32, t.second() as u32)
        .map(|naive| naive.and_utc())
}

/// A fully inflated gzip stream
#[derive(Debug)]
pub struct Inflated {
    /// Original file name stored in the gzip header
    pub name: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub data: Vec<u8>,
}

impl Inflated {
    pub fn timestamps(&self) -> Timestamps {
        Timestamps {
            modified: self.modified,
            ..Default::default()
        }
    }
}

pub fn gunzip<R: Read>(reader: R, address: &VirtualAddress, limits: DriverLimits) -> Result<Inflated> {
    let mut decoder = GzDecoder::new(reader);
    let (name, modified) = match decoder.header() {
        Some(header) => (
            header
                .filename()
                .map(|raw| String::from_utf8_lossy(raw).into_owned()),
            match header.mtime() {
                0 => None,
                secs => DateTime::from_timestamp(secs as i64, 0),
            },
        ),
        None => (None, None),
    };

    let data = read_bounded(decoder, address, limits, "gzip")?;
    Ok(Inflated {
        name,
        modified,
        data,
    })
}

/// Header of one tar entry
#[derive(Debug, Clone)]
pub struct TarMember {
    /// Position among all entries of the archive
    pub index: usize,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Headers of the file and directory entries, in archive order
///
/// Links and device nodes still use up an index. A damaged header ends
/// the listing with an `Err` item since nothing after it can be trusted.
pub fn list_tar<R: Read>(reader: R, address: &VirtualAddress) -> Result<Vec<Result<TarMember>>> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| ScanError::decode(address, format!("tar: {}", e)))?;

    let mut members = Vec::new();
    for (index, entry) in entries.enumerate() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                members.push(Err(ScanError::decode(address, format!("tar entry {}: {}", index, e))));
                break;
            }
        };
        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            continue;
        }
        let name = match entry.path() {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                members.push(Err(ScanError::decode(address, format!("tar entry {}: {}", index, e))));
                continue;
            }
        };
        let modified = entry
            .header()
            .mtime()
            .ok()
            .filter(|&secs| secs > 0)
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0));
        members.push(Ok(TarMember {
            index,
            name,
            is_dir: kind.is_dir(),
            size: entry.size(),
            modified,
        }));
    }
    Ok(members)
}

/// Content of the regular file at entry `index`
pub fn read_tar_member<R: Read>(
    reader: R,
    index: usize,
    address: &VirtualAddress,
    limits: DriverLimits,
) -> Result<Vec<u8>> {
    let mut archive = Archive::new(reader);
    let mut entries = archive
        .entries()
        .map_err(|e| ScanError::decode(address, format!("tar: {}", e)))?;
    let entry = entries
        .nth(index)
        .ok_or_else(|| ScanError::decode(address, format!("no tar entry {}", index)))?
        .map_err(|e| ScanError::decode(address, format!("tar entry {}: {}", index, e)))?;
    if !entry.header().entry_type().is_file() {
        return Err(ScanError::decode(address, format!("tar entry {} is not a file", index)));
    }
    read_bounded(entry, address, limits, &format!("tar entry {}", index))
}

/// One leaf part of a MIME message, transfer encoding removed
#[derive(Debug)]
pub struct MimePart {
    /// Attachment name from Content-Disposition or Content-Type
    pub name: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A parsed RFC 2822 message
#[derive(Debug)]
pub struct MailMessage {
    pub date: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    /// Leaf parts in depth-first order; multipart containers are skipped
    pub parts: Vec<Result<MimePart>>,
}

pub fn mime_parts(raw: &[u8], address: &VirtualAddress) -> Result<MailMessage> {
    let mail = mailparse::parse_mail(raw).map_err(|e| ScanError::decode(address, format!("mail: {}", e)))?;
    let date = mail
        .headers
        .get_first_value("Date")
        .and_then(|value| mailparse::dateparse(&value).ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    let subject = mail.headers.get_first_value("Subject");

    let mut leaves = Vec::new();
    collect_leaves(&mail, &mut leaves);
    let parts = leaves
        .into_iter()
        .enumerate()
        .map(|(index, part)| -> Result<MimePart> {
            let data = part
                .get_body_raw()
                .map_err(|e| ScanError::decode(address, format!("MIME part {}: {}", index, e)))?;
            Ok(MimePart {
                name: part_name(part),
                content_type: part.ctype.mimetype.clone(),
                data,
            })
        })
        .collect();

    Ok(MailMessage { date, subject, parts })
}

fn collect_leaves<'m, 'a>(mail: &'m ParsedMail<'a>, out: &mut Vec<&'m ParsedMail<'a>>) {
    if mail.ctype.mimetype.starts_with("multipart/") {
        for sub in &mail.subparts {
            collect_leaves(sub, out);
        }
    } else {
        out.push(mail);
    }
}

fn part_name(part: &ParsedMail<'_>) -> Option<String> {
    part.get_content_disposition()
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .filter(|name| !name.is_empty())
        .cloned()
}
