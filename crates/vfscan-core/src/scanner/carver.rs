//! Signature carving: byte ranges that look like files become children

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use aho_corasick::AhoCorasick;

use crate::error::Result;
use crate::run::TempHandle;
use crate::vfs::{ContentStream, DriverTag, MemoryStream, RangePayload, VirtualDirectoryEntry};

use super::{Interest, Metadata, ScanCx, ScanInstance, ScannerFactory};

/// How to recognise one format and decide where it ends
#[derive(Debug, Clone)]
pub struct CarveRule {
    pub name: &'static str,
    pub extension: &'static str,
    pub header: &'static [u8],
    /// End marker searched after the header
    pub footer: Option<&'static [u8]>,
    /// Bytes that still belong to the file after the footer
    pub trailer: usize,
    /// Length used when no footer is found, and upper bound otherwise
    pub max_length: u64,
}

impl CarveRule {
    /// Length of a hit, given the bytes from the hit onwards (at most
    /// `max_length` of them)
    pub fn length_in(&self, window: &[u8]) -> usize {
        let footer = match self.footer {
            Some(footer) if !footer.is_empty() => footer,
            _ => return window.len(),
        };
        let search_from = self.header.len().min(window.len());
        match window[search_from..]
            .windows(footer.len())
            .position(|w| w == footer)
        {
            Some(pos) => (search_from + pos + footer.len() + self.trailer).min(window.len()),
            None => window.len(),
        }
    }
}

/// A header match at an absolute offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hit {
    pub offset: u64,
    pub rule: usize,
}

struct CarveIndex {
    rules: Vec<CarveRule>,
    matcher: Option<AhoCorasick>,
    longest_header: usize,
}

impl CarveIndex {
    /// Matches in `data`, offsets relative to `data`
    fn find(&self, data: &[u8]) -> Vec<(usize, usize, usize)> {
        let Some(matcher) = &self.matcher else {
            return Vec::new();
        };
        matcher
            .find_overlapping_iter(data)
            .map(|m| (m.start(), m.end(), m.pattern().as_usize()))
            .collect()
    }
}

/// Factory of a carver over a fixed rule set
pub struct SignatureCarver {
    index: Arc<CarveIndex>,
}

impl SignatureCarver {
    pub fn new(rules: Vec<CarveRule>) -> Self {
        let headers: Vec<&[u8]> = rules.iter().map(|r| r.header).collect();
        let matcher = match AhoCorasick::new(&headers) {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                tracing::warn!("Carver disabled, cannot build matcher: {}", e);
                None
            }
        };
        let longest_header = rules.iter().map(|r| r.header.len()).max().unwrap_or(0);
        Self {
            index: Arc::new(CarveIndex {
                rules,
                matcher,
                longest_header,
            }),
        }
    }

    pub fn rules(&self) -> &[CarveRule] {
        &self.index.rules
    }
}

impl ScannerFactory for SignatureCarver {
    fn new_instance(&self, _entry: &VirtualDirectoryEntry) -> Box<dyn ScanInstance> {
        Box::new(CarveInstance {
            index: self.index.clone(),
            temp: None,
            tail: Vec::new(),
            consumed: 0,
            hits: Vec::new(),
        })
    }
}

struct CarveInstance {
    index: Arc<CarveIndex>,
    temp: Option<TempHandle>,
    /// End of the previous chunk, so headers split across chunks are found
    tail: Vec<u8>,
    consumed: u64,
    hits: Vec<Hit>,
}

impl ScanInstance for CarveInstance {
    fn process(&mut self, chunk: &[u8], _metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<Interest> {
        if self.index.matcher.is_none() {
            return Ok(Interest::Ignore);
        }
        if self.temp.is_none() {
            self.temp = Some(cx.run().temp().acquire(cx.address(), cx.entry().size)?);
        }
        if let Some(temp) = &self.temp {
            temp.append(chunk)?;
        }

        let mut window = std::mem::take(&mut self.tail);
        let carried = window.len();
        window.extend_from_slice(chunk);
        let base = self.consumed - carried as u64;

        for (start, end, rule) in self.index.find(&window) {
            let offset = base + start as u64;
            // the file itself starts at 0
            if end > carried && offset > 0 {
                self.hits.push(Hit { offset, rule });
            }
        }

        let keep = self.index.longest_header.saturating_sub(1).min(window.len());
        self.tail = window.split_off(window.len() - keep);
        self.consumed += chunk.len() as u64;
        Ok(Interest::Continue)
    }

    fn slack(&mut self, data: &[u8], _metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()> {
        let found: Vec<String> = self
            .index
            .find(data)
            .into_iter()
            .map(|(start, _, rule)| format!("{}@{}", self.index.rules[rule].name, start))
            .collect();
        if !found.is_empty() {
            tracing::debug!(address = %cx.address(), "Signatures in slack: {:?}", found);
            cx.record_attribute("slack-signatures", &found.join(","))?;
        }
        Ok(())
    }

    fn finish(&mut self, _metadata: &mut Metadata, cx: &ScanCx<'_>) -> Result<()> {
        let Some(temp) = self.temp.take() else {
            return Ok(());
        };
        if self.hits.is_empty() {
            return Ok(());
        }
        if !temp.object().is_complete() {
            let mut content = cx.open_content()?;
            temp.object().fill_from(&mut content)?;
        }
        let mut file = temp.object().reopen()?;
        let total = temp.object().written();

        self.hits.sort();
        self.hits.dedup();
        let mut carved_end = 0u64;
        for hit in std::mem::take(&mut self.hits) {
            if hit.offset < carved_end {
                continue;
            }
            let rule = &self.index.rules[hit.rule];
            let data = carve(&mut file, hit.offset, total, rule)?;
            let length = data.len() as u64;

            let payload = RangePayload::new(hit.offset, length).encode();
            let address = cx.address().derive(DriverTag::Offset, &payload);
            let entry = VirtualDirectoryEntry::file(
                address,
                cx.entry().full_path(),
                format!("{}.{}", hit.offset, rule.extension),
                length,
            );
            tracing::debug!(address = %entry.address, "Carved {}", rule.name);

            let content = Box::new(MemoryStream::new(data)) as Box<dyn ContentStream>;
            if cx.scan_child(entry, Some(content))? {
                cx.run().stats().carved();
            }
            carved_end = hit.offset + length;
        }
        Ok(())
    }
}

/// Bytes of one hit, ending at the footer or at the length cap
fn carve(file: &mut File, offset: u64, total: u64, rule: &CarveRule) -> Result<Vec<u8>> {
    let window = rule.max_length.min(total.saturating_sub(offset));
    let mut data = Vec::with_capacity(window as usize);
    file.seek(SeekFrom::Start(offset))?;
    Read::by_ref(file).take(window).read_to_end(&mut data)?;
    let length = rule.length_in(&data);
    data.truncate(length);
    Ok(data)
}
