//! Scratch copies of containers, shared between scanners of one address

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::vfs::VirtualAddress;

struct TempState {
    file: NamedTempFile,
    written: u64,
}

/// Buffered copy of one address. Deleted when the last handle drops.
pub struct TempObject {
    address: VirtualAddress,
    expected: u64,
    state: Mutex<TempState>,
}

impl TempObject {
    pub fn address(&self) -> &VirtualAddress {
        &self.address
    }

    pub fn written(&self) -> u64 {
        self.state.lock().written
    }

    /// Every byte of the address has been copied
    pub fn is_complete(&self) -> bool {
        self.written() == self.expected
    }

    fn append(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        state.file.write_all(data)?;
        state.written += data.len() as u64;
        Ok(())
    }

    /// Replace the buffered bytes with the whole of `reader`
    pub fn fill_from(&self, reader: &mut dyn Read) -> io::Result<u64> {
        let mut state = self.state.lock();
        let file = state.file.as_file_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        let copied = io::copy(reader, file)?;
        file.flush()?;
        state.written = copied;
        Ok(copied)
    }

    /// Independent read handle positioned at the start
    pub fn reopen(&self) -> io::Result<File> {
        let mut state = self.state.lock();
        state.file.flush()?;
        let mut file = state.file.reopen()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

/// A share of a [`TempObject`]. Only the handle that created the object
/// writes chunks into it.
pub struct TempHandle {
    object: Arc<TempObject>,
    writer: bool,
}

impl TempHandle {
    pub fn is_writer(&self) -> bool {
        self.writer
    }

    pub fn object(&self) -> &TempObject {
        &self.object
    }

    /// Copy a chunk of the address. No-op for sharing handles.
    pub fn append(&self, chunk: &[u8]) -> io::Result<()> {
        if self.writer {
            self.object.append(chunk)
        } else {
            Ok(())
        }
    }
}

/// Names currently materialised in a run
pub struct TempRegistry {
    dir: Option<PathBuf>,
    live: Mutex<HashMap<VirtualAddress, Weak<TempObject>>>,
}

impl TempRegistry {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Share the live copy of `address`, or create it and become its writer
    pub fn acquire(&self, address: &VirtualAddress, expected: u64) -> io::Result<TempHandle> {
        let mut live = self.live.lock();
        live.retain(|_, weak| weak.strong_count() > 0);

        if let Some(object) = live.get(address).and_then(Weak::upgrade) {
            return Ok(TempHandle {
                object,
                writer: false,
            });
        }

        let file = match &self.dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                NamedTempFile::new_in(dir)?
            }
            None => NamedTempFile::new()?,
        };
        tracing::trace!(address = %address, path = %file.path().display(), "Materialising");

        let object = Arc::new(TempObject {
            address: address.clone(),
            expected,
            state: Mutex::new(TempState { file, written: 0 }),
        });
        live.insert(address.clone(), Arc::downgrade(&object));
        Ok(TempHandle {
            object,
            writer: true,
        })
    }

    /// Number of copies still referenced
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
