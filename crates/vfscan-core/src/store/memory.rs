//! In-memory store keyed by interned addresses

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;

use crate::error::Result;
use crate::vfs::{AddressGlob, AddressId, AddressInterner, VirtualAddress, VirtualDirectoryEntry};

use super::{Attribute, Store};

#[derive(Default)]
struct Tables {
    interner: AddressInterner,
    entries: HashMap<AddressId, VirtualDirectoryEntry>,
    completions: HashSet<(AddressId, String)>,
    /// (address, scanner, key) -> value
    attributes: BTreeMap<(AddressId, String, String), String>,
}

/// Store that lives and dies with the process
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get_completion(&self, address: &VirtualAddress, scanner: &str) -> Result<bool> {
        let tables = self.tables.lock();
        Ok(match tables.interner.get(address) {
            Some(id) => tables.completions.contains(&(id, scanner.to_string())),
            None => false,
        })
    }

    fn set_completion(&self, address: &VirtualAddress, scanner: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let id = tables.interner.intern(address);
        tables.completions.insert((id, scanner.to_string()));
        Ok(())
    }

    fn clear_completions(&self, glob: &AddressGlob, scanner: &str) -> Result<usize> {
        let mut tables = self.tables.lock();
        let Tables {
            interner,
            completions,
            ..
        } = &mut *tables;
        let before = completions.len();
        completions.retain(|(id, name)| !(name == scanner && glob.matches(interner.resolve(*id))));
        Ok(before - completions.len())
    }

    fn count_completions(&self, scanner: Option<&str>) -> Result<usize> {
        let tables = self.tables.lock();
        Ok(match scanner {
            Some(scanner) => tables
                .completions
                .iter()
                .filter(|(_, name)| name == scanner)
                .count(),
            None => tables.completions.len(),
        })
    }

    fn put_directory_entry(&self, entry: &VirtualDirectoryEntry) -> Result<()> {
        let mut tables = self.tables.lock();
        let id = tables.interner.intern(&entry.address);
        tables.entries.insert(id, entry.clone());
        Ok(())
    }

    fn get_directory_entry(&self, address: &VirtualAddress) -> Result<Option<VirtualDirectoryEntry>> {
        let tables = self.tables.lock();
        Ok(tables
            .interner
            .get(address)
            .and_then(|id| tables.entries.get(&id))
            .cloned())
    }

    fn children(&self, parent: Option<&VirtualAddress>) -> Result<Vec<VirtualDirectoryEntry>> {
        let tables = self.tables.lock();
        let mut children: Vec<_> = tables
            .entries
            .values()
            .filter(|e| e.parent.as_ref() == parent)
            .cloned()
            .collect();
        children.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(children)
    }

    fn count_directory_entries(&self) -> Result<usize> {
        Ok(self.tables.lock().entries.len())
    }

    fn put_attribute(&self, address: &VirtualAddress, scanner: &str, key: &str, value: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let id = tables.interner.intern(address);
        tables
            .attributes
            .insert((id, scanner.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn attributes(&self, address: &VirtualAddress) -> Result<Vec<Attribute>> {
        let tables = self.tables.lock();
        let Some(id) = tables.interner.get(address) else {
            return Ok(Vec::new());
        };
        Ok(tables
            .attributes
            .iter()
            .filter(|((owner, _, _), _)| *owner == id)
            .map(|((_, scanner, key), value)| Attribute {
                scanner: scanner.clone(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    fn clear_attributes(&self, glob: &AddressGlob, scanner: &str) -> Result<usize> {
        let mut tables = self.tables.lock();
        let Tables {
            interner,
            attributes,
            ..
        } = &mut *tables;
        let before = attributes.len();
        attributes.retain(|(id, name, _), _| !(name == scanner && glob.matches(interner.resolve(*id))));
        Ok(before - attributes.len())
    }
}
