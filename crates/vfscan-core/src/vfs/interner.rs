//! Arena of interned addresses
//!
//! Stores keep one copy of every address they have seen and refer to it by
//! a small integer id, so lookups by address are a single hash probe and
//! derived addresses never hold pointers to their parents.

use std::collections::HashMap;

use super::VirtualAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressId(u32);

impl AddressId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
pub struct AddressInterner {
    arena: Vec<VirtualAddress>,
    index: HashMap<VirtualAddress, AddressId>,
}

impl AddressInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `address`, allocating one on first sight
    pub fn intern(&mut self, address: &VirtualAddress) -> AddressId {
        if let Some(id) = self.index.get(address) {
            return *id;
        }
        let id = AddressId(self.arena.len() as u32);
        self.arena.push(address.clone());
        self.index.insert(address.clone(), id);
        id
    }

    pub fn get(&self, address: &VirtualAddress) -> Option<AddressId> {
        self.index.get(address).copied()
    }

    pub fn resolve(&self, id: AddressId) -> &VirtualAddress {
        &self.arena[id.index()]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AddressId, &VirtualAddress)> {
        self.arena
            .iter()
            .enumerate()
            .map(|(i, addr)| (AddressId(i as u32), addr))
    }
}
