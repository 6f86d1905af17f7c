//! Enumerable set of addresses that currently hold a nonzero balance.
//!
//! Keys live in a dense `Vec` so holders can be walked by position, and a
//! side map records each key's position. Removal swaps the departing key with
//! the last one, so every operation is O(1) and the invariant
//! `index[keys[i]] == i` holds after each call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{TokenError, TokenResult};
use crate::types::Address;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HolderRegistry {
    keys: Vec<Address>,
    index: HashMap<Address, usize>,
}

impl HolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `addr`; a no-op when already present.
    pub fn insert(&mut self, addr: Address) {
        if self.index.contains_key(&addr) {
            return;
        }
        self.index.insert(addr, self.keys.len());
        self.keys.push(addr);
    }

    /// Removes `addr` by swapping it with the last key.
    pub fn remove(&mut self, addr: &Address) -> TokenResult<()> {
        let position = self.index.remove(addr).ok_or_else(|| {
            TokenError::InvalidState(format!("holder {addr} missing from registry"))
        })?;
        let last = self.keys.len() - 1;
        if position != last {
            let moved = self.keys[last];
            self.keys.swap(position, last);
            self.index.insert(moved, position);
        }
        self.keys.truncate(last);
        Ok(())
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.index.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn at(&self, i: usize) -> Option<Address> {
        self.keys.get(i).copied()
    }

    pub fn index_of(&self, addr: &Address) -> Option<usize> {
        self.index.get(addr).copied()
    }

    /// Borrowing walk in registry order. The borrow keeps the registry frozen
    /// for as long as the iterator lives.
    pub fn iter(&self) -> impl Iterator<Item = &Address> + '_ {
        self.keys.iter()
    }

    /// Frozen copy of the current order, for passes that interleave mutation.
    pub fn snapshot(&self) -> Vec<Address> {
        self.keys.clone()
    }

    pub fn check_consistency(&self) -> TokenResult<()> {
        if self.keys.len() != self.index.len() {
            return Err(TokenError::InvalidState(format!(
                "registry has {} keys but {} index entries",
                self.keys.len(),
                self.index.len()
            )));
        }
        for (i, key) in self.keys.iter().enumerate() {
            match self.index.get(key) {
                Some(&stored) if stored == i => {}
                other => {
                    return Err(TokenError::InvalidState(format!(
                        "registry index for {key} is {other:?}, expected {i}"
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Serialized form keeps only the ordered keys; the index is rebuilt.
impl Serialize for HolderRegistry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.keys.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HolderRegistry {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let keys = Vec::<Address>::deserialize(deserializer)?;
        let mut registry = HolderRegistry::new();
        for key in keys {
            if registry.contains(&key) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate registry key {key}"
                )));
            }
            registry.insert(key);
        }
        Ok(registry)
    }
}
