//! Chained hash table with incremental rehashing.
//!
//! Growth never rehashes the whole table at once. `expand` allocates the
//! bigger table and switches the dict into [`DictState::Rehashing`]; from
//! then on every public operation first migrates one bucket from the old
//! table into the new one. Lookups probe the old table then the new one
//! until the old table drains and the new table is promoted.

use std::mem;

use intrusive_collections::linked_list::CursorMut;
use intrusive_collections::{LinkedList, LinkedListLink, intrusive_adapter};
use rand::Rng;

use crate::error::DictError;
use crate::list::EqualFn;
use crate::object::{Gobj, GobjRef};

pub const INIT_SIZE: usize = 8;
/// A stable table grows once `used / size` exceeds this.
pub const FORCE_RATIO: usize = 2;
pub const GROW_RATIO: usize = 2;
pub const DEFAULT_STEP: usize = 1;
const RANDOM_RETRIES: usize = 1000;

pub type HashFn = fn(&Gobj) -> u64;

#[derive(Debug, Clone, Copy)]
pub struct DictType {
    pub hash: HashFn,
    pub equal: EqualFn,
}

#[derive(Debug)]
pub struct Entry {
    link: LinkedListLink,
    hash: u64,
    key: GobjRef,
    val: GobjRef,
}

impl Entry {
    fn new(hash: u64, key: GobjRef, val: GobjRef) -> Box<Self> {
        Box::new(Self {
            link: LinkedListLink::new(),
            hash,
            key,
            val,
        })
    }

    pub fn key(&self) -> &GobjRef {
        &self.key
    }

    pub fn val(&self) -> &GobjRef {
        &self.val
    }
}

intrusive_adapter!(pub EntryAdapter = Box<Entry>: Entry { link: LinkedListLink });

/// One generation of the dict: a power-of-two array of chains.
#[derive(Debug)]
pub struct HashTable {
    buckets: Vec<LinkedList<EntryAdapter>>,
    size: usize,
    mask: usize,
    used: usize,
}

impl HashTable {
    fn new(size: usize) -> Self {
        assert!(size.is_power_of_two());

        let buckets = (0..size)
            .map(|_| LinkedList::new(EntryAdapter::new()))
            .collect::<Vec<_>>();

        Self {
            buckets,
            size,
            mask: size - 1,
            used: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn used(&self) -> usize {
        self.used
    }

    fn push(&mut self, entry: Box<Entry>) {
        let idx = (entry.hash as usize) & self.mask;
        self.buckets[idx].push_front(entry);
        self.used += 1;
    }

    fn lookup(&self, key: &Gobj, hash: u64, equal: EqualFn) -> Option<&Entry> {
        let bucket = &self.buckets[(hash as usize) & self.mask];
        bucket
            .iter()
            .find(|entry| entry.hash == hash && equal(&entry.key, key))
    }

    fn lookup_cursor(
        &mut self,
        key: &Gobj,
        hash: u64,
        equal: EqualFn,
    ) -> Option<CursorMut<'_, EntryAdapter>> {
        let pos = (hash as usize) & self.mask;
        let mut cur = self.buckets[pos].front_mut();

        while let Some(entry) = cur.get() {
            if entry.hash == hash && equal(&entry.key, key) {
                return Some(cur);
            }
            cur.move_next();
        }
        None
    }

    fn remove(&mut self, key: &Gobj, hash: u64, equal: EqualFn) -> Option<Box<Entry>> {
        let removed = self.lookup_cursor(key, hash, equal)?.remove();
        if removed.is_some() {
            self.used -= 1;
        }
        removed
    }

    fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.buckets.iter().flat_map(|bucket| bucket.iter())
    }
}

#[derive(Debug)]
pub enum DictState {
    Empty,
    Stable(HashTable),
    Rehashing {
        old: HashTable,
        new: HashTable,
        cursor: usize,
    },
}

#[derive(Debug)]
pub struct Dict {
    dict_type: DictType,
    state: DictState,
}

impl Dict {
    pub fn new(dict_type: DictType) -> Self {
        Self {
            dict_type,
            state: DictState::Empty,
        }
    }

    pub fn state(&self) -> &DictState {
        &self.state
    }

    pub fn is_rehashing(&self) -> bool {
        matches!(self.state, DictState::Rehashing { .. })
    }

    /// Position of the next old-table bucket to migrate, if rehashing.
    pub fn rehash_cursor(&self) -> Option<usize> {
        match &self.state {
            DictState::Rehashing { cursor, .. } => Some(*cursor),
            _ => None,
        }
    }

    /// Sizes of the old and new generations.
    pub fn table_sizes(&self) -> (Option<usize>, Option<usize>) {
        match &self.state {
            DictState::Empty => (None, None),
            DictState::Stable(table) => (Some(table.size), None),
            DictState::Rehashing { old, new, .. } => (Some(old.size), Some(new.size)),
        }
    }

    pub fn len(&self) -> usize {
        self.tables().into_iter().flatten().map(|t| t.used).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows the dict to the next power of two covering `size`. Starts a
    /// rehash unless the dict had no table yet.
    pub fn expand(&mut self, size: usize) -> Result<(), DictError> {
        let size = next_power(size);
        let current = match &self.state {
            DictState::Rehashing { .. } => return Err(DictError::ExpandRefused),
            DictState::Stable(table) => Some(table.size),
            DictState::Empty => None,
        };
        if current.is_some_and(|live| live >= size) {
            return Err(DictError::ExpandRefused);
        }
        self.grow_to(size);
        Ok(())
    }

    fn grow_to(&mut self, size: usize) {
        let table = HashTable::new(size);
        self.state = match mem::replace(&mut self.state, DictState::Empty) {
            DictState::Stable(old) => DictState::Rehashing {
                old,
                new: table,
                cursor: 0,
            },
            _ => DictState::Stable(table),
        };
    }

    fn expand_if_needed(&mut self) {
        let target = match &self.state {
            DictState::Rehashing { .. } => None,
            DictState::Empty => Some(INIT_SIZE),
            DictState::Stable(t) if t.used > t.size && t.used / t.size > FORCE_RATIO => {
                Some(t.size * GROW_RATIO)
            }
            DictState::Stable(_) => None,
        };
        if let Some(size) = target {
            self.grow_to(next_power(size));
        }
    }

    /// Migrates up to `n` non-empty buckets from the old table. Promotes the
    /// new table once the old one is drained.
    pub fn rehash(&mut self, mut n: usize) {
        while n > 0 {
            let DictState::Rehashing { old, new, cursor } = &mut self.state else {
                return;
            };
            if old.used == 0 {
                if let DictState::Rehashing { new, .. } =
                    mem::replace(&mut self.state, DictState::Empty)
                {
                    self.state = DictState::Stable(new);
                }
                return;
            }
            while old.buckets[*cursor].is_empty() {
                *cursor += 1;
            }
            while let Some(entry) = old.buckets[*cursor].pop_front() {
                old.used -= 1;
                new.push(entry);
            }
            *cursor += 1;
            n -= 1;
        }
    }

    fn rehash_step(&mut self) {
        if self.is_rehashing() {
            self.rehash(DEFAULT_STEP);
        }
    }

    /// Inserts a new key. Both references are moved into the entry.
    pub fn add(&mut self, key: GobjRef, val: GobjRef) -> Result<(), DictError> {
        self.rehash_step();
        self.expand_if_needed();
        let hash = (self.dict_type.hash)(&key);
        if self.lookup(&key, hash).is_some() {
            return Err(DictError::KeyExists);
        }
        self.insert_new(Entry::new(hash, key, val));
        Ok(())
    }

    /// Upsert. Replacing an existing entry drops its old value reference.
    pub fn set(&mut self, key: GobjRef, val: GobjRef) {
        self.rehash_step();
        self.expand_if_needed();
        let hash = (self.dict_type.hash)(&key);
        let equal = self.dict_type.equal;

        for table in self.tables_mut().into_iter().flatten() {
            if let Some(mut cursor) = table.lookup_cursor(&key, hash, equal) {
                let current_key = match cursor.get() {
                    Some(entry) => entry.key.clone(),
                    None => key.clone(),
                };
                // the old entry comes back here and releases its value
                let _ = cursor.replace_with(Entry::new(hash, current_key, val));
                return;
            }
        }
        self.insert_new(Entry::new(hash, key, val));
    }

    fn insert_new(&mut self, entry: Box<Entry>) {
        match &mut self.state {
            DictState::Rehashing { new, .. } => new.push(entry),
            DictState::Stable(table) => table.push(entry),
            DictState::Empty => {
                let mut table = HashTable::new(INIT_SIZE);
                table.push(entry);
                self.state = DictState::Stable(table);
            }
        }
    }

    pub fn find(&mut self, key: &Gobj) -> Option<&Entry> {
        self.rehash_step();
        let hash = (self.dict_type.hash)(key);
        self.lookup(key, hash)
    }

    pub fn get(&mut self, key: &Gobj) -> Option<GobjRef> {
        self.find(key).map(|entry| entry.val.clone())
    }

    pub fn delete(&mut self, key: &Gobj) -> Result<(), DictError> {
        if matches!(self.state, DictState::Empty) {
            return Err(DictError::KeyNotFound);
        }
        self.rehash_step();
        let hash = (self.dict_type.hash)(key);
        let equal = self.dict_type.equal;

        for table in self.tables_mut().into_iter().flatten() {
            if table.remove(key, hash, equal).is_some() {
                return Ok(());
            }
        }
        Err(DictError::KeyNotFound)
    }

    /// A random entry, for sampling. While rehashing, samples the generation
    /// holding more entries. Gives up after a bounded number of empty
    /// bucket probes.
    pub fn random_get(&mut self) -> Option<&Entry> {
        self.rehash_step();
        let table = match &self.state {
            DictState::Empty => return None,
            DictState::Stable(table) => table,
            DictState::Rehashing { old, new, .. } => {
                if new.used > old.used {
                    new
                } else {
                    old
                }
            }
        };
        if table.used == 0 {
            return None;
        }

        let mut rng = rand::rng();
        let mut idx = rng.random_range(0..table.size);
        let mut tries = 0;
        while table.buckets[idx].is_empty() && tries < RANDOM_RETRIES {
            idx = rng.random_range(0..table.size);
            tries += 1;
        }

        let bucket = &table.buckets[idx];
        let chain_len = bucket.iter().count();
        if chain_len == 0 {
            return None;
        }
        bucket.iter().nth(rng.random_range(0..chain_len))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.tables().into_iter().flatten().flat_map(|table| table.iter())
    }

    fn lookup(&self, key: &Gobj, hash: u64) -> Option<&Entry> {
        let equal = self.dict_type.equal;
        self.tables()
            .into_iter()
            .flatten()
            .find_map(|table| table.lookup(key, hash, equal))
    }

    fn tables(&self) -> [Option<&HashTable>; 2] {
        match &self.state {
            DictState::Empty => [None, None],
            DictState::Stable(table) => [Some(table), None],
            DictState::Rehashing { old, new, .. } => [Some(old), Some(new)],
        }
    }

    fn tables_mut(&mut self) -> [Option<&mut HashTable>; 2] {
        match &mut self.state {
            DictState::Empty => [None, None],
            DictState::Stable(table) => [Some(table), None],
            DictState::Rehashing { old, new, .. } => [Some(old), Some(new)],
        }
    }
}

fn next_power(size: usize) -> usize {
    size.max(INIT_SIZE).next_power_of_two()
}
