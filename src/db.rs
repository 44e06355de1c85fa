use tracing::debug;

use crate::ae::get_current_time_ms;
use crate::dict::{Dict, DictType};
use crate::object::{Gobj, GobjRef, gstr_equal, gstr_hash};

pub const KEYSPACE_DICT_TYPE: DictType = DictType {
    hash: gstr_hash,
    equal: gstr_equal,
};

/// The keyspace: values in `data`, absolute millisecond deadlines in
/// `expire`.
#[derive(Debug)]
pub struct GodisDb {
    pub data: Dict,
    pub expire: Dict,
}

impl Default for GodisDb {
    fn default() -> Self {
        Self::new()
    }
}

impl GodisDb {
    pub fn new() -> Self {
        Self {
            data: Dict::new(KEYSPACE_DICT_TYPE),
            expire: Dict::new(KEYSPACE_DICT_TYPE),
        }
    }

    /// Deletes `key` from both dicts if its deadline is at or before `now`.
    pub fn expire_if_needed(&mut self, key: &Gobj, now: i64) -> bool {
        let Some(when) = self.expire.get(key).and_then(|when| when.int_val()) else {
            return false;
        };
        if when > now {
            return false;
        }
        self.evict(key);
        true
    }

    pub fn find_key_read(&mut self, key: &Gobj) -> Option<GobjRef> {
        self.expire_if_needed(key, get_current_time_ms());
        self.data.get(key)
    }

    /// Stores `val` and clears any deadline the key had.
    pub fn set_key(&mut self, key: GobjRef, val: GobjRef) {
        // a key without a deadline is the common case
        let _ = self.expire.delete(&key);
        self.data.set(key, val);
    }

    pub fn set_expire(&mut self, key: GobjRef, when_ms: i64) {
        self.expire.set(key, Gobj::create_int(when_ms));
    }

    /// Samples up to `count` deadlines and evicts the ones already past.
    /// Returns how many keys were evicted.
    pub fn active_expire_cycle(&mut self, count: usize, now: i64) -> usize {
        let mut evicted = 0;
        for _ in 0..count {
            let Some(entry) = self.expire.random_get() else {
                break;
            };
            let key = entry.key().clone();
            let when = entry.val().int_val();
            if when.is_some_and(|when| when <= now) {
                self.evict(&key);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, remaining = self.expire.len(), "active expire cycle");
        }
        evicted
    }

    fn evict(&mut self, key: &Gobj) {
        let _ = self.expire.delete(key);
        let _ = self.data.delete(key);
        debug!(key = %key.display(), "expired key");
    }
}
