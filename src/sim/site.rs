//! A single replica site: versioned committed store, stale flags,
//! uncommitted write cache, and an owned lock table.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::common::{SiteId, Tick, TransactionId, VariableId, NUM_SITES};

use super::lock_table::LockTable;
use super::types::{AcquirePermission, LockMode};

/// Whether `var` replicates to every site (even index) or lives on a
/// single site only (odd index), per the data model.
pub fn is_replicated(var: VariableId) -> bool {
    var % 2 == 0
}

/// The sole site an odd-indexed (unique) variable resides on.
pub fn home_site_of(var: VariableId) -> SiteId {
    1 + (var % NUM_SITES)
}

/// Whether `site` stores `var` at all.
pub fn site_has_variable(site: SiteId, var: VariableId) -> bool {
    is_replicated(var) || home_site_of(var) == site
}

#[derive(Debug)]
pub struct Site {
    pub id: SiteId,
    active: bool,
    /// variable -> (commit tick -> value), ordered for floor queries.
    committed: HashMap<VariableId, BTreeMap<Tick, i64>>,
    /// variable -> stale. Only ever meaningful for replicated variables;
    /// unique variables are never stale (see DESIGN.md Open Questions).
    stale: HashMap<VariableId, bool>,
    /// variable -> (tick -> value) of writes not yet committed.
    cache: HashMap<VariableId, BTreeMap<Tick, i64>>,
    pub locks: LockTable,
    /// Tick of the most recent `fail()`, if any. Used by read-only
    /// snapshot visibility (spec §4.4.2).
    last_fail_tick: Option<Tick>,
}

impl Site {
    pub fn new(id: SiteId) -> Self {
        Self {
            id,
            active: true,
            committed: HashMap::new(),
            stale: HashMap::new(),
            cache: HashMap::new(),
            locks: LockTable::new(),
            last_fail_tick: None,
        }
    }

    /// Populates the committed store for every variable this site
    /// stores with `{0 -> 10*i}`, stale = false. Mirrors the
    /// replication rule `i % 2 == 0 || 1 + (i % NUM_SITES) == site_id`.
    pub fn initialize(&mut self, num_variables: u64) {
        for i in 1..=num_variables {
            if site_has_variable(self.id, i) {
                let mut versions = BTreeMap::new();
                versions.insert(0, (10 * i) as i64);
                self.committed.insert(i, versions);
                self.stale.insert(i, false);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Marks this site down: discards the write cache, releases all
    /// locks, and marks every replicated variable stale. Unique
    /// variables are exempt and remain authoritative.
    pub fn fail(&mut self, at_tick: Tick) {
        self.active = false;
        self.cache.clear();
        self.locks.release_all();
        for (&var, stale) in self.stale.iter_mut() {
            if is_replicated(var) {
                *stale = true;
            }
        }
        self.last_fail_tick = Some(at_tick);
    }

    /// Brings the site back up. Replicated variables remain stale
    /// until the next committed write; unique variables were never
    /// marked stale and are immediately usable.
    pub fn recover(&mut self) {
        self.active = true;
    }

    pub fn has_variable(&self, var: VariableId) -> bool {
        site_has_variable(self.id, var)
    }

    pub fn is_unique_variable(&self, var: VariableId) -> bool {
        !is_replicated(var)
    }

    pub fn is_stale(&self, var: VariableId) -> bool {
        self.stale.get(&var).copied().unwrap_or(false)
    }

    /// The tick of the site's most recent failure, if it has ever failed.
    pub fn last_fail_tick(&self) -> Option<Tick> {
        self.last_fail_tick
    }

    /// Value of `var` committed at the greatest time <= `t`.
    pub fn get_value_at(&self, var: VariableId, t: Tick) -> Option<i64> {
        self.committed
            .get(&var)
            .and_then(|versions| versions.range(..=t).next_back())
            .map(|(_, v)| *v)
    }

    /// Greatest commit time <= `t`, `None` if no such commit exists.
    pub fn last_committed_time_at(&self, var: VariableId, t: Tick) -> Option<Tick> {
        self.committed
            .get(&var)
            .and_then(|versions| versions.range(..=t).next_back())
            .map(|(&tick, _)| tick)
    }

    pub fn cache_write(&mut self, var: VariableId, value: i64, tick: Tick) {
        self.cache.entry(var).or_default().insert(tick, value);
    }

    /// Drops every uncommitted write cached for `var` on this site.
    /// Used to destroy an aborting transaction's pending writes (spec
    /// §3/§4.4.4): the WRITE lock's exclusivity guarantees that while
    /// it is held, the aborting transaction is the only possible
    /// source of a cached entry for `var` on this site, so dropping
    /// the whole entry is safe.
    pub fn discard_cached_writes(&mut self, var: VariableId) {
        self.cache.remove(&var);
    }

    /// Promotes every cached `(tick -> value)` pair for `var` into the
    /// committed store and clears staleness. Returns the promoted
    /// entries (for logging), in ascending tick order.
    pub fn commit_cache(&mut self, var: VariableId) -> Vec<(Tick, i64)> {
        let Some(pending) = self.cache.remove(&var) else {
            return Vec::new();
        };
        let entries: Vec<(Tick, i64)> = pending.into_iter().collect();
        let store = self.committed.entry(var).or_default();
        for &(tick, value) in &entries {
            store.insert(tick, value);
        }
        self.stale.insert(var, false);
        entries
    }

    /// `x_i:value` lines for every variable this site stores, reading
    /// only committed state (never the write cache).
    pub fn dump(&self, t: Tick) -> Vec<(VariableId, i64)> {
        let mut vars: Vec<VariableId> = self.committed.keys().copied().collect();
        vars.sort_unstable();
        vars.into_iter()
            .filter_map(|v| self.get_value_at(v, t).map(|value| (v, value)))
            .collect()
    }

    pub fn can_acquire_read(&self, var: VariableId, txn: TransactionId) -> AcquirePermission {
        self.locks.can_acquire_read(var, txn)
    }

    pub fn can_acquire_write(&self, var: VariableId, txn: TransactionId) -> AcquirePermission {
        self.locks.can_acquire_write(var, txn)
    }

    pub fn acquire_lock(&mut self, var: VariableId, txn: TransactionId, mode: LockMode) {
        self.locks.acquire(var, txn, mode);
    }

    pub fn release_locks_of(&mut self, txn: TransactionId) {
        self.locks.release_transaction(txn);
    }
}
