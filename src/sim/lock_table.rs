//! Per-site lock table: one record per locked variable, separating
//! capability queries (`can_acquire_*`) from the mutating `acquire`
//! action so a caller can probe several sites before committing to a
//! grant.

use std::collections::{HashMap, HashSet};

use crate::common::{TransactionId, VariableId};

use super::types::{AcquirePermission, LockMode};

/// A single lock record for one variable. `Write` is represented with
/// exactly one holder at the type level, so "WRITE held by more than
/// one transaction" is unrepresentable rather than merely checked.
#[derive(Debug, Clone)]
enum LockRecord {
    Read(HashSet<TransactionId>),
    Write(TransactionId),
}

#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<VariableId, LockRecord>,
}

impl LockTable {
    pub fn new() -> Self {
        Self { locks: HashMap::new() }
    }

    /// Capability query for a READ request.
    pub fn can_acquire_read(&self, var: VariableId, txn: TransactionId) -> AcquirePermission {
        match self.locks.get(&var) {
            None => AcquirePermission::Allowed,
            Some(LockRecord::Read(_)) => AcquirePermission::AllowedIfQueueEmpty,
            Some(LockRecord::Write(holder)) if *holder == txn => AcquirePermission::AllowedSameTxn,
            Some(LockRecord::Write(_)) => AcquirePermission::Denied,
        }
    }

    /// Capability query for a WRITE request.
    pub fn can_acquire_write(&self, var: VariableId, txn: TransactionId) -> AcquirePermission {
        match self.locks.get(&var) {
            None => AcquirePermission::Allowed,
            Some(LockRecord::Read(holders)) => {
                if holders.len() == 1 && holders.contains(&txn) {
                    AcquirePermission::AllowedIfQueueEmpty
                } else {
                    AcquirePermission::Denied
                }
            }
            Some(LockRecord::Write(holder)) if *holder == txn => AcquirePermission::Allowed,
            Some(LockRecord::Write(_)) => AcquirePermission::Denied,
        }
    }

    /// Grants a lock, creating or extending the existing record.
    /// Callers are expected to have already checked the relevant
    /// `can_acquire_*` permission; this does not re-validate.
    pub fn acquire(&mut self, var: VariableId, txn: TransactionId, mode: LockMode) {
        match mode {
            LockMode::Read => {
                self.locks
                    .entry(var)
                    .and_modify(|rec| {
                        if let LockRecord::Read(holders) = rec {
                            holders.insert(txn);
                        } else {
                            // Upgrade target: same-txn write already held is idempotent.
                        }
                    })
                    .or_insert_with(|| LockRecord::Read(HashSet::from([txn])));
            }
            LockMode::Write => {
                self.locks.insert(var, LockRecord::Write(txn));
            }
        }
    }

    /// Current holders of the lock on `var`, empty if unlocked.
    pub fn holders(&self, var: VariableId) -> HashSet<TransactionId> {
        match self.locks.get(&var) {
            None => HashSet::new(),
            Some(LockRecord::Read(holders)) => holders.clone(),
            Some(LockRecord::Write(holder)) => HashSet::from([*holder]),
        }
    }

    /// Clears the entire table. Used on site failure.
    pub fn release_all(&mut self) {
        self.locks.clear();
    }

    /// Removes `txn` from every holder set, dropping records that
    /// become empty.
    pub fn release_transaction(&mut self, txn: TransactionId) {
        self.locks.retain(|_, rec| match rec {
            LockRecord::Read(holders) => {
                holders.remove(&txn);
                !holders.is_empty()
            }
            LockRecord::Write(holder) => *holder != txn,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlocked_allows_either_mode() {
        let table = LockTable::new();
        assert_eq!(table.can_acquire_read(1, 10), AcquirePermission::Allowed);
        assert_eq!(table.can_acquire_write(1, 10), AcquirePermission::Allowed);
    }

    #[test]
    fn read_join_is_queue_gated() {
        let mut table = LockTable::new();
        table.acquire(1, 10, LockMode::Read);
        assert_eq!(table.can_acquire_read(1, 20), AcquirePermission::AllowedIfQueueEmpty);
    }

    #[test]
    fn write_denied_when_held_by_other() {
        let mut table = LockTable::new();
        table.acquire(1, 10, LockMode::Write);
        assert_eq!(table.can_acquire_write(1, 20), AcquirePermission::Denied);
        assert_eq!(table.can_acquire_read(1, 20), AcquirePermission::Denied);
    }

    #[test]
    fn same_txn_write_is_idempotent_and_read_is_trivial() {
        let mut table = LockTable::new();
        table.acquire(1, 10, LockMode::Write);
        assert_eq!(table.can_acquire_write(1, 10), AcquirePermission::Allowed);
        assert_eq!(table.can_acquire_read(1, 10), AcquirePermission::AllowedSameTxn);
    }

    #[test]
    fn sole_reader_can_upgrade() {
        let mut table = LockTable::new();
        table.acquire(1, 10, LockMode::Read);
        assert_eq!(table.can_acquire_write(1, 10), AcquirePermission::AllowedIfQueueEmpty);
        table.acquire(1, 10, LockMode::Write);
        assert_eq!(table.holders(1), HashSet::from([10]));
    }

    #[test]
    fn shared_reader_cannot_upgrade() {
        let mut table = LockTable::new();
        table.acquire(1, 10, LockMode::Read);
        table.acquire(1, 20, LockMode::Read);
        assert_eq!(table.can_acquire_write(1, 10), AcquirePermission::Denied);
    }

    #[test]
    fn release_transaction_drops_empty_records() {
        let mut table = LockTable::new();
        table.acquire(1, 10, LockMode::Read);
        table.release_transaction(10);
        assert!(table.holders(1).is_empty());
        assert_eq!(table.can_acquire_write(1, 20), AcquirePermission::Allowed);
    }

    #[test]
    fn release_all_clears_table() {
        let mut table = LockTable::new();
        table.acquire(1, 10, LockMode::Write);
        table.acquire(2, 20, LockMode::Read);
        table.release_all();
        assert!(table.holders(1).is_empty());
        assert!(table.holders(2).is_empty());
    }
}
