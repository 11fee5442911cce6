//! The transaction-manager state machine: clock, site array,
//! transaction registry, wait queue, and dependency graph. Dispatches
//! one operation per tick, running the deadlock sweep and wait-queue
//! drain before every dispatch.

use std::collections::{HashSet, VecDeque};

use log::{info, warn};

use crate::common::{SiteId, Tick, TransactionId, VariableId};
use crate::error::{SimError, SimResult};
use crate::invariant;

use super::config::SimConfig;
use super::output::Sink;
use super::site::{is_replicated, Site};
use super::types::{AcquirePermission, LockMode, Operation, Transaction, TxKind, TxStatus};
use super::wait_graph::WaitForGraph;

#[derive(Debug, Clone, Copy)]
enum WaitEntry {
    Read { txn: TransactionId, var: VariableId },
    Write { txn: TransactionId, var: VariableId, value: i64 },
}

impl WaitEntry {
    fn txn(self) -> TransactionId {
        match self {
            WaitEntry::Read { txn, .. } | WaitEntry::Write { txn, .. } => txn,
        }
    }
}

/// Outcome of attempting to satisfy a read or write right now.
enum Resolution {
    Granted,
    Blocked(HashSet<TransactionId>),
}

pub struct TransactionManager<S: Sink> {
    clock: Tick,
    sites: std::collections::BTreeMap<SiteId, Site>,
    transactions: std::collections::HashMap<TransactionId, Transaction>,
    wait_queue: VecDeque<WaitEntry>,
    abort_set: HashSet<TransactionId>,
    graph: WaitForGraph,
    num_variables: u64,
    num_sites: u64,
    sink: S,
}

impl<S: Sink> TransactionManager<S> {
    pub fn new(config: SimConfig, sink: S) -> Self {
        let mut sites = std::collections::BTreeMap::new();
        for id in 1..=config.num_sites {
            let mut site = Site::new(id);
            site.initialize(config.num_variables);
            sites.insert(id, site);
        }
        Self {
            clock: 0,
            sites,
            transactions: std::collections::HashMap::new(),
            wait_queue: VecDeque::new(),
            abort_set: HashSet::new(),
            graph: WaitForGraph::new(),
            num_variables: config.num_variables,
            num_sites: config.num_sites,
            sink,
        }
    }

    pub fn clock(&self) -> Tick {
        self.clock
    }

    pub fn site(&self, id: SiteId) -> Option<&Site> {
        self.sites.get(&id)
    }

    pub fn transaction_status(&self, txn: TransactionId) -> Option<TxStatus> {
        self.transactions.get(&txn).map(|t| t.status)
    }

    pub fn is_wait_queue_empty(&self) -> bool {
        self.wait_queue.is_empty()
    }

    /// Advances the clock by one and processes a single operation:
    /// deadlock sweep, wait-queue drain, then dispatch.
    pub fn step(&mut self, op: Operation) -> SimResult<()> {
        self.clock += 1;
        self.deadlock_sweep()?;
        self.drain_wait_queue()?;
        self.dispatch(op)
    }

    fn dispatch(&mut self, op: Operation) -> SimResult<()> {
        match op {
            Operation::Begin { txn } => self.handle_begin(txn),
            Operation::BeginReadOnly { txn } => self.handle_begin_ro(txn),
            Operation::End { txn } => self.handle_end(txn),
            Operation::Read { txn, var } => self.handle_read(txn, var),
            Operation::Write { txn, var, value } => self.handle_write(txn, var, value),
            Operation::Fail { site } => self.handle_fail(site),
            Operation::Recover { site } => self.handle_recover(site),
            Operation::Dump => self.handle_dump(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle dispatch
    // ------------------------------------------------------------------

    fn handle_begin(&mut self, txn: TransactionId) -> SimResult<()> {
        self.transactions.insert(txn, Transaction::new(txn, TxKind::ReadWrite, self.clock));
        info!("BEGIN T{txn} at tick {}", self.clock);
        Ok(())
    }

    fn handle_begin_ro(&mut self, txn: TransactionId) -> SimResult<()> {
        self.transactions.insert(txn, Transaction::new(txn, TxKind::ReadOnly, self.clock));
        info!("BEGINRO T{txn} at tick {}", self.clock);
        Ok(())
    }

    fn handle_end(&mut self, txn: TransactionId) -> SimResult<()> {
        if !self.transactions.contains_key(&txn) {
            return Err(SimError::UnknownTransaction(txn));
        }
        if self.abort_set.contains(&txn) {
            self.do_abort(txn);
        } else {
            self.do_commit(txn)?;
        }
        Ok(())
    }

    fn handle_fail(&mut self, site_id: SiteId) -> SimResult<()> {
        let site = self.sites.get_mut(&site_id).ok_or(SimError::UnknownSite(site_id))?;
        site.fail(self.clock);

        let contaminated: Vec<TransactionId> = self
            .transactions
            .values()
            .filter(|t| t.touched_sites.contains(&site_id))
            .map(|t| t.id)
            .collect();
        for txn in contaminated {
            self.abort_set.insert(txn);
            if let Some(t) = self.transactions.get_mut(&txn) {
                t.touched_sites.remove(&site_id);
            }
        }
        info!("FAIL site {site_id} at tick {}", self.clock);
        Ok(())
    }

    fn handle_recover(&mut self, site_id: SiteId) -> SimResult<()> {
        let site = self.sites.get_mut(&site_id).ok_or(SimError::UnknownSite(site_id))?;
        site.recover();
        info!("RECOVER site {site_id} at tick {}", self.clock);
        Ok(())
    }

    fn handle_dump(&mut self) -> SimResult<()> {
        for (&site_id, site) in self.sites.iter() {
            if !site.is_active() {
                continue;
            }
            self.sink.emit(&format!("== site {site_id} =="));
            for (var, value) in site.dump(self.clock) {
                self.sink.emit(&format!("x{var}:{value}"));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    fn handle_read(&mut self, txn: TransactionId, var: VariableId) -> SimResult<()> {
        let is_ro = self
            .transactions
            .get(&txn)
            .ok_or(SimError::UnknownTransaction(txn))?
            .is_read_only();

        let resolution = if is_ro { self.attempt_read_ro(txn, var)? } else { self.attempt_read_rw(txn, var)? };

        match resolution {
            Resolution::Granted => {}
            Resolution::Blocked(blockers) => {
                self.wait_queue.push_back(WaitEntry::Read { txn, var });
                if !is_ro {
                    self.graph.add_edges(txn, blockers);
                }
                warn!("WAIT T{txn} read x{var} at tick {}", self.clock);
            }
        }
        Ok(())
    }

    fn handle_write(&mut self, txn: TransactionId, var: VariableId, value: i64) -> SimResult<()> {
        if !self.transactions.contains_key(&txn) {
            return Err(SimError::UnknownTransaction(txn));
        }
        match self.attempt_write(txn, var, value)? {
            Resolution::Granted => {}
            Resolution::Blocked(blockers) => {
                self.wait_queue.push_back(WaitEntry::Write { txn, var, value });
                self.graph.add_edges(txn, blockers);
                warn!("WAIT T{txn} write x{var} at tick {}", self.clock);
            }
        }
        Ok(())
    }

    /// spec §4.4.1: search sites ascending for one that is active,
    /// holds `var`, is not stale, and grants a READ lock.
    fn attempt_read_rw(&mut self, txn: TransactionId, var: VariableId) -> SimResult<Resolution> {
        let mut blockers = HashSet::new();
        let site_ids: Vec<SiteId> = self.sites.keys().copied().collect();
        for site_id in site_ids {
            let usable = {
                let site = &self.sites[&site_id];
                site.is_active() && site.has_variable(var) && (!is_replicated(var) || !site.is_stale(var))
            };
            if !usable {
                continue;
            }
            let perm = self.sites[&site_id].can_acquire_read(var, txn);
            match perm {
                AcquirePermission::Allowed | AcquirePermission::AllowedSameTxn => {
                    self.grant_read(txn, var, site_id)?;
                    return Ok(Resolution::Granted);
                }
                AcquirePermission::AllowedIfQueueEmpty => {
                    let contenders = self.queue_contenders_on(var, txn, true);
                    if contenders.is_empty() {
                        self.grant_read(txn, var, site_id)?;
                        return Ok(Resolution::Granted);
                    }
                    blockers.extend(contenders);
                }
                AcquirePermission::Denied => {
                    blockers.extend(self.sites[&site_id].locks.holders(var));
                }
            }
        }
        Ok(Resolution::Blocked(blockers))
    }

    fn grant_read(&mut self, txn: TransactionId, var: VariableId, site_id: SiteId) -> SimResult<()> {
        let value = self.sites[&site_id].get_value_at(var, self.clock);
        invariant!(
            value.is_some(),
            "site {site_id} claims to hold x{var} but has no committed value at tick {}",
            self.clock
        );
        invariant!(self.sites.contains_key(&site_id), "site {site_id} vanished between lookup and grant");
        self.sites.get_mut(&site_id).expect("checked above").acquire_lock(var, txn, LockMode::Read);
        if let Some(t) = self.transactions.get_mut(&txn) {
            t.touched_sites.insert(site_id);
        }
        info!("R T{txn} x{var}:{} at site {site_id}, tick {}", value.expect("checked above"), self.clock);
        Ok(())
    }

    /// spec §4.4.2: snapshot read at `startTime[T]`, honoring the
    /// failed-site visibility rule for replicated variables.
    fn attempt_read_ro(&mut self, txn: TransactionId, var: VariableId) -> SimResult<Resolution> {
        let snapshot_time = match self.transactions.get(&txn) {
            Some(t) => t.start_tick,
            None => return Ok(Resolution::Blocked(HashSet::new())),
        };
        let site_ids: Vec<SiteId> = self.sites.keys().copied().collect();
        for site_id in site_ids {
            let site = &self.sites[&site_id];
            if !site.is_active() || !site.has_variable(var) {
                continue;
            }
            if is_replicated(var) {
                if site.is_stale(var) {
                    continue;
                }
                if let Some(last_fail) = site.last_fail_tick() {
                    if last_fail <= snapshot_time {
                        continue;
                    }
                }
            }
            if let Some(value) = site.get_value_at(var, snapshot_time) {
                info!("R(snapshot) T{txn} x{var}:{value} at site {site_id}, tick {}", self.clock);
                return Ok(Resolution::Granted);
            }
        }
        // Snapshot reads never acquire locks, so no graph edges.
        Ok(Resolution::Blocked(HashSet::new()))
    }

    /// spec §4.4.3: two-pass write across every active site storing `var`.
    fn attempt_write(&mut self, txn: TransactionId, var: VariableId, value: i64) -> SimResult<Resolution> {
        let candidate_sites: Vec<SiteId> =
            self.sites.iter().filter(|(_, s)| s.is_active() && s.has_variable(var)).map(|(&id, _)| id).collect();

        if candidate_sites.is_empty() {
            return Ok(Resolution::Blocked(HashSet::new()));
        }

        let mut blockers = HashSet::new();
        let mut blocked = false;
        for &site_id in &candidate_sites {
            match self.sites[&site_id].can_acquire_write(var, txn) {
                AcquirePermission::Denied => {
                    blocked = true;
                    blockers.extend(self.sites[&site_id].locks.holders(var));
                }
                AcquirePermission::AllowedIfQueueEmpty => {
                    let contenders = self.queue_contenders_on(var, txn, false);
                    if !contenders.is_empty() {
                        blocked = true;
                        blockers.extend(contenders);
                    }
                }
                AcquirePermission::Allowed | AcquirePermission::AllowedSameTxn => {}
            }
        }

        if blocked {
            return Ok(Resolution::Blocked(blockers));
        }

        for &site_id in &candidate_sites {
            invariant!(self.sites.contains_key(&site_id), "site {site_id} vanished between probe and grant");
            let site = self.sites.get_mut(&site_id).expect("checked above");
            site.acquire_lock(var, txn, LockMode::Write);
            site.cache_write(var, value, self.clock);
            info!("W T{txn} x{var}={value} granted at site {site_id}, tick {}", self.clock);
        }
        if let Some(t) = self.transactions.get_mut(&txn) {
            t.written_vars.insert(var);
            t.touched_sites.extend(candidate_sites.iter().copied());
        }
        Ok(Resolution::Granted)
    }

    /// Wait-queue entries (other than `txn`'s own) contending on `var`.
    /// For a read probe, only WRITE contenders block a join/upgrade;
    /// for a write probe, any READ or WRITE contender blocks.
    fn queue_contenders_on(&self, var: VariableId, txn: TransactionId, read_probe: bool) -> HashSet<TransactionId> {
        self.wait_queue
            .iter()
            .filter_map(|entry| match entry {
                WaitEntry::Write { txn: t, var: v, .. } if *v == var && *t != txn => Some(*t),
                WaitEntry::Read { txn: t, var: v, .. } if !read_probe && *v == var && *t != txn => Some(*t),
                _ => None,
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Deadlock sweep and wait-queue drain
    // ------------------------------------------------------------------

    fn deadlock_sweep(&mut self) -> SimResult<()> {
        loop {
            let cycle = self.graph.detect_cycle()?;
            if cycle.is_empty() {
                break;
            }
            let victim = self.select_victim(&cycle)?;
            warn!("DEADLOCK victim T{victim} at tick {}", self.clock);
            self.do_abort(victim);
        }
        Ok(())
    }

    /// spec §4.4.5: argmax startTime[T], ties broken by higher id.
    fn select_victim(&self, cycle: &std::collections::BTreeSet<TransactionId>) -> SimResult<TransactionId> {
        let victim = cycle.iter().max_by_key(|&&t| {
            let start = self.transactions.get(&t).map(|tx| tx.start_tick).unwrap_or(0);
            (start, t)
        });
        invariant!(victim.is_some(), "deadlock sweep reported a cycle with no members");
        Ok(*victim.expect("checked above"))
    }

    fn drain_wait_queue(&mut self) -> SimResult<()> {
        loop {
            let mut progressed = false;
            let entries: Vec<(usize, WaitEntry)> = self.wait_queue.iter().copied().enumerate().collect();
            for (idx, entry) in entries {
                let txn = entry.txn();
                let is_ro = self.transactions.get(&txn).map(|t| t.is_read_only()).unwrap_or(false);
                let resolution = match entry {
                    WaitEntry::Read { txn, var } => {
                        if is_ro {
                            self.attempt_read_ro(txn, var)?
                        } else {
                            self.attempt_read_rw(txn, var)?
                        }
                    }
                    WaitEntry::Write { txn, var, value } => self.attempt_write(txn, var, value)?,
                };
                match resolution {
                    Resolution::Granted => {
                        self.wait_queue.remove(idx);
                        progressed = true;
                        break;
                    }
                    Resolution::Blocked(blockers) => {
                        if !is_ro {
                            self.graph.add_edges(txn, blockers);
                        }
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commit / abort
    // ------------------------------------------------------------------

    fn do_commit(&mut self, txn: TransactionId) -> SimResult<()> {
        let written = self.transactions.get(&txn).map(|t| t.written_vars.clone()).unwrap_or_default();
        for var in written {
            let site_ids: Vec<SiteId> =
                self.sites.iter().filter(|(_, s)| s.is_active() && s.has_variable(var)).map(|(&id, _)| id).collect();
            for site_id in site_ids {
                invariant!(self.sites.contains_key(&site_id), "site {site_id} vanished before commit");
                let site = self.sites.get_mut(&site_id).expect("checked above");
                for (tick, value) in site.commit_cache(var) {
                    info!("COMMIT T{txn} x{var}={value} at site {site_id}, time {tick}");
                }
            }
        }
        self.release_transaction(txn);
        info!("END T{txn} committed at tick {}", self.clock);
        Ok(())
    }

    /// spec §3/§4.4.4: an aborted transaction's cached-but-uncommitted
    /// writes are destroyed, not just its locks released. The WRITE
    /// lock this transaction held on `var` at each site was exclusive,
    /// so no other transaction could have cached a write for the same
    /// `var` there concurrently — dropping the whole cache entry is
    /// safe and leaves no trace of the aborted write for a later
    /// committer to accidentally promote.
    fn do_abort(&mut self, txn: TransactionId) {
        let written: Vec<VariableId> =
            self.transactions.get(&txn).map(|t| t.written_vars.iter().copied().collect()).unwrap_or_default();
        for var in written {
            for site in self.sites.values_mut() {
                site.discard_cached_writes(var);
            }
        }
        self.release_transaction(txn);
        self.abort_set.remove(&txn);
        warn!("ABORT T{txn} at tick {}", self.clock);
    }

    fn release_transaction(&mut self, txn: TransactionId) {
        self.graph.remove_source(txn);
        for site in self.sites.values_mut() {
            site.release_locks_of(txn);
        }
        self.wait_queue.retain(|e| e.txn() != txn);
        self.transactions.remove(&txn);
    }
}
