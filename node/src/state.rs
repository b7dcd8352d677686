use chord_lib::{is_between, Address, ChordId};
use dashmap::DashMap;
use sha1::{Digest, Sha1};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}

/// Where a stored key ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Primary,
    Replica,
}

/// Routing tables and key/value stores of one peer.
///
/// Every structure synchronizes on its own: routines and RPC handlers never
/// hold more than one of these locks at a time, and never across an await.
#[derive(Debug)]
pub struct PeerState {
    own: Address,
    successor_list_size: usize,
    successor_list: RwLock<Vec<Address>>,
    successor_digest: Mutex<String>,
    finger_table: RwLock<Vec<Option<Address>>>,
    next_finger: AtomicUsize,
    predecessor: Mutex<Option<Address>>,
    primary: DashMap<ChordId, String>,
    replica: DashMap<ChordId, String>,
}

impl PeerState {
    /// A fresh state that knows only itself: every successor slot points at
    /// `own` and all fingers are empty.
    pub fn new(own: Address, successor_list_size: usize, ring_bits: u32) -> Self {
        let successor_list_size = successor_list_size.max(1);
        Self {
            successor_list: RwLock::new(vec![own.clone(); successor_list_size]),
            own,
            successor_list_size,
            successor_digest: Mutex::new(String::new()),
            finger_table: RwLock::new(vec![None; ring_bits as usize]),
            next_finger: AtomicUsize::new(0),
            predecessor: Mutex::new(None),
            primary: DashMap::new(),
            replica: DashMap::new(),
        }
    }

    pub fn own(&self) -> &Address {
        &self.own
    }

    pub fn successor_list_size(&self) -> usize {
        self.successor_list_size
    }

    // Successor list

    pub fn successor(&self) -> Address {
        self.successor_at(0)
    }

    /// Out-of-range indices read as the node itself.
    pub fn successor_at(&self, index: usize) -> Address {
        read(&self.successor_list)
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.own.clone())
    }

    /// Writes past the end of the list are ignored.
    pub fn set_successor(&self, index: usize, address: Address) {
        if let Some(slot) = write(&self.successor_list).get_mut(index) {
            *slot = address;
        }
    }

    pub fn successor_list(&self) -> Vec<Address> {
        read(&self.successor_list).clone()
    }

    /// Fills every slot with `address`.
    pub fn reset_successors(&self, address: &Address) {
        *write(&self.successor_list) = vec![address.clone(); self.successor_list_size];
    }

    /// Installs `[successor] + their_list[..r-1]` as the successor list.
    pub fn splice_successors(&self, successor: Address, their_list: &[Address]) -> Vec<Address> {
        let spliced = splice_successor_list(successor, their_list, self.successor_list_size);
        *write(&self.successor_list) = spliced.clone();
        spliced
    }

    /// Drops a failed successor and promotes the next distinct entry.
    ///
    /// A one-slot list has nothing to promote and is left alone. When every
    /// slot held the failed peer the node falls back to itself.
    pub fn promote_next_successor(&self, failed: &Address) -> Option<Address> {
        let mut list = write(&self.successor_list);
        if list.len() <= 1 || list.first() != Some(failed) {
            return None;
        }
        let remaining: Vec<Address> = list.iter().filter(|a| *a != failed).cloned().collect();
        *list = pad_successor_list(remaining, &self.own, self.successor_list_size);
        list.first().cloned()
    }

    /// Records the digest of the current successor list and reports whether
    /// it differs from the previously recorded one.
    pub fn successor_list_changed(&self) -> bool {
        let digest = successor_list_digest(&read(&self.successor_list));
        let mut last = lock(&self.successor_digest);
        if *last == digest {
            false
        } else {
            *last = digest;
            true
        }
    }

    /// Forgets the recorded digest so the next check reports a change.
    pub fn forget_successor_digest(&self) {
        lock(&self.successor_digest).clear();
    }

    // Finger table

    pub fn finger_count(&self) -> usize {
        read(&self.finger_table).len()
    }

    pub fn finger(&self, index: usize) -> Option<Address> {
        read(&self.finger_table).get(index).cloned().flatten()
    }

    pub fn set_finger(&self, index: usize, entry: Option<Address>) {
        if let Some(slot) = write(&self.finger_table).get_mut(index) {
            *slot = entry;
        }
    }

    pub fn fingers(&self) -> Vec<Option<Address>> {
        read(&self.finger_table).clone()
    }

    /// Returns the finger slot to refresh now and moves the cursor on.
    pub fn advance_finger(&self) -> usize {
        let count = self.finger_count().max(1);
        let mut current = self.next_finger.load(Ordering::Relaxed);
        loop {
            let next = (current + 1) % count;
            match self.next_finger.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current % count,
                Err(actual) => current = actual,
            }
        }
    }

    // Predecessor

    pub fn predecessor(&self) -> Option<Address> {
        lock(&self.predecessor).clone()
    }

    pub fn set_predecessor(&self, predecessor: Option<Address>) {
        *lock(&self.predecessor) = predecessor;
    }

    /// Replaces the predecessor with `candidate` when `accept` approves of
    /// the current value. Check and swap happen under one lock.
    pub fn update_predecessor_if<F>(&self, candidate: Address, accept: F) -> bool
    where
        F: FnOnce(Option<&Address>) -> bool,
    {
        let mut predecessor = lock(&self.predecessor);
        if accept(predecessor.as_ref()) {
            *predecessor = Some(candidate);
            true
        } else {
            false
        }
    }

    /// Clears the predecessor only if it is still `expected`.
    pub fn clear_predecessor_if(&self, expected: &Address) -> bool {
        let mut predecessor = lock(&self.predecessor);
        if predecessor.as_ref() == Some(expected) {
            *predecessor = None;
            true
        } else {
            false
        }
    }

    /// Whether `id` falls in `(predecessor, self]`. Unknown without a predecessor.
    pub fn owns(&self, id: &ChordId) -> Option<bool> {
        self.predecessor()
            .map(|predecessor| is_between(&predecessor.id, id, &self.own.id, true))
    }

    // Stores

    /// Places an entry in the primary store unless a known predecessor says
    /// some other node owns it.
    pub fn store(&self, key: ChordId, value: String) -> Placement {
        if self.owns(&key) == Some(false) {
            self.primary.remove(&key);
            self.replica.insert(key, value);
            Placement::Replica
        } else {
            self.replica.remove(&key);
            self.primary.insert(key, value);
            Placement::Primary
        }
    }

    pub fn primary_get(&self, key: &ChordId) -> Option<String> {
        self.primary.get(key).map(|entry| entry.value().clone())
    }

    pub fn replica_get(&self, key: &ChordId) -> Option<String> {
        self.replica.get(key).map(|entry| entry.value().clone())
    }

    pub fn primary_insert(&self, key: ChordId, value: String) {
        self.primary.insert(key, value);
    }

    pub fn primary_remove(&self, key: &ChordId) -> Option<String> {
        self.primary.remove(key).map(|(_, value)| value)
    }

    pub fn primary_entries(&self) -> Vec<(ChordId, String)> {
        collect(&self.primary)
    }

    pub fn replica_entries(&self) -> Vec<(ChordId, String)> {
        collect(&self.replica)
    }

    /// Removes and returns the primary entries outside `(id, self]`, i.e. the
    /// ones a node joining at `id` takes over.
    pub fn take_keys_outside(&self, id: &ChordId) -> Vec<(ChordId, String)> {
        let departing: Vec<ChordId> = self
            .primary
            .iter()
            .filter(|entry| !is_between(id, entry.key(), &self.own.id, true))
            .map(|entry| entry.key().clone())
            .collect();

        departing
            .into_iter()
            .filter_map(|key| self.primary.remove(&key))
            .collect()
    }

    /// Re-evaluates the placement of every stored entry against the current
    /// predecessor. Returns how many entries moved.
    pub fn rebalance(&self) -> usize {
        let Some(predecessor) = self.predecessor() else {
            return 0;
        };
        let owned = |key: &ChordId| is_between(&predecessor.id, key, &self.own.id, true);

        let demoted: Vec<ChordId> = self
            .primary
            .iter()
            .filter(|entry| !owned(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        let promoted: Vec<ChordId> = self
            .replica
            .iter()
            .filter(|entry| owned(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut moved = 0;
        for key in demoted {
            if let Some((key, value)) = self.primary.remove(&key) {
                self.replica.insert(key, value);
                moved += 1;
            }
        }
        for key in promoted {
            if let Some((key, value)) = self.replica.remove(&key) {
                self.primary.insert(key, value);
                moved += 1;
            }
        }
        moved
    }
}

fn collect(map: &DashMap<ChordId, String>) -> Vec<(ChordId, String)> {
    let mut entries: Vec<(ChordId, String)> = map
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

/// `[successor] + their_list[..size-1]`, padded with its last entry to `size`.
pub fn splice_successor_list(
    successor: Address,
    their_list: &[Address],
    size: usize,
) -> Vec<Address> {
    let mut list = Vec::with_capacity(size);
    list.push(successor.clone());
    list.extend(their_list.iter().take(size.saturating_sub(1)).cloned());
    pad_successor_list(list, &successor, size)
}

fn pad_successor_list(mut list: Vec<Address>, fallback: &Address, size: usize) -> Vec<Address> {
    let filler = list.last().cloned().unwrap_or_else(|| fallback.clone());
    list.truncate(size);
    list.resize(size.max(1), filler);
    list
}

fn successor_list_digest(list: &[Address]) -> String {
    let mut hasher = Sha1::new();
    for address in list {
        hasher.update(address.to_string().as_bytes());
        hasher.update(b" ");
    }
    hex::encode(hasher.finalize())
}
