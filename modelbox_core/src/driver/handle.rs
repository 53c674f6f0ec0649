//! Process-wide library handle table
//!
//! Several registered drivers can be backed by the same shared library;
//! the dynamic loader hands every one of them the same opaque handle. The
//! table maps that handle to the per-handle lifecycle state so the
//! plugin's global init/fini entrypoints run once per handle-resident
//! interval, no matter how many drivers share it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;

lazy_static! {
    static ref HANDLE_TABLE: HandleTable = HandleTable::new();
}

/// The process-wide handle table. Outlives every driver.
pub(crate) fn handle_table() -> &'static HandleTable {
    &HANDLE_TABLE
}

/// Lifecycle state for one unique library handle.
///
/// `init_count` is protected by its own lock so the first/last calls into
/// the plugin's init/fini entrypoints are serialized without holding the
/// table lock while plugin code runs.
pub(crate) struct HandleEntry {
    refs: AtomicUsize,
    init_count: Mutex<i64>,
}

impl HandleEntry {
    fn new() -> Self {
        Self {
            refs: AtomicUsize::new(0),
            init_count: Mutex::new(0),
        }
    }

    /// Exclusive guard over the init count. The caller mutates the count
    /// through the returned guard and invokes init/fini while holding it.
    pub(crate) fn init_count(&self) -> parking_lot::MutexGuard<'_, i64> {
        self.init_count.lock()
    }
}

/// Map from raw library handle to its [`HandleEntry`].
pub(crate) struct HandleTable {
    entries: Mutex<HashMap<usize, Arc<HandleEntry>>>,
}

impl HandleTable {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register one more driver against `handle`, inserting the entry on
    /// first use.
    pub(crate) fn acquire(&self, handle: usize) -> Arc<HandleEntry> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(handle)
            .or_insert_with(|| Arc::new(HandleEntry::new()))
            .clone();
        entry.refs.fetch_add(1, Ordering::SeqCst);
        entry
    }

    /// Look up the entry for `handle` without touching its refcount.
    pub(crate) fn get(&self, handle: usize) -> Option<Arc<HandleEntry>> {
        self.entries.lock().get(&handle).cloned()
    }

    /// Drop one reference to `handle`. Returns true when this was the last
    /// reference and the entry was erased.
    pub(crate) fn release(&self, handle: usize) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(&handle) else {
            return false;
        };

        if entry.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            entries.remove(&handle);
            return true;
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, handle: usize) -> bool {
        self.entries.lock().contains_key(&handle)
    }
}
