//! Process-wide worker table.
//!
//! V8-invoked callbacks cannot safely carry references to host objects, so
//! they carry a small integer key into this table instead. A lookup that
//! misses is an ordinary "worker is gone" signal — disposal removes the
//! entry, and any callback still in flight sees a miss rather than a
//! dangling pointer.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

/// Key standing in for a worker across the engine boundary.
///
/// Indices are allocated monotonically and never reused, even after removal,
/// so a stale engine-side callback can never alias a newer worker.
pub type TableIndex = u32;

/// Host callback receiving messages sent by scripted code. Returning `None`
/// surfaces as `undefined` on the script side.
pub type ReceiveMessageCallback = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Host callback resolving `(specifier, referrer)` pairs while a module
/// graph loads. A non-negative token marks the module as resolved; any
/// negative token fails the whole load.
pub type ModuleResolverCallback = Arc<dyn Fn(&str, &str) -> i32 + Send + Sync>;

static REGISTRY: LazyLock<Mutex<RegistryState>> = LazyLock::new(|| {
    Mutex::new(RegistryState {
        next_index: 0,
        workers: HashMap::new(),
    })
});

struct RegistryState {
    next_index: TableIndex,
    workers: HashMap<TableIndex, Arc<WorkerRecord>>,
}

/// Engine-facing half of a worker: everything a callback trampoline may need
/// after looking the worker up by table index.
pub(crate) struct WorkerRecord {
    index: TableIndex,
    recv_cb: ReceiveMessageCallback,
    /// Installed for the duration of a `load_module` call.
    resolver: Mutex<Option<ModuleResolverCallback>>,
    /// Module sources registered on this worker, keyed by script name.
    modules: Mutex<HashMap<String, String>>,
    /// First resolution failure seen during the current load, if any. Lets
    /// the worker distinguish resolution failures from script errors.
    resolve_failure: Mutex<Option<String>>,
}

impl WorkerRecord {
    pub(crate) fn index(&self) -> TableIndex {
        self.index
    }

    /// Dispatch bytes from the isolate to the registered host callback.
    pub(crate) fn receive(&self, payload: &[u8]) -> Option<Vec<u8>> {
        (self.recv_cb)(payload)
    }

    pub(crate) fn install_resolver(&self, resolver: ModuleResolverCallback) {
        *self.resolver.lock().unwrap() = Some(resolver);
    }

    pub(crate) fn clear_resolver(&self) {
        *self.resolver.lock().unwrap() = None;
    }

    /// Clone the resolver out so no lock is held across its invocation;
    /// resolving one module may recursively resolve its own imports.
    pub(crate) fn resolver(&self) -> Option<ModuleResolverCallback> {
        self.resolver.lock().unwrap().clone()
    }

    pub(crate) fn register_module(&self, name: &str, source: String) {
        self.modules.lock().unwrap().insert(name.to_string(), source);
    }

    pub(crate) fn unregister_module(&self, name: &str) {
        self.modules.lock().unwrap().remove(name);
    }

    pub(crate) fn module_source(&self, name: &str) -> Option<String> {
        self.modules.lock().unwrap().get(name).cloned()
    }

    /// Record a resolution failure; the first one wins so the root cause is
    /// what gets reported.
    pub(crate) fn note_resolve_failure(&self, detail: &str) {
        let mut slot = self.resolve_failure.lock().unwrap();
        if slot.is_none() {
            *slot = Some(detail.to_string());
        }
    }

    pub(crate) fn clear_resolve_failure(&self) {
        *self.resolve_failure.lock().unwrap() = None;
    }

    pub(crate) fn take_resolve_failure(&self) -> Option<String> {
        self.resolve_failure.lock().unwrap().take()
    }
}

/// Insert a new worker record and return its freshly allocated index.
pub(crate) fn register(recv_cb: ReceiveMessageCallback) -> TableIndex {
    let mut state = REGISTRY.lock().unwrap();
    let index = state.next_index;
    state.next_index = state
        .next_index
        .checked_add(1)
        .expect("worker table index space exhausted");
    state.workers.insert(
        index,
        Arc::new(WorkerRecord {
            index,
            recv_cb,
            resolver: Mutex::new(None),
            modules: Mutex::new(HashMap::new()),
            resolve_failure: Mutex::new(None),
        }),
    );
    tracing::debug!(index, "worker registered");
    index
}

/// Look a worker up from a callback trampoline. `None` means the worker was
/// disposed; callers must treat that as a no-op, never as fatal.
pub(crate) fn lookup(index: TableIndex) -> Option<Arc<WorkerRecord>> {
    REGISTRY.lock().unwrap().workers.get(&index).cloned()
}

/// Delete a worker entry. Removing an index that is not present means the
/// native resource was already released once — a double-dispose — and is
/// fatal by design.
pub(crate) fn remove(index: TableIndex) {
    let removed = REGISTRY.lock().unwrap().workers.remove(&index);
    assert!(
        removed.is_some(),
        "no worker registered at table index {index} (double dispose?)"
    );
    tracing::debug!(index, "worker removed from table");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callback() -> ReceiveMessageCallback {
        Arc::new(|_msg| None)
    }

    #[test]
    fn indices_are_unique_and_strictly_increasing() {
        let first = register(noop_callback());
        let second = register(noop_callback());
        let third = register(noop_callback());
        assert!(second > first);
        assert!(third > second);
        remove(first);
        remove(second);
        remove(third);
    }

    #[test]
    fn removed_indices_are_never_reallocated() {
        let index = register(noop_callback());
        remove(index);
        let next = register(noop_callback());
        assert!(next > index);
        remove(next);
    }

    #[test]
    fn lookup_after_remove_misses() {
        let index = register(noop_callback());
        assert!(lookup(index).is_some());
        remove(index);
        assert!(lookup(index).is_none());
    }

    #[test]
    #[should_panic(expected = "double dispose")]
    fn removing_an_absent_index_is_fatal() {
        // u32::MAX is never allocated: register() aborts on exhaustion first.
        remove(TableIndex::MAX);
    }

    #[test]
    fn resolve_failure_keeps_the_first_detail() {
        let index = register(noop_callback());
        let record = lookup(index).unwrap();
        record.note_resolve_failure("first");
        record.note_resolve_failure("second");
        assert_eq!(record.take_resolve_failure().as_deref(), Some("first"));
        assert!(record.take_resolve_failure().is_none());
        remove(index);
    }
}
