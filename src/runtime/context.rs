use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Dependency graph shared by the cells and memos built under one runtime.
struct DependencyGraph {
    current_observer: Option<usize>,
    // Map from cell ID to set of observer IDs that depend on it
    dependents: HashMap<usize, HashSet<usize>>,
    // Map from observer ID to set of cell IDs it depends on
    observer_deps: HashMap<usize, HashSet<usize>>,
    // Map from memo ID to dirty state
    memo_dirty: HashMap<usize, bool>,
}

impl DependencyGraph {
    fn new() -> Self {
        Self {
            current_observer: None,
            dependents: HashMap::new(),
            observer_deps: HashMap::new(),
            memo_dirty: HashMap::new(),
        }
    }

    fn clear(&mut self) {
        self.current_observer = None;
        self.dependents.clear();
        self.observer_deps.clear();
        self.memo_dirty.clear();
    }

    fn drop_observer_edges(&mut self, observer_id: usize) {
        if let Some(old_deps) = self.observer_deps.remove(&observer_id) {
            for cell_id in old_deps {
                if let Some(deps) = self.dependents.get_mut(&cell_id) {
                    deps.remove(&observer_id);
                }
            }
        }
    }
}

/// Reactive runtime tracking which derived values depend on which cells.
///
/// Cells report reads and writes here; memos register themselves as
/// observers and are marked dirty (transitively) when a cell they read
/// changes. Supports both a global runtime (default) and scoped runtimes
/// for isolation.
///
/// # Examples
///
/// Using scoped runtimes for isolation:
///
/// ```
/// use larder::runtime::ReactiveRuntime;
/// use larder::reactive::Cell;
///
/// ReactiveRuntime::scope(|| {
///     let cell = Cell::new(serde_json::json!(0));
///     assert_eq!(cell.get(), serde_json::json!(0));
/// });
/// // Runtime and all its state is dropped here
/// ```
pub struct ReactiveRuntime {
    next_id: AtomicUsize,
    graph: Mutex<DependencyGraph>,
}

// Thread-local stack for scoped runtimes
thread_local! {
    static RUNTIME_STACK: RefCell<Vec<Arc<ReactiveRuntime>>> = const { RefCell::new(Vec::new()) };
}

impl ReactiveRuntime {
    fn new() -> Arc<Self> {
        Arc::new(ReactiveRuntime {
            next_id: AtomicUsize::new(0),
            graph: Mutex::new(DependencyGraph::new()),
        })
    }

    /// Run a function with a fresh isolated runtime.
    ///
    /// Useful for testing or creating isolated reactive contexts. The
    /// runtime and all its state is cleaned up when the function returns.
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let runtime = Self::new();
        Self::with_runtime(runtime, f)
    }

    /// Get or create the global runtime (fallback).
    pub fn global() -> Arc<Self> {
        use std::sync::OnceLock;
        static RUNTIME: OnceLock<Arc<ReactiveRuntime>> = OnceLock::new();
        Arc::clone(RUNTIME.get_or_init(Self::new))
    }

    /// Get the current reactive runtime (scoped or global fallback).
    pub fn current() -> Arc<Self> {
        RUNTIME_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(Self::global)
        })
    }

    /// Run a function with a specific runtime as the current context.
    ///
    /// This pushes the runtime onto the thread-local stack for the
    /// duration of the function execution.
    pub fn with_runtime<F, R>(runtime: Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().push(runtime);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Clear all observers, dependencies, and state from this runtime.
    pub fn clear(&self) {
        self.graph.lock().unwrap().clear();
        self.next_id.store(0, Ordering::SeqCst);
    }

    /// Generate the next unique ID for a reactive primitive.
    pub fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Track a read of a cell by the current observer, if any.
    pub fn track_read(&self, cell_id: usize) {
        let mut graph = self.graph.lock().unwrap();
        if let Some(current_observer) = graph.current_observer {
            graph
                .dependents
                .entry(cell_id)
                .or_default()
                .insert(current_observer);
            graph
                .observer_deps
                .entry(current_observer)
                .or_default()
                .insert(cell_id);
        }
    }

    /// Mark every observer that depends on a cell as dirty.
    pub fn notify_observers(&self, cell_id: usize) {
        let dependents = {
            let graph = self.graph.lock().unwrap();
            graph
                .dependents
                .get(&cell_id)
                .map(|obs| obs.iter().copied().collect::<Vec<_>>())
        };

        if let Some(dependents) = dependents {
            for observer_id in dependents {
                self.mark_dirty(observer_id);
            }
        }
    }

    /// Mark a memo as dirty and propagate to its own dependents.
    fn mark_dirty(&self, observer_id: usize) {
        let dependents = {
            let mut graph = self.graph.lock().unwrap();
            match graph.memo_dirty.get(&observer_id).copied() {
                // not a registered memo, or already dirty: nothing to do
                None | Some(true) => return,
                Some(false) => {}
            }
            graph.memo_dirty.insert(observer_id, true);
            graph
                .dependents
                .get(&observer_id)
                .map(|deps| deps.iter().copied().collect::<Vec<_>>())
        };

        if let Some(dependents) = dependents {
            for dependent_id in dependents {
                self.mark_dirty(dependent_id);
            }
        }
    }

    /// Remove an observer and every dependency edge pointing at it.
    pub fn remove_observer(&self, observer_id: usize) {
        let mut graph = self.graph.lock().unwrap();
        graph.memo_dirty.remove(&observer_id);
        graph.drop_observer_edges(observer_id);
    }

    /// Run a function with a specific observer as the current context.
    ///
    /// The observer's previous dependency edges are dropped first so the
    /// run re-tracks its reads from scratch.
    pub fn with_observer<F, R>(&self, observer_id: usize, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let prev = {
            let mut graph = self.graph.lock().unwrap();
            graph.drop_observer_edges(observer_id);
            graph.current_observer.replace(observer_id)
        };

        let result = f();

        let mut graph = self.graph.lock().unwrap();
        graph.current_observer = prev;

        result
    }

    /// Register a memo and mark it as dirty initially.
    pub fn register_memo(&self, memo_id: usize) {
        self.graph.lock().unwrap().memo_dirty.insert(memo_id, true);
    }

    /// Check if a memo needs recomputation.
    pub fn is_memo_dirty(&self, memo_id: usize) -> bool {
        self.graph
            .lock()
            .unwrap()
            .memo_dirty
            .get(&memo_id)
            .copied()
            .unwrap_or(true)
    }

    /// Mark a memo as clean after recomputation.
    pub fn mark_memo_clean(&self, memo_id: usize) {
        self.graph.lock().unwrap().memo_dirty.insert(memo_id, false);
    }
}
