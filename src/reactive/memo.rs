use crate::reactive::Scope;
use crate::runtime::ReactiveRuntime;
use std::sync::{Arc, RwLock};

/// A memoized derived value that automatically tracks its dependencies.
///
/// Memos only recompute when a cell (or another memo) they read has
/// changed. A memo created inside a running [`Scope`] is released when
/// that scope stops.
#[derive(Clone)]
pub struct Memo<T> {
    cached: Arc<RwLock<Option<T>>>,
    compute: Arc<dyn Fn() -> T + Send + Sync>,
    id: usize,
    runtime: Arc<ReactiveRuntime>,
}

impl<T: Clone + 'static> Memo<T> {
    /// Create a new memo with the given computation function.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();
        runtime.register_memo(id);

        if let Some(scope) = Scope::current() {
            let runtime = Arc::clone(&runtime);
            scope.on_release(move || runtime.remove_observer(id));
        }

        Self {
            cached: Arc::new(RwLock::new(None)),
            compute: Arc::new(compute),
            id,
            runtime,
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        self.runtime.track_read(self.id);

        if self.runtime.is_memo_dirty(self.id) {
            let value = self.runtime.with_observer(self.id, || (self.compute)());
            *self.cached.write().unwrap() = Some(value.clone());
            self.runtime.mark_memo_clean(self.id);
            value
        } else {
            self.cached.read().unwrap().as_ref().unwrap().clone()
        }
    }

    /// Read the memoized value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.runtime.track_read(self.id);

        if self.runtime.is_memo_dirty(self.id) {
            let value = self.runtime.with_observer(self.id, || (self.compute)());
            *self.cached.write().unwrap() = Some(value);
            self.runtime.mark_memo_clean(self.id);
        }
        let cached = self.cached.read().unwrap();
        f(cached.as_ref().unwrap())
    }

    /// The memo's unique ID within its runtime.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl<T> std::fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo").field("id", &self.id).finish()
    }
}
