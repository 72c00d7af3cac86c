use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A node in the disposal tree.
///
/// Each scope owns a list of child scopes and a list of its own release
/// callbacks. Stopping a scope recursively stops the children first, then
/// runs the releases, exactly once; stopping twice is a no-op. A registry
/// owns one root scope, and every store built under it nests a private
/// child scope whose releases sever the store's memos and watchers.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    active: AtomicBool,
    children: Mutex<Vec<Scope>>,
    releases: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

impl Scope {
    /// Create a new root scope.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                active: AtomicBool::new(true),
                children: Mutex::new(Vec::new()),
                releases: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a child scope owned by this one.
    pub fn child(&self) -> Scope {
        let child = Scope::new();
        if self.is_active() {
            self.inner.children.lock().unwrap().push(child.clone());
        } else {
            // stopped parents own nothing; the child starts stopped too
            child.stop();
        }
        child
    }

    /// Whether this scope has not been stopped.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Register a callback to run when the scope stops.
    ///
    /// Runs immediately if the scope is already stopped.
    pub fn on_release(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_active() {
            self.inner.releases.lock().unwrap().push(Box::new(f));
        } else {
            f();
        }
    }

    /// Stop the scope: children first, then this scope's own releases.
    ///
    /// Idempotent; a second call does nothing.
    pub fn stop(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            let children = std::mem::take(&mut *self.inner.children.lock().unwrap());
            for child in children {
                child.stop();
            }
            let releases = std::mem::take(&mut *self.inner.releases.lock().unwrap());
            for release in releases {
                release();
            }
        }
    }

    /// Run a function with this scope as the current scope.
    ///
    /// Reactive effects created inside (memos, watchers) register their
    /// disposal against it.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// The innermost scope currently running on this thread.
    pub fn current() -> Option<Scope> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}
