//! Host application integration: keyed provide/inject and component
//! lifetimes.
//!
//! The store layer does not render anything, but it needs two things from
//! whatever hosts it: a way for an installed registry to be found again
//! (provide/inject by key on an application object), and a teardown
//! context so subscriptions registered inside a component die with it.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// A minimal application container: a keyed bag of shared values.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    provided: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl App {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AppInner {
                provided: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Provide a shared value under a key, visible to every component of
    /// this application.
    pub fn provide<T: Send + Sync + 'static>(&self, key: &str, value: Arc<T>) {
        self.inner
            .provided
            .write()
            .unwrap()
            .insert(key.to_owned(), value);
    }

    /// Look up a previously provided value by key and type.
    pub fn inject<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.inner.provided.read().unwrap().get(key)?.clone();
        value.downcast::<T>().ok()
    }

    /// Create a component lifetime bound to this application.
    pub fn component(&self) -> ComponentLifetime {
        ComponentLifetime::for_app(self)
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

/// The active lifetime of one host component.
///
/// While `enter` runs, the lifetime is the thread's current component
/// context; non-detached subscriptions registered inside bind to it and
/// are removed when `teardown` runs.
#[derive(Clone)]
pub struct ComponentLifetime {
    inner: Arc<LifetimeInner>,
}

struct LifetimeInner {
    app: Option<App>,
    torn_down: AtomicBool,
    teardown: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

thread_local! {
    static COMPONENT_STACK: RefCell<Vec<ComponentLifetime>> = const { RefCell::new(Vec::new()) };
}

impl ComponentLifetime {
    /// A lifetime not associated with any application.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A lifetime whose component belongs to `app`.
    pub fn for_app(app: &App) -> Self {
        Self::build(Some(app.clone()))
    }

    fn build(app: Option<App>) -> Self {
        Self {
            inner: Arc::new(LifetimeInner {
                app,
                torn_down: AtomicBool::new(false),
                teardown: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The application this component belongs to, if any.
    pub fn app(&self) -> Option<App> {
        self.inner.app.clone()
    }

    /// Register a callback for component teardown.
    ///
    /// Runs immediately if the component is already torn down.
    pub fn on_teardown(&self, f: impl FnOnce() + Send + 'static) {
        if self.inner.torn_down.load(Ordering::SeqCst) {
            f();
        } else {
            self.inner.teardown.lock().unwrap().push(Box::new(f));
        }
    }

    /// Tear the component down, running every registered callback once.
    pub fn teardown(&self) {
        if !self.inner.torn_down.swap(true, Ordering::SeqCst) {
            let callbacks = std::mem::take(&mut *self.inner.teardown.lock().unwrap());
            for callback in callbacks {
                callback();
            }
        }
    }

    /// Run a function with this lifetime as the current component context.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        COMPONENT_STACK.with(|stack| stack.borrow_mut().push(self.clone()));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        COMPONENT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// The component context the current thread is running under, if any.
    pub fn current() -> Option<ComponentLifetime> {
        COMPONENT_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Default for ComponentLifetime {
    fn default() -> Self {
        Self::new()
    }
}
