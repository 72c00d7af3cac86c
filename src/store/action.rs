//! Action wrapping and the interception contract.
//!
//! Every function a store exposes is invoked through the interception
//! protocol: listeners registered with `on_action` observe the call before
//! the body runs and may attach `after` / `on_error` continuations. The
//! protocol is the same whether the body finishes synchronously or hands
//! back a [`Pending`] result settled later.

use crate::store::instance::Store;
use crate::subscriptions::trigger_isolated;
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};

pub(crate) type AfterFn = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type ErrorFn = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// The callable body of an action: the owning store and the call
/// arguments in, a value (possibly still pending) or an error out.
pub type ActionBody = Arc<dyn Fn(&Arc<Store>, &[Value]) -> anyhow::Result<ActionValue> + Send + Sync>;

/// What an action call produces.
#[derive(Clone)]
pub enum ActionValue {
    /// The action finished synchronously.
    Ready(Value),
    /// The action handed back an asynchronous result; continuations fire
    /// when it settles.
    Pending(Pending),
}

impl ActionValue {
    /// A synchronous result.
    pub fn ready(value: impl Into<Value>) -> Self {
        ActionValue::Ready(value.into())
    }

    /// A synchronous result carrying nothing.
    pub fn unit() -> Self {
        ActionValue::Ready(Value::Null)
    }

    /// The resolved value, if already available.
    pub fn value(&self) -> Option<Value> {
        match self {
            ActionValue::Ready(value) => Some(value.clone()),
            ActionValue::Pending(pending) => pending.value(),
        }
    }
}

impl std::fmt::Debug for ActionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionValue::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            ActionValue::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// A named, interceptable store function.
///
/// Installing an already-constructed action under a new key only updates
/// its recorded name; the interception path is never layered twice.
#[derive(Clone)]
pub struct Action {
    name: Arc<RwLock<String>>,
    body: ActionBody,
}

impl Action {
    /// Create an unnamed action; the store builder names it after the key
    /// it is installed under.
    pub fn new(
        body: impl Fn(&Arc<Store>, &[Value]) -> anyhow::Result<ActionValue> + Send + Sync + 'static,
    ) -> Self {
        Self::named("", body)
    }

    /// Create an action with a recorded name.
    pub fn named(
        name: &str,
        body: impl Fn(&Arc<Store>, &[Value]) -> anyhow::Result<ActionValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::new(RwLock::new(name.to_owned())),
            body: Arc::new(body),
        }
    }

    /// The action's recorded name.
    pub fn name(&self) -> String {
        self.name.read().unwrap().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write().unwrap() = name.to_owned();
    }

    pub(crate) fn body(&self) -> &ActionBody {
        &self.body
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("name", &self.name()).finish()
    }
}

/// The payload an action listener observes before the body runs.
pub struct ActionCall<'a> {
    name: &'a str,
    args: &'a [Value],
    store: &'a Arc<Store>,
    after: &'a Mutex<Vec<AfterFn>>,
    on_error: &'a Mutex<Vec<ErrorFn>>,
}

impl<'a> ActionCall<'a> {
    pub(crate) fn new(
        name: &'a str,
        args: &'a [Value],
        store: &'a Arc<Store>,
        after: &'a Mutex<Vec<AfterFn>>,
        on_error: &'a Mutex<Vec<ErrorFn>>,
    ) -> Self {
        Self {
            name,
            args,
            store,
            after,
            on_error,
        }
    }

    /// The name of the action being called.
    pub fn name(&self) -> &str {
        self.name
    }

    /// The call arguments.
    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// The store the action runs against.
    pub fn store(&self) -> &Arc<Store> {
        self.store
    }

    /// Run a callback once the action finishes, with its resolved value.
    pub fn after(&self, callback: impl Fn(&Value) + Send + Sync + 'static) {
        self.after.lock().unwrap().push(Arc::new(callback));
    }

    /// Run a callback if the action fails or its pending result rejects.
    pub fn on_error(&self, callback: impl Fn(&anyhow::Error) + Send + Sync + 'static) {
        self.on_error.lock().unwrap().push(Arc::new(callback));
    }
}

/// Callback type for `on_action` listeners.
pub type ActionListener = dyn for<'a> Fn(&ActionCall<'a>) + Send + Sync;

enum PendingState {
    Open {
        on_resolve: Vec<AfterFn>,
        on_reject: Vec<ErrorFn>,
    },
    Resolved(Value),
    Rejected(Arc<anyhow::Error>),
}

/// An asynchronous action result, settled exactly once through its
/// [`PendingHandle`].
///
/// Continuations attached before settlement fire in attachment order when
/// the handle settles; ones attached afterwards fire immediately.
#[derive(Clone)]
pub struct Pending {
    state: Arc<Mutex<PendingState>>,
}

impl Pending {
    /// Create an unsettled result and the handle that settles it.
    pub fn new() -> (Pending, PendingHandle) {
        let pending = Pending {
            state: Arc::new(Mutex::new(PendingState::Open {
                on_resolve: Vec::new(),
                on_reject: Vec::new(),
            })),
        };
        let handle = PendingHandle {
            pending: pending.clone(),
        };
        (pending, handle)
    }

    /// Attach a fulfillment continuation.
    pub fn on_resolve(&self, callback: impl Fn(&Value) + Send + Sync + 'static) {
        self.on_resolve_arc(Arc::new(callback));
    }

    /// Attach a rejection continuation.
    pub fn on_reject(&self, callback: impl Fn(&anyhow::Error) + Send + Sync + 'static) {
        self.on_reject_arc(Arc::new(callback));
    }

    pub(crate) fn on_resolve_arc(&self, callback: AfterFn) {
        let resolved = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                PendingState::Open { on_resolve, .. } => {
                    on_resolve.push(callback);
                    return;
                }
                PendingState::Resolved(value) => value.clone(),
                PendingState::Rejected(_) => return,
            }
        };
        callback(&resolved);
    }

    pub(crate) fn on_reject_arc(&self, callback: ErrorFn) {
        let rejected = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                PendingState::Open { on_reject, .. } => {
                    on_reject.push(callback);
                    return;
                }
                PendingState::Rejected(error) => Arc::clone(error),
                PendingState::Resolved(_) => return,
            }
        };
        callback(&rejected);
    }

    /// The resolved value, if settled successfully.
    pub fn value(&self) -> Option<Value> {
        match &*self.state.lock().unwrap() {
            PendingState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if settled with an error.
    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        match &*self.state.lock().unwrap() {
            PendingState::Rejected(error) => Some(Arc::clone(error)),
            _ => None,
        }
    }

    /// Whether the result has settled either way.
    pub fn is_settled(&self) -> bool {
        !matches!(&*self.state.lock().unwrap(), PendingState::Open { .. })
    }
}

/// Settles a [`Pending`] result. Consumed on use; a result settles once.
pub struct PendingHandle {
    pending: Pending,
}

impl PendingHandle {
    /// Fulfill the result, firing `after` continuations in order.
    pub fn resolve(self, value: impl Into<Value>) {
        let value = value.into();
        let callbacks = {
            let mut state = self.pending.state.lock().unwrap();
            match std::mem::replace(&mut *state, PendingState::Resolved(value.clone())) {
                PendingState::Open { on_resolve, .. } => on_resolve,
                settled => {
                    *state = settled;
                    return;
                }
            }
        };
        trigger_isolated(&callbacks, |cb| cb(&value));
    }

    /// Reject the result, firing `on_error` continuations in order.
    pub fn reject(self, error: anyhow::Error) {
        let error = Arc::new(error);
        let callbacks = {
            let mut state = self.pending.state.lock().unwrap();
            match std::mem::replace(&mut *state, PendingState::Rejected(Arc::clone(&error))) {
                PendingState::Open { on_reject, .. } => on_reject,
                settled => {
                    *state = settled;
                    return;
                }
            }
        };
        trigger_isolated(&callbacks, |cb| cb(&error));
    }
}
