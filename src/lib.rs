//! # Larder
//!
//! A composable reactive store library for Rust.
//!
//! Larder organizes shared application state into named stores built
//! lazily from reusable definitions, all owned by one registry:
//!
//! ## Stores
//!
//! - `StoreDefinition` - a recipe for a store, declarative
//!   (`OptionsDef`: state factory, getters, actions) or imperative
//!   (a setup function exporting tagged bindings)
//! - `Store` - the live instance: reactive state fields, memoized
//!   getters, interceptable actions, patching, and subscriptions
//! - `Registry` - application-scoped owner of every store and the shared
//!   serializable state tree; supports plugins, snapshots, and hydration
//!
//! ## Reactive primitives
//!
//! - `Cell` - a reactive value that notifies dependents when changed
//! - `Memo` - a computed value that automatically tracks dependencies
//! - `Scope` - a disposal unit owning the effects created under it

pub mod devtools;
pub mod host;
pub mod reactive;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod subscriptions;

mod error;
mod hot;

// Re-export main types for convenience
pub use error::LarderError;
pub use host::{App, ComponentLifetime};
pub use reactive::{Cell, Memo, Scope};
pub use registry::{Extensions, Plugin, PluginContext, Registry, StateSlice, REGISTRY_KEY};
pub use runtime::tick;
pub use store::{
    Action, ActionCall, ActionValue, Binding, ChangeEvent, Flush, Mutation, MutationKind,
    OptionsDef, Pending, PendingHandle, SetupBindings, SetupContext, Slot, Store, StoreDefinition,
    StoreFlavor, SubscribeOptions,
};
pub use subscriptions::{SubscriptionHandle, Subscriptions};
