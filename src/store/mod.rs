//! Store definitions, construction, and live instances.

mod action;
pub(crate) mod build;
mod definition;
mod instance;
mod merge;

pub use action::{Action, ActionBody, ActionCall, ActionListener, ActionValue, Pending, PendingHandle};
pub use definition::{
    Binding, GetterFn, HydrateHook, OpaqueValue, OptionsDef, OptionsSnapshot, SetupBindings,
    SetupContext, StateFactory, StoreDefinition, StoreFlavor,
};
pub use instance::{
    ChangeEvent, Flush, Mutation, MutationKind, PatchState, Slot, Store, SubscribeOptions,
};

pub(crate) use definition::SetupFn;
pub(crate) use merge::merge_values;
