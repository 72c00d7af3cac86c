//! Reactive runtime: dependency tracking and deferred scheduling.

mod context;
pub mod scheduler;

pub use context::ReactiveRuntime;
pub use scheduler::tick;
