//! Reactive primitives backing the store layer.
//!
//! - Cells: reactive state containers holding one value each
//! - Memos: cached derived values
//! - Scopes: the disposal tree that severs effects when a store or
//!   registry is torn down

mod cell;
mod memo;
mod scope;

pub use cell::Cell;
pub(crate) use cell::ChangeSink;
pub use memo::Memo;
pub use scope::Scope;
