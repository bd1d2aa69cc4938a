//! Shared-ownership primitives for the value model
//!
//! Skald values cross thread boundaries: a spawned worker VM holds the
//! same globals vector, module cache, and captured frame locals as its
//! parent, and user code synchronizes through channels rather than
//! explicit locks. Every mutable payload therefore sits behind an `Arc`
//! plus a parking_lot `RwLock`, which keeps the whole `Value` sum
//! `Send + Sync` by construction.
//!
//! parking_lot rather than std: a panicking worker must not poison the
//! globals for every other VM sharing them, and the dispatcher's hot
//! path takes these locks almost always uncontended.

pub use parking_lot::{Mutex, RwLock};
pub use std::sync::Arc;

/// A shared mutable payload: the backing store for lists, maps, sets,
/// captured frame locals, and module globals.
pub type Shared<T> = Arc<RwLock<T>>;

/// Wrap a value in a fresh [`Shared`] handle
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}
