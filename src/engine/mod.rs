//! The deterministic state machine. `Ledger` owns the store, applies
//! operations atomically, and emits the virtual-operation stream.

mod assets;
mod core;
mod fees;
mod market;
mod settlement;

pub use self::core::Ledger;
