//! Lifecycle state machine.
//!
//! ```text
//! Starting ──lobby marker──▶ Ready ⇄ Allocated ──reservation──▶ Reserved
//!     └───────────────┴─────────┴────────────┴──▶ ShuttingDown (terminal)
//! ```
//!
//! The engine consumes classified output, mutates [`crate::state`] under its
//! lock and performs SDK calls only after the lock is released.

mod engine;
mod ready;

pub use engine::{LifecycleEngine, ShutdownReason};
pub use ready::{ReadyNotifier, ReadyWaiter, ready_signal};
