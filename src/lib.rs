//! Tether - a thread-affine dispatch runtime
//!
//! Stateful objects are bound to exactly one thread. A call made from that
//! thread runs in place; a call from anywhere else is queued onto the owning
//! thread's event loop and runs there in arrival order. Completion flows back
//! through signals whose listeners are dispatched by the same rule.

pub mod affinity;
pub mod dispatcher;
pub mod error;
pub mod halt;
pub mod id;
pub mod runtime;
pub mod scenario;
pub mod signal;
pub mod worker;

pub use affinity::{Affine, BypassAffinity, Connection, Delivery, Receiver};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{Result, TetherError};
pub use halt::{HaltFlag, PollOutcome};
pub use id::{ObjectId, ThreadId};
pub use runtime::{Context, Thread, ThreadState};
pub use signal::Signal;
pub use worker::{Placement, Worker};
