//! A single-threaded, synchronous reactive kernel.
//!
//! Reactors are suspendable computations (C1, ordinary `async` Rust) that
//! run to completion, to a suspension point, or to failure, linked together
//! by a dependency graph (C3) of permanent `link` edges and single-shot
//! `await` edges. A propagation engine (C4) drains one activation at a
//! time from a work queue until the whole chain triggered by one external
//! stimulus — an event post, a driver step — reaches quiescence. There are
//! no locks and no background threads: every activation runs to its next
//! suspension point without interruption, so a chain either fully resolves
//! or the engine is still holding the only reference able to resume it.
//!
//! See [`Engine`] for the low-level facade and [`driver::App`] /
//! [`driver::run_to_quiescence`] for the two embedding modes (driver-owned
//! step loop vs a single call that runs one event to completion).

mod continuation;
mod engine;
mod error;
mod graph;
mod kernel;
mod registry;
mod value;

pub mod driver;

pub use engine::{Config, Engine};
pub use error::{AwaitError, AwaitResult, BodyResult, Error, FailureInfo, Result};
pub use graph::{EdgeRef, SourceKey};
pub use kernel::Kernel;
pub use registry::{Body, LinkTarget, ReactorId, ReactorState, ScopeId};
pub use value::{Filter, Value};
