//! Error taxonomy (spec §7).
//!
//! Two distinct shapes, for two distinct audiences: [`Error`] is what a
//! synchronous kernel call (`spawn`, `link`, `kill`, ...) hands back to its
//! caller; [`AwaitError`] is what a suspended `await_cond` eventually
//! resolves to when the thing it's awaiting doesn't deliver a plain value.

use std::rc::Rc;

use thiserror::Error;

use crate::value::Value;

/// Synchronous failure surfaced directly to the caller of a kernel
/// primitive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Attempted to act on a reactor that has already reached `dead`
    /// (await, link, spawn, kill, current_value).
    #[error("invalid transition: reactor is dead")]
    InvalidTransition,

    /// A propagation chain exceeded the configured activation watchdog
    /// without draining. Optional per spec §7; see [`crate::Config`].
    #[error("chain did not terminate within {0} activations")]
    ChainNonTermination(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The message carried by a body that terminated abnormally
/// (`Err` from its own future rather than returning a value).
#[derive(Debug, Clone)]
pub struct FailureInfo(pub Rc<str>);

impl FailureInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self(Rc::from(message.into()))
    }
}

impl std::fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a reactor body's future resolves to: a value on normal return, or a
/// failure. Distinct from [`Error`] — this is the *body's* outcome, not a
/// kernel call-site rejection.
pub type BodyResult = std::result::Result<Value, FailureInfo>;

/// What `await_cond` resolves to once its source fires, the awaited reactor
/// dies, or it is killed. Filters are never applied to `Killed`/`Failed` —
/// they're control signals, not values, so every waiter sees them
/// unconditionally (see DESIGN.md).
#[derive(Debug, Clone)]
pub enum AwaitError {
    /// The awaited reactor was killed (directly or transitively).
    Killed,
    /// The awaited reactor's body returned `Err`.
    Failed(FailureInfo),
    /// The await was registered against (or resolved against) a dead
    /// reactor.
    InvalidTransition,
}

impl std::fmt::Display for AwaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AwaitError::Killed => f.write_str("killed"),
            AwaitError::Failed(info) => write!(f, "failed: {info}"),
            AwaitError::InvalidTransition => f.write_str("invalid transition: reactor is dead"),
        }
    }
}

impl std::error::Error for AwaitError {}

/// Output of an `await_cond`/`call`: the fired value, or one of the
/// non-value outcomes above.
pub type AwaitResult = std::result::Result<Value, AwaitError>;
