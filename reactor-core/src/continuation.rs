//! C1 — the continuation carrier (spec §4.1).
//!
//! Reactor bodies are ordinary `async` Rust: suspension is Rust's own
//! `.await` state-machine transform (Design Notes §9, second option —
//! "task/future driven by the engine's single-threaded executor"), not a
//! hand-rolled enum of resume points. What we *do* hand-roll is the small
//! future a body awaits to suspend on a kernel condition — including
//! `call`'s scope-drain wait, which is just another `await_cond` against a
//! `SourceKey::Scope`.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::AwaitError;
use crate::graph::{AwaitDelivery, DeliverySlot};

/// Returned by [`crate::kernel::Kernel::await_cond`]. Registration already
/// happened synchronously before this future was constructed; polling it
/// only ever checks whether the engine has delivered a value yet.
pub struct AwaitFuture {
    pub(crate) slot: DeliverySlot,
    pub(crate) immediate: Option<AwaitError>,
}

impl Future for AwaitFuture {
    type Output = Result<crate::value::Value, AwaitError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(err) = self.immediate.clone() {
            return Poll::Ready(Err(err));
        }
        match self.slot.borrow_mut().take() {
            Some(delivery) => Poll::Ready(delivery.into()),
            None => Poll::Pending,
        }
    }
}

impl AwaitFuture {
    pub fn immediate(err: AwaitError) -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
            immediate: Some(err),
        }
    }

    pub fn pending(slot: DeliverySlot) -> Self {
        Self {
            slot,
            immediate: None,
        }
    }
}
