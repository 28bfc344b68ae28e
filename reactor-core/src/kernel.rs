//! The handle a reactor body calls kernel primitives through (spec §6).
//!
//! Every method borrows the shared engine for exactly as long as the
//! mutation takes; none of them hold that borrow across an `.await`, so a
//! reactor's own primitive calls never conflict with the engine's
//! poll-outside-borrow discipline in `engine::drive_one`.

use std::rc::Rc;

use crate::continuation::AwaitFuture;
use crate::engine::Shared;
use crate::error::{AwaitResult, Result};
use crate::graph::{EdgeRef, SourceKey};
use crate::registry::{Body, CallScope, LinkTarget, ReactorId};
use crate::value::{Filter, Value};

#[derive(Clone)]
pub struct Kernel {
    engine: Shared,
    self_id: ReactorId,
    self_scope: Option<Rc<CallScope>>,
}

impl Kernel {
    pub(crate) fn new(engine: Shared, self_id: ReactorId, self_scope: Option<Rc<CallScope>>) -> Self {
        Self {
            engine,
            self_id,
            self_scope,
        }
    }

    /// This reactor's own id, for self-reference (e.g. linking an event back
    /// to yourself, or recognising a `kill` targeting yourself).
    pub fn self_id(&self) -> ReactorId {
        self.self_id
    }

    /// Register a reactor without starting it.
    pub fn create(&self, body: Body) -> ReactorId {
        self.engine.borrow_mut().create(body, None)
    }

    /// Enqueue an existing, not-yet-activated reactor. Fork semantics: the
    /// caller is not suspended and continues running immediately. If the
    /// caller itself belongs to a `call` scope, the spawned reactor joins
    /// that same scope (it counts toward the scope's transitive sub-chain).
    pub fn spawn(&self, id: ReactorId) -> Result<()> {
        self.engine.borrow_mut().activate(id, self.self_scope.clone())
    }

    /// Create, activate, and suspend until `body` and everything it
    /// transitively spawns has finished (SPEC_FULL §9, Open Question 2).
    ///
    /// The wait for the transitive sub-chain is a second, genuine
    /// `await_cond` on the call's own scope (`SourceKey::Scope`), not a
    /// side channel — a reactor parked here still has exactly one
    /// outstanding await edge, as spec §3/§8 require of any suspended
    /// reactor.
    pub async fn call(&self, body: Body) -> AwaitResult {
        let (callee, scope) = {
            let mut engine = self.engine.borrow_mut();
            let scope = engine.new_scope();
            let callee = engine.create(body, None);
            (callee, scope)
        };
        let termination = self.await_cond(SourceKey::Reactor(callee), None);
        {
            let mut engine = self.engine.borrow_mut();
            engine
                .activate_as_scope_root(callee, scope.clone())
                .map_err(|_| crate::error::AwaitError::InvalidTransition)?;
        }
        let result = termination.await;
        if !scope.is_drained() {
            let _ = self.await_cond(SourceKey::Scope(scope.id()), None).await;
        }
        result
    }

    /// Kill a reactor (including, if `id == self.self_id()`, the caller
    /// itself — it may keep executing until its next suspension point, but
    /// the engine will never poll it again).
    pub fn kill(&self, id: ReactorId) -> Result<()> {
        self.engine.borrow_mut().kill(id)
    }

    /// Permanent link: whenever `src` next fires a value admitted by
    /// `filter`, activate `dst`. Idempotent per `(src, dst)` when `dst` is
    /// an existing reactor; `dst` may also be a [`Body`], auto-created
    /// and linked in one call.
    pub fn link(
        &self,
        src: impl Into<SourceKey>,
        dst: impl Into<LinkTarget>,
        filter: Option<Filter>,
    ) -> Result<EdgeRef> {
        self.engine
            .borrow_mut()
            .link(src.into(), dst.into(), filter, Some(self.self_id))
    }

    pub fn unlink(&self, edge: &EdgeRef) {
        self.engine.borrow_mut().unlink(edge);
    }

    /// Register a single-shot suspension on `src`, admitted by `filter`.
    /// Registration happens synchronously, here; the returned future only
    /// ever checks whether the engine has since delivered a value.
    pub fn await_cond(&self, src: impl Into<SourceKey>, filter: Option<Filter>) -> AwaitFuture {
        match self
            .engine
            .borrow_mut()
            .register_await(src.into(), self.self_id, filter)
        {
            Ok(slot) => AwaitFuture::pending(slot),
            Err(_) => AwaitFuture::immediate(crate::error::AwaitError::InvalidTransition),
        }
    }

    /// Fire a named event within the current chain.
    pub fn post(&self, name: impl Into<String>, payload: Value) {
        self.engine
            .borrow_mut()
            .post(name.into(), payload, self.self_scope.clone());
    }

    pub fn current_value(&self, id: ReactorId) -> Result<Option<Value>> {
        self.engine.borrow().current_value(id)
    }
}
