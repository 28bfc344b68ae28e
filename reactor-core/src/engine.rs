//! C4 — the propagation engine (spec §4.4). This is the heart of the
//! kernel: the work queue, the selection/drive loop, reactor termination,
//! and the primitives a running reactor invokes through [`crate::Kernel`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::task::noop_waker_ref;
use tracing::{debug, info, warn};

use crate::error::{Error, FailureInfo, Result};
use crate::graph::{AwaitDelivery, AwaitTarget, EdgeRef, Graph, SourceKey};
use crate::kernel::Kernel;
use crate::registry::{Body, CallScope, LinkTarget, ReactorId, ReactorState, Registry, ScopeId, Slot};
use crate::value::Value;

/// The kernel's entire configuration surface (SPEC_FULL §6a). There is
/// nothing else to configure — persistence, distribution, and real-time
/// deadlines are Non-goals.
#[derive(Debug, Clone)]
pub struct Config {
    /// Watchdog bound on activations drained within one propagation chain
    /// (spec §7, `ChainNonTermination`). `None` disables the watchdog.
    pub max_activations_per_chain: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_activations_per_chain: Some(100_000),
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) registry: Registry,
    pub(crate) graph: Graph,
    pub(crate) queue: VecDeque<ReactorId>,
    pub(crate) config: Config,
    /// The reactor currently being polled, if any — lets `kill` tell a
    /// self-kill (target is its own caller, mid-poll) apart from killing
    /// someone else, so destruction can be deferred until control returns
    /// to `drive_one` (spec §4.2, §5).
    pub(crate) running: Option<ReactorId>,
    next_scope_id: u64,
}

pub(crate) type Shared = Rc<RefCell<EngineInner>>;

/// What finalized a reactor: what to deliver to its awaiters, and whether
/// its link-edge dependents should fire.
enum Termination {
    Returned(Value),
    Failed(FailureInfo),
    Killed,
}

impl EngineInner {
    fn new(config: Config) -> Self {
        Self {
            registry: Registry::with_key(),
            graph: Graph::new(),
            queue: VecDeque::new(),
            config,
            running: None,
            next_scope_id: 0,
        }
    }

    pub(crate) fn is_dead(&self, id: ReactorId) -> bool {
        self.registry.get(id).map(|r| r.is_dead()).unwrap_or(true)
    }

    pub(crate) fn create(&mut self, body: Body, scope: Option<Rc<CallScope>>) -> ReactorId {
        self.registry.insert(crate::registry::Reactor::new(body, scope))
    }

    /// Mint a fresh scope for a `call()`, keyed so its drain wait can be a
    /// genuine `SourceKey::Scope` await edge.
    pub(crate) fn new_scope(&mut self) -> Rc<CallScope> {
        let id = ScopeId::new(self.next_scope_id);
        self.next_scope_id += 1;
        CallScope::new(id)
    }

    /// Enqueue `id`, assigning it `scope` the first time it is activated
    /// (join accounting for `call`, SPEC_FULL §9 Open Question 2).
    pub(crate) fn activate(&mut self, id: ReactorId, scope: Option<Rc<CallScope>>) -> Result<()> {
        if self.is_dead(id) {
            return Err(Error::InvalidTransition);
        }
        if let Some(r) = self.registry.get_mut(id) {
            if r.scope.is_none() {
                if let Some(s) = &scope {
                    s.inc();
                }
                r.scope = scope;
            }
        }
        self.queue.push_back(id);
        Ok(())
    }

    /// Like [`Self::activate`] but for the reactor a `call` directly spawns:
    /// its scope is pre-seeded to count itself (`CallScope::new`), so it
    /// must not be double-counted here.
    pub(crate) fn activate_as_scope_root(&mut self, id: ReactorId, scope: Rc<CallScope>) -> Result<()> {
        if self.is_dead(id) {
            return Err(Error::InvalidTransition);
        }
        if let Some(r) = self.registry.get_mut(id) {
            r.scope = Some(scope);
        }
        self.queue.push_back(id);
        Ok(())
    }

    /// `dst` is either an existing reactor or a body to auto-create and
    /// link in one call (spec §4.4/§6).
    pub(crate) fn link(
        &mut self,
        src: SourceKey,
        dst: LinkTarget,
        filter: Option<crate::value::Filter>,
        owner: Option<ReactorId>,
    ) -> Result<EdgeRef> {
        if let SourceKey::Reactor(r) = &src {
            if self.is_dead(*r) {
                return Err(Error::InvalidTransition);
            }
        }
        let dst = match dst {
            LinkTarget::Existing(id) => {
                if self.is_dead(id) {
                    return Err(Error::InvalidTransition);
                }
                id
            }
            LinkTarget::New(body) => self.create(body, None),
        };
        let edge = self.graph.add_link(src, dst, filter);
        if let Some(owner) = owner {
            if let Some(r) = self.registry.get_mut(owner) {
                r.owned_edges.push(edge.clone());
            }
        }
        Ok(edge)
    }

    pub(crate) fn unlink(&mut self, edge: &EdgeRef) {
        self.graph.remove_edge(edge);
    }

    /// Registers the await edge synchronously; the caller (`Kernel`) wraps
    /// the returned slot in an [`crate::continuation::AwaitFuture`].
    pub(crate) fn register_await(
        &mut self,
        src: SourceKey,
        waiter: ReactorId,
        filter: Option<crate::value::Filter>,
    ) -> Result<crate::graph::DeliverySlot> {
        if self.is_dead(waiter) {
            return Err(Error::InvalidTransition);
        }
        if let SourceKey::Reactor(r) = &src {
            if self.is_dead(*r) {
                return Err(Error::InvalidTransition);
            }
        }
        let slot: crate::graph::DeliverySlot = Rc::new(RefCell::new(None));
        let target = AwaitTarget {
            reactor: waiter,
            slot: slot.clone(),
        };
        let edge = self.graph.add_await(src, target, filter);
        if let Some(r) = self.registry.get_mut(waiter) {
            r.suspended_on = Some(edge.clone());
            r.owned_edges.push(edge);
        }
        Ok(slot)
    }

    pub(crate) fn post(&mut self, name: String, payload: Value, scope: Option<Rc<CallScope>>) {
        let src = SourceKey::Event(name);
        let targets = self.graph.fire_links(&src, &payload);
        for t in targets {
            let _ = self.activate(t, scope.clone());
        }
        let waiters = self.graph.fire_awaits(&src, Some(&payload));
        for w in waiters {
            *w.slot.borrow_mut() = Some(AwaitDelivery::Value(payload.clone()));
            self.queue.push_back(w.reactor);
        }
    }

    pub(crate) fn current_value(&self, id: ReactorId) -> Result<Option<Value>> {
        self.registry
            .get(id)
            .map(|r| r.current_value.clone())
            .ok_or(Error::InvalidTransition)
    }

    pub(crate) fn state_of(&self, id: ReactorId) -> Option<ReactorState> {
        self.registry.get(id).map(|r| r.state)
    }

    /// Kill `id`. If `id` is the reactor currently being polled — the only
    /// realistic "kill the running reactor" case, the engine being
    /// single-threaded — destruction is deferred: `drive_one` finalizes it
    /// once the poll returns, rather than tearing it down while its own
    /// body might still run more code (spec §4.2: "no reactor may be
    /// destroyed while it is running"; §5: self-kill "marks it zombie
    /// immediately and unwinds at the next return point").
    pub(crate) fn kill(&mut self, id: ReactorId) -> Result<()> {
        if self.is_dead(id) {
            return Err(Error::InvalidTransition);
        }
        if let Some(r) = self.registry.get_mut(id) {
            r.killed = true;
        }
        if self.running == Some(id) {
            return Ok(());
        }
        self.finalize(id, Termination::Killed);
        Ok(())
    }

    /// Resolve `id`'s termination: fire link dependents (only for a plain
    /// `Returned` value — spec §7, failures and kills never trigger link
    /// dependents), resolve every await edge keyed by `id`, then tear down
    /// everything the reactor owned and everything that referenced it.
    fn finalize(&mut self, id: ReactorId, term: Termination) {
        if self.is_dead(id) {
            return; // already finalized (e.g. self-kill, then natural return)
        }
        let src = SourceKey::Reactor(id);

        if let Termination::Returned(value) = &term {
            let scope = self.registry.get(id).and_then(|r| r.scope.clone());
            for target in self.graph.fire_links(&src, value) {
                let _ = self.activate(target, scope.clone());
            }
        }

        let filter_value = match &term {
            Termination::Returned(v) => Some(v.clone()),
            Termination::Failed(_) | Termination::Killed => None,
        };
        let delivery = match &term {
            Termination::Returned(v) => AwaitDelivery::Value(v.clone()),
            Termination::Failed(f) => AwaitDelivery::Failed(f.clone()),
            Termination::Killed => AwaitDelivery::Killed,
        };
        for target in self.graph.fire_awaits(&src, filter_value.as_ref()) {
            *target.slot.borrow_mut() = Some(delivery.clone());
            self.queue.push_back(target.reactor);
        }

        let (owned, scope) = match self.registry.get_mut(id) {
            Some(r) => {
                r.state = ReactorState::Zombie;
                if let Termination::Returned(v) = &term {
                    r.current_value = Some(v.clone());
                }
                r.slot = Slot::Empty;
                (std::mem::take(&mut r.owned_edges), r.scope.clone())
            }
            None => (Vec::new(), None),
        };
        for edge in &owned {
            self.graph.remove_edge(edge);
        }
        self.graph.purge_reactor(id);

        if let Some(r) = self.registry.get_mut(id) {
            r.state = ReactorState::Dead;
        }
        info!(reactor = ?id, "reactor dead");

        if let Some(scope) = scope {
            if scope.dec() {
                let src = SourceKey::Scope(scope.id());
                for target in self.graph.fire_awaits(&src, None) {
                    *target.slot.borrow_mut() = Some(AwaitDelivery::Value(Value::Null));
                    self.queue.push_back(target.reactor);
                }
            }
        }
    }
}

/// The driver-facing facade: same primitives as [`Kernel`], but not bound
/// to any particular running reactor (used by [`crate::driver::App`]).
pub struct Engine(pub(crate) Shared);

impl Engine {
    pub fn new(config: Config) -> Self {
        Self(Rc::new(RefCell::new(EngineInner::new(config))))
    }

    pub fn create(&self, body: Body) -> ReactorId {
        self.0.borrow_mut().create(body, None)
    }

    pub fn spawn(&self, id: ReactorId) -> Result<()> {
        self.0.borrow_mut().activate(id, None)
    }

    pub fn kill(&self, id: ReactorId) -> Result<()> {
        self.0.borrow_mut().kill(id)
    }

    pub fn link(
        &self,
        src: impl Into<SourceKey>,
        dst: impl Into<LinkTarget>,
        filter: Option<crate::value::Filter>,
    ) -> Result<EdgeRef> {
        self.0.borrow_mut().link(src.into(), dst.into(), filter, None)
    }

    pub fn unlink(&self, edge: &EdgeRef) {
        self.0.borrow_mut().unlink(edge);
    }

    pub fn post(&self, name: impl Into<String>, payload: Option<Value>) {
        self.0
            .borrow_mut()
            .post(name.into(), payload.unwrap_or(Value::Null), None);
    }

    pub fn current_value(&self, id: ReactorId) -> Result<Option<Value>> {
        self.0.borrow().current_value(id)
    }

    pub fn state_of(&self, id: ReactorId) -> Option<ReactorState> {
        self.0.borrow().state_of(id)
    }

    pub(crate) fn kernel_for(&self, id: ReactorId, scope: Option<Rc<CallScope>>) -> Kernel {
        Kernel::new(self.0.clone(), id, scope)
    }

    /// Drain the work queue to empty: one full propagation chain (spec
    /// §4.4). Returns once the queue is empty ("chain closure", spec §8).
    pub fn drain(&self) -> Result<()> {
        let max = self.0.borrow().config.max_activations_per_chain;
        let mut count = 0usize;
        loop {
            let next = self.0.borrow_mut().queue.pop_front();
            let Some(id) = next else { break };
            count += 1;
            if let Some(max) = max {
                if count > max {
                    warn!(count, "chain exceeded activation watchdog");
                    return Err(Error::ChainNonTermination(max));
                }
            }
            self.drive_one(id);
        }
        Ok(())
    }

    /// Run one activation — a fresh reactor's entry, or a resume — to its
    /// next suspension or termination. Atomic: the future is polled
    /// entirely outside any `RefCell` borrow, so the body's own calls back
    /// into the kernel (spawn/link/post/kill, all synchronous) never hit a
    /// borrow conflict.
    fn drive_one(&self, id: ReactorId) {
        let scope = {
            let mut inner = self.0.borrow_mut();
            if inner.is_dead(id) {
                return;
            }
            let r = inner.registry.get_mut(id).expect("checked above");
            r.state = ReactorState::Running;
            inner.running = Some(id);
            info!(reactor = ?id, "reactor running");
            r.scope.clone()
        };

        let mut fut = {
            let mut inner = self.0.borrow_mut();
            let r = inner.registry.get_mut(id).expect("checked above");
            match std::mem::replace(&mut r.slot, Slot::InFlight) {
                Slot::Pending(body) => {
                    drop(inner);
                    let kernel = self.kernel_for(id, scope);
                    body(kernel)
                }
                Slot::Active(fut) => fut,
                Slot::InFlight | Slot::Empty => return, // already being driven, or dead
            }
        };

        debug!(reactor = ?id, "polling");
        let waker = noop_waker_ref();
        let mut cx = Context::from_waker(waker);
        let outcome = fut.as_mut().poll(&mut cx);

        let mut inner = self.0.borrow_mut();
        inner.running = None;
        let self_killed = inner
            .registry
            .get(id)
            .map(|r| r.killed)
            .unwrap_or(false);
        match outcome {
            Poll::Pending => {
                if self_killed {
                    drop(fut);
                    inner.finalize(id, Termination::Killed);
                } else if let Some(r) = inner.registry.get_mut(id) {
                    r.state = ReactorState::Suspended;
                    r.slot = Slot::Active(fut);
                    info!(reactor = ?id, "reactor suspended");
                }
            }
            Poll::Ready(result) => {
                drop(fut);
                if self_killed {
                    inner.finalize(id, Termination::Killed);
                } else {
                    let term = match result {
                        Ok(value) => Termination::Returned(value),
                        Err(failure) => Termination::Failed(failure),
                    };
                    inner.finalize(id, term);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use futures::FutureExt;

    fn body_returning(v: Value) -> Body {
        Box::new(move |_k| async move { Ok::<_, FailureInfo>(v) }.boxed_local())
    }

    #[test]
    fn spawn_runs_a_trivial_reactor_to_completion() {
        let engine = Engine::new(Config::default());
        let id = engine.create(body_returning(Value::from(1)));
        engine.spawn(id).unwrap();
        engine.drain().unwrap();
        assert_eq!(engine.state_of(id), Some(ReactorState::Dead));
        assert_eq!(engine.current_value(id).unwrap(), Some(Value::from(1)));
    }

    #[test]
    fn link_triggers_dependent_on_termination() {
        let engine = Engine::new(Config::default());
        let dep = engine.create(body_returning(Value::from("dep ran")));
        let src = engine.create(body_returning(Value::from("src ran")));
        engine.link(SourceKey::Reactor(src), dep, None).unwrap();
        engine.spawn(src).unwrap();
        engine.drain().unwrap();
        assert_eq!(engine.state_of(dep), Some(ReactorState::Dead));
    }

    #[test]
    fn killing_a_suspended_reactor_delivers_killed_to_awaiter() {
        let engine = Engine::new(Config::default());
        let victim = engine.create(Box::new(|k| {
            async move {
                k.await_cond(SourceKey::Event("never".into()), None)
                    .await
                    .map_err(|e| FailureInfo::new(e.to_string()))?;
                Ok(Value::Null)
            }
            .boxed_local()
        }));
        engine.spawn(victim).unwrap();
        engine.drain().unwrap();
        assert_eq!(engine.state_of(victim), Some(ReactorState::Suspended));
        engine.kill(victim).unwrap();
        assert_eq!(engine.state_of(victim), Some(ReactorState::Dead));
    }

    #[test]
    fn acting_on_a_dead_reactor_is_invalid_transition() {
        let engine = Engine::new(Config::default());
        let id = engine.create(body_returning(Value::Null));
        engine.spawn(id).unwrap();
        engine.drain().unwrap();
        assert!(matches!(engine.spawn(id), Err(Error::InvalidTransition)));
        assert!(matches!(engine.kill(id), Err(Error::InvalidTransition)));
    }

    #[test]
    fn unknown_event_is_silently_ignored() {
        let engine = Engine::new(Config::default());
        engine.post("nothing-listens", None);
        engine.drain().unwrap(); // must not error
    }

    #[test]
    fn chain_watchdog_trips_on_a_long_link_cascade() {
        let mut config = Config::default();
        config.max_activations_per_chain = Some(3);
        let engine = Engine::new(config);
        let ids: Vec<_> = (0..5)
            .map(|i| engine.create(body_returning(Value::from(i))))
            .collect();
        for pair in ids.windows(2) {
            engine
                .link(SourceKey::Reactor(pair[0]), pair[1], None)
                .unwrap();
        }
        engine.spawn(ids[0]).unwrap();
        assert!(matches!(engine.drain(), Err(Error::ChainNonTermination(3))));
    }
}
