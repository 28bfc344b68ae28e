//! C2 — the reactor registry (spec §4.2).
//!
//! Reactors are never referenced by pointer: they live in a generational
//! arena (`slotmap`) keyed by [`ReactorId`], so a dangling reference to a
//! dead reactor is simply a stale key lookup that returns `None` rather than
//! a dangling pointer (Design Notes §9).

use std::cell::Cell;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use slotmap::{new_key_type, SlotMap};

use crate::error::BodyResult;
use crate::graph::EdgeRef;
use crate::kernel::Kernel;
use crate::value::Value;

new_key_type! {
    /// Stable numeric identity for a reactor. Never reused while any edge
    /// could still reference it — `slotmap` bumps the generation on reuse
    /// of a freed slot, so an old `ReactorId` never silently aliases a new
    /// reactor.
    pub struct ReactorId;
}

/// Identifies one `call()`'s [`CallScope`] as a graph source — lets a
/// caller's scope-drain wait be a genuine await edge (`SourceKey::Scope`)
/// rather than a side channel, so "suspended ⇔ exactly one outstanding
/// await edge" (spec §3/§8) keeps holding while a `call` is parked on its
/// callee's transitive sub-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    pub(crate) fn new(n: u64) -> Self {
        Self(n)
    }
}

/// A not-yet-started reactor body: given the [`Kernel`] handle it will use
/// to call kernel primitives, produce the future that is this reactor's
/// entire suspendable lifetime. `LocalBoxFuture`, not `BoxFuture` — bodies
/// close over `Rc`-based kernel state and are only ever polled from the
/// single thread that owns the engine.
pub type Body = Box<dyn FnOnce(Kernel) -> LocalBoxFuture<'static, BodyResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    Ready,
    Running,
    Suspended,
    Zombie,
    Dead,
}

/// Join accounting for `call()`'s "wait for the whole sub-chain" semantics
/// (SPEC_FULL §9, Open Question 2). Every reactor activated as a direct or
/// transitive consequence of a `call`-spawned reactor shares its scope;
/// the scope's counter reaches zero only once all of them have finished.
pub struct CallScope {
    id: ScopeId,
    pending: Cell<usize>,
}

impl CallScope {
    pub fn new(id: ScopeId) -> Rc<Self> {
        Rc::new(Self {
            id,
            pending: Cell::new(1),
        })
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn inc(&self) {
        self.pending.set(self.pending.get() + 1);
    }

    /// Decrement, returning `true` exactly on the transition to zero (the
    /// instant the engine should fire the await edges parked on
    /// `SourceKey::Scope(self.id())`).
    #[must_use]
    pub fn dec(&self) -> bool {
        let n = self.pending.get() - 1;
        self.pending.set(n);
        n == 0
    }

    pub fn is_drained(&self) -> bool {
        self.pending.get() == 0
    }
}

/// The reactor's suspendable body, wherever it is in its lifecycle.
pub enum Slot {
    /// Created but never activated.
    Pending(Body),
    /// Checked out of the registry for polling — `drive_one` leaves this
    /// behind momentarily so the poll itself never happens under a
    /// `RefCell` borrow.
    InFlight,
    /// Parked at an `await` point.
    Active(LocalBoxFuture<'static, BodyResult>),
    /// Reactor is dead; nothing left to poll.
    Empty,
}

pub struct Reactor {
    pub state: ReactorState,
    pub current_value: Option<Value>,
    pub slot: Slot,
    pub scope: Option<Rc<CallScope>>,
    /// The single outstanding await edge, if suspended (spec invariant:
    /// "a suspended reactor has exactly one outstanding await edge").
    pub suspended_on: Option<EdgeRef>,
    /// Link/await edges this reactor created via `link`/`await_cond` calls
    /// whose *source* is not necessarily this reactor — removed on death
    /// regardless of where they live in the graph.
    pub owned_edges: Vec<EdgeRef>,
    /// Set once `kill` targets this reactor. If it targets the reactor
    /// currently being polled (self-kill), destruction is deferred —
    /// `drive_one` checks this flag once the poll returns and finalizes
    /// the reactor as killed regardless of what its body produced.
    pub killed: bool,
}

impl Reactor {
    pub fn new(body: Body, scope: Option<Rc<CallScope>>) -> Self {
        Self {
            state: ReactorState::Ready,
            current_value: None,
            slot: Slot::Pending(body),
            scope,
            suspended_on: None,
            owned_edges: Vec::new(),
            killed: false,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.state == ReactorState::Dead
    }
}

pub type Registry = SlotMap<ReactorId, Reactor>;

/// `link`'s destination: either an existing reactor, or a body to
/// auto-create and link in one call (spec §4.4/§6 — `dst` may be a
/// `reactor_id` or a `body`).
pub enum LinkTarget {
    Existing(ReactorId),
    New(Body),
}

impl From<ReactorId> for LinkTarget {
    fn from(id: ReactorId) -> Self {
        LinkTarget::Existing(id)
    }
}

impl From<Body> for LinkTarget {
    fn from(body: Body) -> Self {
        LinkTarget::New(body)
    }
}
