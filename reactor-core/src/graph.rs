//! C3 — the dependency graph (spec §4.3).
//!
//! A mapping from *source key* (a reactor id or an event name, the tagged
//! variant Design Notes §9 recommends) to its outgoing edges. `link` edges
//! are permanent and user-managed; `await` edges are single-shot and
//! consumed the moment they fire.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::AwaitError;
use crate::registry::{ReactorId, ScopeId};
use crate::value::{filter_admits, Filter, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Reactor(ReactorId),
    Event(String),
    /// A `call()`'s scope-drain wait — fires once every reactor
    /// transitively spawned under that scope has finished.
    Scope(ScopeId),
}

impl From<ReactorId> for SourceKey {
    fn from(id: ReactorId) -> Self {
        SourceKey::Reactor(id)
    }
}

impl From<&str> for SourceKey {
    fn from(name: &str) -> Self {
        SourceKey::Event(name.to_string())
    }
}

impl From<String> for SourceKey {
    fn from(name: String) -> Self {
        SourceKey::Event(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Link,
    Await,
}

/// What an `await` edge delivers once it fires. Carried to the awaiter
/// through a shared cell rather than through the work queue, since the
/// queue only ever says "re-poll this reactor" (see `continuation.rs`).
#[derive(Clone)]
pub enum AwaitDelivery {
    Value(Value),
    Killed,
    Failed(crate::error::FailureInfo),
}

impl From<AwaitDelivery> for Result<Value, AwaitError> {
    fn from(d: AwaitDelivery) -> Self {
        match d {
            AwaitDelivery::Value(v) => Ok(v),
            AwaitDelivery::Killed => Err(AwaitError::Killed),
            AwaitDelivery::Failed(info) => Err(AwaitError::Failed(info)),
        }
    }
}

pub type DeliverySlot = Rc<RefCell<Option<AwaitDelivery>>>;

/// The resume target of an `await` edge: which reactor to re-enqueue, and
/// the cell its continuation reads the delivered value from.
#[derive(Clone)]
pub struct AwaitTarget {
    pub reactor: ReactorId,
    pub slot: DeliverySlot,
}

#[derive(Clone)]
pub enum EdgeTarget {
    Reactor(ReactorId),
    Await(AwaitTarget),
}

#[derive(Clone)]
pub struct Edge {
    pub kind: EdgeKind,
    pub target: EdgeTarget,
    pub filter: Option<Filter>,
}

/// A handle identifying one specific edge: the source key it lives under,
/// plus a monotonic id distinguishing it from siblings at the same source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeRef {
    pub source: SourceKey,
    pub id: u64,
}

#[derive(Default)]
pub struct Graph {
    adjacency: HashMap<SourceKey, Vec<(u64, Edge)>>,
    next_id: u64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Idempotent on `(src, dst, kind = link)`, per spec §4.3.
    pub fn add_link(
        &mut self,
        src: SourceKey,
        dst: ReactorId,
        filter: Option<Filter>,
    ) -> EdgeRef {
        if let Some(existing) = self.adjacency.get(&src).and_then(|edges| {
            edges.iter().find(|(_, e)| {
                e.kind == EdgeKind::Link && matches!(e.target, EdgeTarget::Reactor(t) if t == dst)
            })
        }) {
            return EdgeRef {
                source: src,
                id: existing.0,
            };
        }
        let id = self.fresh_id();
        self.adjacency.entry(src.clone()).or_default().push((
            id,
            Edge {
                kind: EdgeKind::Link,
                target: EdgeTarget::Reactor(dst),
                filter,
            },
        ));
        EdgeRef { source: src, id }
    }

    /// No-op if the matching link edge is already absent.
    pub fn remove_link(&mut self, src: &SourceKey, dst: ReactorId) {
        if let Some(edges) = self.adjacency.get_mut(src) {
            edges.retain(|(_, e)| {
                !(e.kind == EdgeKind::Link
                    && matches!(e.target, EdgeTarget::Reactor(t) if t == dst))
            });
        }
    }

    /// Always creates a fresh edge (await edges are never deduplicated).
    pub fn add_await(
        &mut self,
        src: SourceKey,
        target: AwaitTarget,
        filter: Option<Filter>,
    ) -> EdgeRef {
        let id = self.fresh_id();
        self.adjacency.entry(src.clone()).or_default().push((
            id,
            Edge {
                kind: EdgeKind::Await,
                target: EdgeTarget::Await(target),
                filter,
            },
        ));
        EdgeRef { source: src, id }
    }

    pub fn remove_edge(&mut self, edge: &EdgeRef) {
        if let Some(edges) = self.adjacency.get_mut(&edge.source) {
            edges.retain(|(id, _)| *id != edge.id);
        }
    }

    /// Snapshot the fan-out of `src` in insertion order. A clone, not a
    /// borrow: per the Open Question resolution in SPEC_FULL §9, an
    /// `unlink` that happens *during* firing must not affect the set
    /// already captured for this fan-out.
    pub fn fanout(&self, src: &SourceKey) -> Vec<Edge> {
        self.adjacency
            .get(src)
            .map(|edges| edges.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default()
    }

    /// `Link` edges at `src` admitting `value`, as targets to activate.
    /// Links are permanent: firing never removes them.
    pub fn fire_links(&self, src: &SourceKey, value: &Value) -> Vec<ReactorId> {
        self.adjacency
            .get(src)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|(_, e)| {
                        if e.kind == EdgeKind::Link && admits(&e.filter, value) {
                            match e.target {
                                EdgeTarget::Reactor(t) => Some(t),
                                EdgeTarget::Await(_) => None,
                            }
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve `Await` edges at `src`. `filter_value = None` bypasses
    /// filtering entirely (control signals — kill/fail — reach every
    /// waiter); `Some(v)` applies each edge's filter against `v`.
    ///
    /// An edge that fires is removed (single-shot); one whose filter
    /// rejects the value is left in place so a *later* firing of the same
    /// source can still match it (e.g. waiting on an event by
    /// correlation id).
    pub fn fire_awaits(&mut self, src: &SourceKey, filter_value: Option<&Value>) -> Vec<AwaitTarget> {
        let Some(edges) = self.adjacency.get_mut(src) else {
            return Vec::new();
        };
        let mut fired = Vec::new();
        edges.retain(|(_, e)| {
            if e.kind != EdgeKind::Await {
                return true;
            }
            let admitted = match filter_value {
                None => true,
                Some(v) => admits(&e.filter, v),
            };
            if admitted {
                if let EdgeTarget::Await(t) = &e.target {
                    fired.push(t.clone());
                }
            }
            !admitted
        });
        fired
    }

    /// Remove every edge that references `id`, as either a source or a
    /// target — the "no edge references a dead reactor" invariant (spec
    /// §3/§8). Distinct from removing a reactor's *owned* edges: this
    /// removes edges about `id`, regardless of who created them.
    pub fn purge_reactor(&mut self, id: ReactorId) {
        self.adjacency.remove(&SourceKey::Reactor(id));
        for edges in self.adjacency.values_mut() {
            edges.retain(|(_, e)| !edge_references(e, id));
        }
        self.adjacency.retain(|_, edges| !edges.is_empty());
    }
}

fn edge_references(edge: &Edge, id: ReactorId) -> bool {
    match &edge.target {
        EdgeTarget::Reactor(t) => *t == id,
        EdgeTarget::Await(t) => t.reactor == id,
    }
}

/// Evaluate `filter` against `value`; `None` always admits.
pub fn admits(filter: &Option<Filter>, value: &Value) -> bool {
    filter_admits(filter, value)
}
