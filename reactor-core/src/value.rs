//! The value carried by events, filter predicates, and reactor results.

use std::rc::Rc;

/// A reactor's terminal value, an event payload, or the input to a filter.
///
/// Kept open-ended (a thin alias over `serde_json::Value`) rather than a
/// closed enum, since the kernel has no fixed instruction set constraining
/// what a reactor body may produce or an event may carry.
pub type Value = serde_json::Value;

/// An opaque predicate over a fired [`Value`]. Stored on an edge and
/// evaluated by the engine before that edge's target is enqueued.
///
/// `Rc`, not `Arc` — the kernel is single-threaded, so there is no reason to
/// pay for atomic refcounting on every filter check.
pub type Filter = Rc<dyn Fn(&Value) -> bool>;

pub(crate) fn filter_admits(filter: &Option<Filter>, value: &Value) -> bool {
    match filter {
        Some(f) => f(value),
        None => true,
    }
}
