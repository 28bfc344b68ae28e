//! C5 — embedding modes (spec §5): a driver-owned step loop ([`App`]), and
//! a single call that runs one root reactor to termination by repeatedly
//! supplying the next event itself ([`run_to_quiescence`]). The spec
//! requires these two to be equivalent; `run_to_quiescence` is built
//! directly out of `App::start`/`App::step` rather than its own engine
//! loop, so that equivalence holds by construction.

use uuid::Uuid;

use crate::engine::{Config, Engine};
use crate::error::Result;
use crate::registry::{Body, ReactorId, ReactorState};
use crate::value::Value;

/// Opaque identity for one running application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppId(Uuid);

impl AppId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// The root reactor has not yet reached a suspension point.
    Starting,
    /// The root reactor is suspended, waiting on its next event.
    Ready,
    /// The root reactor has terminated; [`App::result`] is final.
    Terminated,
}

/// A driver-owned embedding of the kernel: construct with [`App::start`],
/// then feed it events with [`App::step`] until it reports
/// [`AppState::Terminated`].
pub struct App {
    id: AppId,
    engine: Engine,
    root: ReactorId,
}

impl App {
    pub fn start(root_body: Body) -> Self {
        Self::start_with_config(root_body, Config::default())
    }

    pub fn start_with_config(root_body: Body, config: Config) -> Self {
        let engine = Engine::new(config);
        let root = engine.create(root_body);
        engine
            .spawn(root)
            .expect("a freshly created reactor is never dead");
        let app = Self {
            id: AppId::new(),
            engine,
            root,
        };
        // Drive the root to its first suspension or termination before
        // handing the handle back, so `state()` reflects reality from the
        // caller's very first observation.
        let _ = app.engine.drain();
        app
    }

    pub fn id(&self) -> AppId {
        self.id
    }

    pub fn state(&self) -> AppState {
        match self.engine.state_of(self.root) {
            None | Some(ReactorState::Dead) | Some(ReactorState::Zombie) => AppState::Terminated,
            Some(ReactorState::Suspended) => AppState::Ready,
            Some(ReactorState::Ready) | Some(ReactorState::Running) => AppState::Starting,
        }
    }

    /// Deliver one external event and drain the resulting chain to
    /// quiescence. A no-op once the app has already terminated.
    pub fn step(&mut self, event_name: impl Into<String>, payload: Value) -> Result<AppState> {
        if self.state() == AppState::Terminated {
            return Ok(AppState::Terminated);
        }
        self.engine.post(event_name.into(), Some(payload));
        self.engine.drain()?;
        Ok(self.state())
    }

    /// The root reactor's terminal value, available once [`Self::state`]
    /// reports [`AppState::Terminated`].
    pub fn result(&self) -> Result<Option<Value>> {
        self.engine.current_value(self.root)
    }
}

/// Run one root reactor to termination by repeatedly asking `next_event`
/// for the next `(name, payload)` to deliver whenever the app is ready for
/// one, stopping early if `next_event` returns `None`.
pub fn run_to_quiescence<F>(root_body: Body, mut next_event: F) -> Result<Value>
where
    F: FnMut() -> Option<(String, Value)>,
{
    let mut app = App::start(root_body);
    while app.state() != AppState::Terminated {
        match next_event() {
            Some((name, payload)) => {
                app.step(name, payload)?;
            }
            None => break,
        }
    }
    Ok(app.result()?.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureInfo;
    use crate::graph::SourceKey;
    use futures::FutureExt;

    #[test]
    fn app_reaches_ready_then_terminated() {
        let mut app = App::start(Box::new(|k| {
            async move {
                let v = k
                    .await_cond(SourceKey::Event("go".into()), None)
                    .await
                    .map_err(|e| FailureInfo::new(e.to_string()))?;
                Ok(v)
            }
            .boxed_local()
        }));
        assert_eq!(app.state(), AppState::Ready);
        app.step("go", Value::from(42)).unwrap();
        assert_eq!(app.state(), AppState::Terminated);
        assert_eq!(app.result().unwrap(), Some(Value::from(42)));
    }

    #[test]
    fn run_to_quiescence_drives_a_single_event_root() {
        let mut events = vec![("go".to_string(), Value::from("done"))].into_iter();
        let result = run_to_quiescence(
            Box::new(|k| {
                async move {
                    let v = k
                        .await_cond(SourceKey::Event("go".into()), None)
                        .await
                        .map_err(|e| FailureInfo::new(e.to_string()))?;
                    Ok(v)
                }
                .boxed_local()
            }),
            move || events.next(),
        )
        .unwrap();
        assert_eq!(result, Value::from("done"));
    }
}
