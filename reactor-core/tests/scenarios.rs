//! End-to-end scenarios exercising one kernel behavior each: a plain link,
//! a fork with two concurrently-running children, a filtered await, a kill
//! that does not cascade through link edges, the `App`/`run_to_quiescence`
//! equivalence, and `call`'s "wait for the whole sub-chain" join semantics.

use std::rc::Rc;

use futures::FutureExt;
use reactor_core::driver::{run_to_quiescence, App, AppState};
use reactor_core::{Body, Engine, Error, FailureInfo, ReactorState, SourceKey, Value};

fn returning(v: Value) -> Body {
    Box::new(move |_k| async move { Ok::<_, FailureInfo>(v) }.boxed_local())
}

#[test]
fn basic_link() {
    let engine = Engine::new(Default::default());
    let dependent = engine.create(returning(Value::from("dependent ran")));
    let source = engine.create(returning(Value::from("source ran")));
    engine.link(SourceKey::Reactor(source), dependent, None).unwrap();

    engine.spawn(source).unwrap();
    engine.drain().unwrap();

    assert_eq!(engine.state_of(source), Some(ReactorState::Dead));
    assert_eq!(engine.state_of(dependent), Some(ReactorState::Dead));
    assert_eq!(
        engine.current_value(dependent).unwrap(),
        Some(Value::from("dependent ran"))
    );
}

#[test]
fn spawn_fork_nondeterminism() {
    let engine = Engine::new(Default::default());
    let child_a = engine.create(returning(Value::from("a")));
    let child_b = engine.create(returning(Value::from("b")));
    let root = engine.create(Box::new(move |k| {
        async move {
            k.spawn(child_a).ok();
            k.spawn(child_b).ok();
            Ok(Value::Null)
        }
        .boxed_local()
    }));

    engine.spawn(root).unwrap();
    engine.drain().unwrap();

    // Both children run to completion within the one chain triggered by
    // spawning `root`, regardless of which the engine happened to drain
    // first.
    assert_eq!(engine.state_of(child_a), Some(ReactorState::Dead));
    assert_eq!(engine.state_of(child_b), Some(ReactorState::Dead));
    assert_eq!(engine.current_value(child_a).unwrap(), Some(Value::from("a")));
    assert_eq!(engine.current_value(child_b).unwrap(), Some(Value::from("b")));
}

#[test]
fn await_with_value_respects_filter() {
    let engine = Engine::new(Default::default());
    let waiter = engine.create(Box::new(|k| {
        async move {
            let filter: reactor_core::Filter = Rc::new(|v: &Value| v.get("id") == Some(&Value::from(7)));
            let v = k
                .await_cond(SourceKey::Event("message".into()), Some(filter))
                .await
                .map_err(|e| FailureInfo::new(e.to_string()))?;
            Ok(v)
        }
        .boxed_local()
    }));
    engine.spawn(waiter).unwrap();
    engine.drain().unwrap();
    assert_eq!(engine.state_of(waiter), Some(ReactorState::Suspended));

    // Non-matching payload: waiter is left suspended, still listening.
    engine.post("message", Some(serde_json::json!({"id": 3})));
    engine.drain().unwrap();
    assert_eq!(engine.state_of(waiter), Some(ReactorState::Suspended));

    // Matching payload resolves it.
    engine.post("message", Some(serde_json::json!({"id": 7})));
    engine.drain().unwrap();
    assert_eq!(engine.state_of(waiter), Some(ReactorState::Dead));
    assert_eq!(
        engine.current_value(waiter).unwrap(),
        Some(serde_json::json!({"id": 7}))
    );
}

#[test]
fn kill_resolves_awaiters_but_does_not_cascade_links() {
    let engine = Engine::new(Default::default());
    let dependent = engine.create(returning(Value::from("should never run")));
    let victim = engine.create(Box::new(|k| {
        async move {
            k.await_cond(SourceKey::Event("never".into()), None).await.ok();
            Ok(Value::Null)
        }
        .boxed_local()
    }));
    engine.link(SourceKey::Reactor(victim), dependent, None).unwrap();

    let awaiter = engine.create(Box::new(move |k| {
        async move {
            let outcome = k.await_cond(SourceKey::Reactor(victim), None).await;
            Ok(Value::from(format!("{outcome:?}")))
        }
        .boxed_local()
    }));

    engine.spawn(victim).unwrap();
    engine.spawn(awaiter).unwrap();
    engine.drain().unwrap();

    engine.kill(victim).unwrap();
    engine.drain().unwrap();

    assert_eq!(engine.state_of(victim), Some(ReactorState::Dead));
    // The link dependent never fires: `kill` is a control signal, not a
    // termination value.
    assert_eq!(engine.state_of(dependent), Some(ReactorState::Ready));
    // But the explicit awaiter sees the kill.
    assert_eq!(engine.state_of(awaiter), Some(ReactorState::Dead));
}

#[test]
fn loop_equivalence() {
    fn body() -> Body {
        Box::new(|k| {
            async move {
                let first = k
                    .await_cond(SourceKey::Event("a".into()), None)
                    .await
                    .map_err(|e| FailureInfo::new(e.to_string()))?;
                let second = k
                    .await_cond(SourceKey::Event("b".into()), None)
                    .await
                    .map_err(|e| FailureInfo::new(e.to_string()))?;
                Ok(Value::from(format!("{first}-{second}")))
            }
            .boxed_local()
        })
    }

    let mut events = vec![
        ("a".to_string(), Value::from("x")),
        ("b".to_string(), Value::from("y")),
    ]
    .into_iter();
    let via_loop = run_to_quiescence(body(), move || events.next()).unwrap();

    let mut app = App::start(body());
    app.step("a", Value::from("x")).unwrap();
    app.step("b", Value::from("y")).unwrap();
    assert_eq!(app.state(), AppState::Terminated);
    let via_steps = app.result().unwrap().unwrap();

    assert_eq!(via_loop, via_steps);
    assert_eq!(via_loop, Value::from("x-y"));
}

#[test]
fn call_waits_for_the_whole_transitive_sub_chain() {
    let engine = Engine::new(Default::default());
    let caller = engine.create(Box::new(|k| {
        async move {
            let callee: Body = Box::new(|inner| {
                async move {
                    // The callee forks a grandchild that outlives the callee's
                    // own body; `call` must not return until it too finishes.
                    let grandchild = inner.create(Box::new(|gk| {
                        async move {
                            gk.await_cond(SourceKey::Event("finish".into()), None)
                                .await
                                .map_err(|e| FailureInfo::new(e.to_string()))?;
                            Ok(Value::from("grandchild done"))
                        }
                        .boxed_local()
                    }));
                    inner.spawn(grandchild).ok();
                    Ok(Value::from("callee done"))
                }
                .boxed_local()
            });
            let result = k.call(callee).await;
            Ok(Value::from(format!("{result:?}")))
        }
        .boxed_local()
    }));

    engine.spawn(caller).unwrap();
    engine.drain().unwrap();
    // The grandchild is still waiting on "finish": `caller` must still be
    // suspended inside its `call`, not finished.
    assert_eq!(engine.state_of(caller), Some(ReactorState::Suspended));

    engine.post("finish", None);
    engine.drain().unwrap();
    assert_eq!(engine.state_of(caller), Some(ReactorState::Dead));
}

#[test]
fn link_can_auto_create_its_destination() {
    let engine = Engine::new(Default::default());
    let source = engine.create(returning(Value::from("source ran")));
    let dependent_ran = Rc::new(std::cell::Cell::new(false));
    let flag = dependent_ran.clone();
    let dependent: Body = Box::new(move |_k| {
        async move {
            flag.set(true);
            Ok(Value::from("dependent ran"))
        }
        .boxed_local()
    });
    // `dst` here is a `Body`, not an existing `ReactorId` — `link` creates
    // and wires it in the same call.
    engine.link(SourceKey::Reactor(source), dependent, None).unwrap();

    engine.spawn(source).unwrap();
    engine.drain().unwrap();

    assert!(dependent_ran.get(), "auto-created link destination must run once source terminates");
}

#[test]
fn self_kill_defers_destruction_until_the_poll_returns() {
    let engine = Engine::new(Default::default());
    let ran_after_kill = Rc::new(std::cell::Cell::new(false));
    let flag = ran_after_kill.clone();
    let victim = engine.create(Box::new(move |k| {
        async move {
            k.kill(k.self_id()).ok();
            // Still running: the engine must not tear this reactor down
            // until this poll returns, so this line executes.
            flag.set(true);
            Ok(Value::from("finished anyway"))
        }
        .boxed_local()
    }));

    engine.spawn(victim).unwrap();
    engine.drain().unwrap();

    assert!(ran_after_kill.get(), "body must keep running after self-kill until it suspends or returns");
    assert_eq!(engine.state_of(victim), Some(ReactorState::Dead));
}

#[test]
fn chain_watchdog_is_a_synchronous_error() {
    let mut config = reactor_core::Config::default();
    config.max_activations_per_chain = Some(2);
    let engine = Engine::new(config);
    let ids: Vec<_> = (0..4).map(|i| engine.create(returning(Value::from(i)))).collect();
    for pair in ids.windows(2) {
        engine.link(SourceKey::Reactor(pair[0]), pair[1], None).unwrap();
    }
    engine.spawn(ids[0]).unwrap();
    assert!(matches!(engine.drain(), Err(Error::ChainNonTermination(2))));
}
