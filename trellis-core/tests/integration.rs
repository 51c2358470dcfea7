//! Integration Tests for Reactive System
//!
//! These tests verify that signals, memos, effects, batches, owners and
//! resources work together correctly.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tokio::sync::oneshot;
use tokio::task::LocalSet;

use trellis_core::graph::DirtyState;
use trellis_core::prelude::*;
use trellis_core::reactive::{runtime_stats, Refresh};
use trellis_core::{configure, MisusePolicy};

fn counter() -> (Rc<Cell<u32>>, impl Fn()) {
    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    (count, move || count_clone.set(count_clone.get() + 1))
}

/// Writing a signal re-runs the effect that read it before `set` returns.
#[test]
fn basic_propagation() {
    let cell = Signal::new(1);
    let log = Rc::new(RefCell::new(Vec::new()));
    let log_clone = log.clone();

    let _effect = Effect::new(move || log_clone.borrow_mut().push(cell.get()));
    assert_eq!(*log.borrow(), vec![1]);

    cell.set(2);
    assert_eq!(*log.borrow(), vec![1, 2]);
}

/// Writing an equal value does not propagate.
#[test]
fn equal_write_short_circuits() {
    let cell = Signal::new(1);
    let (runs, bump) = counter();

    let _effect = Effect::new(move || {
        cell.get();
        bump();
    });
    assert_eq!(runs.get(), 1);

    cell.set(1);
    assert_eq!(runs.get(), 1);
}

/// An effect reached through two memos from one signal runs once per write.
#[test]
fn diamond_dependency_runs_once() {
    let x = Signal::new(1);
    let a = Memo::new(move || x.get() + 1);
    let b = Memo::new(move || x.get() * 2);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let _effect = Effect::new(move || seen_clone.borrow_mut().push((a.get(), b.get())));

    x.set(5);

    // Never observes a half-updated pair such as (6, 2).
    assert_eq!(*seen.borrow(), vec![(2, 2), (6, 10)]);
}

/// A deeper diamond, with memos of different heights, still runs once.
#[test]
fn uneven_diamond_is_glitch_free() {
    let x = Signal::new(1);
    let a = Memo::new(move || x.get() + 1);
    let a2 = Memo::new(move || a.get() * 10);
    let b = Memo::new(move || x.get());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let _effect = Effect::new(move || seen_clone.borrow_mut().push(a2.get() + b.get()));

    x.set(2);
    assert_eq!(*seen.borrow(), vec![21, 32]);
}

/// Dependencies follow the branch actually taken on the last run.
#[test]
fn conditional_dependencies_are_retracked() {
    let flag = Signal::new(true);
    let a = Signal::new("A");
    let b = Signal::new("B");
    let (runs, bump) = counter();

    let _effect = Effect::new(move || {
        bump();
        if flag.get() {
            a.get();
        } else {
            b.get();
        }
    });

    flag.set(false);
    assert_eq!(runs.get(), 2);

    a.set("A2");
    assert_eq!(runs.get(), 2);
    assert_eq!(a.subscriber_count(), 0);

    b.set("B2");
    assert_eq!(runs.get(), 3);
}

/// Two writes inside a batch re-run the effect once.
#[test]
fn batching_coalesces() {
    let x = Signal::new(0);
    let y = Signal::new(0);
    let (runs, bump) = counter();

    let _effect = Effect::new(move || {
        bump();
        x.get();
        y.get();
    });

    batch(|| {
        x.set(1);
        y.set(1);
    });
    assert_eq!(runs.get(), 2);
}

/// Cleanup runs before the next run and again on dispose.
#[test]
fn cleanup_ordering() {
    let x = Signal::new(0);
    let log = Rc::new(RefCell::new(Vec::new()));
    let log_clone = log.clone();

    let effect = Effect::new(move || {
        let value = x.get();
        let log = log_clone.clone();
        log.borrow_mut().push(format!("run {value}"));
        let first = log.clone();
        on_cleanup(move || first.borrow_mut().push(format!("first cleanup {value}")));
        on_cleanup(move || log.borrow_mut().push(format!("second cleanup {value}")));
    });

    x.set(1);
    effect.dispose();

    assert_eq!(
        *log.borrow(),
        vec![
            "run 0",
            "second cleanup 0",
            "first cleanup 0",
            "run 1",
            "second cleanup 1",
            "first cleanup 1",
        ]
    );
}

/// Reads inside `untrack` do not subscribe the effect.
#[test]
fn untrack_isolation() {
    let x = Signal::new(0);
    let y = Signal::new(0);
    let (runs, bump) = counter();

    let effect = Effect::new(move || {
        bump();
        y.get();
        untrack(|| x.get());
    });
    assert_eq!(effect.dependency_count(), 1);

    x.set(1);
    assert_eq!(runs.get(), 1);

    y.set(1);
    assert_eq!(runs.get(), 2);
}

/// Memos compute on first read and cache until invalidated.
#[test]
fn memo_is_lazy_and_cached() {
    let x = Signal::new(1);
    let (computes, bump) = counter();

    let memo = Memo::new(move || {
        bump();
        x.get() * 3
    });
    assert_eq!(computes.get(), 0);

    assert_eq!(memo.get(), 3);
    assert_eq!(memo.get(), 3);
    assert_eq!(computes.get(), 1);

    // Invalidation alone does not recompute.
    x.set(2);
    assert_eq!(computes.get(), 1);
    assert_eq!(memo.state(), Some(DirtyState::Dirty));

    assert_eq!(memo.get(), 6);
    assert_eq!(computes.get(), 2);
}

/// A chain of memos only recomputes the prefix that is read.
#[test]
fn memo_chain_recomputes_minimum_prefix() {
    let x = Signal::new(1);
    let (first_runs, bump_first) = counter();
    let (second_runs, bump_second) = counter();

    let first = Memo::new(move || {
        bump_first();
        x.get() + 1
    });
    let second = Memo::new(move || {
        bump_second();
        first.get() + 1
    });

    assert_eq!(second.get(), 3);
    x.set(10);

    assert_eq!(first.get(), 11);
    assert_eq!(first_runs.get(), 2);
    assert_eq!(second_runs.get(), 1);

    assert_eq!(second.get(), 12);
    assert_eq!(second_runs.get(), 2);
}

/// Disposing a root stops its effects.
#[test]
fn ownership_disposal() {
    let x = Signal::new(0);
    let (runs, bump) = counter();

    create_root(|owner| {
        Effect::new(move || {
            x.get();
            bump();
        });
        owner.dispose();
        x.set(1);
    });

    assert_eq!(runs.get(), 1);
    assert_eq!(x.subscriber_count(), 0);
}

/// Disposing a parent root disposes nested roots and their nodes.
#[test]
fn nested_roots_are_disposed_with_the_parent() {
    let x = Signal::new(0);
    let (runs, bump) = counter();

    let (outer, inner) = create_root(|outer| {
        let inner = create_root(|inner| {
            Effect::new(move || {
                x.get();
                bump();
            });
            inner
        });
        (outer, inner)
    });

    outer.dispose();
    assert!(inner.is_disposed());
    x.set(1);
    assert_eq!(runs.get(), 1);
}

/// A panicking effect keeps the dependencies it read before the panic and
/// retries on the next change.
#[test]
fn partial_dependencies_are_committed_on_panic() {
    let fail = Signal::new(true);
    let before = Signal::new(0);
    let after = Signal::new(0);
    let (runs, bump) = counter();

    let result = catch_unwind(AssertUnwindSafe(|| {
        Effect::new(move || {
            bump();
            before.get();
            if fail.get() {
                panic!("effect failed");
            }
            after.get();
        })
    }));
    assert!(result.is_err());
    assert_eq!(runs.get(), 1);
    assert_eq!(before.subscriber_count(), 1);
    assert_eq!(fail.subscriber_count(), 1);
    assert_eq!(after.subscriber_count(), 0);

    // Scheduler state was restored.
    assert!(!trellis_core::reactive::is_tracking());
    assert_eq!(runtime_stats().pending_effects, 0);

    fail.set(false);
    assert_eq!(runs.get(), 2);
    assert_eq!(after.subscriber_count(), 1);

    after.set(1);
    assert_eq!(runs.get(), 3);
}

/// A panic in one effect does not strand the effects queued behind it.
#[test]
fn panic_during_flush_keeps_remaining_effects_queued() {
    let x = Signal::new(0);
    let (runs, bump) = counter();

    let _failing = Effect::new(move || {
        if x.get() == 1 {
            panic!("first effect failed");
        }
    });
    let _healthy = Effect::new(move || {
        x.get();
        bump();
    });

    let result = catch_unwind(AssertUnwindSafe(|| x.set(1)));
    assert!(result.is_err());
    assert_eq!(runs.get(), 1);
    assert_eq!(runtime_stats().pending_effects, 1);

    x.set(2);
    assert_eq!(runs.get(), 2);
    assert_eq!(runtime_stats().pending_effects, 0);
}

/// A memo that panicked while an effect pulled it is retried on its next
/// change, and the effect hears about it.
#[test]
fn failed_memo_notifies_its_readers_on_next_change() {
    let x = Signal::new(1);
    let checked = Memo::new(move || {
        let value = x.get();
        if value == 2 {
            panic!("memo failed");
        }
        value
    });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    let _effect = Effect::new(move || seen_clone.borrow_mut().push(checked.get()));

    let result = catch_unwind(AssertUnwindSafe(|| x.set(2)));
    assert!(result.is_err());
    assert_eq!(checked.state(), Some(DirtyState::Dirty));

    x.set(3);
    assert_eq!(*seen.borrow(), vec![1, 3]);
}

/// An effect whose first run panicked inside a memo still depends on that
/// memo.
#[test]
fn memo_read_is_tracked_when_it_panics() {
    let x = Signal::new(2);
    let checked = Memo::new(move || {
        let value = x.get();
        if value == 2 {
            panic!("memo failed");
        }
        value
    });
    let seen = Rc::new(Cell::new(0));
    let seen_clone = seen.clone();

    let result = catch_unwind(AssertUnwindSafe(|| {
        Effect::new(move || seen_clone.set(checked.get()))
    }));
    assert!(result.is_err());
    assert_eq!(checked.dependent_count(), 1);

    x.set(5);
    assert_eq!(seen.get(), 5);
}

/// Effects created and written inside other effects settle within the same
/// write.
#[test]
fn writes_inside_effects_propagate_before_set_returns() {
    let source = Signal::new(1);
    let mirror = Signal::new(0);
    let seen = Rc::new(Cell::new(0));
    let seen_clone = seen.clone();

    let _copy = Effect::new(move || mirror.set(source.get() * 100));
    let _observe = Effect::new(move || seen_clone.set(mirror.get()));

    source.set(2);
    assert_eq!(seen.get(), 200);
}

/// Context flows down the ownership tree into computations.
#[test]
fn context_reaches_effects() {
    #[derive(Clone, PartialEq, Debug)]
    struct Theme(&'static str);

    let seen = Rc::new(RefCell::new(None));
    let seen_clone = seen.clone();

    create_root(|_| {
        provide_context(Theme("dark"));
        Effect::new(move || *seen_clone.borrow_mut() = use_context::<Theme>());
    });

    assert_eq!(*seen.borrow(), Some(Theme("dark")));
}

/// Runtime statistics serialize for diagnostics.
#[test]
fn stats_serialize() {
    let _signal = Signal::new(1);
    let stats = runtime_stats();
    let json = serde_json::to_value(stats).unwrap();
    assert_eq!(json["sources"], stats.sources);
    assert!(json.get("pending_effects").is_some());
}

/// Misuse under the warn policy leaves the graph usable.
#[test]
fn misuse_under_warn_policy() {
    configure(|cfg| cfg.misuse = MisusePolicy::Warn);

    let x = Signal::new(0);
    x.dispose();
    x.set(1);
    on_cleanup(|| {});

    let y = Signal::new(0);
    let (runs, bump) = counter();
    let _effect = Effect::new(move || {
        y.get();
        bump();
    });
    y.set(1);
    assert_eq!(runs.get(), 2);
}

// ----------------------------------------------------------------------------
// Resources
// ----------------------------------------------------------------------------

type Responses = Rc<RefCell<VecDeque<oneshot::Sender<Result<String, String>>>>>;

/// A resource whose fetches are answered by hand, in any order.
fn manual_resource(source: Signal<u32>) -> (Resource<String>, Responses) {
    let responses: Responses = Rc::new(RefCell::new(VecDeque::new()));
    let responses_clone = responses.clone();

    let resource = Resource::new(
        move || source.get(),
        move |_id| {
            let (tx, rx) = oneshot::channel();
            responses_clone.borrow_mut().push_back(tx);
            async move { rx.await.unwrap_or_else(|_| Err("dropped".to_string())) }
        },
    );
    (resource, responses)
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Only the most recently triggered fetch is applied.
#[tokio::test]
async fn resource_discards_superseded_results() {
    LocalSet::new()
        .run_until(async {
            let id = Signal::new(1);
            let (resource, responses) = manual_resource(id);
            assert!(resource.loading());

            id.set(2);
            assert_eq!(responses.borrow().len(), 2);

            let first = responses.borrow_mut().pop_front().unwrap();
            let second = responses.borrow_mut().pop_front().unwrap();

            // The newer fetch resolves first, then the stale one.
            second.send(Ok("second".into())).unwrap();
            settle().await;
            assert_eq!(resource.read().as_deref(), Some("second"));
            assert_eq!(resource.state(), ResourceState::Ready);

            first.send(Ok("first".into())).unwrap();
            settle().await;
            assert_eq!(resource.read().as_deref(), Some("second"));
        })
        .await;
}

/// Refresh keeps the previous value visible while loading, unless reset.
#[tokio::test]
async fn resource_refresh_is_stale_while_revalidate() {
    LocalSet::new()
        .run_until(async {
            let id = Signal::new(1);
            let (resource, responses) = manual_resource(id);

            let tx = responses.borrow_mut().pop_front().unwrap();
            tx.send(Ok("v1".into())).unwrap();
            settle().await;

            resource.refresh();
            assert!(resource.loading());
            assert_eq!(resource.read().as_deref(), Some("v1"));

            resource.refresh_with(Refresh::Reset);
            assert!(resource.loading());
            assert_eq!(resource.read(), None);

            while let Some(tx) = responses.borrow_mut().pop_back() {
                let _ = tx.send(Ok("v2".into()));
            }
            settle().await;
            assert_eq!(resource.read().as_deref(), Some("v2"));
        })
        .await;
}

/// A failed fetch sets the error and keeps the last good value.
#[tokio::test]
async fn resource_error_keeps_value() {
    LocalSet::new()
        .run_until(async {
            let id = Signal::new(1);
            let (resource, responses) = manual_resource(id);

            let ok = responses.borrow_mut().pop_front().unwrap();
            ok.send(Ok("good".into())).unwrap();
            settle().await;

            id.set(2);
            let err = responses.borrow_mut().pop_front().unwrap();
            err.send(Err("offline".into())).unwrap();
            settle().await;

            assert_eq!(resource.state(), ResourceState::Errored);
            assert_eq!(resource.error().as_deref(), Some("offline"));
            assert_eq!(resource.read().as_deref(), Some("good"));
        })
        .await;
}

/// Results arriving after the resource is disposed are dropped.
#[tokio::test]
async fn resource_disposed_mid_flight() {
    LocalSet::new()
        .run_until(async {
            let id = Signal::new(1);
            let (resource, responses) = manual_resource(id);
            let tx = responses.borrow_mut().pop_front().unwrap();

            resource.dispose();
            tx.send(Ok("late".into())).unwrap();
            settle().await;

            assert!(resource.is_disposed());
        })
        .await;
}

/// Effects see loading, then ready, without extra runs per settlement.
#[tokio::test]
async fn effects_observe_resource_transitions() {
    LocalSet::new()
        .run_until(async {
            let id = Signal::new(1);
            let (resource, responses) = manual_resource(id);

            let states = Rc::new(RefCell::new(Vec::new()));
            let states_clone = states.clone();
            let observed = resource.clone();
            let _effect = Effect::new(move || {
                states_clone
                    .borrow_mut()
                    .push((observed.state(), observed.read()))
            });

            let tx = responses.borrow_mut().pop_front().unwrap();
            tx.send(Ok("done".into())).unwrap();
            settle().await;

            assert_eq!(
                *states.borrow(),
                vec![
                    (ResourceState::Loading, None),
                    (ResourceState::Ready, Some("done".to_string())),
                ]
            );
        })
        .await;
}
