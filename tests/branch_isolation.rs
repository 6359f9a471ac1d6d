//! Scopes across suspension points, concurrent branches and spawned tasks

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ambit::{contexts, spawn, spawn_blocking, Context, ContextError, OptionalContext};
use once_cell::sync::Lazy;
use rstest::rstest;
use tokio::sync::oneshot;

static VALUE: Lazy<Context<&'static str>> = Lazy::new(|| Context::named("value"));
static REGION: Lazy<Context<&'static str>> = Lazy::new(|| Context::named("region"));

#[rstest]
#[tokio::test]
async fn value_survives_suspension_points() {
    let seen = VALUE
        .provide(|| "kept")
        .scope(async {
            let mut seen = Vec::new();
            for _ in 0..3 {
                tokio::task::yield_now().await;
                seen.push(VALUE.resolve());
            }
            seen
        })
        .await;

    assert_eq!(seen, vec![Ok("kept"); 3]);
    assert!(VALUE.resolve().is_err());
}

#[rstest]
#[tokio::test]
async fn sibling_branches_are_isolated() {
    let (entered_tx, entered_rx) = oneshot::channel::<()>();
    let (checked_tx, checked_rx) = oneshot::channel::<()>();

    let (first, second) = VALUE
        .provide(|| "base")
        .scope(async {
            let first = async {
                let inner = VALUE
                    .provide(|| "x")
                    .scope(async {
                        entered_tx.send(()).unwrap();
                        // the sibling resolves while this scope is active
                        checked_rx.await.unwrap();
                        VALUE.resolve()
                    })
                    .await;
                (inner, VALUE.resolve())
            };
            let second = async {
                entered_rx.await.unwrap();
                let seen = VALUE.resolve();
                checked_tx.send(()).unwrap();
                seen
            };
            tokio::join!(first, second)
        })
        .await;

    assert_eq!(first, (Ok("x"), Ok("base")));
    assert_eq!(second, Ok("base"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawned_tasks_are_isolated() {
    let (entered_tx, entered_rx) = oneshot::channel::<()>();
    let (checked_tx, checked_rx) = oneshot::channel::<()>();

    let (first, second) = VALUE
        .provide(|| "base")
        .scope(async {
            let first = spawn(async move {
                let inner = VALUE
                    .provide(|| "x")
                    .scope(async {
                        entered_tx.send(()).unwrap();
                        checked_rx.await.unwrap();
                        VALUE.resolve()
                    })
                    .await;
                (inner, VALUE.resolve())
            });
            let second = spawn(async move {
                entered_rx.await.unwrap();
                let seen = VALUE.resolve();
                checked_tx.send(()).unwrap();
                seen
            });
            (first.await.unwrap(), second.await.unwrap())
        })
        .await;

    assert_eq!(first, (Ok("x"), Ok("base")));
    assert_eq!(second, Ok("base"));
}

#[rstest]
#[tokio::test]
async fn plain_tokio_spawn_starts_empty() {
    let result = VALUE
        .provide(|| "lost")
        .scope(async { tokio::spawn(async { VALUE.resolve() }).await.unwrap() })
        .await;

    assert_eq!(result, Err(ContextError::NotProvided { name: "value" }));
}

#[derive(Debug)]
struct Pool;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scoped_value_built_once_across_tasks() {
    let pool: Arc<Context<Arc<Pool>>> = Arc::new(Context::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let instances = pool
        .provide(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            Arc::new(Pool)
        })
        .scope(async {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let pool = pool.clone();
                    spawn(async move { pool.resolve().unwrap() })
                })
                .collect();
            let mut instances = Vec::new();
            for handle in handles {
                instances.push(handle.await.unwrap());
            }
            instances
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(instances.iter().all(|p| Arc::ptr_eq(p, &instances[0])));
}

#[rstest]
#[tokio::test]
async fn blocking_work_inherits_the_branch() {
    let seen = VALUE
        .provide(|| "blocking")
        .scope(async { spawn_blocking(|| VALUE.resolve()).await.unwrap() })
        .await;

    assert_eq!(seen, Ok("blocking"));
}

#[rstest]
#[tokio::test]
async fn cancelled_scope_leaves_parent_untouched() {
    let outcome = VALUE
        .provide(|| "parent")
        .scope(async {
            let stalled = VALUE.provide(|| "child").scope(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                VALUE.resolve()
            });
            let timed_out = tokio::time::timeout(Duration::from_millis(10), stalled)
                .await
                .is_err();
            (timed_out, VALUE.depth(), VALUE.resolve())
        })
        .await;

    assert_eq!(outcome, (true, 1, Ok("parent")));
}

#[rstest]
#[tokio::test]
async fn composition_in_async_code() {
    let user: Arc<Context<String>> = Arc::new(Context::new());
    let tracing_id: OptionalContext<u64> = Context::optional();

    let both = contexts![
        user.provide(|| "alice".to_string()),
        tracing_id.provide(|| 42)
    ];

    let seen = both
        .scope(async {
            tokio::task::yield_now().await;
            (user.resolve(), tracing_id.resolve())
        })
        .await;

    assert_eq!(seen, (Ok("alice".to_string()), Some(42)));
    assert_eq!(tracing_id.resolve(), None);
}

#[rstest]
#[case(1)]
#[case(4)]
#[tokio::test]
async fn nested_async_scopes_stack(#[case] levels: usize) {
    let depth: OptionalContext<usize> = Context::optional();

    let mut nested: Pin<Box<dyn Future<Output = (Option<usize>, usize)> + '_>> =
        Box::pin(async { (depth.resolve(), depth.depth()) });
    for level in (1..=levels).rev() {
        nested = Box::pin(depth.provide(move || level).scope(nested));
    }

    assert_eq!(nested.await, (Some(levels), levels));
    assert_eq!(depth.resolve(), None);
}

#[rstest]
#[tokio::test]
async fn nested_scope_expression_sees_both_scopes() {
    let seen = VALUE
        .provide(|| "outer")
        .scope(REGION.provide(|| "eu").scope(async {
            tokio::task::yield_now().await;
            (VALUE.resolve(), REGION.resolve())
        }))
        .await;

    assert_eq!(seen, (Ok("outer"), Ok("eu")));
    assert!(VALUE.resolve().is_err());
    assert!(REGION.resolve().is_err());
}

#[rstest]
#[tokio::test]
async fn prebuilt_scoped_future_sees_the_scope_it_is_awaited_in() {
    // built outside any scope, awaited inside one
    let inner = REGION
        .provide(|| "us")
        .scope(async { (VALUE.resolve(), REGION.resolve(), VALUE.depth()) });

    let seen = VALUE
        .provide(|| "outer")
        .scope(async {
            tokio::task::yield_now().await;
            inner.await
        })
        .await;

    assert_eq!(seen, (Ok("outer"), Ok("us"), 1));
}

#[rstest]
#[tokio::test]
async fn composition_inside_a_scope_extends_it() {
    let composed = contexts![REGION.provide(|| "ap")];
    let inner = composed.scope(async { (VALUE.resolve(), REGION.resolve()) });

    let seen = VALUE.provide(|| "outer").scope(inner).await;
    assert_eq!(seen, (Ok("outer"), Ok("ap")));

    let seen = contexts![VALUE.provide(|| "first")]
        .scope(VALUE.provide(|| "second").scope(async { (VALUE.resolve(), VALUE.depth()) }))
        .await;
    assert_eq!(seen, (Ok("second"), 2));
}
