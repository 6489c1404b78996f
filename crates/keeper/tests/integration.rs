//! Integration tests for keeper supervision trees.

use keeper::{CancellationToken, Keeper, KeeperError, KeeperState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Events = Arc<Mutex<Vec<String>>>;

fn record(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

/// A keeper whose listen parks until cancelled and whose after handler
/// records `"{name}:after"`.
fn recording_keeper(name: &str, events: &Events) -> Arc<Keeper> {
    let keeper = Keeper::new(name);
    let listen_events = Arc::clone(events);
    let after_events = Arc::clone(events);
    let listen_name = format!("{name}:listen");
    let after_name = format!("{name}:after");
    keeper
        .listen(move |token| {
            let events = Arc::clone(&listen_events);
            let event = listen_name.clone();
            async move {
                record(&events, event);
                token.cancelled().await;
                false
            }
        })
        .after(move |_| {
            let events = Arc::clone(&after_events);
            let event = after_name.clone();
            async move {
                // Give a late sibling a chance to interleave if ordering were broken.
                tokio::time::sleep(Duration::from_millis(5)).await;
                record(&events, event);
                false
            }
        });
    keeper
}

async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}

fn count(events: &Events, event: &str) -> usize {
    events.lock().unwrap().iter().filter(|e| *e == event).count()
}

#[tokio::test]
async fn test_concurrent_double_start() {
    let keeper = Keeper::new("single");
    keeper.listen(|token| async move {
        token.cancelled().await;
        false
    });
    let token = CancellationToken::new();

    let (first, second) = tokio::join!(keeper.start(token.clone()), async {
        let result = keeper.start(token.clone()).await;
        assert!(!keeper.stopped());
        keeper.stop();
        result
    });

    assert!(first.is_ok());
    assert_eq!(
        second,
        Err(KeeperError::AlreadyStarted {
            name: "single".into()
        })
    );
    assert!(keeper.stopped());
}

#[tokio::test]
async fn test_children_stop_before_parent_after() {
    let events: Events = Arc::default();
    let root = recording_keeper("root", &events);
    let left = recording_keeper("left", &events);
    let right = recording_keeper("right", &events);
    assert!(root.add(&left));
    assert!(root.add(&right));

    let handle = root.spawn(&CancellationToken::new()).unwrap();
    wait_for(|| count(&events, "left:listen") == 1 && count(&events, "right:listen") == 1).await;

    root.stop();
    handle.await.unwrap();

    let events = events.lock().unwrap().clone();
    let root_after = events.iter().position(|e| e == "root:after").unwrap();
    let left_after = events.iter().position(|e| e == "left:after").unwrap();
    let right_after = events.iter().position(|e| e == "right:after").unwrap();
    assert!(left_after < root_after);
    assert!(right_after < root_after);
    assert!(left.stopped());
    assert!(right.stopped());
    assert!(root.stopped());
}

#[tokio::test]
async fn test_parent_token_cancels_whole_tree() {
    let events: Events = Arc::default();
    let root = recording_keeper("root", &events);
    let mid = recording_keeper("mid", &events);
    let leaf = recording_keeper("leaf", &events);
    mid.add(&leaf);
    root.add(&mid);

    let token = CancellationToken::new();
    let handle = root.spawn(&token).unwrap();
    wait_for(|| count(&events, "leaf:listen") == 1).await;

    token.cancel();
    handle.await.unwrap();

    let events = events.lock().unwrap().clone();
    let pos = |name: &str| events.iter().position(|e| e == name).unwrap();
    assert!(pos("leaf:after") < pos("mid:after"));
    assert!(pos("mid:after") < pos("root:after"));
    assert_eq!(leaf.state(), KeeperState::Stopped);
}

#[tokio::test]
async fn test_restart_cycles_children() {
    let events: Events = Arc::default();
    let root = recording_keeper("root", &events);
    let child = recording_keeper("child", &events);
    root.add(&child);

    let handle = root.spawn(&CancellationToken::new()).unwrap();
    wait_for(|| count(&events, "child:listen") == 1).await;

    root.restart();
    wait_for(|| count(&events, "child:listen") == 2).await;

    // The child ran a full stop (after handler) while the root only re-entered
    // its run loop.
    assert_eq!(count(&events, "child:after"), 1);
    assert_eq!(count(&events, "root:after"), 0);
    assert_eq!(count(&events, "root:listen"), 2);

    root.stop();
    handle.await.unwrap();
    assert_eq!(count(&events, "child:after"), 2);
    assert_eq!(count(&events, "root:after"), 1);
}

#[tokio::test]
async fn test_child_added_while_running_starts_on_restart() {
    let events: Events = Arc::default();
    let root = recording_keeper("root", &events);
    let handle = root.spawn(&CancellationToken::new()).unwrap();
    wait_for(|| count(&events, "root:listen") == 1).await;

    let late = recording_keeper("late", &events);
    assert!(root.add(&late));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(late.stopped());
    assert_eq!(count(&events, "late:listen"), 0);

    root.restart();
    wait_for(|| count(&events, "late:listen") == 1).await;

    root.stop();
    handle.await.unwrap();
    assert!(late.stopped());
}

#[tokio::test]
async fn test_child_panic_is_isolated() {
    let events: Events = Arc::default();
    let root = recording_keeper("root", &events);
    let sibling = recording_keeper("sibling", &events);
    let panics = Arc::new(AtomicUsize::new(0));

    let fragile = Keeper::new("fragile");
    {
        let panics = Arc::clone(&panics);
        fragile
            .listen(|_| async {
                let broken = true;
                assert!(!broken, "fragile listen failed");
                false
            })
            .on_panic(move |_, _| {
                panics.fetch_add(1, Ordering::SeqCst);
            });
    }
    root.add(&sibling);
    root.add(&fragile);

    let handle = root.spawn(&CancellationToken::new()).unwrap();
    wait_for(|| panics.load(Ordering::SeqCst) == 1 && fragile.stopped()).await;

    // The sibling and the root keep running.
    assert!(!sibling.stopped());
    assert!(!root.stopped());
    assert_eq!(count(&events, "sibling:after"), 0);

    root.stop();
    handle.await.unwrap();
    assert_eq!(count(&events, "sibling:after"), 1);
}

#[tokio::test]
async fn test_keeper_can_start_again_after_stop() {
    let events: Events = Arc::default();
    let keeper = recording_keeper("again", &events);

    for round in 1..=2 {
        let handle = keeper.spawn(&CancellationToken::new()).unwrap();
        wait_for(|| count(&events, "again:listen") == round).await;
        keeper.stop();
        handle.await.unwrap();
        assert_eq!(count(&events, "again:after"), round);
    }
}

#[tokio::test]
async fn test_stop_before_run_still_tears_down_children() {
    let events: Events = Arc::default();
    let root = recording_keeper("root", &events);
    let child = recording_keeper("child", &events);
    root.add(&child);

    // The current-thread runtime has not polled the root task yet.
    let handle = root.spawn(&CancellationToken::new()).unwrap();
    root.stop();
    handle.await.unwrap();

    let events = events.lock().unwrap().clone();
    let pos = |name: &str| events.iter().position(|e| e == name).unwrap();
    assert!(pos("child:after") < pos("root:after"));
    assert!(child.stopped());
}
