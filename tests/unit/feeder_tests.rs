//! Unit tests for `TurnFeeder`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;

use agent_relay::{AppError, TurnFeeder};

#[tokio::test]
async fn submit_unblocks_parked_sequence() {
    let feeder = TurnFeeder::new();
    let mut turns = feeder.produce_turns().expect("turns");

    let next = tokio::spawn(async move {
        let turn = turns.next().await;
        (turn, turns)
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(feeder.submit("first").expect("submit"), 1);

    let (turn, _turns) = next.await.expect("join");
    let turn = turn.expect("turn emitted");
    assert_eq!(turn.seq(), 1);
    assert_eq!(turn.prompt(), "first");
}

#[tokio::test]
async fn overlapping_submits_are_queued_in_order() {
    let feeder = TurnFeeder::new();
    let mut turns = feeder.produce_turns().expect("turns");

    for prompt in ["a", "b", "c"] {
        feeder.submit(prompt).expect("submit");
    }
    assert_eq!(feeder.queued(), 3);

    let prompts: Vec<String> = (0..3)
        .map(|_| futures_util::FutureExt::now_or_never(turns.next()))
        .map(|t| t.flatten().expect("queued turn").prompt().to_owned())
        .collect();
    assert_eq!(prompts, ["a", "b", "c"]);
    assert_eq!(feeder.queued(), 0);
}

#[tokio::test]
async fn full_queue_rejects_submission() {
    let feeder = TurnFeeder::builder().queue_depth(2).build();
    let _turns = feeder.produce_turns().expect("turns");

    feeder.submit("1").expect("first");
    feeder.submit("2").expect("second");
    let err = feeder.submit("3").expect_err("queue full");
    assert!(matches!(err, AppError::QueueFull(_)), "got {err:?}");
}

#[tokio::test]
async fn sequence_can_be_taken_once() {
    let feeder = TurnFeeder::new();
    let _turns = feeder.produce_turns().expect("first take");
    let err = feeder.produce_turns().err().expect("second take fails");
    assert!(matches!(err, AppError::AlreadyConsumed(_)));
}

#[tokio::test]
async fn terminate_ends_parked_sequence() {
    let feeder = TurnFeeder::new();
    let mut turns = feeder.produce_turns().expect("turns");
    let next = tokio::spawn(async move { turns.next().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    feeder.terminate();
    assert!(next.await.expect("join").is_none());
    assert!(feeder.is_terminated());

    let err = feeder.submit("late").expect_err("terminated");
    assert!(matches!(err, AppError::InvalidState(_)));
    feeder.terminate();
}

#[tokio::test]
async fn terminate_discards_queued_turns() {
    let feeder = TurnFeeder::new();
    let mut turns = feeder.produce_turns().expect("turns");
    feeder.submit("queued").expect("submit");
    feeder.terminate();
    assert!(turns.next().await.is_none());
}

#[tokio::test]
async fn hooks_observe_emits_and_abort() {
    let emitted = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let (e, r) = (Arc::clone(&emitted), Arc::clone(&errors));
    let feeder = TurnFeeder::builder()
        .before_emit(move |prompt| e.lock().unwrap().push(prompt.to_owned()))
        .on_error(move |err| r.lock().unwrap().push(err.clone()))
        .build();
    let mut turns = feeder.produce_turns().expect("turns");

    feeder.submit("hello").expect("submit");
    assert!(turns.next().await.is_some());
    assert_eq!(*emitted.lock().unwrap(), ["hello"]);

    let next = tokio::spawn(async move { turns.next().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    feeder.abort(AppError::Upstream("gone".into()));
    assert!(next.await.expect("join").is_none());
    assert_eq!(*errors.lock().unwrap(), [AppError::Upstream("gone".into())]);
}

#[tokio::test]
async fn sequence_numbers_increase_monotonically() {
    let feeder = TurnFeeder::new();
    let _turns = feeder.produce_turns().expect("turns");
    let seqs: Vec<u64> = (0..4).map(|n| feeder.submit(format!("{n}")).expect("submit")).collect();
    assert_eq!(seqs, [1, 2, 3, 4]);
}
