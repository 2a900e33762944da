//! Unit tests for the single-slot rendezvous.

use agent_relay::feeder::rendezvous::{Rendezvous, RendezvousStatus};
use agent_relay::AppError;

#[tokio::test]
async fn resolve_hands_value_to_waiter() {
    let (mut resolver, slot) = Rendezvous::create::<u32>();
    assert_eq!(resolver.status(), RendezvousStatus::Pending);

    resolver.resolve(7).expect("first resolve");
    assert_eq!(slot.status(), RendezvousStatus::Resolved);
    assert_eq!(slot.wait().await.expect("value"), 7);
}

#[tokio::test]
async fn second_resolve_is_refused_and_returns_value() {
    let (mut resolver, slot) = Rendezvous::create::<String>();
    resolver.resolve("first".into()).expect("first resolve");

    let (err, value) = resolver
        .resolve("second".into())
        .expect_err("second resolve must be refused");
    assert!(matches!(err, AppError::AlreadyConsumed(_)), "got {err:?}");
    assert_eq!(value, "second");

    // The waiter sees only the first value.
    assert_eq!(slot.wait().await.expect("value"), "first");
}

#[tokio::test]
async fn reject_after_resolve_is_refused() {
    let (mut resolver, slot) = Rendezvous::create::<u8>();
    resolver.resolve(1).expect("resolve");
    let err = resolver
        .reject(AppError::Cancelled("late".into()))
        .expect_err("already settled");
    assert!(matches!(err, AppError::AlreadyConsumed(_)));
    assert_eq!(slot.wait().await.expect("value"), 1);
}

#[tokio::test]
async fn reject_delivers_error() {
    let (mut resolver, slot) = Rendezvous::create::<u8>();
    resolver
        .reject(AppError::Upstream("boom".into()))
        .expect("reject");
    assert_eq!(resolver.status(), RendezvousStatus::Rejected);
    assert_eq!(
        slot.wait().await.expect_err("rejected"),
        AppError::Upstream("boom".into())
    );
}

#[tokio::test]
async fn dropped_resolver_cancels_waiter() {
    let (resolver, slot) = Rendezvous::create::<u8>();
    drop(resolver);
    let err = slot.wait().await.expect_err("resolver gone");
    assert!(matches!(err, AppError::Cancelled(_)), "got {err:?}");
}

#[tokio::test]
async fn resolve_after_waiter_dropped_returns_value() {
    let (mut resolver, slot) = Rendezvous::create::<u8>();
    drop(slot);
    assert!(resolver.is_abandoned());

    let (err, value) = resolver.resolve(9).expect_err("nobody waiting");
    assert!(matches!(err, AppError::Cancelled(_)), "got {err:?}");
    assert_eq!(value, 9);
}

#[tokio::test]
async fn waiter_parked_before_resolve_wakes_up() {
    let (mut resolver, slot) = Rendezvous::create::<u8>();
    let waiter = tokio::spawn(slot.wait());
    tokio::task::yield_now().await;
    resolver.resolve(3).expect("resolve");
    assert_eq!(waiter.await.expect("join").expect("value"), 3);
}
