//! Subprocess exits while a turn is pending.
//!
//! The pending query must reject with `AppError::PrematureExit` and the
//! session must no longer report itself alive.

use std::sync::Arc;

use agent_relay::{AppError, ProcessState, SessionClient, SpawnSpec};

use super::test_helpers::{crashing_agent, fast_options, FakeSpawner};

fn client_for(spawner: FakeSpawner) -> SessionClient {
    SessionClient::builder(SpawnSpec::new("fake-agent"))
        .options(fast_options())
        .spawner(Arc::new(spawner))
        .build()
}

#[tokio::test]
async fn nonzero_exit_mid_turn_rejects_query() {
    let client = client_for(crashing_agent(3));
    client.start(None).await.expect("start");

    let err = client.query("boom").await.expect_err("must fail");
    assert!(matches!(err, AppError::PrematureExit(_)), "got {err:?}");
    assert!(err.to_string().contains("code 3"), "got {err}");
    assert!(err.is_fatal());

    assert!(!client.is_alive());
    assert_eq!(client.snapshot().process_state, ProcessState::Error);
    assert_eq!(client.snapshot().completed_turns, 0);
}

#[tokio::test]
async fn zero_exit_mid_turn_is_still_premature() {
    let client = client_for(crashing_agent(0));
    client.start(None).await.expect("start");

    let err = client.query("boom").await.expect_err("must fail");
    assert!(matches!(err, AppError::PrematureExit(_)), "got {err:?}");
    assert!(!client.is_alive());
}

#[tokio::test]
async fn query_after_crash_is_rejected_and_stop_succeeds() {
    let client = client_for(crashing_agent(1));
    client.start(None).await.expect("start");
    let _ = client.query("boom").await;

    let err = client.query("again").await.expect_err("dead session");
    assert!(matches!(err, AppError::InvalidState(_)), "got {err:?}");

    client.stop().await.expect("stop after crash");
    assert_eq!(client.snapshot().process_state, ProcessState::Error);
}

#[cfg(unix)]
#[tokio::test]
async fn real_process_exit_before_init_fails_start() {
    let client = SessionClient::builder(super::test_helpers::sh_spec("exit 2"))
        .options(fast_options())
        .build();

    let err = client.start(None).await.expect_err("must fail");
    assert!(matches!(err, AppError::PrematureExit(_)), "got {err:?}");
    assert!(!client.is_alive());
}
