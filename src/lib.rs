#![forbid(unsafe_code)]

//! Turn-based coordination of a long-lived agent subprocess.
//!
//! A [`SessionClient`] spawns the wrapped tool once, feeds it one prompt per
//! turn through a [`TurnFeeder`], and resolves each query when the tool's
//! result record for that turn arrives.

pub mod client;
pub mod config;
pub mod errors;
pub mod feeder;
pub mod models;
pub mod observer;
pub mod process;

pub use client::{QueryResponse, SessionClient};
pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use feeder::TurnFeeder;
pub use models::event::SessionEvent;
pub use models::record::OutputRecord;
pub use models::snapshot::SessionSnapshot;
pub use models::state::ProcessState;
pub use process::session::{ProcessSession, SessionOptions};
pub use process::spawner::{SpawnSpec, Spawner, TokioSpawner};
