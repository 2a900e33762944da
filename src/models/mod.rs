//! Domain model module declarations.

pub mod event;
pub mod record;
pub mod snapshot;
pub mod state;
pub mod turn;
