//! Subprocess coordination: spawn, stdin writer, stdout reader, exit
//! monitor, event bus, and the [`ProcessSession`](session::ProcessSession)
//! state machine tying them together.

pub mod bus;
pub mod codec;
pub(crate) mod monitor;
pub mod reader;
pub mod session;
pub mod spawner;
pub mod writer;
