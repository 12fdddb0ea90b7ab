//! Length-delimited framed IPC between the orchestrator and its
//! workers.
//!
//! Every inter-process payload crosses an anonymous socket pair as a
//! length-prefixed frame; nothing here assumes shared memory or thread
//! visibility. `framed` holds the primitive encoders/decoders, and
//! `messages` builds the per-object `*_buffer`/`*_read` pairs on top of
//! them.

pub mod framed;
pub mod messages;
pub mod parser_client;

pub use framed::FramedError;
pub use parser_client::ParserClient;
