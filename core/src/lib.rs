#![allow(clippy::too_many_arguments)]

//! An embeddable, length-prefixed, checksum-validated, pluggably-encrypted TCP server/client
//! pipeline: a single-threaded mio reactor, a worker thread and a sender thread on the server
//! side, and a reconnecting state machine on the client side, all moving frames through the same
//! wire codec.
//!
//! Grounded throughout on `neutronium::net` (the teacher's mio-based channel/endpoint stack),
//! generalized from a single game server's fixed message types into a small embeddable library
//! addressed by an 8-byte routing tag instead of a hard-coded packet enum. Each stage owns the
//! error type that fits what it can actually fail at (`CodecError`, `ServerError`,
//! `ClientError`) rather than funneling everything through one shared error enum.

pub mod client;
pub mod codec;
pub mod queue;
pub mod reactor;
pub mod roster;
pub mod sender;
pub mod server;
pub mod strategy;
pub mod task;
pub mod worker;

pub mod prelude {
    pub use crate::client::{Client, ClientConfig, ClientError};
    pub use crate::codec::{target_from_str, Target, SEC_ARG};
    pub use crate::roster::PeerId;
    pub use crate::sender::SenderHandle;
    pub use crate::server::{Server, ServerConfig, ServerError, ServerHandle};
    pub use crate::strategy::{STRATEGY_PLAINTEXT, STRATEGY_XOR};
    pub use crate::worker::MessageHandler;
}
