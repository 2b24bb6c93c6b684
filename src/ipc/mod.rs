//! Signals exchanged between a child process and the coordinator that keeps class matching
//! decisions across forks. See [`serializer`] for the frame layout.

mod client;
pub mod serializer;
mod server;
mod signal;

use std::io;

use thiserror::Error;

pub use client::{SignalClient, SignalClientFactory, TcpSignalClient, TcpSignalClientFactory};
pub use server::{MatchingStore, SignalServer};
pub use signal::{ClassMatchingEntry, Signal, SignalType};

#[derive(Debug, Error)]
pub enum SignalError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("unknown signal type {0}")]
    UnknownType(u8),
    #[error("{0:?} signal does not carry a payload")]
    UnexpectedPayload(SignalType),
    #[error("invalid signal payload")]
    Payload(#[from] serde_json::Error),
    #[error("error message is not valid UTF-8")]
    InvalidMessage,
    #[error("unexpected response {0:?}")]
    UnexpectedResponse(SignalType),
    #[error("coordinator replied with an error: {0}")]
    Remote(String),
    #[error("connection closed before a response was received")]
    ConnectionClosed,
    #[error("address {0} did not resolve")]
    Unresolved(String),
}
