use std::fmt;
use std::io;

use crate::message::{Status, StatusCode};

#[derive(Debug)]
pub enum Error {
    /// Connection-level failure. Never retried, ends the stream.
    Transport(io::Error),
    /// Send attempted after the local send direction was half-closed.
    ChannelClosed,
    /// Client-streaming aggregate requested over zero inputs.
    AggregationUndefined,
    InvalidArgument(String),
    Unimplemented(u8),
    /// Status reported by the peer that has no dedicated variant.
    Remote { code: StatusCode, message: String },
    VersionMismatch,
    InvalidFrame,
    PayloadTooLarge,
    MalformedMessage,
}

impl Error {
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Transport(io::Error::other(err))
    }

    /// Status frame sent to the peer for errors that belong to the call
    /// rather than the connection. Returns `None` for transport faults.
    pub fn to_status(&self) -> Option<Status> {
        let status = match self {
            Error::Transport(_) | Error::ChannelClosed => return None,
            Error::AggregationUndefined => {
                Status::new(StatusCode::AggregationUndefined, "no values received")
            }
            Error::InvalidArgument(msg) => Status::new(StatusCode::InvalidArgument, msg),
            Error::Unimplemented(id) => {
                Status::new(StatusCode::Unimplemented, format!("unknown method {id}"))
            }
            Error::Remote { code, message } => Status::new(*code, message),
            other => Status::new(StatusCode::Internal, other.to_string()),
        };
        Some(status)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "Transport error: {}", e),
            Error::ChannelClosed => write!(f, "Send direction already closed"),
            Error::AggregationUndefined => write!(f, "Aggregate undefined over zero values"),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Unimplemented(id) => write!(f, "Unimplemented method id {}", id),
            Error::Remote { code, message } => write!(f, "Remote status {:?}: {}", code, message),
            Error::VersionMismatch => write!(f, "Invalid protocol version"),
            Error::InvalidFrame => write!(f, "Invalid frame"),
            Error::PayloadTooLarge => write!(f, "Payload too large"),
            Error::MalformedMessage => write!(f, "Malformed message payload"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(err)
    }
}

impl From<yamux::ConnectionError> for Error {
    fn from(err: yamux::ConnectionError) -> Self {
        Error::transport(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
