//! # XRPC - Calculator RPC over a multiplexed duplex transport
//!
//! XRPC carries four interaction patterns over one yamux connection:
//!
//! - **Unary**: `Sum(a, b)`, one request and one response
//! - **Server streaming**: `DecomposeToPrimeFactors(n)`, factors arrive as they are found
//! - **Client streaming**: `Average(values)`, one result once the client half-closes
//! - **Bidirectional streaming**: `RunningMax(values)`, one running maximum per value
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Calculator (client stubs / server)          │
//! ├─────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │ Send loop   │ │ Recv loop   │ │ Stream processor│   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │        Duplex channel (typed Sender / Receiver)          │
//! ├─────────────────────────────────────────────────────────┤
//! │        Frames (version, type, length, payload)           │
//! ├─────────────────────────────────────────────────────────┤
//! │   yamux stream per call  ─  Unix / TCP / vsock socket    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use xrpc::{Client, Config, Endpoint};
//!
//! let client = Client::connect(&"tcp:127.0.0.1:50069".parse()?, Config::default()).await?;
//! assert_eq!(client.sum(7, 6).await?, 13);
//! ```

#![deny(unsafe_code)]

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod message;
pub mod observe;
pub mod processor;
pub mod server;

pub use channel::{ChannelState, Duplex, Receiver, Sender};
pub use client::Client;
pub use config::{Config, Endpoint};
pub use error::{Error, Result};
pub use message::{Message, Method, Status, StatusCode};
pub use observe::{LogObserver, Observer};
pub use server::Server;

/// Protocol version carried in every frame header.
pub const VERSION: u8 = 1;

/// Port used by the calculator when none is given.
pub const DEFAULT_PORT: u16 = 50069;

/// Default maximum payload of a single frame.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;
