//! Per-call observability for the server.
//!
//! The server holds one injected [`Observer`] for its whole lifetime and
//! reports every call through it. [`LogObserver`] forwards to the `log`
//! facade.

use std::fmt;

use crate::error::Error;
use crate::message::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Receives call lifecycle events. Every method defaults to doing nothing.
pub trait Observer: Send + Sync + 'static {
    fn call_started(&self, _call_id: u64, _method: Method) {}

    fn message(
        &self,
        _call_id: u64,
        _method: Method,
        _direction: Direction,
        _message: &dyn fmt::Debug,
    ) {
    }

    /// `error` is `None` for a call that finished cleanly.
    fn call_finished(&self, _call_id: u64, _method: Method, _error: Option<&Error>) {}

    /// A stream that never named a valid method, or a connection-level fault.
    fn stream_rejected(&self, _error: &Error) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn call_started(&self, call_id: u64, method: Method) {
        log::info!("[call {}] {} called...", call_id, method.name());
    }

    fn message(
        &self,
        call_id: u64,
        method: Method,
        direction: Direction,
        message: &dyn fmt::Debug,
    ) {
        let verb = match direction {
            Direction::Inbound => "recv",
            Direction::Outbound => "send",
        };
        log::debug!("[call {}] {} {} {:?}", call_id, method.name(), verb, message);
    }

    fn call_finished(&self, call_id: u64, method: Method, error: Option<&Error>) {
        match error {
            None => log::info!("[call {}] {} finished", call_id, method.name()),
            Some(e) => log::error!("[call {}] {} failed: {}", call_id, method.name(), e),
        }
    }

    fn stream_rejected(&self, error: &Error) {
        log::warn!("Rejected stream: {}", error);
    }
}
