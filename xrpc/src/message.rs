//! Calculator messages, method ids and call status.
//!
//! Payloads are fixed-width big-endian fields; `f64` travels as its
//! IEEE-754 bit pattern.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Hook invoked with every message that passes through a channel half.
pub type Tap = Arc<dyn Fn(&dyn fmt::Debug) + Send + Sync>;

/// A typed record carried in one `Data` frame.
pub trait Message: fmt::Debug + Sized + Send + 'static {
    fn encode(&self, buf: &mut Vec<u8>);

    fn decode(buf: &[u8]) -> Result<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

fn field<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    buf.get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::MalformedMessage)
}

fn exact_len(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() == len {
        Ok(())
    } else {
        Err(Error::MalformedMessage)
    }
}

macro_rules! scalar_message {
    ($(#[$meta:meta])* $name:ident { $field:ident: i64 }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub $field: i64,
        }

        impl Message for $name {
            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.$field.to_be_bytes());
            }

            fn decode(buf: &[u8]) -> Result<Self> {
                exact_len(buf, 8)?;
                Ok(Self { $field: i64::from_be_bytes(field(buf, 0)?) })
            }
        }
    };
    ($(#[$meta:meta])* $name:ident { $field:ident: u64 }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub $field: u64,
        }

        impl Message for $name {
            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.$field.to_be_bytes());
            }

            fn decode(buf: &[u8]) -> Result<Self> {
                exact_len(buf, 8)?;
                Ok(Self { $field: u64::from_be_bytes(field(buf, 0)?) })
            }
        }
    };
    ($(#[$meta:meta])* $name:ident { $field:ident: f64 }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct $name {
            pub $field: f64,
        }

        impl Message for $name {
            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.$field.to_bits().to_be_bytes());
            }

            fn decode(buf: &[u8]) -> Result<Self> {
                exact_len(buf, 8)?;
                Ok(Self { $field: f64::from_bits(u64::from_be_bytes(field(buf, 0)?)) })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumRequest {
    pub num1: i64,
    pub num2: i64,
}

impl Message for SumRequest {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.num1.to_be_bytes());
        buf.extend_from_slice(&self.num2.to_be_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        exact_len(buf, 16)?;
        Ok(Self {
            num1: i64::from_be_bytes(field(buf, 0)?),
            num2: i64::from_be_bytes(field(buf, 8)?),
        })
    }
}

scalar_message!(SumResponse { result: i64 });
scalar_message!(PrimeFactorsRequest { number: u64 });
scalar_message!(
    /// One prime factor, emitted as soon as it is found.
    PrimeFactor { factor: u64 }
);
scalar_message!(AverageRequest { num: f64 });
scalar_message!(AverageResponse { result: f64 });
scalar_message!(RunningMaxRequest { num: i64 });
scalar_message!(
    /// Maximum over every value received so far on the stream.
    RunningMaxResponse { max: i64 }
);

/// Calculator methods, one per interaction pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Method {
    Sum = 1,
    DecomposeToPrimeFactors = 2,
    Average = 3,
    RunningMax = 4,
}

impl Method {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sum),
            2 => Some(Self::DecomposeToPrimeFactors),
            3 => Some(Self::Average),
            4 => Some(Self::RunningMax),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sum => "Sum",
            Self::DecomposeToPrimeFactors => "DecomposeToPrimeFactors",
            Self::Average => "Average",
            Self::RunningMax => "RunningMax",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    InvalidArgument = 1,
    AggregationUndefined = 2,
    Unimplemented = 3,
    Internal = 4,
}

impl StatusCode {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::InvalidArgument),
            2 => Some(Self::AggregationUndefined),
            3 => Some(Self::Unimplemented),
            4 => Some(Self::Internal),
            _ => None,
        }
    }
}

/// Terminal error status of a call, sent in a `Status` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn into_error(self) -> Error {
        match self.code {
            StatusCode::AggregationUndefined => Error::AggregationUndefined,
            StatusCode::InvalidArgument => Error::InvalidArgument(self.message),
            code => Error::Remote {
                code,
                message: self.message,
            },
        }
    }
}

impl Message for Status {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.code as u8);
        buf.extend_from_slice(self.message.as_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let (&code, message) = buf.split_first().ok_or(Error::MalformedMessage)?;
        let code = StatusCode::from_u8(code).ok_or(Error::MalformedMessage)?;
        let message = String::from_utf8(message.to_vec()).map_err(|_| Error::MalformedMessage)?;
        Ok(Self { code, message })
    }
}
