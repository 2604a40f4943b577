//! Server-side stream processors.
//!
//! Each processor owns the aggregate state of exactly one call. Two
//! streaming shapes are supported:
//!
//! - [`collect_then_reply`]: consume everything, answer once on
//!   end-of-stream (`Collecting -> Finalizing -> Closed`).
//! - [`reply_per_message`]: answer every inbound message immediately, close
//!   on end-of-stream (`Active -> Closed`).
//!
//! Neither emits after end-of-stream, and both close their send direction
//! exactly once.

use std::time::Duration;

use futures::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::{Receiver, Sender};
use crate::error::{Error, Result};
use crate::message::{
    AverageRequest, AverageResponse, Message, PrimeFactor, RunningMaxRequest, RunningMaxResponse,
    SumRequest, SumResponse,
};

/// Aggregate answered once, after the whole input stream.
pub trait Aggregate {
    type Input: Message;
    type Output: Message;

    fn update(&mut self, input: Self::Input);

    fn finish(self) -> Result<Self::Output>;
}

/// Aggregate answered after every input.
pub trait RunningAggregate {
    type Input: Message;
    type Output: Message;

    fn update(&mut self, input: Self::Input) -> Self::Output;
}

/// Arithmetic mean of a stream of numbers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mean {
    sum: f64,
    count: u64,
}

impl Mean {
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Aggregate for Mean {
    type Input = AverageRequest;
    type Output = AverageResponse;

    fn update(&mut self, input: AverageRequest) {
        self.sum += input.num;
        self.count += 1;
    }

    fn finish(self) -> Result<AverageResponse> {
        if self.count == 0 {
            return Err(Error::AggregationUndefined);
        }
        Ok(AverageResponse {
            result: self.sum / self.count as f64,
        })
    }
}

/// Maximum over everything seen so far. The first value seeds it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningMax {
    current: Option<i64>,
}

impl RunningAggregate for RunningMax {
    type Input = RunningMaxRequest;
    type Output = RunningMaxResponse;

    fn update(&mut self, input: RunningMaxRequest) -> RunningMaxResponse {
        let max = match self.current {
            Some(current) => current.max(input.num),
            None => input.num,
        };
        self.current = Some(max);
        RunningMaxResponse { max }
    }
}

/// Prime factors of a number in ascending order, with repetition.
///
/// Each factor is produced as soon as it divides the remainder, so a
/// consumer can forward factors before the decomposition is complete.
/// `0` and `1` have no factors.
#[derive(Debug, Clone)]
pub struct PrimeFactors {
    remaining: u64,
    divisor: u64,
}

/// Outcome of a bounded search step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Factor(u64),
    Done,
    /// Budget spent without finding the next factor.
    Searching,
}

impl PrimeFactors {
    pub fn new(number: u64) -> Self {
        Self {
            remaining: number,
            divisor: 2,
        }
    }

    /// Tries at most `budget` candidate divisors.
    pub fn step(&mut self, budget: u64) -> Step {
        if self.remaining <= 1 {
            return Step::Done;
        }
        for _ in 0..budget {
            if self.remaining % self.divisor == 0 {
                self.remaining /= self.divisor;
                return Step::Factor(self.divisor);
            }
            // Past the square root the remainder itself is prime.
            if self.divisor > self.remaining / self.divisor {
                let factor = self.remaining;
                self.remaining = 1;
                return Step::Factor(factor);
            }
            self.divisor += 1;
        }
        Step::Searching
    }
}

impl Iterator for PrimeFactors {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            match self.step(u64::MAX) {
                Step::Factor(factor) => return Some(factor),
                Step::Done => return None,
                Step::Searching => {}
            }
        }
    }
}

/// Divisors tried between two checks for an abandoned search.
const SEARCH_BUDGET: u64 = 1 << 16;

/// Runs the trial division on the blocking pool. Factors arrive on the
/// returned channel as they are found; dropping the receiver stops the
/// search.
pub fn search_prime_factors(number: u64) -> (mpsc::Receiver<u64>, JoinHandle<()>) {
    let (found, factors) = mpsc::channel(16);
    let search = tokio::task::spawn_blocking(move || {
        let mut search = PrimeFactors::new(number);
        loop {
            match search.step(SEARCH_BUDGET) {
                Step::Factor(factor) => {
                    if found.blocking_send(factor).is_err() {
                        break;
                    }
                }
                Step::Done => return,
                Step::Searching if found.is_closed() => break,
                Step::Searching => {}
            }
        }
        log::debug!("Abandoned decomposition of {}", number);
    });
    (factors, search)
}

/// Streaming-aggregate-and-close.
pub async fn collect_then_reply<A, R, W>(
    mut aggregate: A,
    inbound: &mut Receiver<R, A::Input>,
    outbound: &mut Sender<W, A::Output>,
) -> Result<()>
where
    A: Aggregate,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Collecting
    while let Some(input) = inbound.receive().await? {
        aggregate.update(input);
    }
    // Finalizing
    let output = aggregate.finish()?;
    outbound.send(output).await?;
    outbound.close_send().await
}

/// Streaming-running-result. Each output answers the input that triggered it.
pub async fn reply_per_message<A, R, W>(
    mut aggregate: A,
    inbound: &mut Receiver<R, A::Input>,
    outbound: &mut Sender<W, A::Output>,
) -> Result<()>
where
    A: RunningAggregate,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(input) = inbound.receive().await? {
        let output = aggregate.update(input);
        outbound.send(output).await?;
    }
    outbound.close_send().await
}

/// Unary sum: one request in, one response out.
pub async fn sum<R, W>(
    inbound: &mut Receiver<R, SumRequest>,
    outbound: &mut Sender<W, SumResponse>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = inbound
        .receive()
        .await?
        .ok_or_else(|| Error::InvalidArgument("missing sum request".into()))?;
    let result = request
        .num1
        .checked_add(request.num2)
        .ok_or_else(|| Error::InvalidArgument("sum overflows i64".into()))?;
    outbound.send(SumResponse { result }).await?;
    outbound.close_send().await
}

/// Server-streamed decomposition: each factor is sent as soon as it is
/// found, with an optional pause after each one. The search itself runs off
/// the async workers.
pub async fn emit_prime_factors<W>(
    number: u64,
    outbound: &mut Sender<W, PrimeFactor>,
    delay: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (mut factors, search) = search_prime_factors(number);
    while let Some(factor) = factors.recv().await {
        outbound.send(PrimeFactor { factor }).await?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    search.await.map_err(Error::transport)?;
    outbound.close_send().await
}
