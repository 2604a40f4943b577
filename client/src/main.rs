use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::stream;
use log::info;
use xrpc::{Client, Config, Endpoint};

/// Exercises each calculator method once against a running server.
#[derive(Parser, Debug)]
#[command(name = "xcalc-client", version)]
struct Args {
    /// Server address: `tcp:HOST:PORT`, `unix:PATH` or `vsock:CID:PORT`.
    #[arg(long, env = "XCALC_ENDPOINT", default_value = "tcp:127.0.0.1:50069")]
    endpoint: Endpoint,

    /// Pause between messages on the streaming calls.
    #[arg(long, env = "XCALC_PACE_MS", default_value_t = 1000)]
    pace_ms: u64,

    /// Number to decompose into prime factors.
    #[arg(long, default_value_t = 120)]
    number: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let pace = Duration::from_millis(args.pace_ms);

    let client = Client::connect(&args.endpoint, Config::default())
        .await
        .with_context(|| format!("connecting to {}", args.endpoint))?;

    info!("Calling Sum");
    let sum = client.sum(7, 6).await.context("Sum")?;
    info!("Sum response: {}", sum);

    info!("Calling DecomposeToPrimeFactors({})", args.number);
    let mut factors = client
        .decompose_to_prime_factors(args.number)
        .await
        .context("DecomposeToPrimeFactors")?;
    while let Some(factor) = factors.receive().await.context("DecomposeToPrimeFactors")? {
        info!("Prime factor: {}", factor.factor);
    }
    info!("Server finished streaming factors");

    info!("Calling Average");
    let values = stream::iter(vec![5.0, 10.0, 12.0, 3.0, 4.2]);
    let average = client.average(values, pace).await.context("Average")?;
    info!("Average response: {}", average);

    info!("Calling RunningMax");
    let received = client
        .running_max_with(stream::iter(vec![5, 10, 12, 3, 4]), pace, |max| {
            info!("Current max: {}", max)
        })
        .await
        .context("RunningMax")?;
    info!("RunningMax finished after {} responses", received);

    client.close().await?;
    Ok(())
}
