use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;
use xrpc::{Config, Endpoint, Server};

/// Calculator server: Sum, DecomposeToPrimeFactors, Average and RunningMax.
#[derive(Parser, Debug)]
#[command(name = "xcalc-server", version)]
struct Args {
    /// Where to listen: `tcp:HOST:PORT`, `unix:PATH` or `vsock:CID:PORT`.
    #[arg(long, env = "XCALC_ENDPOINT", default_value = "tcp:127.0.0.1:50069")]
    endpoint: Endpoint,

    /// Pause after each emitted prime factor.
    #[arg(long, env = "XCALC_FACTOR_DELAY_MS", default_value_t = 0)]
    factor_delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = Config::default().with_factor_delay(Duration::from_millis(args.factor_delay_ms));
    let server = Server::new(config);

    info!("Starting server on {}...", args.endpoint);
    tokio::select! {
        result = server.run(&args.endpoint) => {
            result.with_context(|| format!("server on {} stopped", args.endpoint))?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            info!("Shutting down");
        }
    }
    Ok(())
}
