use clap::Parser;
use kvred::config::{self, Config};
use kvred::server::Server;
use kvred::Error;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "In-memory key-value server speaking RESP2")]
struct Args {
    /// The host to listen on
    #[arg(long, env = "KVRED_HOST", default_value = config::DEFAULT_HOST)]
    host: String,

    /// The port to listen on
    #[arg(short, long, env = "KVRED_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Connections served at once
    #[arg(long, env = "KVRED_MAX_CONNECTIONS", default_value_t = config::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Milliseconds a graceful stop may take before connections are cancelled
    #[arg(
        long,
        env = "KVRED_SHUTDOWN_TIMEOUT_MS",
        default_value_t = config::DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64
    )]
    shutdown_timeout_ms: u64,

    /// Milliseconds a command waits for the store
    #[arg(
        long,
        env = "KVRED_LOCK_TIMEOUT_MS",
        default_value_t = config::DEFAULT_LOCK_TIMEOUT.as_millis() as u64
    )]
    lock_timeout_ms: u64,

    /// Records buffered by the mutation log
    #[arg(
        long,
        env = "KVRED_MUTATION_LOG_CAPACITY",
        default_value_t = config::DEFAULT_MUTATION_LOG_CAPACITY
    )]
    mutation_log_capacity: usize,

    /// Largest frame accepted from a client, in bytes
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = config::DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            host: args.host,
            port: args.port,
            max_connections: args.max_connections,
            shutdown_timeout: Duration::from_millis(args.shutdown_timeout_ms),
            lock_timeout: Duration::from_millis(args.lock_timeout_ms),
            mutation_log_capacity: args.mutation_log_capacity,
            max_frame_size: args.max_frame_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from(Args::parse());
    let shutdown_timeout = config.shutdown_timeout;
    let server = Server::bind(config).await?;

    let run = tokio::select! {
        res = server.run() => res,
        res = signal::ctrl_c() => match res {
            Ok(()) => {
                info!("shutdown signal received");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for the shutdown signal");
                Err(err.into())
            }
        },
    };

    let stopped = server.stop(shutdown_timeout).await;
    if let Err(err) = &stopped {
        error!(error = %err, "server did not stop gracefully");
    }

    run?;
    stopped?;
    Ok(())
}
