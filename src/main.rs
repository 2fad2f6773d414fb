//! logforward - Fluentd Forward Protocol Ingestion Front-End
//!
//! This is the main entry point for the logforward service. It loads
//! configuration, binds the Forward listener, and drives the accept loop
//! and the periodic flush toward the downstream delivery stage.

use logforward::{ForwardConfig, ForwardInput};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line overrides layered on top of environment configuration.
#[derive(Default)]
struct Args {
    host: Option<String>,
    port: Option<u16>,
    backlog: Option<u32>,
    flush_interval: Option<u64>,
}

impl Args {
    /// Parse overrides from command-line arguments.
    fn from_args() -> Self {
        let mut parsed = Args::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    parsed.host = Some(take_value(&args, i, "--host"));
                    i += 2;
                }
                "--port" | "-p" => {
                    let raw = take_value(&args, i, "--port");
                    parsed.port = Some(raw.parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    }));
                    i += 2;
                }
                "--backlog" => {
                    let raw = take_value(&args, i, "--backlog");
                    parsed.backlog = Some(raw.parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid backlog");
                        std::process::exit(1);
                    }));
                    i += 2;
                }
                "--flush-interval" => {
                    let raw = take_value(&args, i, "--flush-interval");
                    parsed.flush_interval = Some(raw.parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid flush interval");
                        std::process::exit(1);
                    }));
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("logforward version {}", logforward::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        parsed
    }

    /// Builds the final configuration: env first, CLI flags on top.
    fn into_config(self) -> ForwardConfig {
        let mut config = match self.port {
            Some(port) => ForwardConfig::new(port),
            None => ForwardConfig::from_env().unwrap_or_else(|e| {
                eprintln!("Error: {e}");
                eprintln!("Provide --port or set LOGFORWARD_LISTEN_PORT");
                std::process::exit(1);
            }),
        };

        if let Some(host) = self.host {
            config.listen_address = host;
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(secs) = self.flush_interval {
            if let Err(e) = config.set_flush_interval_secs(secs) {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }

        config
    }
}

fn take_value(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {flag} requires a value");
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
logforward - Fluentd Forward Protocol Ingestion Front-End

USAGE:
    logforward [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Address to bind to (default: 0.0.0.0)
    -p, --port <PORT>              Port to listen on (or LOGFORWARD_LISTEN_PORT)
        --backlog <N>              Listen backlog (default: 128)
        --flush-interval <SECS>    Seconds between delivery flushes (default: 5)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    logforward --port 24224                  # Standard Forward port
    logforward --port 24224 --host 0.0.0.0   # Listen on all interfaces

SENDING DATA:
    Point any Forward-protocol client at the listener, e.g. fluent-cat:
    $ echo '{{"msg": "hello"}}' | fluent-cat app.log --port 24224
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::from_args().into_config();

    // Set up logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!(version = logforward::VERSION, "starting logforward");

    // Fatal on failure: the service never runs half-initialized
    let mut input = match ForwardInput::init(config.clone()).await {
        Ok(input) => input,
        Err(e) => {
            error!(error = %e, "initialization failed, aborting");
            return Err(e.into());
        }
    };

    let mut flush_timer = tokio::time::interval(config.flush_interval);
    // The first tick fires immediately; skip it so the first flush waits
    // a full interval
    flush_timer.tick().await;

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = input.collect() => {
                if let Err(e) = result {
                    if e.is_fatal() {
                        error!(error = %e, "collector failed");
                        break;
                    }
                    // Recoverable accept failure: already logged, keep going
                }
            }
            _ = flush_timer.tick() => {
                match input.flush() {
                    Ok(Some(chunk)) => {
                        // The downstream delivery stage picks the chunk up
                        // here; this binary just reports it.
                        info!(bytes = chunk.len, "buffer flushed for delivery");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "flush failed, buffered data retained");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping service");
                break;
            }
        }
    }

    if let Err(e) = input.exit() {
        warn!(error = %e, "shutdown completed with degraded cleanup");
    }

    info!("logforward shutdown complete");
    Ok(())
}
