//! chainproxy - CLI entry point.
//!
//! Thin wrapper around the library: loads a config file, builds a [`Server`], installs the
//! default `rustls` crypto provider, and runs it on a multi-threaded Tokio runtime. An external
//! collaborator per spec.md §1 — everything interesting lives in the library.

// Use mimalloc as global allocator for better p99 latency.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use chainproxy::config::FileConfig;
use chainproxy::policy::AllowAll;
use chainproxy::{Server, VERSION};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "chainproxy")]
#[command(author = "Tsang")]
#[command(version = VERSION)]
#[command(about = "Programmable HTTP(S) forward proxy with upstream chaining")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Listen port (overrides config)
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Listen host (overrides config)
    #[arg(long = "host")]
    host: Option<String>,

    /// Validate configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    // Install aws-lc-rs as the default crypto provider for rustls.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    // Build optimized tokio runtime for low-latency proxy workloads.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .max_blocking_threads(32)
        .enable_all()
        // Reduce I/O polling overhead - check for new events every 61 ticks.
        .event_interval(61)
        // Reduce cross-thread work stealing frequency for better cache locality.
        .global_queue_interval(31)
        .thread_name("chainproxy-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chainproxy=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("chainproxy v{}", VERSION);
    info!("loading configuration from: {}", args.config.display());

    let mut file_config = match FileConfig::load_async(&args.config).await {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(port) = args.port {
        file_config.port = port;
    }
    if let Some(host) = args.host {
        file_config.host = host;
    }

    if args.test {
        info!("configuration test passed");
        return Ok(());
    }

    // The policy callback is the embedding program's decision point (spec.md §9); the CLI binary
    // has none of its own, so it falls back to routing everything direct with no authentication.
    let server_config = match file_config.into_server_config(Arc::new(AllowAll)) {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let server = Server::new(server_config);
    if let Err(e) = server.listen().await {
        error!("failed to start listening: {}", e);
        std::process::exit(1);
    }
    info!("listening on port {}", server.port());

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    server.close(false).await;
    info!("chainproxy stopped");

    Ok(())
}
