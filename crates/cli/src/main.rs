// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use clap::{Parser, Subcommand};
use ferry_cli::commands::{get, lanes, selector};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Ferry - paid content retrieval client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve `<root>/<path...>` and write the bytes.
    Get {
        path: String,

        /// Output file (stdout when omitted)
        #[arg(long, short)]
        out: Option<PathBuf>,

        /// Provider address (host:port or /ip4/../tcp/..); seeds routing
        #[arg(long, requires = "peer")]
        provider: Option<String>,

        /// Provider peer id
        #[arg(long)]
        peer: Option<String>,

        /// Price per byte the provider asks
        #[arg(long, default_value = "0")]
        price: String,

        /// Expected total size in bytes
        #[arg(long, default_value_t = 0)]
        size: u64,

        /// Address the provider is paid at
        #[arg(long)]
        payment_address: Option<String>,
    },
    /// Show the lane state of a payment channel
    Lanes {
        channel: String,
    },
    /// Print a built-in selector (all | entries) and its CID
    Selector {
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Get {
            path,
            out,
            provider,
            peer,
            price,
            size,
            payment_address,
        } => {
            let provider = match (provider, peer) {
                (Some(addr), Some(peer)) => Some(get::ProviderArgs {
                    addr,
                    peer,
                    price,
                    size,
                    payment_address,
                }),
                _ => None,
            };
            get::run(&path, out, provider).await
        }
        Commands::Lanes { channel } => lanes::run(&channel).await,
        Commands::Selector { name } => selector::run(&name),
    }
}
