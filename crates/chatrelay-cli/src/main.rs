//! chatrelay CLI: serve the chat relay or consume one of its streams.

mod send;
mod server;

use anyhow::{Context, Result};
use chatrelay_config::{CliOverrides, RelayConfig};
use chatrelay_core::ResponseFormat;
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    version,
    about = "Relay chat turns between OpenAI-compatible models and MCP tool servers"
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP relay
    Serve {
        /// Address to listen on (overrides CHATRELAY_LISTEN)
        #[arg(long)]
        listen: Option<String>,

        /// Config directory (default: ~/.chatrelay)
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },

    /// POST a request body to a relay route and print the normalized stream
    Send {
        /// JSON request body
        request: PathBuf,

        /// Route to POST to
        #[arg(long, default_value = "http://127.0.0.1:3000/api/chat/tools")]
        url: String,

        /// How to interpret the response body
        #[arg(long, default_value_t = ResponseFormat::Hosted)]
        format: ResponseFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve { listen, config_dir } => {
            let config = RelayConfig::load(CliOverrides { listen, config_dir });
            server::serve(config).await
        }
        Command::Send {
            request,
            url,
            format,
        } => {
            let body = tokio::fs::read_to_string(&request)
                .await
                .with_context(|| format!("Failed to read {}", request.display()))?;
            send::run(&url, body, format).await
        }
    }
}
