use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the llm gateway binary.
#[derive(Parser, Debug)]
#[command(name = "relaygate", about = "Anthropic/OpenAI protocol-translating LLM gateway", version, long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short = 'c', env = "RELAYGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the address the server listens on, e.g. "0.0.0.0:8080".
    #[arg(long)]
    pub listen_address: Option<String>,

    /// Log filter, e.g. "info" or "server=debug,llm=debug".
    #[arg(long, env = "RELAYGATE_LOG", default_value = "info")]
    pub log: String,
}
