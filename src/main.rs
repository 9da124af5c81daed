use clap::Parser;
use tracing_subscriber::EnvFilter;

use animeyes_runtime::runtime::{self, RunOptions};

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for servo writes and refused animations)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let opts = RunOptions::parse();
    if let Err(e) = runtime::run(opts).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
