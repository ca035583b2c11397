//! Terminal chat client.
//!
//! Run with:
//! ```not_rust
//! CHATSYNC_TOKEN=... cargo run --bin chatsync-client -- --user-id alice --room lobby
//! ```

use chatsync_client::{Args, run_client};
use chatsync_shared::logger::setup_logger;
use clap::Parser;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    if let Err(e) = run_client(args).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
