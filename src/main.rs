// Use mimalloc as the global allocator; every forwarded chunk is a short-lived allocation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use clap::Parser;

use bastion_tunnel::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    bastion_tunnel::init_logging();

    cli::run(cli).await
}
