use clap::Parser;

use autopilot::cli::{Cli, dispatch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logger::init_logger("autopilot");

    let cli = Cli::parse();
    dispatch(cli).await
}
