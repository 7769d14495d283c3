use clap::Parser;
use critique_stage_lib::{bootstrap, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bootstrap::run_app(cli).await
}
