use clap::Parser;
use stockturn_lib::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockturn_lib::init_tracing();
    let cli = Cli::parse();
    stockturn_lib::run(cli.into_command()).await
}
