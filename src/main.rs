use clap::Parser;
use sensor_suite_lib::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sensor_suite_lib::run(Cli::parse()).await
}
