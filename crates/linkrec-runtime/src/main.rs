//! linkrec: diagnostics binary for AMQP 1.0 link recovery.

use clap::Parser;

mod cli;
mod simulate;
mod table;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("LINKREC_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Table(opts) => table::cmd_table(&opts)?,
        cli::Command::Reconcile(opts) => table::cmd_reconcile(&opts)?,
        cli::Command::Simulate(opts) => simulate::cmd_simulate(&opts).await?,
    }

    Ok(())
}
