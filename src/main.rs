use anyhow::Result;
use clap::Parser;
use resq_eye::{
    app::{self, ServiceOptions},
    cli::{handle_live_command, handle_status_command, Cli, CliCommand},
    config::Config,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("ResQ-Eye {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Status(args)) => {
            handle_status_command(args, api_port(cli.port)?).await?;
            return Ok(());
        }
        Some(CliCommand::Command(args)) => {
            handle_live_command(args, api_port(cli.port)?).await?;
            return Ok(());
        }
        None => {}
    }

    app::run_service(ServiceOptions {
        simulate: cli.simulate,
        port: cli.port,
    })
    .await
}

fn api_port(flag: Option<u16>) -> Result<u16> {
    match flag {
        Some(port) => Ok(port),
        None => Ok(Config::load()?.api.port),
    }
}
