use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "resq-eye")]
#[command(about = "Live hazard and survivor sensing for rescue teams", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Start on the synthetic feed instead of a camera
    #[arg(long)]
    pub simulate: bool,

    /// Port for the local API (overrides config)
    #[arg(long)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Show the status of a running service
    Status(StatusCliArgs),
    /// Send an operator command to a running service
    Command(CommandCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct StatusCliArgs {
    /// Print the raw JSON status
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct CommandCliArgs {
    /// switch-camera, toggle-audio, toggle-voice, force-simulation,
    /// simulate-disconnect or retry-live
    pub name: String,
}
