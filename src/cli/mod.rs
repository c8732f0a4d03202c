pub mod args;
pub mod client;
pub mod live;

pub use args::{Cli, CliCommand, CommandCliArgs, StatusCliArgs};
pub use client::LiveApiClient;
pub use live::{handle_live_command, handle_status_command};
