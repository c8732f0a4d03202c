//! CLI handlers that talk to a running service.

use anyhow::Result;

use super::args::{CommandCliArgs, StatusCliArgs};
use super::client::LiveApiClient;
use crate::controller::{LiveCommand, LiveStatus};

pub async fn handle_status_command(args: StatusCliArgs, port: u16) -> Result<()> {
    let status = LiveApiClient::local(port).status().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    print!("{}", render_status(&status));
    Ok(())
}

pub async fn handle_live_command(args: CommandCliArgs, port: u16) -> Result<()> {
    let command: LiveCommand = args.name.parse().map_err(anyhow::Error::msg)?;
    let client = LiveApiClient::local(port);
    client.command(command).await?;

    let status = client.status().await?;
    println!("{} ok", command.as_str());
    println!("{}", status.status_text);
    Ok(())
}

fn render_status(status: &LiveStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!("Mode:      {}\n", status.mode.as_str()));
    out.push_str(&format!("Status:    {}\n", status.status_text));
    out.push_str(&format!(
        "Verdict:   {}\n",
        if status.is_danger { "DANGER" } else { "clear" }
    ));
    out.push_str(&format!(
        "Camera:    {}{}\n",
        status.facing.map(|f| f.as_str()).unwrap_or("unknown"),
        if status.has_multiple_cameras {
            " (switchable)"
        } else {
            ""
        }
    ));
    out.push_str(&format!(
        "Audio:     {}\n",
        if status.audio_enabled { "on" } else { "muted" }
    ));
    out.push_str(&format!("Poll:      every {} ms\n", status.poll_delay_ms));
    out.push_str(&format!("Voice:     {}\n", status.streaming_phase));
    if let Some(at) = status.last_analysis_at {
        out.push_str(&format!("Analyzed:  {}\n", at.to_rfc3339()));
    }
    if let Some(error) = &status.last_error {
        out.push_str(&format!("Error:     {}\n", error));
    }
    out
}
