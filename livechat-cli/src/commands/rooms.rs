use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use client::ChatApiClient;
use shared::{config::Config, models::ListRoomsResponse};

use crate::logging;

#[derive(Args, Debug)]
#[command(about = "List the chat rooms known to the proxy")]
pub struct RoomsArgs {
    /// Path to the configuration file (yaml or json)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Print the raw JSON listing
    #[arg(long)]
    pub json: bool,
}

pub async fn handle_rooms(args: RoomsArgs) -> Result<()> {
    let config = Config::load_config(args.config, None).context("failed to load configuration")?;
    logging::initialize_tracing(&config);

    let api = ChatApiClient::from_config(&config)?;
    let listing = api.list_rooms().await.context("failed to list rooms")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        print!("{}", render_rooms(&listing));
    }
    Ok(())
}

fn render_rooms(listing: &ListRoomsResponse) -> String {
    if listing.rooms.is_empty() {
        return "No rooms found.\n".to_string();
    }

    let mut out = String::new();
    for room in &listing.rooms {
        let name = room.name.as_deref().unwrap_or("(unnamed)");
        out.push_str(&format!("{name}\t{}\n", room.arn));
        if let Some(created) = room.create_time {
            out.push_str(&format!("  created {}\n", created.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        for (key, value) in &room.tags {
            out.push_str(&format!("  tag {key}={value}\n"));
        }
    }
    if listing.next_token.is_some() {
        out.push_str("(more rooms available)\n");
    }
    out
}
