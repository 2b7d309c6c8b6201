//! `shoal send` and `shoal history` — one-shot message operations.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::config::{FileConfig, ShoalConfig};

#[derive(Args)]
pub struct SendArgs {
    /// Room id, name, or id prefix
    pub room: String,

    /// Message text
    pub text: Option<String>,

    /// File to attach
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct HistoryArgs {
    /// Room id, name, or id prefix
    pub room: String,

    /// Fetch at most this many of the newest messages
    #[arg(long)]
    pub limit: Option<u32>,

    /// Skip this many of the newest messages first
    #[arg(long)]
    pub offset: Option<u32>,
}

pub async fn send(config: &ShoalConfig, file: &FileConfig, args: SendArgs) -> Result<()> {
    let (api, store) = super::open_session(config, file)?;
    super::require_user(&store).await?;
    let token = super::require_token(&store)?;

    let text = args.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
    // An empty message with no attachment is never dispatched.
    if text.is_none() && args.file.is_none() {
        eprintln!("Nothing to send: give some text and/or --file.");
        return Ok(());
    }

    let (_, room) = super::resolve_room(&api, &token, &args.room).await?;
    let message = match &args.file {
        Some(path) => api.upload_file(&token, room.id, path, text).await?,
        None => {
            api.send_message(&token, room.id, text.unwrap_or_default())
                .await?
        }
    };
    super::print_message(&message);
    Ok(())
}

pub async fn history(config: &ShoalConfig, file: &FileConfig, args: HistoryArgs) -> Result<()> {
    let (api, store) = super::open_session(config, file)?;
    super::require_user(&store).await?;
    let token = super::require_token(&store)?;

    let (_, room) = super::resolve_room(&api, &token, &args.room).await?;
    let messages = api
        .list_messages(&token, room.id, args.limit, args.offset)
        .await?;
    if messages.is_empty() {
        eprintln!("No messages in '{}'.", room.name);
        return Ok(());
    }
    for message in &messages {
        super::print_message(message);
    }
    Ok(())
}
