pub mod login;
pub mod rooms;
pub mod send;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiClient;
use crate::chat::RoomCatalog;
use crate::config::{FileConfig, ShoalConfig};
use crate::models::{Message, Room, User};
use crate::session::SessionStore;

/// Build the API client and session store for a command.
pub(crate) fn open_session(
    config: &ShoalConfig,
    file: &FileConfig,
) -> Result<(ApiClient, Arc<SessionStore>)> {
    let api = ApiClient::new(file.api.base_url.clone());
    let store = SessionStore::load(api.clone(), config.tokens_path.clone())
        .context("could not read the stored session")?;
    Ok((api, Arc::new(store)))
}

/// Restore and validate the stored session, or explain how to log in.
pub(crate) async fn require_user(store: &Arc<SessionStore>) -> Result<User> {
    match store
        .restore()
        .await
        .context("could not validate the stored session")?
    {
        Some(user) => Ok(user),
        None => anyhow::bail!("not logged in — run `shoal login` first"),
    }
}

pub(crate) fn require_token(store: &SessionStore) -> Result<String> {
    store
        .access_token()
        .context("session ended — run `shoal login` again")
}

/// Fetch the room list and resolve one argument against it.
pub(crate) async fn resolve_room(
    api: &ApiClient,
    token: &str,
    needle: &str,
) -> Result<(RoomCatalog, Room)> {
    let catalog = RoomCatalog::new(
        api.list_rooms(token)
            .await
            .context("could not fetch the room list")?,
    );
    let room = catalog
        .resolve(needle)
        .cloned()
        .with_context(|| format!("no room matches '{needle}'"))?;
    Ok((catalog, room))
}

/// One message as a terminal line, attachments indented below it.
pub(crate) fn print_message(message: &Message) {
    let timestamp = message
        .created_at
        .with_timezone(&chrono::Local)
        .format("%H:%M");
    let sender = message.sender.as_deref().unwrap_or("(deleted)");
    println!("[{timestamp}] {sender}: {}", message.plaintext);
    for attachment in &message.attachments {
        println!(
            "        {} ({} kB)  {}",
            attachment.file_name(),
            attachment.file_size.div_ceil(1024),
            attachment.file_url
        );
    }
}
