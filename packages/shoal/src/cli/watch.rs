//! `shoal watch` — follow one room live.
//!
//! This command wires the whole client together: the validated session
//! feeds the connection manager its access token, the room adapter narrows
//! events to the watched room, and each notification triggers a
//! latest-message fetch appended through the id-dedupe guard. Lines typed
//! on stdin are sent as messages.

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use shoal_realtime::{ConnectionManager, ConnectionStatus, RoomNotifications};

use crate::chat::Timeline;
use crate::config::{FileConfig, ShoalConfig};

#[derive(Args)]
pub struct WatchArgs {
    /// Room id, name, or id prefix
    pub room: String,
}

pub async fn run(config: &ShoalConfig, file: &FileConfig, args: WatchArgs) -> Result<()> {
    let (api, store) = super::open_session(config, file)?;
    super::require_user(&store).await?;
    let refresh_task = store.clone().spawn_refresh_loop(file.refresh_interval());

    let token = super::require_token(&store)?;
    let (_, room) = super::resolve_room(&api, &token, &args.room).await?;

    let manager = ConnectionManager::new(file.realtime_config(), store.clone());
    manager.connect().await;
    let notifications = RoomNotifications::new(manager.clone(), Some(room.id.to_string()));

    let mut timeline = Timeline::new();
    timeline.select_room(Some(room.id));
    let backlog = api
        .list_messages(&token, room.id, None, None)
        .await
        .context("could not fetch the message history")?;
    for message in &backlog {
        super::print_message(message);
    }
    timeline.replace(backlog);

    eprintln!("Watching '{}' — type a line to send, Ctrl-C to quit.", room.name);

    let mut latest = notifications.latest();
    let mut status = manager.status();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            changed = latest.changed() => {
                if changed.is_err() {
                    break;
                }
                if latest.borrow_and_update().is_none() {
                    continue;
                }
                // The socket only says *that* something changed; the
                // message body comes over HTTP.
                let Some(token) = store.access_token() else { break };
                match api.latest_message(&token, room.id).await {
                    Ok(Some(message)) => {
                        if timeline.push_unique(message.clone()) {
                            super::print_message(&message);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "could not fetch the new message"),
                }
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                match *status.borrow_and_update() {
                    ConnectionStatus::Connected => eprintln!("[connected]"),
                    ConnectionStatus::Connecting => {}
                    ConnectionStatus::Disconnected => eprintln!("[connection lost — retrying]"),
                    ConnectionStatus::GaveUp => {
                        eprintln!("[connection lost — type /reconnect to retry]");
                    }
                }
            }

            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                let text = line.trim();
                if text.is_empty() {
                    // Empty input is never dispatched.
                    continue;
                }
                if text == "/reconnect" {
                    manager.reconnect().await;
                    continue;
                }
                let Some(token) = store.access_token() else { break };
                match api.send_message(&token, room.id, text).await {
                    // Optimistic append; the notification-driven refetch
                    // dedupes against it by id.
                    Ok(message) => {
                        timeline.push_unique(message);
                    }
                    Err(err) => warn!(error = %err, "message not sent"),
                }
            }
        }
    }

    // Teardown: no timer or socket survives this point.
    drop(notifications);
    manager.shutdown();
    store.dispose();
    let _ = refresh_task.await;
    eprintln!("Stopped watching '{}'.", room.name);
    Ok(())
}
