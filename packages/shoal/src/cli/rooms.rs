//! `shoal rooms` — list, inspect, and create rooms.

use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::warn;

use crate::chat::RoomCatalog;
use crate::config::{FileConfig, ShoalConfig};
use crate::models::NewRoom;

#[derive(Args)]
pub struct RoomsArgs {
    #[command(subcommand)]
    pub command: Option<RoomsCommand>,
}

#[derive(Subcommand)]
pub enum RoomsCommand {
    /// Create a room and invite users
    Create(CreateRoomArgs),
    /// Show one room's details and members
    Show(ShowRoomArgs),
}

#[derive(Args)]
pub struct CreateRoomArgs {
    /// Room name
    #[arg(long)]
    pub name: String,

    /// Usernames to invite (comma separated, or repeated)
    #[arg(long, value_delimiter = ',')]
    pub invite: Vec<String>,

    /// Optional description
    #[arg(long)]
    pub description: Option<String>,

    /// Create a public room (rooms are private by default)
    #[arg(long)]
    pub public: bool,
}

#[derive(Args)]
pub struct ShowRoomArgs {
    /// Room id, name, or id prefix
    pub room: String,
}

pub async fn run(config: &ShoalConfig, file: &FileConfig, args: RoomsArgs) -> Result<()> {
    match args.command {
        None => list(config, file).await,
        Some(RoomsCommand::Create(args)) => create(config, file, args).await,
        Some(RoomsCommand::Show(args)) => show(config, file, args).await,
    }
}

async fn list(config: &ShoalConfig, file: &FileConfig) -> Result<()> {
    let (api, store) = super::open_session(config, file)?;
    super::require_user(&store).await?;
    let token = super::require_token(&store)?;

    let rooms = api.list_rooms(&token).await?;
    if rooms.is_empty() {
        eprintln!("No rooms yet — create one with `shoal rooms create`.");
        return Ok(());
    }
    for room in &rooms {
        let id = room.id.to_string();
        let visibility = if room.is_private { "private" } else { "public" };
        println!(
            "{}  {:<24} {:<8} {}",
            &id[..8],
            room.name,
            visibility,
            room.member_usernames.join(", ")
        );
    }
    Ok(())
}

async fn create(config: &ShoalConfig, file: &FileConfig, args: CreateRoomArgs) -> Result<()> {
    let (api, store) = super::open_session(config, file)?;
    super::require_user(&store).await?;
    let token = super::require_token(&store)?;

    let catalog = RoomCatalog::new(api.list_rooms(&token).await?);
    let request = NewRoom {
        name: args.name,
        description: args.description,
        invited_usernames: args.invite,
        is_private: !args.public,
    };
    // A request failing client-side validation is never dispatched.
    let request = match catalog.validate_new_room(&request) {
        Ok(request) => request,
        Err(err) => {
            warn!(%err, "room not created");
            eprintln!("Room not created: {err}.");
            return Ok(());
        }
    };

    let room = api.create_room(&token, &request).await?;
    eprintln!("Created room '{}' ({}).", room.name, room.id);
    Ok(())
}

async fn show(config: &ShoalConfig, file: &FileConfig, args: ShowRoomArgs) -> Result<()> {
    let (api, store) = super::open_session(config, file)?;
    super::require_user(&store).await?;
    let token = super::require_token(&store)?;

    let (_, room) = super::resolve_room(&api, &token, &args.room).await?;
    let detail = api.room_detail(&token, room.id).await?;

    let visibility = if detail.is_private { "private" } else { "public" };
    println!("{}  ({visibility}, {})", detail.name, detail.id);
    if let Some(description) = detail.description.as_deref().filter(|d| !d.is_empty()) {
        println!("{description}");
    }
    if let Some(created_by) = &detail.created_by {
        println!("Created by {created_by}");
    }
    println!("Members:");
    for member in &detail.members {
        println!("  {}", member.username);
    }
    Ok(())
}
