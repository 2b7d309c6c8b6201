//! Client-side chat state: the room catalog and the active room's message
//! timeline. Pure state — all I/O stays in the API layer.

use uuid::Uuid;

use crate::models::{Message, NewRoom, Room};

/// Why a new-room request was rejected before any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomValidationError {
    #[error("room name is blank")]
    BlankName,
    #[error("a room with this name already exists")]
    DuplicateName,
    #[error("no usernames invited")]
    NoInvitees,
}

/// The fetched room list plus lookup helpers.
#[derive(Debug, Default, Clone)]
pub struct RoomCatalog {
    rooms: Vec<Room>,
}

impl RoomCatalog {
    pub fn new(rooms: Vec<Room>) -> Self {
        Self { rooms }
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn push(&mut self, room: Room) {
        self.rooms.push(room);
    }

    /// Client-side validation; a request failing here is never dispatched.
    ///
    /// Returns the normalized payload: name and usernames trimmed, empty
    /// invitee entries dropped. Name collision is a case-sensitive exact
    /// match against the known rooms.
    pub fn validate_new_room(&self, room: &NewRoom) -> Result<NewRoom, RoomValidationError> {
        let name = room.name.trim();
        if name.is_empty() {
            return Err(RoomValidationError::BlankName);
        }
        if self.rooms.iter().any(|known| known.name == name) {
            return Err(RoomValidationError::DuplicateName);
        }
        let invited: Vec<String> = room
            .invited_usernames
            .iter()
            .map(|username| username.trim())
            .filter(|username| !username.is_empty())
            .map(str::to_string)
            .collect();
        if invited.is_empty() {
            return Err(RoomValidationError::NoInvitees);
        }
        Ok(NewRoom {
            name: name.to_string(),
            description: room.description.clone(),
            invited_usernames: invited,
            is_private: room.is_private,
        })
    }

    /// Resolve a room by exact id, exact name, then unambiguous id prefix.
    pub fn resolve(&self, needle: &str) -> Option<&Room> {
        if let Some(room) = self.rooms.iter().find(|room| room.id.to_string() == needle) {
            return Some(room);
        }
        if let Some(room) = self.rooms.iter().find(|room| room.name == needle) {
            return Some(room);
        }
        let mut matches = self
            .rooms
            .iter()
            .filter(|room| room.id.to_string().starts_with(needle));
        match (matches.next(), matches.next()) {
            (Some(room), None) => Some(room),
            _ => None,
        }
    }
}

/// Append-only message sequence for the active room.
///
/// Replaced wholesale on room switch. Appends are deduplicated by message
/// id, so an optimistic local append and the notification-driven refetch
/// of the same message cannot both land.
#[derive(Debug, Default)]
pub struct Timeline {
    room_id: Option<Uuid>,
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_id(&self) -> Option<Uuid> {
        self.room_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Switch the active room; the sequence resets, also when switching to
    /// no room at all. Re-selecting the current room keeps the messages.
    pub fn select_room(&mut self, room_id: Option<Uuid>) {
        if self.room_id == room_id {
            return;
        }
        self.room_id = room_id;
        self.messages.clear();
    }

    /// Replace the sequence with a freshly fetched history.
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Append unless a message with this id is already present. Returns
    /// whether the message was new.
    pub fn push_unique(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|known| known.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn room(id: u128, name: &str) -> Room {
        Room {
            id: Uuid::from_u128(id),
            name: name.to_string(),
            description: None,
            is_private: true,
            created_by_username: None,
            created_at: None,
            updated_at: None,
            member_count: None,
            member_usernames: Vec::new(),
        }
    }

    fn message(id: u128, plaintext: &str) -> Message {
        Message {
            id: Uuid::from_u128(id),
            plaintext: plaintext.to_string(),
            sender: Some("alice".to_string()),
            created_at: Utc::now(),
            attachments: Vec::new(),
        }
    }

    fn new_room(name: &str, invited: &[&str]) -> NewRoom {
        NewRoom {
            name: name.to_string(),
            description: None,
            invited_usernames: invited.iter().map(|s| s.to_string()).collect(),
            is_private: true,
        }
    }

    #[test]
    fn validation_rejects_blank_duplicate_and_uninvited_rooms() {
        let catalog = RoomCatalog::new(vec![room(1, "general")]);

        assert_eq!(
            catalog.validate_new_room(&new_room("   ", &["bob"])),
            Err(RoomValidationError::BlankName)
        );
        assert_eq!(
            catalog.validate_new_room(&new_room("general", &["bob"])),
            Err(RoomValidationError::DuplicateName)
        );
        assert_eq!(
            catalog.validate_new_room(&new_room("standup", &[])),
            Err(RoomValidationError::NoInvitees)
        );
        // Invitees that trim to nothing do not count.
        assert_eq!(
            catalog.validate_new_room(&new_room("standup", &["  ", ""])),
            Err(RoomValidationError::NoInvitees)
        );
    }

    #[test]
    fn duplicate_detection_is_case_sensitive_and_trims_the_name() {
        let catalog = RoomCatalog::new(vec![room(1, "general")]);

        // "General" is a different room than "general".
        let accepted = catalog
            .validate_new_room(&new_room("General", &["bob"]))
            .expect("case differs");
        assert_eq!(accepted.name, "General");

        // "  general  " trims into a duplicate.
        assert_eq!(
            catalog.validate_new_room(&new_room("  general  ", &["bob"])),
            Err(RoomValidationError::DuplicateName)
        );
    }

    #[test]
    fn validation_normalizes_the_invitee_list() {
        let catalog = RoomCatalog::new(vec![]);
        let accepted = catalog
            .validate_new_room(&new_room("standup", &[" bob ", "", "carol"]))
            .expect("valid");
        assert_eq!(accepted.invited_usernames, vec!["bob", "carol"]);
    }

    fn room_with_id(id: &str, name: &str) -> Room {
        let mut room = room(0, name);
        room.id = id.parse().expect("uuid");
        room
    }

    #[test]
    fn resolve_prefers_exact_id_then_name_then_unambiguous_prefix() {
        let catalog = RoomCatalog::new(vec![
            room_with_id("aaaa1111-0000-4000-8000-000000000001", "general"),
            room_with_id("bbbb2222-0000-4000-8000-000000000002", "standup"),
            room_with_id("bbbb3333-0000-4000-8000-000000000003", "random"),
        ]);

        let by_id = catalog
            .resolve("aaaa1111-0000-4000-8000-000000000001")
            .expect("exact id");
        assert_eq!(by_id.name, "general");

        assert_eq!(
            catalog.resolve("standup").map(|r| r.name.as_str()),
            Some("standup")
        );

        // "aaaa" only matches one id; "bbbb" matches two.
        assert_eq!(
            catalog.resolve("aaaa").map(|r| r.name.as_str()),
            Some("general")
        );
        assert!(catalog.resolve("bbbb").is_none());
        assert!(catalog.resolve("no-such-room").is_none());
    }

    #[test]
    fn timeline_resets_on_room_switch_and_dedupes_by_id() {
        let mut timeline = Timeline::new();
        timeline.select_room(Some(Uuid::from_u128(1)));
        timeline.replace(vec![message(1, "hello"), message(2, "world")]);

        // The optimistic append lands once; the notification-driven
        // refetch of the same id is a no-op.
        assert!(timeline.push_unique(message(3, "again")));
        assert!(!timeline.push_unique(message(3, "again")));
        assert_eq!(timeline.messages().len(), 3);

        // Re-selecting the same room keeps the history.
        timeline.select_room(Some(Uuid::from_u128(1)));
        assert_eq!(timeline.messages().len(), 3);

        // Switching rooms resets it.
        timeline.select_room(Some(Uuid::from_u128(2)));
        assert!(timeline.messages().is_empty());
        timeline.select_room(None);
        assert_eq!(timeline.room_id(), None);
    }
}
