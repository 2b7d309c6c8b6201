//! Room-scoped notification adapter.
//!
//! A screen showing one room does not want the whole event stream: it
//! wants "the latest `new_message` for my room" plus a connectivity flag.
//! The adapter mirrors the manager's subscription for whichever room is
//! currently active — switching rooms fully unsubscribes the old room and
//! subscribes the new one, so no stale subscriptions accumulate.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use crate::event::{Event, EventKind};
use crate::manager::{ConnectionManager, ConnectionStatus};
use crate::registry::HandlerId;

pub struct RoomNotifications {
    manager: ConnectionManager,
    /// The active room, shared with the filter handler.
    room: Arc<Mutex<Option<String>>>,
    handler: HandlerId,
    /// Latest matching event; the handler holds the sender side.
    latest: Arc<watch::Sender<Option<Event>>>,
}

impl RoomNotifications {
    /// Attach to the manager, optionally with an initial room. `None`
    /// means no room selected: nothing is subscribed and nothing matches.
    pub fn new(manager: ConnectionManager, room_id: Option<String>) -> Self {
        let (latest_tx, _) = watch::channel(None);
        let latest = Arc::new(latest_tx);
        let room = Arc::new(Mutex::new(None));

        let filter_room = room.clone();
        let filter_latest = latest.clone();
        let handler = manager.on(EventKind::NewMessage, move |event: &Event| {
            let active = filter_room.lock().unwrap().clone();
            match (&active, &event.room_id) {
                (Some(active), Some(event_room)) if active == event_room => {
                    filter_latest.send_replace(Some(event.clone()));
                }
                _ => {}
            }
        });

        let adapter = Self {
            manager,
            room,
            handler,
            latest,
        };
        adapter.set_room(room_id);
        adapter
    }

    /// Switch the active room. The previous room is unsubscribed first and
    /// the latest value is cleared; switching to the same room is a no-op.
    pub fn set_room(&self, room_id: Option<String>) {
        let previous = {
            let mut room = self.room.lock().unwrap();
            if *room == room_id {
                return;
            }
            std::mem::replace(&mut *room, room_id.clone())
        };
        if let Some(previous) = previous {
            self.manager.unsubscribe(&previous);
        }
        self.latest.send_replace(None);
        if let Some(room_id) = room_id {
            self.manager.subscribe(&room_id);
        }
    }

    pub fn room_id(&self) -> Option<String> {
        self.room.lock().unwrap().clone()
    }

    /// Most recent `new_message` for the active room; `None` until one
    /// arrives or after a room switch.
    pub fn latest(&self) -> watch::Receiver<Option<Event>> {
        self.latest.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.manager.status()
    }
}

impl Drop for RoomNotifications {
    fn drop(&mut self) {
        self.manager.off(&EventKind::NewMessage, self.handler);
        if let Some(room_id) = self.room.lock().unwrap().take() {
            self.manager.unsubscribe(&room_id);
        }
        debug!("room notifications detached");
    }
}
