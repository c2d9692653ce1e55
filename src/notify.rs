use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Notice;

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out of engine notices to external collaborators (invoicing, guest
/// messaging). Listeners either follow every room or a single one.
pub struct NotifyHub {
    all: broadcast::Sender<Notice>,
    rooms: DashMap<Ulid, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            rooms: DashMap::new(),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Notice> {
        self.all.subscribe()
    }

    /// Subscribe to one room's notices. Creates the channel if needed.
    pub fn subscribe_room(&self, room_id: Ulid) -> broadcast::Receiver<Notice> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a notice. No-op for channels nobody is listening on.
    pub fn send(&self, room_id: Ulid, notice: &Notice) {
        let _ = self.all.send(notice.clone());
        let mut idle = false;
        if let Some(sender) = self.rooms.get(&room_id) {
            idle = sender.send(notice.clone()).is_err();
        }
        if idle {
            self.rooms.remove_if(&room_id, |_, s| s.receiver_count() == 0);
        }
    }
}
