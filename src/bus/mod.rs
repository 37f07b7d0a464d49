//! Callback registry
//!
//! One single-slot registration per category: one per item type, plus the
//! connection, player and playlist-maintenance listeners. Registering
//! replaces the previous listener (its receiver sees the channel close).
//!
//! Delivery never blocks the reader loop: pages and events are handed
//! over with `try_send` on a bounded channel and the listener consumes
//! them on its own task.

pub mod events;

use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::model::{Album, Artist, Genre, Item, ItemType, Player, Playlist, Record, Song, Year};
use crate::protocol::pager::PageMeta;

pub use events::{ConnectionEvent, ListPage, PlayerEvent, PlaylistMaintenanceEvent};

/// Queue depth for each listener channel.
pub const LISTENER_CAPACITY: usize = 64;

/// A single registration slot.
pub struct Slot<T> {
    name: &'static str,
    sender: Mutex<Option<mpsc::Sender<T>>>,
}

impl<T> Slot<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            sender: Mutex::new(None),
        }
    }

    fn replace(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        let mut slot = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(tx);
        rx
    }

    fn clear(&self) -> bool {
        let mut slot = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        slot.take().is_some()
    }

    pub fn is_registered(&self) -> bool {
        let slot = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Hand `value` to the listener. Returns false when nobody took it.
    fn offer(&self, value: T) -> bool {
        let mut slot = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        match tx.try_send(value) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("{} listener went away", self.name);
                *slot = None;
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{} listener is not keeping up, dropping delivery", self.name);
                false
            }
        }
    }
}

/// Item types with a list listener slot.
pub trait Listenable: Item {
    fn slot(registry: &CallbackRegistry) -> &Slot<ListPage<Self>>;
}

macro_rules! listenable {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl Listenable for $ty {
                fn slot(registry: &CallbackRegistry) -> &Slot<ListPage<Self>> {
                    &registry.$field
                }
            }
        )*
    };
}

listenable! {
    Player => players,
    Album => albums,
    Artist => artists,
    Genre => genres,
    Year => years,
    Song => songs,
    Playlist => playlists,
}

pub struct CallbackRegistry {
    players: Slot<ListPage<Player>>,
    albums: Slot<ListPage<Album>>,
    artists: Slot<ListPage<Artist>>,
    genres: Slot<ListPage<Genre>>,
    years: Slot<ListPage<Year>>,
    songs: Slot<ListPage<Song>>,
    playlists: Slot<ListPage<Playlist>>,
    maintenance: Slot<PlaylistMaintenanceEvent>,
    connection: Slot<ConnectionEvent>,
    player: Slot<PlayerEvent>,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            players: Slot::new("players"),
            albums: Slot::new("albums"),
            artists: Slot::new("artists"),
            genres: Slot::new("genres"),
            years: Slot::new("years"),
            songs: Slot::new("songs"),
            playlists: Slot::new("playlists"),
            maintenance: Slot::new("playlist maintenance"),
            connection: Slot::new("connection"),
            player: Slot::new("player"),
        }
    }

    pub fn register_list<T: Listenable>(&self) -> mpsc::Receiver<ListPage<T>> {
        T::slot(self).replace()
    }

    /// Clear the slot for `T`. Returns whether a listener was registered.
    pub fn unregister_list<T: Listenable>(&self) -> bool {
        T::slot(self).clear()
    }

    pub fn register_connection(&self) -> mpsc::Receiver<ConnectionEvent> {
        self.connection.replace()
    }

    pub fn unregister_connection(&self) -> bool {
        self.connection.clear()
    }

    pub fn register_player(&self) -> mpsc::Receiver<PlayerEvent> {
        self.player.replace()
    }

    pub fn unregister_player(&self) -> bool {
        self.player.clear()
    }

    pub fn register_maintenance(&self) -> mpsc::Receiver<PlaylistMaintenanceEvent> {
        self.maintenance.replace()
    }

    pub fn unregister_maintenance(&self) -> bool {
        self.maintenance.clear()
    }

    /// Deliver a page of already decoded items.
    pub fn deliver_items<T: Listenable>(&self, meta: PageMeta, items: Vec<T>) -> bool {
        T::slot(self).offer(ListPage {
            count: meta.count,
            page_max: meta.page_max,
            start: meta.start,
            rescan: meta.rescan,
            items,
        })
    }

    /// Decode records and deliver them. Records without an id are skipped.
    pub fn deliver_records<T: Listenable>(&self, meta: PageMeta, records: &[Record]) -> bool {
        if !T::slot(self).is_registered() {
            return false;
        }
        let items: Vec<T> = records.iter().filter_map(T::from_record).collect();
        if items.len() < records.len() {
            debug!(
                "{}: skipped {} record(s) without an id",
                T::ITEM_TYPE,
                records.len() - items.len()
            );
        }
        self.deliver_items(meta, items)
    }

    /// Type-erased entry point used by the pager.
    pub fn deliver(&self, item_type: ItemType, meta: PageMeta, records: &[Record]) -> bool {
        match item_type {
            ItemType::Player => self.deliver_records::<Player>(meta, records),
            ItemType::Album => self.deliver_records::<Album>(meta, records),
            ItemType::Artist => self.deliver_records::<Artist>(meta, records),
            ItemType::Genre => self.deliver_records::<Genre>(meta, records),
            ItemType::Year => self.deliver_records::<Year>(meta, records),
            ItemType::Song => self.deliver_records::<Song>(meta, records),
            ItemType::Playlist => self.deliver_records::<Playlist>(meta, records),
        }
    }

    pub fn emit_connection(&self, event: ConnectionEvent) -> bool {
        self.connection.offer(event)
    }

    pub fn emit_player(&self, event: PlayerEvent) -> bool {
        self.player.offer(event)
    }

    pub fn emit_maintenance(&self, event: PlaylistMaintenanceEvent) -> bool {
        self.maintenance.offer(event)
    }
}
