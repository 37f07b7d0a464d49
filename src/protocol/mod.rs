//! CLI protocol engine: codec, item model, list paging, routing and
//! player state. Everything here is synchronous and socket-free; the
//! service layer drives it.

pub mod codec;
pub mod model;
pub mod pager;
pub mod player_state;
pub mod query;
pub mod router;

pub use model::{Album, Artist, Genre, Item, ItemRef, ItemType, Player, Playlist, Record, Song, Year};
pub use pager::{NextPage, PageMeta, Pager, ReplyOutcome};
pub use player_state::{PlayerEvent, PlayerState};
pub use query::{ListQuery, QueryKind, QueryParams};
pub use router::{Route, route};
