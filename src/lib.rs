//! Squeeze Remote
//!
//! Client for the line-oriented CLI protocol of Lyrion/Logitech Media
//! Server. It keeps one TCP session to the server, pages library queries
//! in the background, tracks the playback state of one active player and
//! reports everything through bounded listener channels.
//!
//! - `protocol` - token codec, item model, query table, pager, router
//!   and player state (no I/O)
//! - `service` - connection, dispatcher and the `SqueezeService` context
//! - `bus` - listener registry and event types
//! - `config` - configuration and persisted state
//! - `discovery` - UDP server discovery

pub mod bus;
pub mod config;
pub mod discovery;
pub mod protocol;
pub mod service;

pub use bus::{ConnectionEvent, ListPage, PlayerEvent, PlaylistMaintenanceEvent};
pub use config::Config;
pub use protocol::{Album, Artist, Genre, ItemRef, Player, Playlist, QueryKind, QueryParams, Song, Year};
pub use service::{RandomPlayMode, ServerCapabilities, SqueezeService};
