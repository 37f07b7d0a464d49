//! Library and player items decoded from CLI list records
//!
//! Each item type carries a hand-written [`Item`] impl that knows how to
//! build itself from one record (the `key:value` pairs between two item
//! delimiters). The same struct is used for every query that returns that
//! type, so decoders accept the alternative key spellings used by
//! `search` and `status` replies (`album_id` vs `id`, `track` vs `title`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One decoded record: field name -> decoded value.
pub type Record = HashMap<String, String>;

/// Item types a list reply can carry; one callback slot exists per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Player,
    Album,
    Artist,
    Genre,
    Year,
    Song,
    Playlist,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Genre => "genre",
            Self::Year => "year",
            Self::Song => "song",
            Self::Playlist => "playlist",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item-type descriptor.
pub trait Item: Sized + Clone + Send + Sync + fmt::Debug + 'static {
    const ITEM_TYPE: ItemType;

    /// Decode one record. Returns `None` when the record lacks an id.
    fn from_record(record: &Record) -> Option<Self>;
}

fn field(record: &Record, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| !v.is_empty())
        .cloned()
}

fn flag(record: &Record, key: &str) -> bool {
    record.get(key).is_some_and(|v| v == "1")
}

fn number<T: std::str::FromStr>(record: &Record, key: &str) -> Option<T> {
    record.get(key).and_then(|v| v.trim().parse().ok())
}

/// A playback device known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub model: String,
    pub ip: Option<String>,
    pub connected: bool,
    pub can_power_off: bool,
}

impl Item for Player {
    const ITEM_TYPE: ItemType = ItemType::Player;

    fn from_record(record: &Record) -> Option<Self> {
        let id = field(record, &["playerid"])?;
        Some(Self {
            name: field(record, &["name"]).unwrap_or_else(|| id.clone()),
            model: field(record, &["model"]).unwrap_or_else(|| "unknown".to_string()),
            // The server appends the port (`192.168.1.20:41234`)
            ip: field(record, &["ip"]).map(|ip| match ip.rsplit_once(':') {
                Some((host, _)) => host.to_string(),
                None => ip,
            }),
            connected: flag(record, "connected"),
            can_power_off: record.get("canpoweroff").map_or(true, |v| v == "1"),
            id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artist: Option<String>,
    pub year: Option<u32>,
    pub artwork_track_id: Option<String>,
}

impl Item for Album {
    const ITEM_TYPE: ItemType = ItemType::Album;

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: field(record, &["id", "album_id"])?,
            name: field(record, &["album"]).unwrap_or_default(),
            artist: field(record, &["artist"]),
            year: number(record, "year").filter(|y| *y > 0),
            artwork_track_id: field(record, &["artwork_track_id"]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

impl Item for Artist {
    const ITEM_TYPE: ItemType = ItemType::Artist;

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: field(record, &["id", "contributor_id", "artist_id"])?,
            name: field(record, &["artist", "contributor"]).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
}

impl Item for Genre {
    const ITEM_TYPE: ItemType = ItemType::Genre;

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: field(record, &["id", "genre_id"])?,
            name: field(record, &["genre"]).unwrap_or_default(),
        })
    }
}

/// Years are identified by the year itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Year {
    pub id: String,
}

impl Item for Year {
    const ITEM_TYPE: ItemType = ItemType::Year;

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: field(record, &["year"])?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub artist_id: Option<String>,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub year: Option<u32>,
    pub track_num: Option<u32>,
    pub duration: Option<f64>,
    pub remote: bool,
    pub url: Option<String>,
    pub artwork_url: Option<String>,
    pub artwork_track_id: Option<String>,
    /// Position in the player's current playlist (status replies only)
    pub playlist_index: Option<u32>,
}

impl Item for Song {
    const ITEM_TYPE: ItemType = ItemType::Song;

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: field(record, &["id", "track_id"])?,
            title: field(record, &["title", "track"]).unwrap_or_default(),
            artist: field(record, &["artist"]),
            artist_id: field(record, &["artist_id"]),
            album: field(record, &["album"]),
            album_id: field(record, &["album_id"]),
            year: number(record, "year").filter(|y| *y > 0),
            track_num: number(record, "tracknum"),
            duration: number(record, "duration"),
            remote: flag(record, "remote"),
            url: field(record, &["url"]),
            artwork_url: field(record, &["artwork_url"]),
            artwork_track_id: field(record, &["artwork_track_id", "coverid"]),
            playlist_index: number(record, "playlist index"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
}

impl Item for Playlist {
    const ITEM_TYPE: ItemType = ItemType::Playlist;

    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: field(record, &["id", "playlist_id"])?,
            name: field(record, &["playlist"]).unwrap_or_default(),
        })
    }
}

/// Reference to a library item for `playlistcontrol` commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    Album(String),
    Artist(String),
    Genre(String),
    Year(String),
    Song(String),
    Playlist(String),
}

impl ItemRef {
    /// Filter tag the server uses to address this item.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Album(_) => "album_id",
            Self::Artist(_) => "artist_id",
            Self::Genre(_) => "genre_id",
            Self::Year(_) => "year",
            Self::Song(_) => "track_id",
            Self::Playlist(_) => "playlist_id",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Album(id)
            | Self::Artist(id)
            | Self::Genre(id)
            | Self::Year(id)
            | Self::Song(id)
            | Self::Playlist(id) => id,
        }
    }
}

impl From<&Album> for ItemRef {
    fn from(album: &Album) -> Self {
        Self::Album(album.id.clone())
    }
}

impl From<&Artist> for ItemRef {
    fn from(artist: &Artist) -> Self {
        Self::Artist(artist.id.clone())
    }
}

impl From<&Genre> for ItemRef {
    fn from(genre: &Genre) -> Self {
        Self::Genre(genre.id.clone())
    }
}

impl From<&Year> for ItemRef {
    fn from(year: &Year) -> Self {
        Self::Year(year.id.clone())
    }
}

impl From<&Song> for ItemRef {
    fn from(song: &Song) -> Self {
        Self::Song(song.id.clone())
    }
}

impl From<&Playlist> for ItemRef {
    fn from(playlist: &Playlist) -> Self {
        Self::Playlist(playlist.id.clone())
    }
}
