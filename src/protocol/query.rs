//! Paginated list query descriptors
//!
//! One static descriptor per command family. A descriptor names the verb,
//! whether the command is addressed to a player, which tagged filter
//! parameters it accepts, and the result sets a reply may carry. Most
//! queries return a single result set; `search` multiplexes four.

use std::fmt;

use super::codec;
use super::model::ItemType;

/// Command families that support paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Players,
    Albums,
    Artists,
    Genres,
    Years,
    Songs,
    Playlists,
    PlaylistTracks,
    Search,
    /// Current playlist of the active player (`<player> status <start> <n>`)
    Status,
}

/// One result set inside a reply.
#[derive(Debug)]
pub struct ResultSet {
    /// Field carrying the total number of matches for this set
    pub count_field: &'static str,
    /// Field names that open a new record of this set
    pub delimiters: &'static [&'static str],
    pub item_type: ItemType,
}

impl ResultSet {
    pub fn is_delimiter(&self, key: &str) -> bool {
        self.delimiters.contains(&key)
    }
}

/// Static description of a paginated command.
#[derive(Debug)]
pub struct ListQuery {
    pub kind: QueryKind,
    /// Command verb; may be more than one word (`playlists tracks`)
    pub verb: &'static str,
    pub player_scoped: bool,
    /// Tagged parameters the command accepts
    pub params: &'static [&'static str],
    pub result_sets: &'static [ResultSet],
}

impl ListQuery {
    /// Number of tokens that precede `<start> <count>` in a reply.
    pub fn token_offset(&self) -> usize {
        self.verb.split(' ').count() + usize::from(self.player_scoped)
    }

    pub fn accepts_param(&self, key: &str) -> bool {
        self.params.contains(&key)
    }

    /// Build the request line without the player prefix or correlation id.
    pub fn request(&self, start: usize, page_size: usize, filters: &[String]) -> String {
        let mut line = format!("{} {} {}", self.verb, start, page_size);
        for filter in filters {
            line.push(' ');
            line.push_str(filter);
        }
        line
    }
}

const fn single(count_field: &'static str, delimiters: &'static [&'static str], item_type: ItemType) -> ResultSet {
    ResultSet {
        count_field,
        delimiters,
        item_type,
    }
}

static PLAYERS: ListQuery = ListQuery {
    kind: QueryKind::Players,
    verb: "players",
    player_scoped: false,
    params: &["playerprefs", "charset"],
    result_sets: &[single("count", &["playerindex", "playerid"], ItemType::Player)],
};

static ALBUMS: ListQuery = ListQuery {
    kind: QueryKind::Albums,
    verb: "albums",
    player_scoped: false,
    params: &[
        "search", "genre_id", "artist_id", "track_id", "year", "compilation", "sort", "tags",
        "charset",
    ],
    result_sets: &[single("count", &["id", "album_id"], ItemType::Album)],
};

static ARTISTS: ListQuery = ListQuery {
    kind: QueryKind::Artists,
    verb: "artists",
    player_scoped: false,
    params: &["search", "genre_id", "album_id", "track_id", "tags", "charset"],
    result_sets: &[single("count", &["id"], ItemType::Artist)],
};

static GENRES: ListQuery = ListQuery {
    kind: QueryKind::Genres,
    verb: "genres",
    player_scoped: false,
    params: &[
        "search", "artist_id", "album_id", "track_id", "year", "tags", "charset",
    ],
    result_sets: &[single("count", &["id"], ItemType::Genre)],
};

static YEARS: ListQuery = ListQuery {
    kind: QueryKind::Years,
    verb: "years",
    player_scoped: false,
    params: &["charset"],
    result_sets: &[single("count", &["year"], ItemType::Year)],
};

static SONGS: ListQuery = ListQuery {
    kind: QueryKind::Songs,
    verb: "songs",
    player_scoped: false,
    params: &[
        "genre_id", "artist_id", "album_id", "year", "search", "tags", "sort", "charset",
    ],
    result_sets: &[single("count", &["id"], ItemType::Song)],
};

static PLAYLISTS: ListQuery = ListQuery {
    kind: QueryKind::Playlists,
    verb: "playlists",
    player_scoped: false,
    params: &["search", "tags", "charset"],
    result_sets: &[single("count", &["id"], ItemType::Playlist)],
};

static PLAYLIST_TRACKS: ListQuery = ListQuery {
    kind: QueryKind::PlaylistTracks,
    verb: "playlists tracks",
    player_scoped: false,
    params: &["playlist_id", "tags", "charset"],
    result_sets: &[single("count", &["playlist index", "id"], ItemType::Song)],
};

static SEARCH: ListQuery = ListQuery {
    kind: QueryKind::Search,
    verb: "search",
    player_scoped: false,
    params: &["term", "charset"],
    result_sets: &[
        single("genres_count", &["genre_id"], ItemType::Genre),
        single("albums_count", &["album_id"], ItemType::Album),
        single("contributors_count", &["contributor_id"], ItemType::Artist),
        single("tracks_count", &["track_id"], ItemType::Song),
    ],
};

static STATUS: ListQuery = ListQuery {
    kind: QueryKind::Status,
    verb: "status",
    player_scoped: true,
    params: &["tags", "charset", "subscribe"],
    result_sets: &[single("playlist_tracks", &["playlist index", "id"], ItemType::Song)],
};

impl QueryKind {
    pub fn descriptor(self) -> &'static ListQuery {
        match self {
            Self::Players => &PLAYERS,
            Self::Albums => &ALBUMS,
            Self::Artists => &ARTISTS,
            Self::Genres => &GENRES,
            Self::Years => &YEARS,
            Self::Songs => &SONGS,
            Self::Playlists => &PLAYLISTS,
            Self::PlaylistTracks => &PLAYLIST_TRACKS,
            Self::Search => &SEARCH,
            Self::Status => &STATUS,
        }
    }

    /// Resolve a server-level (not player-scoped) list verb.
    /// `playlists` is routed separately because it shares its verb with
    /// the playlist maintenance commands.
    pub fn from_global_verb(verb: &str) -> Option<Self> {
        match verb {
            "players" => Some(Self::Players),
            "albums" => Some(Self::Albums),
            "artists" => Some(Self::Artists),
            "genres" => Some(Self::Genres),
            "years" => Some(Self::Years),
            "songs" => Some(Self::Songs),
            "search" => Some(Self::Search),
            _ => None,
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().verb)
    }
}

/// Tagged filter parameters for a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace the value of `key`, or append it.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key, value)),
        }
    }

    /// Overlay `other` on top of these params; `other` wins on conflicts.
    pub fn merge(&mut self, other: QueryParams) {
        for (key, value) in other.params {
            self.set(key, value);
        }
    }

    /// Check every key against the descriptor. Returns the first rejected key.
    pub fn validate(&self, query: &ListQuery) -> Result<(), String> {
        match self.params.iter().find(|(k, _)| !query.accepts_param(k)) {
            Some((key, _)) => Err(key.clone()),
            None => Ok(()),
        }
    }

    /// Wire tokens (`key:escaped-value`) in insertion order.
    pub fn tokens(&self) -> Vec<String> {
        self.params
            .iter()
            .map(|(k, v)| codec::tagged(k, v))
            .collect()
    }
}
