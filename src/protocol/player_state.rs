//! Playback state of the active player
//!
//! State is fed from two directions: lightweight push notifications
//! (`play`, `stop`, `pause 1`, `power 0`, ...) and full `status - 1`
//! poll replies. Every mutator returns the events it caused so the caller
//! can broadcast them after releasing the state lock.

use serde::Serialize;

use super::codec;
use super::model::{Item, Record, Song};

/// Field that opens the current-song record inside a status reply.
pub const PLAYLIST_INDEX_FIELD: &str = "playlist index";

/// Discrete changes broadcast to the player listener.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    VolumeChanged { volume: u8 },
    /// `paused` distinguishes an explicit pause from a stop
    PlayStatusChanged { playing: bool, paused: bool },
    MusicChanged { song: Option<Song> },
    TimeChanged {
        elapsed_seconds: Option<u32>,
        duration_seconds: Option<u32>,
    },
    PlayerChanged {
        player_id: Option<String>,
        name: Option<String>,
    },
    PowerStatusChanged { powered_on: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerState {
    pub playing: bool,
    pub powered_on: bool,
    pub current_song: Option<Song>,
    pub current_artwork_url: Option<String>,
    pub elapsed_seconds: Option<u32>,
    pub duration_seconds: Option<u32>,
    pub volume: Option<u8>,
}

/// Decoded `<player> status - 1 ...` poll reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReply {
    /// Player-level fields (`mode`, `power`, `time`, `mixer volume`, ...)
    pub header: Record,
    pub song: Option<Song>,
}

impl StatusReply {
    pub fn mode(&self) -> Option<&str> {
        self.header.get("mode").map(String::as_str)
    }
}

/// Parse a status poll reply. Tokens are the raw tokens of the whole line;
/// untagged tokens after the fixed prefix are skipped.
pub fn parse_status(tokens: &[&str]) -> StatusReply {
    let mut header = Record::new();
    let mut song_record: Option<Record> = None;

    for token in tokens.iter().skip(4) {
        let Some((key, value)) = codec::split_tagged(token) else {
            continue;
        };
        match song_record.as_mut() {
            Some(record) => {
                // Only the first song of the playlist window is current
                if key == PLAYLIST_INDEX_FIELD {
                    break;
                }
                record.insert(key, value);
            }
            None if key == PLAYLIST_INDEX_FIELD => {
                let mut record = Record::new();
                record.insert(key, value);
                song_record = Some(record);
            }
            None => {
                header.insert(key, value);
            }
        }
    }

    StatusReply {
        header,
        song: song_record.as_ref().and_then(Song::from_record),
    }
}

/// Artwork for a song: an explicit `artwork_url` (made absolute against
/// `base_url` when relative), otherwise the server's cover endpoint for
/// the artwork track.
pub fn artwork_url(song: &Song, base_url: Option<&str>) -> Option<String> {
    let absolute = |path: &str| match base_url {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/')),
        None => path.to_string(),
    };

    if let Some(url) = song.artwork_url.as_deref().filter(|u| !u.is_empty()) {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Some(url.to_string());
        }
        return Some(absolute(url));
    }

    let track = song.artwork_track_id.as_deref().or(if song.remote {
        None
    } else {
        Some(song.id.as_str())
    })?;
    Some(absolute(&format!("/music/{}/cover.jpg", codec::encode(track))))
}

fn seconds(value: Option<&String>) -> Option<u32> {
    let secs = value?.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| secs as u32)
}

impl PlayerState {
    /// Explicit `play` / `stop` notification.
    pub fn set_playing(&mut self, playing: bool) -> PlayerEvent {
        self.playing = playing;
        PlayerEvent::PlayStatusChanged {
            playing,
            paused: false,
        }
    }

    /// `pause 0|1` notification. Only a real transition produces an event.
    pub fn set_paused(&mut self, paused: bool) -> Option<PlayerEvent> {
        let playing = !paused;
        if self.playing == playing {
            return None;
        }
        self.playing = playing;
        Some(PlayerEvent::PlayStatusChanged { playing, paused })
    }

    pub fn set_power(&mut self, powered_on: bool) -> Option<PlayerEvent> {
        if self.powered_on == powered_on {
            return None;
        }
        self.powered_on = powered_on;
        Some(PlayerEvent::PowerStatusChanged { powered_on })
    }

    pub fn set_volume(&mut self, volume: i64) -> Option<PlayerEvent> {
        // Muted players report a negative volume
        let volume = u8::try_from(volume.unsigned_abs().min(100)).unwrap_or(100);
        if self.volume == Some(volume) {
            return None;
        }
        self.volume = Some(volume);
        Some(PlayerEvent::VolumeChanged { volume })
    }

    /// Apply a full status poll. `artwork` is the already derived artwork
    /// URL for `status.song`.
    pub fn apply_status(&mut self, status: StatusReply, artwork: Option<String>) -> Vec<PlayerEvent> {
        let mut events = Vec::new();

        if let Some(power) = status.header.get("power") {
            events.extend(self.set_power(power == "1"));
        }

        if let Some(mode) = status.mode() {
            let playing = mode == "play";
            if playing != self.playing {
                self.playing = playing;
                events.push(PlayerEvent::PlayStatusChanged {
                    playing,
                    paused: mode == "pause",
                });
            }
        }

        if let Some(volume) = status.header.get("mixer volume") {
            events.extend(self.set_volume(codec::parse_int_or_zero(volume)));
        }

        let song_changed = status.song != self.current_song;
        if song_changed {
            self.current_song = status.song;
            self.current_artwork_url = artwork;
            events.push(PlayerEvent::MusicChanged {
                song: self.current_song.clone(),
            });
        }

        let elapsed = seconds(status.header.get("time"));
        let duration = seconds(status.header.get("duration")).or_else(|| {
            self.current_song
                .as_ref()
                .and_then(|s| s.duration)
                .map(|d| d as u32)
        });
        let elapsed_changed = elapsed != self.elapsed_seconds;
        self.elapsed_seconds = elapsed;
        self.duration_seconds = duration;
        if elapsed_changed || song_changed {
            events.push(PlayerEvent::TimeChanged {
                elapsed_seconds: elapsed,
                duration_seconds: duration,
            });
        }

        events
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
