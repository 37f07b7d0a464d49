//! Inbound line routing
//!
//! Two-level dispatch on the leading tokens of a line:
//!
//! 1. `token[0]` is looked up as a server-level verb (`playlists`, `pref`,
//!    `can`, the global list queries, handshake acknowledgements).
//! 2. Otherwise `token[0]` is an escaped player id. Lines for any player
//!    other than the active one are dropped, then `token[1]` is looked up
//!    as a player verb.
//!
//! Routing is pure: it classifies a line into a [`Route`] and the service
//! runs the matching handler.

use super::codec;
use super::query::QueryKind;

/// Server-level verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalVerb {
    List(QueryKind),
    /// `playlists` replies: list pages and maintenance acknowledgements
    Playlists,
    Pref,
    Can,
    /// Echoes of handshake commands (`listen`, `login`)
    Ack,
}

impl GlobalVerb {
    pub fn parse(verb: &str) -> Option<Self> {
        match verb {
            "playlists" => Some(Self::Playlists),
            "pref" => Some(Self::Pref),
            "can" => Some(Self::Can),
            "listen" | "login" => Some(Self::Ack),
            other => QueryKind::from_global_verb(other).map(Self::List),
        }
    }
}

/// Player-scoped verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerVerb {
    Play,
    Stop,
    Pause,
    Status,
    Playlist,
    Prefset,
    Power,
    Mixer,
    Client,
}

impl PlayerVerb {
    pub fn parse(verb: &str) -> Option<Self> {
        match verb {
            "play" => Some(Self::Play),
            "stop" => Some(Self::Stop),
            "pause" => Some(Self::Pause),
            "status" => Some(Self::Status),
            "playlist" => Some(Self::Playlist),
            "prefset" => Some(Self::Prefset),
            "power" => Some(Self::Power),
            "mixer" => Some(Self::Mixer),
            "client" => Some(Self::Client),
            _ => None,
        }
    }
}

/// Why a line was not routed anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    TooShort,
    /// Notification for a player other than the active one
    OtherPlayer,
    UnknownVerb,
    /// Known verb, but nothing this client reacts to
    Ignored,
}

/// Player-level notifications and poll replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerNotice {
    Play,
    Stop,
    /// `pause 0|1`; `None` when the new state was not included
    Pause(Option<bool>),
    /// `status - 1 ...` state poll reply
    Status,
    /// Current track changed; song metadata must be polled
    NewSong,
    Volume(i64),
    Power(bool),
    /// Mixer change without an absolute value
    MixerChanged,
    /// Player connected, disconnected or was forgotten
    ClientChanged(String),
}

/// Playlist maintenance acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistsNotice {
    Created {
        name: String,
        playlist_id: Option<String>,
        /// Id of an existing playlist with the same name
        conflict: Option<String>,
    },
    Renamed {
        playlist_id: String,
        new_name: String,
        dry_run: bool,
        conflict: Option<String>,
    },
    Deleted { playlist_id: String },
    Edited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Discard(Discard),
    List(QueryKind),
    Playlists(PlaylistsNotice),
    Pref { name: String, value: String },
    Can { name: String, value: String },
    Player(PlayerNotice),
}

/// Collect tagged tokens into (key, value) pairs, skipping untagged ones.
fn tagged_pairs<'a>(tokens: &'a [&'a str]) -> impl Iterator<Item = (String, String)> + 'a {
    tokens.iter().filter_map(|t| codec::split_tagged(t))
}

fn tagged_value(tokens: &[&str], key: &str) -> Option<String> {
    tagged_pairs(tokens).find(|(k, _)| k == key).map(|(_, v)| v)
}

fn flag(token: Option<&&str>) -> Option<bool> {
    match token.copied() {
        Some("1") => Some(true),
        Some("0") => Some(false),
        _ => None,
    }
}

/// Classify one inbound line. `tokens` are the raw tokens; `active_player`
/// is the decoded id of the active player, if any.
pub fn route(tokens: &[&str], active_player: Option<&str>) -> Route {
    if tokens.len() < 2 {
        return Route::Discard(Discard::TooShort);
    }

    if let Some(verb) = GlobalVerb::parse(tokens[0]) {
        return route_global(verb, tokens);
    }

    let player_id = codec::decode(tokens[0]);
    if active_player != Some(player_id.as_str()) {
        return Route::Discard(Discard::OtherPlayer);
    }

    match PlayerVerb::parse(tokens[1]) {
        Some(verb) => route_player(verb, tokens),
        None => Route::Discard(Discard::UnknownVerb),
    }
}

fn route_global(verb: GlobalVerb, tokens: &[&str]) -> Route {
    let second = codec::decode(tokens[1]);
    match verb {
        GlobalVerb::List(kind) => Route::List(kind),
        GlobalVerb::Ack => Route::Discard(Discard::Ignored),
        GlobalVerb::Pref | GlobalVerb::Can => {
            let value = tokens.get(2).map(|t| codec::decode(t)).unwrap_or_default();
            if value == "?" {
                return Route::Discard(Discard::Ignored);
            }
            if verb == GlobalVerb::Pref {
                Route::Pref { name: second, value }
            } else {
                Route::Can { name: second, value }
            }
        }
        GlobalVerb::Playlists => route_playlists(&second, tokens),
    }
}

fn route_playlists(sub: &str, tokens: &[&str]) -> Route {
    let args = &tokens[2..];
    match sub {
        "tracks" => Route::List(QueryKind::PlaylistTracks),
        "new" => match tagged_value(args, "name") {
            Some(name) => Route::Playlists(PlaylistsNotice::Created {
                name,
                playlist_id: tagged_value(args, "playlist_id"),
                conflict: tagged_value(args, "overwritten_playlist_id"),
            }),
            None => Route::Discard(Discard::Ignored),
        },
        "rename" => {
            match (tagged_value(args, "playlist_id"), tagged_value(args, "newname")) {
                (Some(playlist_id), Some(new_name)) => Route::Playlists(PlaylistsNotice::Renamed {
                    playlist_id,
                    new_name,
                    dry_run: tagged_value(args, "dry_run").is_some_and(|v| v == "1"),
                    conflict: tagged_value(args, "overwritten_playlist_id"),
                }),
                _ => Route::Discard(Discard::Ignored),
            }
        }
        "delete" => match tagged_value(args, "playlist_id") {
            Some(playlist_id) => Route::Playlists(PlaylistsNotice::Deleted { playlist_id }),
            None => Route::Discard(Discard::Ignored),
        },
        "edit" => Route::Playlists(PlaylistsNotice::Edited),
        _ => Route::List(QueryKind::Playlists),
    }
}

fn route_player(verb: PlayerVerb, tokens: &[&str]) -> Route {
    let arg = |i: usize| tokens.get(i).map(|t| codec::decode(t));

    let notice = match verb {
        PlayerVerb::Play => PlayerNotice::Play,
        PlayerVerb::Stop => PlayerNotice::Stop,
        PlayerVerb::Pause => PlayerNotice::Pause(flag(tokens.get(2))),
        // `status - 1` is the state poll; `status <start> <n>` pages the playlist
        PlayerVerb::Status => match tokens.get(2) {
            Some(&"-") => PlayerNotice::Status,
            Some(_) => return Route::List(QueryKind::Status),
            None => return Route::Discard(Discard::TooShort),
        },
        PlayerVerb::Playlist => match arg(2).as_deref() {
            Some("newsong") => PlayerNotice::NewSong,
            Some("pause") => PlayerNotice::Pause(flag(tokens.get(3))),
            Some("stop") => PlayerNotice::Stop,
            Some("play") => PlayerNotice::Play,
            _ => return Route::Discard(Discard::Ignored),
        },
        PlayerVerb::Prefset => {
            match (arg(2).as_deref(), arg(3).as_deref(), arg(4)) {
                (Some("server"), Some("volume"), Some(value)) => {
                    PlayerNotice::Volume(codec::parse_int_or_zero(&value))
                }
                _ => return Route::Discard(Discard::Ignored),
            }
        }
        PlayerVerb::Power => match flag(tokens.get(2)) {
            Some(on) => PlayerNotice::Power(on),
            None => return Route::Discard(Discard::Ignored),
        },
        PlayerVerb::Mixer => match (arg(2).as_deref(), arg(3)) {
            // Relative changes (`+5`) and queries (`?`) carry no absolute value
            (Some("volume"), Some(value))
                if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) =>
            {
                PlayerNotice::Volume(codec::parse_int_or_zero(&value))
            }
            (Some("volume"), Some(value)) if value == "?" => {
                return Route::Discard(Discard::Ignored)
            }
            _ => PlayerNotice::MixerChanged,
        },
        PlayerVerb::Client => PlayerNotice::ClientChanged(arg(2).unwrap_or_default()),
    };

    Route::Player(notice)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::codec::tokenize;

    const ACTIVE: &str = "00:04:20:aa:bb:cc";
    const ACTIVE_ESCAPED: &str = "00%3A04%3A20%3Aaa%3Abb%3Acc";

    fn route_line(line: &str) -> Route {
        route(&tokenize(line), Some(ACTIVE))
    }

    fn player_line(rest: &str) -> Route {
        route_line(&format!("{} {}", ACTIVE_ESCAPED, rest))
    }

    #[test]
    fn test_short_lines_are_discarded() {
        assert_eq!(route_line(""), Route::Discard(Discard::TooShort));
        assert_eq!(route_line("albums"), Route::Discard(Discard::TooShort));
    }

    #[test]
    fn test_global_list_verbs() {
        assert_eq!(
            route_line("albums 0 20 count%3A0"),
            Route::List(QueryKind::Albums)
        );
        assert_eq!(
            route_line("search 0 20 term%3Afoo"),
            Route::List(QueryKind::Search)
        );
        assert_eq!(
            route_line("playlists 0 20 count%3A3"),
            Route::List(QueryKind::Playlists)
        );
        assert_eq!(
            route_line("playlists tracks 0 20 playlist_id%3A4 count%3A1"),
            Route::List(QueryKind::PlaylistTracks)
        );
    }

    #[test]
    fn test_global_lines_do_not_need_active_player() {
        assert_eq!(
            route(&tokenize("players 0 20 count%3A0"), None),
            Route::List(QueryKind::Players)
        );
    }

    #[test]
    fn test_pref_and_can() {
        assert_eq!(
            route_line("pref httpport 9000"),
            Route::Pref {
                name: "httpport".into(),
                value: "9000".into()
            }
        );
        assert_eq!(
            route_line("can randomplay 1"),
            Route::Can {
                name: "randomplay".into(),
                value: "1".into()
            }
        );
        // Echo of our own query before the server answered
        assert_eq!(route_line("pref httpport ?"), Route::Discard(Discard::Ignored));
        assert_eq!(route_line("listen 1"), Route::Discard(Discard::Ignored));
    }

    #[test]
    fn test_other_player_is_dropped() {
        let line = "00%3A04%3A20%3A11%3A22%3A33 pause 1";
        assert_eq!(route_line(line), Route::Discard(Discard::OtherPlayer));
        // No active player: every player line is dropped
        assert_eq!(
            route(&tokenize(&format!("{} play", ACTIVE_ESCAPED)), None),
            Route::Discard(Discard::OtherPlayer)
        );
    }

    #[test]
    fn test_pause_variants() {
        assert_eq!(player_line("pause 1"), Route::Player(PlayerNotice::Pause(Some(true))));
        assert_eq!(player_line("pause 0"), Route::Player(PlayerNotice::Pause(Some(false))));
        assert_eq!(player_line("pause"), Route::Player(PlayerNotice::Pause(None)));
        assert_eq!(
            player_line("playlist pause 1"),
            Route::Player(PlayerNotice::Pause(Some(true)))
        );
    }

    #[test]
    fn test_status_poll_vs_status_list() {
        assert_eq!(
            player_line("status - 1 mode%3Aplay"),
            Route::Player(PlayerNotice::Status)
        );
        assert_eq!(
            player_line("status 0 20 playlist_tracks%3A3"),
            Route::List(QueryKind::Status)
        );
    }

    #[test]
    fn test_playlist_newsong() {
        assert_eq!(
            player_line("playlist newsong Blue%20Train 3"),
            Route::Player(PlayerNotice::NewSong)
        );
        assert_eq!(
            player_line("playlist index +1"),
            Route::Discard(Discard::Ignored)
        );
    }

    #[test]
    fn test_volume_notifications() {
        assert_eq!(
            player_line("prefset server volume 35"),
            Route::Player(PlayerNotice::Volume(35))
        );
        assert_eq!(
            player_line("mixer volume 40"),
            Route::Player(PlayerNotice::Volume(40))
        );
        assert_eq!(
            player_line("mixer volume %2B5"),
            Route::Player(PlayerNotice::MixerChanged)
        );
        assert_eq!(
            player_line("prefset server repeat 1"),
            Route::Discard(Discard::Ignored)
        );
    }

    #[test]
    fn test_power_and_client() {
        assert_eq!(player_line("power 0"), Route::Player(PlayerNotice::Power(false)));
        assert_eq!(player_line("power"), Route::Discard(Discard::Ignored));
        assert_eq!(
            player_line("client disconnect"),
            Route::Player(PlayerNotice::ClientChanged("disconnect".into()))
        );
    }

    #[test]
    fn test_unknown_player_verb() {
        assert_eq!(player_line("sync -"), Route::Discard(Discard::UnknownVerb));
    }

    #[test]
    fn test_playlist_create_conflict() {
        assert_eq!(
            route_line("playlists new name%3AMix overwritten_playlist_id%3A12"),
            Route::Playlists(PlaylistsNotice::Created {
                name: "Mix".into(),
                playlist_id: None,
                conflict: Some("12".into()),
            })
        );
        assert_eq!(
            route_line("playlists new name%3AMix playlist_id%3A13"),
            Route::Playlists(PlaylistsNotice::Created {
                name: "Mix".into(),
                playlist_id: Some("13".into()),
                conflict: None,
            })
        );
    }

    #[test]
    fn test_playlist_rename_dry_run() {
        assert_eq!(
            route_line("playlists rename playlist_id%3A4 newname%3AFresh%20Mix dry_run%3A1"),
            Route::Playlists(PlaylistsNotice::Renamed {
                playlist_id: "4".into(),
                new_name: "Fresh Mix".into(),
                dry_run: true,
                conflict: None,
            })
        );
        assert_eq!(
            route_line("playlists delete playlist_id%3A4"),
            Route::Playlists(PlaylistsNotice::Deleted {
                playlist_id: "4".into()
            })
        );
    }
}
