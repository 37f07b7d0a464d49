//! SqueezeService - the client context
//!
//! One cloneable handle owns every component: dispatcher, pager, player
//! state, active player, server capabilities and the callback registry.
//! The public command surface never fails with an error; it returns
//! `false` when the command could not be queued (not connected, no active
//! player, rejected parameters) and reports everything else through the
//! registered listeners.
//!
//! Lock order, where more than one is taken: session -> lane, and
//! pager -> lane. Listener hand-off never blocks.

pub mod connection;
pub mod dispatcher;
pub mod handle;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{
    CallbackRegistry, ConnectionEvent, ListPage, Listenable, PlayerEvent,
    PlaylistMaintenanceEvent,
};
use crate::config::{self, Config, SavedState, DEFAULT_HTTP_PORT};
use crate::protocol::codec::{self, tagged};
use crate::protocol::model::{Item, ItemRef, ItemType, Player, Record};
use crate::protocol::pager::{NextPage, Pager, ReplyOutcome};
use crate::protocol::player_state::{self, PlayerState};
use crate::protocol::query::{QueryKind, QueryParams};
use crate::protocol::router::{self, Discard, PlayerNotice, PlaylistsNotice, Route};

pub use connection::{ConnectError, ServerAddress};
use connection::ServiceSession;
use dispatcher::Dispatcher;
use handle::{RetryConfig, SessionHandle};

/// Tags requested for songs: artist, artist id, album, album id, year,
/// track number, duration, url, remote flag, artwork fields.
pub const SONG_TAGS: &str = "aslejJKcdtuxy";

/// Tags requested for albums: album, artist, year, artist id, artwork track.
pub const ALBUM_TAGS: &str = "laySj";

/// Capabilities and preferences reported during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerCapabilities {
    pub http_port: Option<u16>,
    /// Server-side album sort preference (`jivealbumsort`)
    pub album_sort: Option<String>,
    pub music_folder: bool,
    pub random_play: bool,
}

/// Modes accepted by `randomplay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomPlayMode {
    Tracks,
    Albums,
    Artists,
    Years,
}

impl RandomPlayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tracks => "tracks",
            Self::Albums => "albums",
            Self::Artists => "contributors",
            Self::Years => "year",
        }
    }
}

struct SessionSlot {
    server: ServerAddress,
    shutdown: CancellationToken,
    generation: u64,
}

struct Inner {
    config: Config,
    state_path: Option<PathBuf>,
    registry: CallbackRegistry,
    dispatcher: Dispatcher,
    pager: Mutex<Pager>,
    player_state: RwLock<PlayerState>,
    active_player: RwLock<Option<Player>>,
    capabilities: RwLock<ServerCapabilities>,
    saved: Mutex<SavedState>,
    session: Mutex<Option<SessionSlot>>,
    connected: AtomicBool,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct SqueezeService {
    inner: Arc<Inner>,
}

impl SqueezeService {
    /// Build the service and read the persisted state from the config
    /// directory.
    pub fn new(config: Config) -> Self {
        Self::with_state_path(config, Some(config::get_state_file_path()))
    }

    /// `state_path = None` disables persistence of the last active player.
    pub fn with_state_path(config: Config, state_path: Option<PathBuf>) -> Self {
        let saved = state_path
            .as_deref()
            .map(SavedState::load_from)
            .unwrap_or_default();
        let pager = Pager::new(config.page_size, config.max_list_size);

        Self {
            inner: Arc::new(Inner {
                config,
                state_path,
                registry: CallbackRegistry::new(),
                dispatcher: Dispatcher::new(),
                pager: Mutex::new(pager),
                player_state: RwLock::new(PlayerState::default()),
                active_player: RwLock::new(None),
                capabilities: RwLock::new(ServerCapabilities::default()),
                saved: Mutex::new(saved),
                session: Mutex::new(None),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.inner.registry
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Start connecting to `server` (`host[:port]`) in the background.
    /// Returns false only when the address is unusable or no Tokio runtime
    /// is available; connection failures arrive on the connection listener.
    pub fn connect(&self, server: &str) -> bool {
        let server = match ServerAddress::parse(server) {
            Ok(server) => server,
            Err(e) => {
                warn!("Not connecting: {}", e);
                self.inner.registry.emit_connection(ConnectionEvent::ConnectFailed {
                    server: server.to_string(),
                    error: e.to_string(),
                });
                return false;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("connect() needs a Tokio runtime");
            return false;
        };

        self.disconnect();

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shutdown = CancellationToken::new();
        {
            let mut slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Some(SessionSlot {
                server: server.clone(),
                shutdown: shutdown.clone(),
                generation,
            });
        }

        info!("Connecting to {}", server);
        let handle = SessionHandle::new(
            ServiceSession {
                service: self.clone(),
                server,
                generation,
            },
            shutdown,
        );
        let auto_reconnect = self.inner.config.auto_reconnect;
        let service = self.clone();
        runtime.spawn(async move {
            let result = if auto_reconnect {
                handle.run_with_retry(RetryConfig::default()).await
            } else {
                handle.run().await
            };
            if let Err(e) = result {
                debug!("Session finished: {}", e);
            }
            service.session_ended(generation);
        });
        true
    }

    /// Close the connection and clear all session state. Safe to call in
    /// any state, including never connected.
    pub fn disconnect(&self) {
        let slot = {
            let mut slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        let had_session = slot.is_some();
        if let Some(slot) = slot {
            info!("Disconnecting from {}", slot.server);
            slot.shutdown.cancel();
        }

        self.inner.dispatcher.detach();
        let was_connected = self.inner.connected.swap(false, Ordering::SeqCst);
        self.clear_session_state();

        if had_session || was_connected {
            self.inner
                .registry
                .emit_connection(ConnectionEvent::Disconnected { requested: true });
        }
    }

    /// Server of the current session, if any.
    pub fn server(&self) -> Option<ServerAddress> {
        let slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|s| s.server.clone())
    }

    /// Open the dispatcher lane for connection `generation`, unless a newer
    /// connect or a disconnect superseded it.
    pub(crate) fn attach_connection(&self, generation: u64) -> Option<mpsc::Receiver<String>> {
        let slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(s) if s.generation == generation => Some(self.inner.dispatcher.attach()),
            _ => None,
        }
    }

    /// Send the handshake and announce the connection. Returns whether a
    /// `login` was part of it.
    pub(crate) fn start_session(&self, generation: u64) -> bool {
        let credentials = self.inner.config.credentials();
        let mut batch = Vec::new();
        if let Some((user, pass)) = &credentials {
            batch.push(format!("login {} {}", codec::encode(user), codec::encode(pass)));
        }
        batch.extend(
            [
                "listen 1",
                "pref httpport ?",
                "pref jivealbumsort ?",
                "can musicfolder ?",
                "can randomplay ?",
            ]
            .map(String::from),
        );
        if !self.inner.dispatcher.send_batch(&batch) {
            warn!("Handshake could not be queued");
        }

        let server = {
            let slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
            slot.as_ref()
                .filter(|s| s.generation == generation)
                .map(|s| s.server.to_string())
        };
        if let Some(server) = server {
            self.inner.connected.store(true, Ordering::SeqCst);
            self.inner
                .registry
                .emit_connection(ConnectionEvent::Connected { server });
            self.request_players(0);
        }

        credentials.is_some()
    }

    /// Session `generation` will not reconnect. Frees its slot so a later
    /// `disconnect()` has nothing left to report.
    pub(crate) fn session_ended(&self, generation: u64) {
        let mut slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            slot.take();
        }
    }

    /// Transport for connection `generation` is gone.
    pub(crate) fn connection_lost(&self, generation: u64, requested: bool) {
        let current = {
            let slot = self.inner.session.lock().unwrap_or_else(|e| e.into_inner());
            slot.as_ref().is_some_and(|s| s.generation == generation)
        };
        if !current {
            // disconnect() or a newer connect() already cleaned up
            return;
        }

        self.inner.dispatcher.detach();
        let was_connected = self.inner.connected.swap(false, Ordering::SeqCst);
        self.clear_session_state();
        if was_connected {
            info!("Connection lost");
            self.inner
                .registry
                .emit_connection(ConnectionEvent::Disconnected { requested });
        }
    }

    fn clear_session_state(&self) {
        {
            let mut state = self.inner.player_state.write().unwrap_or_else(|e| e.into_inner());
            state.clear();
        }
        {
            let mut active = self.inner.active_player.write().unwrap_or_else(|e| e.into_inner());
            active.take();
        }
        {
            let mut caps = self.inner.capabilities.write().unwrap_or_else(|e| e.into_inner());
            *caps = ServerCapabilities::default();
        }
        let mut pager = self.inner.pager.lock().unwrap_or_else(|e| e.into_inner());
        pager.reset();
    }

    // =========================================================================
    // State queries
    // =========================================================================

    pub fn player_state(&self) -> PlayerState {
        let state = self.inner.player_state.read().unwrap_or_else(|e| e.into_inner());
        state.clone()
    }

    pub fn active_player(&self) -> Option<Player> {
        let active = self.inner.active_player.read().unwrap_or_else(|e| e.into_inner());
        active.clone()
    }

    fn active_player_id(&self) -> Option<String> {
        let active = self.inner.active_player.read().unwrap_or_else(|e| e.into_inner());
        active.as_ref().map(|p| p.id.clone())
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        let caps = self.inner.capabilities.read().unwrap_or_else(|e| e.into_inner());
        caps.clone()
    }

    /// Base URL of the server's web interface, for artwork.
    pub fn http_base(&self) -> Option<String> {
        let port = self.capabilities().http_port.unwrap_or(DEFAULT_HTTP_PORT);
        self.server().map(|s| s.http_base(port))
    }

    pub fn last_player_id(&self) -> Option<String> {
        let saved = self.inner.saved.lock().unwrap_or_else(|e| e.into_inner());
        saved.last_player_id.clone()
    }

    // =========================================================================
    // Listener registration
    // =========================================================================

    pub fn register_list<T: Listenable>(&self) -> mpsc::Receiver<ListPage<T>> {
        self.inner.registry.register_list::<T>()
    }

    /// Clear the listener for `T` and discard every reply still in flight
    /// for that item type.
    pub fn unregister_list<T: Listenable>(&self) -> bool {
        let removed = self.inner.registry.unregister_list::<T>();
        let mut pager = self.inner.pager.lock().unwrap_or_else(|e| e.into_inner());
        pager.cancel(T::ITEM_TYPE, self.inner.dispatcher.peek_next_id());
        removed
    }

    pub fn register_connection_listener(&self) -> mpsc::Receiver<ConnectionEvent> {
        self.inner.registry.register_connection()
    }

    pub fn unregister_connection_listener(&self) -> bool {
        self.inner.registry.unregister_connection()
    }

    pub fn register_player_listener(&self) -> mpsc::Receiver<PlayerEvent> {
        self.inner.registry.register_player()
    }

    pub fn unregister_player_listener(&self) -> bool {
        self.inner.registry.unregister_player()
    }

    pub fn register_maintenance_listener(&self) -> mpsc::Receiver<PlaylistMaintenanceEvent> {
        self.inner.registry.register_maintenance()
    }

    pub fn unregister_maintenance_listener(&self) -> bool {
        self.inner.registry.unregister_maintenance()
    }

    // =========================================================================
    // Sending
    // =========================================================================

    fn command(&self, command: &str) -> bool {
        self.is_connected() && self.inner.dispatcher.send_command(command).is_some()
    }

    /// Prefix `command` with the active player. False without one.
    fn player_command(&self, command: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.active_player_id() {
            Some(id) => self.inner.dispatcher.send_player_command(&id, command).is_some(),
            None => {
                debug!("No active player for '{}'", command);
                false
            }
        }
    }

    fn send_page_request(
        &self,
        kind: QueryKind,
        player_id: Option<&str>,
        start: usize,
        count: usize,
        params: QueryParams,
    ) -> bool {
        let line = kind.descriptor().request(start, count, &params.tokens());
        let line = match player_id {
            Some(id) => format!("{} {}", codec::encode(id), line),
            None => line,
        };

        let mut pager = self.inner.pager.lock().unwrap_or_else(|e| e.into_inner());
        self.inner
            .dispatcher
            .send_command_with(&line, |id| pager.begin_request(kind, start, params, id))
            .is_some()
    }

    // =========================================================================
    // Paginated queries
    // =========================================================================

    /// Request the first page (or any page) of `kind`. Every following
    /// page is requested automatically while the listener keeps up.
    pub fn request_list(&self, kind: QueryKind, start: usize, params: QueryParams) -> bool {
        if !self.is_connected() {
            return false;
        }
        let query = kind.descriptor();
        if let Err(key) = params.validate(query) {
            warn!("{}: unsupported parameter '{}'", kind, key);
            return false;
        }
        if start >= self.inner.config.max_list_size.max(1) {
            warn!("{}: start {} beyond the list size limit", kind, start);
            return false;
        }

        let player_id = if query.player_scoped {
            match self.active_player_id() {
                Some(id) => Some(id),
                None => return false,
            }
        } else {
            None
        };

        self.send_page_request(
            kind,
            player_id.as_deref(),
            start,
            self.inner.config.page_size,
            params,
        )
    }

    pub fn request_players(&self, start: usize) -> bool {
        self.request_list(QueryKind::Players, start, QueryParams::new())
    }

    /// Albums; `tags` default to [`ALBUM_TAGS`] and `sort` to the server's
    /// album sort preference.
    pub fn request_albums(&self, start: usize, mut params: QueryParams) -> bool {
        if params.get("tags").is_none() {
            params.set("tags", ALBUM_TAGS);
        }
        if params.get("sort").is_none() {
            if let Some(sort) = self.capabilities().album_sort {
                params.set("sort", sort);
            }
        }
        self.request_list(QueryKind::Albums, start, params)
    }

    pub fn request_artists(&self, start: usize, params: QueryParams) -> bool {
        self.request_list(QueryKind::Artists, start, params)
    }

    pub fn request_genres(&self, start: usize, params: QueryParams) -> bool {
        self.request_list(QueryKind::Genres, start, params)
    }

    pub fn request_years(&self, start: usize) -> bool {
        self.request_list(QueryKind::Years, start, QueryParams::new())
    }

    pub fn request_songs(&self, start: usize, mut params: QueryParams) -> bool {
        if params.get("tags").is_none() {
            params.set("tags", SONG_TAGS);
        }
        self.request_list(QueryKind::Songs, start, params)
    }

    pub fn request_playlists(&self, start: usize, params: QueryParams) -> bool {
        self.request_list(QueryKind::Playlists, start, params)
    }

    pub fn request_playlist_tracks(&self, playlist_id: &str, start: usize) -> bool {
        let params = QueryParams::new()
            .with("playlist_id", playlist_id)
            .with("tags", SONG_TAGS);
        self.request_list(QueryKind::PlaylistTracks, start, params)
    }

    /// Unified search over genres, albums, artists and songs.
    pub fn search(&self, term: &str, start: usize) -> bool {
        if term.trim().is_empty() {
            return false;
        }
        self.request_list(QueryKind::Search, start, QueryParams::new().with("term", term))
    }

    /// Current playlist of the active player.
    pub fn request_current_playlist(&self, start: usize) -> bool {
        self.request_list(
            QueryKind::Status,
            start,
            QueryParams::new().with("tags", SONG_TAGS),
        )
    }

    // =========================================================================
    // Active player
    // =========================================================================

    /// Make `player` the one this client drives: unsubscribe from the old
    /// player, reset playback state, subscribe to the new one.
    pub fn set_active_player(&self, player: Player) -> bool {
        if !self.is_connected() {
            return false;
        }

        let previous = {
            let mut active = self.inner.active_player.write().unwrap_or_else(|e| e.into_inner());
            active.replace(player.clone())
        };
        if previous.as_ref().is_some_and(|p| p.id == player.id) {
            return true;
        }

        if let Some(old) = &previous {
            if self
                .inner
                .dispatcher
                .send_player_command(&old.id, "status - 1 subscribe:-")
                .is_none()
            {
                warn!("Could not unsubscribe from {}", old.id);
            }
        }
        {
            let mut state = self.inner.player_state.write().unwrap_or_else(|e| e.into_inner());
            state.clear();
        }

        info!("Active player: {} ({})", player.name, player.id);
        self.inner.registry.emit_player(PlayerEvent::PlayerChanged {
            player_id: Some(player.id.clone()),
            name: Some(player.name.clone()),
        });
        let subscribed = self
            .inner
            .dispatcher
            .send_player_command(
                &player.id,
                &format!("status - 1 subscribe:1 {}", tagged("tags", SONG_TAGS)),
            )
            .is_some();
        if !subscribed {
            warn!("Could not subscribe to {}", player.id);
        }
        self.persist_last_player(&player.id);
        subscribed
    }

    fn persist_last_player(&self, player_id: &str) {
        let state = {
            let mut saved = self.inner.saved.lock().unwrap_or_else(|e| e.into_inner());
            if saved.last_player_id.as_deref() == Some(player_id) {
                return;
            }
            saved.last_player_id = Some(player_id.to_string());
            saved.clone()
        };
        let Some(path) = self.inner.state_path.clone() else {
            return;
        };

        let save = move || {
            if let Err(e) = state.save_to(&path) {
                warn!("Failed to save {}: {}", path.display(), e);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(save);
            }
            Err(_) => save(),
        }
    }

    /// Pick a player when none is active: the last one used, if listed,
    /// else the first.
    fn select_default_player(&self, players: &[Player]) {
        if self.active_player_id().is_some() {
            return;
        }
        let last = self.last_player_id();
        let pick = last
            .and_then(|id| players.iter().find(|p| p.id == id))
            .or_else(|| players.first());
        if let Some(player) = pick {
            self.set_active_player(player.clone());
        }
    }

    // =========================================================================
    // Transport
    // =========================================================================

    pub fn power(&self, on: bool) -> bool {
        self.player_command(if on { "power 1" } else { "power 0" })
    }

    pub fn toggle_power(&self) -> bool {
        self.player_command("power")
    }

    pub fn play(&self) -> bool {
        self.player_command("play")
    }

    /// Toggle between playing and paused.
    pub fn toggle_pause(&self) -> bool {
        self.player_command("pause")
    }

    pub fn set_paused(&self, paused: bool) -> bool {
        self.player_command(if paused { "pause 1" } else { "pause 0" })
    }

    pub fn stop(&self) -> bool {
        self.player_command("stop")
    }

    pub fn next(&self) -> bool {
        self.player_command("playlist index +1")
    }

    pub fn previous(&self) -> bool {
        self.player_command("playlist index -1")
    }

    /// Relative volume change in percent points.
    pub fn adjust_volume(&self, delta: i32) -> bool {
        if delta == 0 {
            return self.is_connected() && self.active_player_id().is_some();
        }
        self.player_command(&format!("mixer volume {:+}", delta.clamp(-100, 100)))
    }

    pub fn set_volume(&self, volume: u8) -> bool {
        self.player_command(&format!("mixer volume {}", volume.min(100)))
    }

    pub fn seek(&self, seconds: u32) -> bool {
        self.player_command(&format!("time {}", seconds))
    }

    /// Jump to a position in the current playlist.
    pub fn jump_to(&self, index: u32) -> bool {
        self.player_command(&format!("playlist index {}", index))
    }

    pub fn request_status(&self) -> bool {
        self.player_command(&format!("status - 1 {}", tagged("tags", SONG_TAGS)))
    }

    pub fn random_play(&self, mode: RandomPlayMode) -> bool {
        if !self.capabilities().random_play {
            debug!("Server does not support randomplay");
            return false;
        }
        self.player_command(&format!("randomplay {}", mode.as_str()))
    }

    // =========================================================================
    // Current playlist
    // =========================================================================

    fn playlist_control(&self, cmd: &str, item: &ItemRef) -> bool {
        self.player_command(&format!(
            "playlistcontrol {} {}",
            tagged("cmd", cmd),
            tagged(item.tag(), item.id())
        ))
    }

    /// Replace the current playlist with `item` and start playing.
    pub fn play_item(&self, item: &ItemRef) -> bool {
        self.playlist_control("load", item)
    }

    pub fn add_item(&self, item: &ItemRef) -> bool {
        self.playlist_control("add", item)
    }

    /// Insert `item` after the current song.
    pub fn insert_item(&self, item: &ItemRef) -> bool {
        self.playlist_control("insert", item)
    }

    pub fn move_in_playlist(&self, from: u32, to: u32) -> bool {
        self.player_command(&format!("playlist move {} {}", from, to))
    }

    pub fn remove_from_playlist(&self, index: u32) -> bool {
        self.player_command(&format!("playlist delete {}", index))
    }

    pub fn clear_playlist(&self) -> bool {
        self.player_command("playlist clear")
    }

    /// Save the current playlist under `name`.
    pub fn save_playlist(&self, name: &str) -> bool {
        !name.trim().is_empty() && self.player_command(&format!("playlist save {}", codec::encode(name)))
    }

    // =========================================================================
    // Saved playlists
    // =========================================================================

    pub fn create_playlist(&self, name: &str) -> bool {
        !name.trim().is_empty() && self.command(&format!("playlists new {}", tagged("name", name)))
    }

    /// Rename in two steps: a dry run first, the real rename only when the
    /// server reports no name clash.
    pub fn rename_playlist(&self, playlist_id: &str, new_name: &str) -> bool {
        !new_name.trim().is_empty()
            && self.command(&format!(
                "playlists rename {} {} dry_run:1",
                tagged("playlist_id", playlist_id),
                tagged("newname", new_name)
            ))
    }

    pub fn delete_playlist(&self, playlist_id: &str) -> bool {
        self.command(&format!("playlists delete {}", tagged("playlist_id", playlist_id)))
    }

    pub fn playlist_move(&self, playlist_id: &str, from: u32, to: u32) -> bool {
        self.command(&format!(
            "playlists edit cmd:move {} index:{} toindex:{}",
            tagged("playlist_id", playlist_id),
            from,
            to
        ))
    }

    pub fn playlist_remove(&self, playlist_id: &str, index: u32) -> bool {
        self.command(&format!(
            "playlists edit cmd:delete {} index:{}",
            tagged("playlist_id", playlist_id),
            index
        ))
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Route one inbound line. Runs on the reader task.
    pub fn handle_line(&self, line: &str) {
        let tokens = codec::tokenize(line);
        let active = self.active_player_id();

        match router::route(&tokens, active.as_deref()) {
            Route::Discard(Discard::TooShort) => trace!("Ignoring short line: {}", line),
            Route::Discard(Discard::OtherPlayer) => trace!("Not our player: {}", line),
            Route::Discard(Discard::UnknownVerb) => debug!("Unhandled line: {}", line),
            Route::Discard(Discard::Ignored) => {}
            Route::List(kind) => self.handle_list_reply(kind, &tokens),
            Route::Playlists(notice) => self.handle_playlists_notice(notice),
            Route::Pref { name, value } => self.handle_pref(&name, &value),
            Route::Can { name, value } => self.handle_can(&name, &value),
            Route::Player(notice) => self.handle_player_notice(notice, &tokens),
        }
    }

    fn handle_list_reply(&self, kind: QueryKind, tokens: &[&str]) {
        let mut players: Option<(usize, Vec<Player>)> = None;
        let registry = &self.inner.registry;

        let outcome = {
            let mut pager = self.inner.pager.lock().unwrap_or_else(|e| e.into_inner());
            pager.handle_reply(kind.descriptor(), tokens, |set, meta, records: Vec<Record>| {
                if set.item_type == ItemType::Player {
                    let list: Vec<Player> = records.iter().filter_map(Player::from_record).collect();
                    // The service consumes the player list itself
                    registry.deliver_items(meta, list.clone());
                    players = Some((meta.start, list));
                    true
                } else {
                    registry.deliver(set.item_type, meta, &records)
                }
            })
        };

        if let Some((start, list)) = players {
            if start == 0 {
                self.select_default_player(&list);
            }
        }

        match outcome {
            ReplyOutcome::Malformed(e) => warn!("Dropping malformed {} reply: {}", kind, e),
            ReplyOutcome::Stale { correlation_id } => {
                trace!("{}: stale reply {} discarded", kind, correlation_id)
            }
            ReplyOutcome::Accepted { next: Some(next), .. } => self.request_next_page(next),
            ReplyOutcome::Accepted { next: None, .. } => {}
        }
    }

    fn request_next_page(&self, next: NextPage) {
        trace!("{}: requesting {} more from {}", next.kind, next.count, next.start);
        if !self.send_page_request(
            next.kind,
            next.player_id.as_deref(),
            next.start,
            next.count,
            next.params,
        ) {
            debug!("{}: next page could not be queued", next.kind);
        }
    }

    fn handle_pref(&self, name: &str, value: &str) {
        let mut caps = self.inner.capabilities.write().unwrap_or_else(|e| e.into_inner());
        match name {
            "httpport" => caps.http_port = value.parse().ok(),
            "jivealbumsort" => caps.album_sort = Some(value.to_string()).filter(|v| !v.is_empty()),
            _ => debug!("Unhandled pref {} = {}", name, value),
        }
    }

    fn handle_can(&self, name: &str, value: &str) {
        let mut caps = self.inner.capabilities.write().unwrap_or_else(|e| e.into_inner());
        match name {
            "musicfolder" => caps.music_folder = value == "1",
            "randomplay" => caps.random_play = value == "1",
            _ => debug!("Unhandled capability {} = {}", name, value),
        }
    }

    fn handle_playlists_notice(&self, notice: PlaylistsNotice) {
        match notice {
            PlaylistsNotice::Created {
                name,
                conflict: Some(_),
                ..
            } => {
                info!("Playlist '{}' already exists", name);
                self.inner
                    .registry
                    .emit_maintenance(PlaylistMaintenanceEvent::CreateFailed {
                        message: format!("A playlist named '{}' already exists", name),
                        name,
                    });
            }
            PlaylistsNotice::Created { name, playlist_id, .. } => {
                debug!("Playlist '{}' created ({:?})", name, playlist_id);
            }
            PlaylistsNotice::Renamed {
                playlist_id,
                new_name,
                dry_run: true,
                conflict: None,
            } => {
                let sent = self.command(&format!(
                    "playlists rename {} {}",
                    tagged("playlist_id", &playlist_id),
                    tagged("newname", &new_name)
                ));
                if !sent {
                    warn!("Could not send rename of playlist {}", playlist_id);
                }
            }
            PlaylistsNotice::Renamed {
                playlist_id,
                new_name,
                conflict: Some(_),
                ..
            } => {
                info!("Rename of playlist {} clashes with '{}'", playlist_id, new_name);
                self.inner
                    .registry
                    .emit_maintenance(PlaylistMaintenanceEvent::RenameFailed {
                        message: format!("A playlist named '{}' already exists", new_name),
                        playlist_id,
                        name: new_name,
                    });
            }
            PlaylistsNotice::Renamed { playlist_id, new_name, .. } => {
                debug!("Playlist {} renamed to '{}'", playlist_id, new_name);
            }
            PlaylistsNotice::Deleted { playlist_id } => debug!("Playlist {} deleted", playlist_id),
            PlaylistsNotice::Edited => debug!("Playlist edited"),
        }
    }

    fn handle_player_notice(&self, notice: PlayerNotice, tokens: &[&str]) {
        let events: Vec<PlayerEvent> = match notice {
            PlayerNotice::NewSong | PlayerNotice::MixerChanged | PlayerNotice::Pause(None) => {
                self.request_status();
                return;
            }
            PlayerNotice::ClientChanged(action) => {
                debug!("Player client {}", action);
                self.request_players(0);
                return;
            }
            PlayerNotice::Status => {
                let status = player_state::parse_status(tokens);
                let base = self.http_base();
                let artwork = status
                    .song
                    .as_ref()
                    .and_then(|song| player_state::artwork_url(song, base.as_deref()));
                let mut state = self.inner.player_state.write().unwrap_or_else(|e| e.into_inner());
                state.apply_status(status, artwork)
            }
            other => {
                let mut state = self.inner.player_state.write().unwrap_or_else(|e| e.into_inner());
                match other {
                    PlayerNotice::Play => vec![state.set_playing(true)],
                    PlayerNotice::Stop => vec![state.set_playing(false)],
                    PlayerNotice::Pause(Some(paused)) => state.set_paused(paused).into_iter().collect(),
                    PlayerNotice::Volume(volume) => state.set_volume(volume).into_iter().collect(),
                    PlayerNotice::Power(on) => state.set_power(on).into_iter().collect(),
                    _ => Vec::new(),
                }
            }
        };

        for event in events {
            trace!("Player event: {:?}", event);
            self.inner.registry.emit_player(event);
        }
    }
}
