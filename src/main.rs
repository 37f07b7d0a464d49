//! Squeeze Remote - console controller
//!
//! Connects to the configured server (or the only one found on the local
//! network), prints listener output and reads simple commands from stdin.

use squeeze_remote::{config, discovery};
use squeeze_remote::{
    Album, Artist, ConnectionEvent, ListPage, Player, QueryParams, Song, SqueezeService,
};

use anyhow::Result;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "commands: players, use <n>, play, pause, stop, next, prev, \
vol <+n|-n>, albums, artists, songs, search <term>, status, quit";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "squeeze_remote=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(
        "Starting Squeeze Remote v{} ({})",
        env!("SQR_VERSION"),
        env!("SQR_GIT_SHA")
    );

    let config = config::load_config()?;
    let server = match config.server.clone() {
        Some(server) => server,
        None => {
            let servers = discovery::discover_servers(config.discovery_timeout()).await?;
            match servers.as_slice() {
                [only] => {
                    tracing::info!("Using discovered server {} ({})", only.name, only.host);
                    only.cli_address()
                }
                [] => anyhow::bail!("no server configured and none found on the network"),
                many => {
                    for s in many {
                        println!("found: {} at {}", s.name, s.cli_address());
                    }
                    anyhow::bail!("several servers found; set SQR_SERVER to pick one");
                }
            }
        }
    };

    let max_list_size = config.max_list_size;
    let service = SqueezeService::new(config);
    let players: Arc<Mutex<Vec<Player>>> = Arc::new(Mutex::new(Vec::new()));

    tokio::spawn(print_connection(service.register_connection_listener()));
    tokio::spawn(print_events(service.register_player_listener(), "player"));
    tokio::spawn(print_events(service.register_maintenance_listener(), "playlist"));
    tokio::spawn(collect_players(service.register_list::<Player>(), players.clone()));
    tokio::spawn(print_pages(service.register_list::<Album>(), max_list_size, |a| a.name.clone()));
    tokio::spawn(print_pages(service.register_list::<Artist>(), max_list_size, |a| a.name.clone()));
    tokio::spawn(print_pages(service.register_list::<Song>(), max_list_size, |s| {
        match &s.artist {
            Some(artist) => format!("{} - {}", artist, s.title),
            None => s.title.clone(),
        }
    }));

    if !service.connect(&server) {
        anyhow::bail!("cannot connect to '{}'", server);
    }
    println!("{}", HELP);

    tokio::select! {
        _ = console(&service, &players) => {}
        _ = shutdown_signal() => {}
    }

    service.disconnect();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn console(service: &SqueezeService, players: &Mutex<Vec<Player>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("stdin: {}", e);
                break;
            }
        };
        let (command, arg) = match line.trim().split_once(' ') {
            Some((command, arg)) => (command, arg.trim()),
            None => (line.trim(), ""),
        };

        let accepted = match command {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                println!("{}", HELP);
                continue;
            }
            "players" => service.request_players(0),
            "use" => {
                let picked = arg.parse::<usize>().ok().and_then(|n| {
                    let players = players.lock().unwrap_or_else(|e| e.into_inner());
                    n.checked_sub(1).and_then(|i| players.get(i).cloned())
                });
                match picked {
                    Some(player) => service.set_active_player(player),
                    None => false,
                }
            }
            "play" => service.play(),
            "pause" => service.toggle_pause(),
            "stop" => service.stop(),
            "next" => service.next(),
            "prev" => service.previous(),
            "vol" => match arg.parse::<i32>() {
                Ok(delta) if arg.starts_with(['+', '-']) => service.adjust_volume(delta),
                Ok(volume) => service.set_volume(volume.clamp(0, 100) as u8),
                Err(_) => false,
            },
            "albums" => service.request_albums(0, QueryParams::new()),
            "artists" => service.request_artists(0, QueryParams::new()),
            "songs" => service.request_songs(0, QueryParams::new()),
            "search" => service.search(arg, 0),
            "status" => {
                let state = service.player_state();
                match serde_json::to_string_pretty(&state) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::warn!("Cannot render state: {}", e),
                }
                continue;
            }
            other => {
                println!("unknown command '{}'; {}", other, HELP);
                continue;
            }
        };
        if !accepted {
            println!("'{}' not sent (not connected, no player, or bad argument)", line.trim());
        }
    }
}

async fn print_connection(mut rx: mpsc::Receiver<ConnectionEvent>) {
    while let Some(event) = rx.recv().await {
        println!("[connection] {}", event);
    }
}

async fn print_events<T: serde::Serialize>(mut rx: mpsc::Receiver<T>, label: &str) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => println!("[{}] {}", label, json),
            Err(e) => tracing::debug!("Cannot render {} event: {}", label, e),
        }
    }
}

async fn collect_players(mut rx: mpsc::Receiver<ListPage<Player>>, players: Arc<Mutex<Vec<Player>>>) {
    while let Some(page) = rx.recv().await {
        let mut known = players.lock().unwrap_or_else(|e| e.into_inner());
        if page.start == 0 {
            known.clear();
        }
        for player in page.items {
            println!("{:>3}. {} ({})", known.len() + 1, player.name, player.model);
            known.push(player);
        }
    }
}

async fn print_pages<T, F, D>(mut rx: mpsc::Receiver<ListPage<T>>, max_list_size: usize, label: F)
where
    F: Fn(&T) -> D,
    D: Display,
{
    while let Some(page) = rx.recv().await {
        for (i, item) in page.items.iter().enumerate() {
            println!("{:>5}. {}", page.start + i + 1, label(item));
        }
        if page.is_last(max_list_size) {
            println!("({} total)", page.count);
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
