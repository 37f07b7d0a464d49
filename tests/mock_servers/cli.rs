//! Mock CLI server
//!
//! Line-oriented TCP server on 127.0.0.1 that records every received line,
//! answers `players`, `albums`, `pref`/`can` queries and status polls from
//! a scripted catalog, and can push arbitrary notification lines.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MockPlayer {
    pub id: String,
    pub name: String,
}

#[derive(Default)]
struct MockCliState {
    received: Vec<String>,
    players: Vec<MockPlayer>,
    albums: Vec<(String, String)>,
    /// Close the socket as soon as a `login` line arrives
    reject_login: bool,
    /// Record list queries but do not answer them
    hold_lists: bool,
    connections: usize,
    outgoing: Option<mpsc::Sender<String>>,
    kick: Option<CancellationToken>,
}

pub struct MockCliServer {
    addr: SocketAddr,
    state: Arc<Mutex<MockCliState>>,
    handle: JoinHandle<()>,
}

impl MockCliServer {
    /// Start on a random port
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockCliState::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn add_player(&self, id: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.players.push(MockPlayer {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    /// Albums named `Album 1..=n` with ids `1..=n`.
    pub fn add_albums(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        for i in 1..=n {
            state.albums.push((i.to_string(), format!("Album {}", i)));
        }
    }

    pub fn reject_login(&self) {
        self.state.lock().unwrap().reject_login = true;
    }

    pub fn hold_lists(&self, hold: bool) {
        self.state.lock().unwrap().hold_lists = hold;
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn received(&self) -> Vec<String> {
        self.state.lock().unwrap().received.clone()
    }

    /// Push a raw line to the connected client.
    pub fn push(&self, line: &str) -> bool {
        let state = self.state.lock().unwrap();
        match &state.outgoing {
            Some(tx) => tx.try_send(line.to_string()).is_ok(),
            None => false,
        }
    }

    /// Close the current client connection.
    pub fn drop_client(&self) {
        if let Some(kick) = self.state.lock().unwrap().kick.take() {
            kick.cancel();
        }
    }

    /// Poll until a received line satisfies `pred`.
    pub async fn wait_for<F>(&self, pred: F, timeout: Duration) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let found = self.received().into_iter().find(|l| pred(l));
            if found.is_some() {
                return found;
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn escape(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn tag(key: &str, value: &str) -> String {
    format!("{}%3A{}", escape(key), escape(value))
}

/// Split off a trailing `correlationid:N`.
fn split_correlation(tokens: &[&str]) -> (Vec<String>, Option<String>) {
    let mut rest = Vec::new();
    let mut cid = None;
    for token in tokens {
        match token.strip_prefix("correlationid:") {
            Some(id) => cid = Some(id.to_string()),
            None => rest.push(token.to_string()),
        }
    }
    (rest, cid)
}

/// `key:value` request token as the server echoes it.
fn echo(token: &str) -> String {
    token.replacen(':', "%3A", 1)
}

fn window(start: &str, count: &str, total: usize) -> (usize, usize) {
    let start = start.parse::<usize>().unwrap_or(0).min(total);
    let count = count.parse::<usize>().unwrap_or(0);
    (start, (start + count).min(total))
}

fn answer(line: &str, state: &Mutex<MockCliState>) -> Option<String> {
    let tokens: Vec<&str> = line.split(' ').collect();
    let (tokens, cid) = split_correlation(&tokens);
    let cid = cid.map(|id| format!(" correlationid%3A{}", id)).unwrap_or_default();
    let state = state.lock().unwrap();

    match tokens.first().map(String::as_str) {
        Some("pref") if tokens.get(1).map(String::as_str) == Some("httpport") => {
            Some("pref httpport 9000".to_string())
        }
        Some("can") if tokens.len() >= 2 => Some(format!("can {} 1", tokens[1])),
        Some("players") | Some("albums") if state.hold_lists => None,
        Some("players") if tokens.len() >= 3 => {
            let (from, to) = window(&tokens[1], &tokens[2], state.players.len());
            let mut out = vec![
                "players".to_string(),
                tokens[1].clone(),
                tokens[2].clone(),
                tag("count", &state.players.len().to_string()),
            ];
            for p in &state.players[from..to] {
                out.push(tag("playerid", &p.id));
                out.push(tag("name", &p.name));
                out.push(tag("model", "squeezelite"));
                out.push(tag("connected", "1"));
            }
            Some(out.join(" ") + &cid)
        }
        Some("albums") if tokens.len() >= 3 => {
            let (from, to) = window(&tokens[1], &tokens[2], state.albums.len());
            let mut out = vec!["albums".to_string(), tokens[1].clone(), tokens[2].clone()];
            out.extend(tokens[3..].iter().map(|t| echo(t)));
            out.push(tag("count", &state.albums.len().to_string()));
            for (id, name) in &state.albums[from..to] {
                out.push(tag("id", id));
                out.push(tag("album", name));
            }
            Some(out.join(" ") + &cid)
        }
        // <player> status - 1 ...
        Some(player)
            if tokens.get(1).map(String::as_str) == Some("status")
                && tokens.get(2).map(String::as_str) == Some("-") =>
        {
            let name = state
                .players
                .iter()
                .find(|p| escape(&p.id) == *player)
                .map(|p| p.name.clone())?;
            Some(format!(
                "{} status - 1 {} {} {} {} {} {} {} {}",
                player,
                tag("player_name", &name),
                tag("power", "1"),
                tag("mode", "play"),
                tag("time", "12.5"),
                tag("mixer volume", "40"),
                tag("playlist index", "0"),
                tag("id", "301"),
                tag("title", "Blue Train"),
            ))
        }
        _ => None,
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<MockCliState>>) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let kick = CancellationToken::new();
    {
        let mut s = state.lock().unwrap();
        s.connections += 1;
        s.outgoing = Some(tx.clone());
        s.kick = Some(kick.clone());
    }

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = kick.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
        };
        let reject = {
            let mut s = state.lock().unwrap();
            s.received.push(line.clone());
            s.reject_login && line.starts_with("login ")
        };
        if reject {
            break;
        }
        if let Some(reply) = answer(&line, &state) {
            if tx.send(reply).await.is_err() {
                break;
            }
        }
    }

    {
        let mut s = state.lock().unwrap();
        s.outgoing.take();
        s.kick.take();
    }
    writer.abort();
    // Wait for the write half to drop so the client sees EOF
    let _ = writer.await;
}
