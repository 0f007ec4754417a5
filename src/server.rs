//! Event loop (C7): multiplexes the listen socket, per-connection
//! lines, child reaping, and the scheduling tick.
//!
//! The original multiplexes everything through one `select(2)` call
//! each iteration; here every connection and every spawned child gets
//! its own lightweight task (spec §9 explicitly sanctions this for a
//! systems-language port), and those tasks only ever *report* back to
//! this loop over an `mpsc` channel. All scheduler-mutable state
//! (`ServerState`) is owned exclusively by this loop — nothing here is
//! behind a lock.

use std::time::{Duration, Instant};

use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::config::Config;
use crate::connection::{ConnStatus, Connection, LineReader};
use crate::job::MatchJob;
use crate::logger::Logger;
use crate::match_queue::Match;
use crate::pool::{Arena, Handle};
use crate::protocol;
use crate::scheduler;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub enum ChildRole {
    Dealer,
    Bot(usize),
}

pub enum ServerEvent {
    Line(Handle<Connection>, String),
    ConnClosed(Handle<Connection>),
    ChildExited(Handle<MatchJob>, ChildRole),
}

pub struct ServerState {
    pub config: Config,
    pub conns: Arena<Connection>,
    pub matches: Arena<Match>,
    pub jobs: Arena<MatchJob>,
    pub rng: StdRng,
    pub hostname: String,
    pub cur_running_jobs: Vec<u16>,
    pub wait_start: Vec<Instant>,
    pub event_tx: UnboundedSender<ServerEvent>,
}

/// Bind the listener and run the event loop forever. Returns only on a
/// fatal error (bind failure or a process-fatal dispatch error per
/// spec §7); a clean server never returns.
pub async fn run(config: Config, logger: Logger) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("could not bind to port {}", config.port))?;
    let hostname = local_hostname(&listener).await?;
    logger.info(format!("listening on {hostname}:{}", config.port));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let now = Instant::now();
    let mut state = ServerState {
        cur_running_jobs: vec![0; config.games.len()],
        wait_start: vec![now; config.users.len()],
        conns: Arena::new(),
        matches: Arena::new(),
        jobs: Arena::new(),
        rng: StdRng::from_entropy(),
        hostname,
        config,
        event_tx,
    };

    let mut ticker = tokio::time::interval(TICK_INTERVAL);

    loop {
        reap_closed_connections(&mut state);
        scheduler::run_pass(&mut state).await.context("fatal error dispatching a match")?;

        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => spawn_connection(&mut state, stream),
                    Err(e) => logger.warn(format!("accept failed: {e}")),
                }
            }
            Some(event) = event_rx.recv() => {
                handle_event(&mut state, &logger, event).await;
            }
            _ = ticker.tick() => {}
        }
    }
}

async fn local_hostname(listener: &TcpListener) -> anyhow::Result<String> {
    let port = listener.local_addr()?.port();
    // Dial out to learn which local IPv4 address routes outward, the
    // same trick `getsockname` on a connected UDP socket performs in
    // the original; we don't have the real socket's bound address to
    // hand (it's usually 0.0.0.0) so this is a closer approximation
    // than `local_addr()` alone.
    let _ = port;
    match tokio::net::UdpSocket::bind("0.0.0.0:0").await {
        Ok(probe) => {
            if probe.connect("8.8.8.8:80").await.is_ok() {
                if let Ok(addr) = probe.local_addr() {
                    return Ok(addr.ip().to_string());
                }
            }
        }
        Err(_) => {}
    }
    Ok("127.0.0.1".to_string())
}

fn spawn_connection(state: &mut ServerState, stream: tokio::net::TcpStream) {
    let (read_half, write_half) = stream.into_split();
    let handle = state.conns.insert(Connection::new(write_half));
    let tx = state.event_tx.clone();
    tokio::spawn(async move {
        let mut reader = LineReader::new(read_half);
        loop {
            match reader.read_line().await {
                Ok(Some(line)) => {
                    if tx.send(ServerEvent::Line(handle, line)).is_err() {
                        return;
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = tx.send(ServerEvent::ConnClosed(handle));
                    return;
                }
            }
        }
    });
}

async fn handle_event(state: &mut ServerState, logger: &Logger, event: ServerEvent) {
    match event {
        ServerEvent::Line(handle, line) => dispatch_line(state, logger, handle, &line).await,
        ServerEvent::ConnClosed(handle) => close_connection(state, handle),
        ServerEvent::ChildExited(job_handle, role) => scheduler::handle_child_exit(state, job_handle, role),
    }
}

/// Mark a connection closed and force `numRuns := 0` on every queued
/// match referencing it as a seat (spec §4.1's `close` contract).
/// Running jobs referencing it are left alone; they reap normally.
fn close_connection(state: &mut ServerState, handle: Handle<Connection>) {
    if let Some(conn) = state.conns.get_mut(handle) {
        conn.status = ConnStatus::Closed;
    }
    for (_, m) in state.matches.iter_mut() {
        if !m.is_running && m.references_connection(handle) {
            m.num_runs = 0;
        }
    }
}

fn reap_closed_connections(state: &mut ServerState) {
    let closed: Vec<Handle<Connection>> =
        state.conns.iter().filter(|(_, c)| c.is_closed()).map(|(h, _)| h).collect();
    for handle in closed {
        state.conns.remove(handle);
    }
}

/// Process exactly one command line for `handle`, per spec §4.2: one
/// line consumed per event, so no connection can starve its peers.
async fn dispatch_line(state: &mut ServerState, logger: &Logger, handle: Handle<Connection>, line: &str) {
    let Some(conn) = state.conns.get(handle) else { return };

    if conn.status == ConnStatus::Unvalidated {
        match protocol::parse_logon(line) {
            Ok((name, password)) => match state.config.validate_logon(name, password) {
                Some(user_idx) => {
                    if let Some(conn) = state.conns.get_mut(handle) {
                        conn.status = ConnStatus::Okay { user: user_idx };
                    }
                    write_or_close(state, handle, "LOGON OKAY - type help for commands\n").await;
                }
                None => {
                    logger.info(format!("connection failed to log on as {name}"));
                    write_or_close(state, handle, "BAD LOGON\n").await;
                    close_connection(state, handle);
                }
            },
            Err(_) => {
                write_or_close(state, handle, "BAD LOGON\n").await;
                close_connection(state, handle);
            }
        }
        return;
    }

    match protocol::classify(line) {
        protocol::Command::Help => {
            write_or_close(state, handle, protocol::HELP_TEXT).await;
        }
        protocol::Command::Games => {
            let mut out = String::new();
            for game in &state.config.games {
                out.push_str(&protocol::render_game_listing(game));
            }
            write_or_close(state, handle, &out).await;
        }
        protocol::Command::Qstat => {
            let out = protocol::render_qstat(&state.config, &state.matches);
            write_or_close(state, handle, &out).await;
        }
        protocol::Command::RunMatches => match protocol::parse_runmatches(&state.config, handle, line) {
            Ok(spec) => {
                let Some(user_idx) = state.conns.get(handle).and_then(|c| c.user()) else { return };
                let m = Match::new(spec, user_idx, Instant::now());
                state.matches.insert(m);
            }
            Err(_) => {
                logger.info(format!("bad RUNMATCHES command: {line}"));
                write_or_close(state, handle, "BAD RUNMATCHES COMMAND\n").await;
            }
        },
        protocol::Command::Unknown => {
            write_or_close(state, handle, "UNKNOWN\n").await;
        }
    }
}

async fn write_or_close(state: &mut ServerState, handle: Handle<Connection>, text: &str) {
    let Some(conn) = state.conns.get_mut(handle) else { return };
    if conn.write_line(text).await.is_err() {
        close_connection(state, handle);
    }
}
