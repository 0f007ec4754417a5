//! Job supervisor (C4).
//!
//! Spawning a job is the one place this server does blocking-flavored
//! work on the critical path: the referee port handshake is awaited
//! with a hard timeout (spec §5), everything else here is plain
//! `tokio::process` plumbing. Reaping is event-driven — each spawned
//! child gets its own task that awaits `Child::wait()` and reports
//! back to the core loop — rather than the original's once-per-tick
//! `waitpid` poll.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;

use crate::config::Config;
use crate::connection::{ConnStatus, Connection};
use crate::error::DispatchError;
use crate::match_queue::{Match, Seat};
use crate::pool::{Arena, Handle};
use crate::server::{ChildRole, ServerEvent};

const DEALER_PATH: &str = "dealer";
const DEALER_WAIT_SECS: u64 = 5;
const LOG_DIR: &str = "logs";

/// One in-flight dispatch: a referee plus its local bots. Liveness is
/// tracked per-child rather than by pid, since the reaping task that
/// observes exit holds the `Child` directly.
pub struct MatchJob {
    pub match_handle: Handle<Match>,
    pub tag: String,
    pub dealer_alive: bool,
    pub bot_alive: Vec<bool>,
    pub ports: Vec<u16>,
}

impl MatchJob {
    pub fn is_finished(&self) -> bool {
        !self.dealer_alive && !self.bot_alive.iter().any(|alive| *alive)
    }
}

pub struct SpawnOutcome {
    pub job: MatchJob,
    pub dealer_child: Child,
    pub bot_children: Vec<(usize, Child)>,
}

/// Fork the referee and local bots for `match_ref`, performing the
/// port handshake inline. On a short write to a network seat, already
/// started children are sent SIGTERM but the (partial) job is still
/// returned so its children get reaped in the usual way (spec §4.4's
/// rollback note).
pub async fn spawn_job(
    config: &Config,
    game_idx: usize,
    match_handle: Handle<Match>,
    match_ref: &Match,
    seed: u32,
    hostname: &str,
    conns: &mut Arena<Connection>,
) -> Result<SpawnOutcome, DispatchError> {
    let game = &config.games[game_idx];
    let tag = format!("{}.{}", config.users[match_ref.user].name, match_ref.tag);

    std::fs::create_dir_all(LOG_DIR).ok();
    let stderr_path = format!("{LOG_DIR}/{tag}.stderr");
    let stderr_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&stderr_path)
        .map_err(|source| DispatchError::StderrLog(stderr_path, source))?;

    let argv = dealer_argv(config, game, match_ref, &tag, seed, conns)?;

    let mut dealer_child = Command::new(DEALER_PATH)
        .args(&argv)
        .stdout(std::process::Stdio::piped())
        .stderr(stderr_file)
        .kill_on_drop(true)
        .spawn()
        .map_err(DispatchError::SpawnReferee)?;

    let stdout = dealer_child.stdout.take().expect("referee spawned with piped stdout");
    let mut lines = BufReader::new(stdout).lines();
    let port_line = timeout(Duration::from_secs(DEALER_WAIT_SECS), lines.next_line())
        .await
        .map_err(|_| DispatchError::HandshakeTimeout)?
        .map_err(DispatchError::HandshakeRead)?
        .ok_or(DispatchError::HandshakeEof)?;

    let ports = parse_ports(&port_line, match_ref.players.len())?;

    let mut bot_children = Vec::new();
    let mut bot_alive = vec![false; match_ref.players.len()];
    let mut bot_seat_index = 0usize;
    let mut aborted = false;

    for (seat_idx, seat) in match_ref.players.iter().enumerate() {
        if aborted {
            break;
        }
        let port = ports[seat_idx];
        match seat {
            Seat::Network(conn_handle) => {
                if !notify_network_seat(conns, *conn_handle, &tag, hostname, port).await {
                    aborted = true;
                }
            }
            Seat::Bot(bot_idx) => {
                let command = &game.bots[*bot_idx].command;
                let child = spawn_bot(command, hostname, port, bot_seat_index)?;
                bot_alive[seat_idx] = true;
                bot_children.push((seat_idx, child));
                bot_seat_index += 1;
            }
        }
    }

    if aborted {
        dealer_child.start_kill().ok();
        for (_, child) in &mut bot_children {
            child.start_kill().ok();
        }
    }

    Ok(SpawnOutcome {
        job: MatchJob { match_handle, tag, dealer_alive: true, bot_alive, ports },
        dealer_child,
        bot_children,
    })
}

fn dealer_argv(
    config: &Config,
    game: &crate::config::GameConfig,
    match_ref: &Match,
    tag: &str,
    seed: u32,
    conns: &Arena<Connection>,
) -> Result<Vec<String>, DispatchError> {
    let mut argv = vec![
        format!("{LOG_DIR}/{tag}"),
        game.game_file.display().to_string(),
        game.match_hands.to_string(),
        seed.to_string(),
    ];
    for seat in &match_ref.players {
        argv.push(match seat {
            Seat::Network(conn_handle) => {
                let conn = conns.get(*conn_handle).expect("network seat references a live connection");
                let user_idx = conn.user().expect("network seat connection is logged on");
                config.users[user_idx].name.clone()
            }
            Seat::Bot(bot_idx) => game.bots[*bot_idx].name.clone(),
        });
    }
    if config.startup_timeout_secs != 0 {
        argv.push("--start_timeout".to_string());
        argv.push((config.startup_timeout_secs as u64 * 1000).to_string());
    }
    argv.push("--t_response".to_string());
    argv.push((config.response_timeout_secs as u64 * 1000).to_string());
    argv.push("--t_hand".to_string());
    argv.push((config.hand_timeout_secs as u64 * 1000).to_string());
    argv.push("--t_per_hand".to_string());
    argv.push((config.avg_hand_time_secs as u64 * 1000).to_string());
    argv.push("-q".to_string());
    argv.push("-a".to_string());
    Ok(argv)
}

/// Parse the referee's port-handshake line and check it names exactly
/// one port per seat. A short line is as fatal as an unparseable one
/// (bm_server.c:1121-1137 `exit`s on the same missing-port condition).
fn parse_ports(line: &str, expected: usize) -> Result<Vec<u16>, DispatchError> {
    let ports: Vec<u16> = line
        .split_whitespace()
        .enumerate()
        .map(|(i, tok)| tok.parse::<u16>().map_err(|_| DispatchError::HandshakePortParse(i, line.to_string())))
        .collect::<Result<_, _>>()?;
    if ports.len() != expected {
        return Err(DispatchError::HandshakePortParse(ports.len(), line.to_string()));
    }
    Ok(ports)
}

/// Returns `false` if the write failed, in which case the connection
/// has already been marked `Closed` and the caller should roll back.
async fn notify_network_seat(
    conns: &mut Arena<Connection>,
    conn_handle: Handle<Connection>,
    tag: &str,
    hostname: &str,
    port: u16,
) -> bool {
    let conn = conns.get_mut(conn_handle).expect("network seat references a live connection");
    let running_line = format!("# RUNNING {tag}\n");
    let run_line = format!("RUN {hostname} {port}\n");
    if conn.write_line(&running_line).await.is_err() || conn.write_line(&run_line).await.is_err() {
        conn.status = ConnStatus::Closed;
        return false;
    }
    true
}

fn spawn_bot(command: &Path, hostname: &str, port: u16, seat_index: usize) -> Result<Child, DispatchError> {
    Command::new(command)
        .arg(hostname)
        .arg(port.to_string())
        .arg(seat_index.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| DispatchError::SpawnBot(command.display().to_string(), source))
}

/// Spawn the event-driven reapers for a freshly-inserted job. Must be
/// called with the job's arena handle, i.e. after insertion.
pub fn spawn_reapers(
    handle: Handle<MatchJob>,
    dealer_child: Child,
    bot_children: Vec<(usize, Child)>,
    tx: UnboundedSender<ServerEvent>,
) {
    let dealer_tx = tx.clone();
    let mut dealer_child = dealer_child;
    tokio::spawn(async move {
        let _ = dealer_child.wait().await;
        let _ = dealer_tx.send(ServerEvent::ChildExited(handle, ChildRole::Dealer));
    });
    for (seat_idx, mut child) in bot_children {
        let bot_tx = tx.clone();
        tokio::spawn(async move {
            let _ = child.wait().await;
            let _ = bot_tx.send(ServerEvent::ChildExited(handle, ChildRole::Bot(seat_idx)));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ports_reads_whitespace_separated_u16s() {
        assert_eq!(parse_ports("1000 2000 3000", 3).unwrap(), vec![1000, 2000, 3000]);
    }

    #[test]
    fn parse_ports_rejects_non_numeric_token() {
        assert!(matches!(parse_ports("1000 abc", 2), Err(DispatchError::HandshakePortParse(1, _))));
    }

    #[test]
    fn parse_ports_rejects_fewer_ports_than_seats() {
        assert!(matches!(parse_ports("1000 2000", 3), Err(DispatchError::HandshakePortParse(2, _))));
    }

    #[test]
    fn job_is_finished_only_when_all_children_are_dead() {
        let mut job = MatchJob {
            match_handle: crate::pool::Arena::<Match>::new().insert(Match::new(
                crate::match_queue::MatchSpec {
                    game: 0,
                    num_runs: 1,
                    tag: "t".to_string(),
                    seed: 0,
                    players: vec![],
                },
                0,
                std::time::Instant::now(),
            )),
            tag: "t".to_string(),
            dealer_alive: true,
            bot_alive: vec![true, false],
            ports: vec![],
        };
        assert!(!job.is_finished());
        job.dealer_alive = false;
        assert!(!job.is_finished());
        job.bot_alive[0] = false;
        assert!(job.is_finished());
    }
}
