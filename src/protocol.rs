//! Control protocol (C6): one line in, one reply (or state change) out.
//!
//! Parsing is kept pure (no I/O, no `ServerState` mutation) so the
//! `RUNMATCHES` grammar and the fixed reply text can be unit tested
//! directly; `server.rs` wires the pure parts to the connection and
//! match-queue state.

use crate::config::Config;
use crate::connection::Connection;
use crate::error::ParseError;
use crate::match_queue::{MatchSpec, Seat};
use crate::pool::{Arena, Handle};

pub const HELP_TEXT: &str = "\
Commands:
  HELP                                          - this message
  GAMES                                         - list configured games and bots
  QSTAT                                         - list queued and running matches
  RUNMATCHES game numRuns tag seed p1 .. pN     - submit a match
";

/// A parsed pre-logon line: `<username> <password>`.
pub fn parse_logon(line: &str) -> Result<(&str, &str), ParseError> {
    let mut tokens = line.split_whitespace();
    let (Some(name), Some(password), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(ParseError::BadLogon);
    };
    Ok((name, password))
}

/// Is `line` at least `keyword.len()` bytes and does it start with
/// `keyword`, ignoring case? Commands are matched this way rather
/// than as whole tokens (spec §4.2): `HELPxyz` still dispatches as
/// `HELP`.
fn starts_with_ci(line: &str, keyword: &str) -> bool {
    line.len() >= keyword.len() && line.as_bytes()[..keyword.len()].eq_ignore_ascii_case(keyword.as_bytes())
}

pub enum Command {
    Help,
    Games,
    Qstat,
    RunMatches,
    Unknown,
}

pub fn classify(line: &str) -> Command {
    if starts_with_ci(line, "RUNMATCHES") {
        Command::RunMatches
    } else if starts_with_ci(line, "HELP") {
        Command::Help
    } else if starts_with_ci(line, "GAMES") {
        Command::Games
    } else if starts_with_ci(line, "QSTAT") {
        Command::Qstat
    } else {
        Command::Unknown
    }
}

/// Parse a `RUNMATCHES` command against `config`, resolving the game,
/// bot, and network-seat names. Does not touch the match queue or
/// connection state — a successful parse only proves the command is
/// well-formed and admissible, it does not enqueue anything.
pub fn parse_runmatches(
    config: &Config,
    submitter: Handle<Connection>,
    line: &str,
) -> Result<MatchSpec, ParseError> {
    if !starts_with_ci(line, "RUNMATCHES") {
        return Err(ParseError::BadRunMatches);
    }
    let rest = &line["RUNMATCHES".len()..];
    let mut tokens = rest.split_whitespace();

    let game_file = tokens.next().ok_or(ParseError::BadRunMatches)?;
    let game_idx = config.find_game(game_file).ok_or(ParseError::BadRunMatches)?;
    let game = &config.games[game_idx];

    let num_runs: i64 = tokens.next().ok_or(ParseError::BadRunMatches)?.parse().map_err(|_| ParseError::BadRunMatches)?;
    if num_runs < 0 || num_runs > game.max_match_runs as i64 {
        return Err(ParseError::BadRunMatches);
    }

    let tag = tokens.next().ok_or(ParseError::BadRunMatches)?;
    if tag.contains('/') {
        return Err(ParseError::BadRunMatches);
    }

    let seed: u32 = tokens.next().ok_or(ParseError::BadRunMatches)?.parse().map_err(|_| ParseError::BadRunMatches)?;

    let mut players = Vec::with_capacity(game.game.num_players);
    for _ in 0..game.game.num_players {
        let name = tokens.next().ok_or(ParseError::BadRunMatches)?;
        if name == crate::config::LOCAL_PLAYER {
            players.push(Seat::Network(submitter));
        } else {
            let bot_idx = game.find_bot(name).ok_or(ParseError::BadRunMatches)?;
            players.push(Seat::Bot(bot_idx));
        }
    }

    if tokens.next().is_some() {
        return Err(ParseError::BadRunMatches);
    }

    Ok(MatchSpec { game: game_idx, num_runs, tag: tag.to_string(), seed, players })
}

/// Render the `GAMES` reply for one game: a leading blank line, the
/// game file, then one indented line per registered bot.
pub fn render_game_listing(game: &crate::config::GameConfig) -> String {
    let mut out = format!("\n{}\n", game.game_file.display());
    for bot in &game.bots {
        out.push_str(&format!(" {}\n", bot.name));
    }
    out
}

/// Render one `QSTAT` row: `<user> <tag> <gameFile> * <numRuns> <R|Q>`.
pub fn render_qstat_row(config: &Config, m: &crate::match_queue::Match) -> String {
    let user = &config.users[m.user].name;
    let game_file = config.games[m.game].game_file.display();
    let state = if m.is_running { 'R' } else { 'Q' };
    format!("{user} {} {game_file} * {} {state}\n", m.tag, m.num_runs)
}

pub fn render_qstat(config: &Config, matches: &Arena<crate::match_queue::Match>) -> String {
    if matches.is_empty() {
        return "Queue empty\n".to_string();
    }
    matches.iter().map(|(_, m)| render_qstat_row(config, m)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BotSpec, GameConfig};
    use crate::rules::GameDef;

    async fn config_with_one_game() -> (Config, Handle<Connection>, Arena<Connection>) {
        let mut config = Config::default();
        config.games.push(GameConfig {
            game_file: "holdem.game".into(),
            game: GameDef { num_players: 2 },
            bots: vec![BotSpec { name: "example".to_string(), command: "/bin/example".into() }],
            max_match_runs: 10,
            max_running_jobs: 1,
            match_hands: 5000,
        });
        config.users.push(crate::config::UserSpec { name: "alice".to_string(), password: "secret".to_string() });

        // parse_runmatches never dereferences the connection, only
        // carries its handle, but a real Handle<Connection> can only
        // come from inserting a real Connection into an arena.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, _client) =
            tokio::join!(listener.accept(), tokio::net::TcpStream::connect(addr));
        let (_read, write) = accepted.unwrap().0.into_split();
        let mut conns = Arena::new();
        let handle = conns.insert(Connection::new(write));
        (config, handle, conns)
    }

    #[test]
    fn parses_logon() {
        assert_eq!(parse_logon("alice secret"), Ok(("alice", "secret")));
    }

    #[test]
    fn rejects_malformed_logon() {
        assert_eq!(parse_logon("alice"), Err(ParseError::BadLogon));
        assert_eq!(parse_logon("alice secret extra"), Err(ParseError::BadLogon));
    }

    #[tokio::test]
    async fn parses_valid_runmatches() {
        let (config, submitter, _conns) = config_with_one_game().await;
        let spec = parse_runmatches(&config, submitter, "RUNMATCHES holdem.game 1 t0 42 LOCAL example").unwrap();
        assert_eq!(spec.game, 0);
        assert_eq!(spec.num_runs, 1);
        assert_eq!(spec.tag, "t0");
        assert_eq!(spec.seed, 42);
        assert!(matches!(spec.players[0], Seat::Network(h) if h == submitter));
        assert!(matches!(spec.players[1], Seat::Bot(0)));
    }

    #[tokio::test]
    async fn rejects_unknown_game() {
        let (config, submitter, _conns) = config_with_one_game().await;
        assert!(parse_runmatches(&config, submitter, "RUNMATCHES nope.game 1 t0 0 LOCAL example").is_err());
    }

    #[tokio::test]
    async fn rejects_tag_with_slash() {
        let (config, submitter, _conns) = config_with_one_game().await;
        assert!(parse_runmatches(&config, submitter, "RUNMATCHES holdem.game 1 a/b 0 LOCAL example").is_err());
    }

    #[tokio::test]
    async fn rejects_num_runs_over_cap() {
        let (config, submitter, _conns) = config_with_one_game().await;
        assert!(parse_runmatches(&config, submitter, "RUNMATCHES holdem.game 99 t0 0 LOCAL example").is_err());
    }

    #[tokio::test]
    async fn rejects_unknown_player_name() {
        let (config, submitter, _conns) = config_with_one_game().await;
        assert!(parse_runmatches(&config, submitter, "RUNMATCHES holdem.game 1 t0 0 LOCAL nosuchbot").is_err());
    }

    #[tokio::test]
    async fn accepts_zero_num_runs() {
        let (config, submitter, _conns) = config_with_one_game().await;
        let spec = parse_runmatches(&config, submitter, "RUNMATCHES holdem.game 0 t0 0 LOCAL example").unwrap();
        assert_eq!(spec.num_runs, 0);
    }
}
