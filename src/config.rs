//! Immutable, process-lifetime server configuration (C1).
//!
//! Loaded once from a line-oriented config file (spec.md §6) and never
//! mutated afterward. The two fields the original C server mutates in
//! place at runtime — `GameConfig.curRunningJobs` and
//! `UserSpec.waitStart` — live on [`crate::server::ServerState`]
//! instead, indexed in parallel with `games`/`users` here.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::rules::GameDef;

pub const LOCAL_PLAYER: &str = "LOCAL";

#[derive(Debug, Clone)]
pub struct BotSpec {
    pub name: String,
    pub command: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UserSpec {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub game_file: PathBuf,
    pub game: GameDef,
    pub bots: Vec<BotSpec>,
    pub max_match_runs: u16,
    pub max_running_jobs: u16,
    pub match_hands: u32,
}

impl GameConfig {
    pub fn find_bot(&self, name: &str) -> Option<usize> {
        self.bots.iter().position(|b| b.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub max_running_bots: u16,
    pub startup_timeout_secs: u16,
    pub response_timeout_secs: u16,
    pub hand_timeout_secs: u16,
    pub avg_hand_time_secs: u16,
    pub games: Vec<GameConfig>,
    pub users: Vec<UserSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 54000,
            max_running_bots: 0,
            startup_timeout_secs: 600,
            response_timeout_secs: 6000,
            hand_timeout_secs: 21000,
            avg_hand_time_secs: 70,
            games: Vec::new(),
            users: Vec::new(),
        }
    }
}

impl Config {
    pub fn find_game(&self, name: &str) -> Option<usize> {
        self.games.iter().position(|g| g.game_file == Path::new(name))
    }

    pub fn find_user(&self, name: &str) -> Option<usize> {
        self.users.iter().position(|u| u.name == name)
    }

    /// Literal password comparison, per spec.md §3 — no hashing.
    pub fn validate_logon(&self, name: &str, password: &str) -> Option<usize> {
        let idx = self.find_user(name)?;
        (self.users[idx].password == password).then_some(idx)
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Open { path: path.display().to_string(), source })?;
        parse(&contents)
    }
}

fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((kw, rest)) => (kw, rest.trim_start()),
        None => (line, ""),
    }
}

fn parse_value<T: FromStr>(line_no: usize, keyword: &'static str, rest: &str) -> Result<T, ConfigError> {
    rest.split_whitespace()
        .next()
        .and_then(|tok| tok.parse().ok())
        .ok_or_else(|| ConfigError::BadValue(line_no, keyword, rest.to_string()))
}

fn add_bot(game: &mut GameConfig, line_no: usize, rest: &str) -> Result<(), ConfigError> {
    let mut tokens = rest.split_whitespace();
    let (Some(name), Some(command)) = (tokens.next(), tokens.next()) else {
        return Err(ConfigError::MalformedBot(line_no, rest.to_string()));
    };
    if name == LOCAL_PLAYER {
        return Err(ConfigError::ReservedBotName(line_no));
    }
    if game.find_bot(name).is_some() {
        return Err(ConfigError::DuplicateBot(line_no, name.to_string()));
    }
    game.bots.push(BotSpec { name: name.to_string(), command: PathBuf::from(command) });
    Ok(())
}

fn add_user(config: &mut Config, line_no: usize, rest: &str) -> Result<(), ConfigError> {
    let mut tokens = rest.split_whitespace();
    let (Some(name), Some(password)) = (tokens.next(), tokens.next()) else {
        return Err(ConfigError::MalformedUser(line_no, rest.to_string()));
    };
    if config.find_user(name).is_some() {
        return Err(ConfigError::DuplicateUser(line_no, name.to_string()));
    }
    config.users.push(UserSpec { name: name.to_string(), password: password.to_string() });
    Ok(())
}

fn parse(contents: &str) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let mut current_game: Option<usize> = None;

    for (offset, raw_line) in contents.lines().enumerate() {
        let line_no = offset + 1;
        let line = raw_line.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('}') {
            current_game = None;
            continue;
        }

        let (keyword, rest) = split_keyword(line);
        match keyword.to_ascii_lowercase().as_str() {
            "port" => {
                require_top_level(current_game, line_no, "port")?;
                config.port = parse_value(line_no, "port", rest)?;
            }
            "maxrunningbots" => {
                require_top_level(current_game, line_no, "maxRunningBots")?;
                config.max_running_bots = parse_value(line_no, "maxRunningBots", rest)?;
            }
            "startuptimeoutsecs" => {
                require_top_level(current_game, line_no, "startupTimeoutSecs")?;
                config.startup_timeout_secs = parse_value(line_no, "startupTimeoutSecs", rest)?;
            }
            "responsetimeoutsecs" => {
                require_top_level(current_game, line_no, "responseTimeoutSecs")?;
                config.response_timeout_secs = parse_value(line_no, "responseTimeoutSecs", rest)?;
            }
            "handtimeoutsecs" => {
                require_top_level(current_game, line_no, "handTimeoutSecs")?;
                config.hand_timeout_secs = parse_value(line_no, "handTimeoutSecs", rest)?;
            }
            "avghandtimesecs" => {
                require_top_level(current_game, line_no, "avgHandTimeSecs")?;
                config.avg_hand_time_secs = parse_value(line_no, "avgHandTimeSecs", rest)?;
            }
            "user" => {
                require_top_level(current_game, line_no, "user")?;
                add_user(&mut config, line_no, rest)?;
            }
            "game" => {
                if current_game.is_some() {
                    return Err(ConfigError::NestedGameBlock(line_no));
                }
                let game_file = rest
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| ConfigError::MissingGameName(line_no, line.to_string()))?;
                if config.find_game(game_file).is_some() {
                    return Err(ConfigError::DuplicateGame(line_no, game_file.to_string()));
                }
                let path = PathBuf::from(game_file);
                let def = GameDef::load(&path)
                    .map_err(|source| ConfigError::GameFileOpen(line_no, game_file.to_string(), source))?
                    .map_err(|source| ConfigError::GameFileParse(line_no, game_file.to_string(), source))?;
                config.games.push(GameConfig {
                    game_file: path,
                    game: def,
                    bots: Vec::new(),
                    max_match_runs: 10,
                    max_running_jobs: 1,
                    match_hands: 5000,
                });
                current_game = Some(config.games.len() - 1);
            }
            "maxmatchruns" => {
                let idx = require_in_game(current_game, line_no, "maxMatchRuns")?;
                config.games[idx].max_match_runs = parse_value(line_no, "maxMatchRuns", rest)?;
            }
            "maxrunningjobs" => {
                let idx = require_in_game(current_game, line_no, "maxRunningJobs")?;
                config.games[idx].max_running_jobs = parse_value(line_no, "maxRunningJobs", rest)?;
            }
            "matchhands" => {
                let idx = require_in_game(current_game, line_no, "matchHands")?;
                config.games[idx].match_hands = parse_value(line_no, "matchHands", rest)?;
            }
            "bot" => {
                let idx = require_in_game(current_game, line_no, "bot")?;
                add_bot(&mut config.games[idx], line_no, rest)?;
            }
            _ => return Err(ConfigError::UnknownOption(line_no, line.to_string())),
        }
    }

    Ok(config)
}

fn require_top_level(current_game: Option<usize>, line_no: usize, keyword: &'static str) -> Result<(), ConfigError> {
    if current_game.is_some() {
        Err(ConfigError::KeyOutsideAllowed(line_no, keyword))
    } else {
        Ok(())
    }
}

fn require_in_game(current_game: Option<usize>, line_no: usize, keyword: &'static str) -> Result<usize, ConfigError> {
    current_game.ok_or(ConfigError::KeyRequiresGameBlock(line_no, keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_game_file(dir: &tempfile::TempDir, name: &str, num_players: usize) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "GAMEDEF\nnumPlayers = {num_players}\nEND GAMEDEF").unwrap();
        path
    }

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.port, 54000);
        assert_eq!(config.max_running_bots, 0);
        assert_eq!(config.startup_timeout_secs, 600);
        assert_eq!(config.response_timeout_secs, 6000);
        assert_eq!(config.hand_timeout_secs, 21000);
        assert_eq!(config.avg_hand_time_secs, 70);
    }

    #[test]
    fn parses_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let game_path = write_game_file(&dir, "holdem.game", 2);
        let src = format!(
            "port 12345\nuser alice secret\n\ngame {}\n  maxMatchRuns 3\n  maxRunningJobs 2\n  matchHands 100\n  bot example /bin/example\n}}\n",
            game_path.display()
        );
        let config = parse(&src).unwrap();
        assert_eq!(config.port, 12345);
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].name, "alice");
        assert_eq!(config.games.len(), 1);
        let game = &config.games[0];
        assert_eq!(game.max_match_runs, 3);
        assert_eq!(game.max_running_jobs, 2);
        assert_eq!(game.match_hands, 100);
        assert_eq!(game.bots.len(), 1);
        assert_eq!(game.bots[0].name, "example");
        assert_eq!(game.game.num_players, 2);
    }

    #[test]
    fn rejects_port_inside_game_block() {
        let dir = tempfile::tempdir().unwrap();
        let game_path = write_game_file(&dir, "g.game", 2);
        let src = format!("game {}\nport 1\n}}\n", game_path.display());
        assert!(matches!(parse(&src), Err(ConfigError::KeyOutsideAllowed(_, "port"))));
    }

    #[test]
    fn rejects_bot_outside_game_block() {
        let src = "bot example /bin/example\n";
        assert!(matches!(parse(src), Err(ConfigError::KeyRequiresGameBlock(_, "bot"))));
    }

    #[test]
    fn rejects_reserved_bot_name() {
        let dir = tempfile::tempdir().unwrap();
        let game_path = write_game_file(&dir, "g.game", 2);
        let src = format!("game {}\nbot LOCAL /bin/example\n}}\n", game_path.display());
        assert!(matches!(parse(&src), Err(ConfigError::ReservedBotName(_))));
    }

    #[test]
    fn rejects_duplicate_user() {
        let src = "user alice a\nuser alice b\n";
        assert!(matches!(parse(src), Err(ConfigError::DuplicateUser(_, _))));
    }

    #[test]
    fn rejects_unknown_option() {
        assert!(matches!(parse("bogus 1\n"), Err(ConfigError::UnknownOption(_, _))));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let config = parse("# comment\n; also a comment\n\nport 1\n").unwrap();
        assert_eq!(config.port, 1);
    }
}
