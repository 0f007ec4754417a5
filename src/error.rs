use thiserror::Error;

/// Startup-fatal errors from loading the config file or the game files
/// it references. `main` renders these to stderr and exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not open configuration file {path}: {source}")]
    Open { path: String, source: std::io::Error },

    #[error("{0}: server port must be defined outside of game blocks")]
    PortInsideGameBlock(usize),

    #[error("{0}: can't define a game within another game block")]
    NestedGameBlock(usize),

    #[error("{0}: could not get game name from: {1}")]
    MissingGameName(usize, String),

    #[error("{0}: game {1} has already been used")]
    DuplicateGame(usize, String),

    #[error("{0}: could not open game file {1}: {2}")]
    GameFileOpen(usize, String, std::io::Error),

    #[error("{0}: could not read game {1}: {2}")]
    GameFileParse(usize, String, #[source] crate::rules::RulesError),

    #[error("{0}: {1} must be defined outside of game blocks")]
    KeyOutsideAllowed(usize, &'static str),

    #[error("{0}: {1} must be defined within a game block")]
    KeyRequiresGameBlock(usize, &'static str),

    #[error("{0}: could not parse {1} from: {2}")]
    BadValue(usize, &'static str, String),

    #[error("{0}: LOCAL is a reserved bot name")]
    ReservedBotName(usize),

    #[error("{0}: duplicate bot {1}")]
    DuplicateBot(usize, String),

    #[error("{0}: duplicate user {1}")]
    DuplicateUser(usize, String),

    #[error("{0}: could not get bot name and command from: {1}")]
    MalformedBot(usize, String),

    #[error("{0}: could not get user name and password from: {1}")]
    MalformedUser(usize, String),

    #[error("{0}: unknown configuration option: {1}")]
    UnknownOption(usize, String),
}

/// Fatal errors from the job supervisor: fork/spawn failure and the
/// referee port handshake. Both are process-fatal per spec.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("could not create error log {0}: {1}")]
    StderrLog(String, std::io::Error),

    #[error("could not spawn referee process: {0}")]
    SpawnReferee(std::io::Error),

    #[error("could not spawn bot process for {0}: {1}")]
    SpawnBot(String, std::io::Error),

    #[error("timed out waiting for port string from referee")]
    HandshakeTimeout,

    #[error("could not read port string from referee: {0}")]
    HandshakeRead(std::io::Error),

    #[error("referee closed its port pipe before sending a port line")]
    HandshakeEof,

    #[error("could not parse port for player {0} from referee handshake line {1:?}")]
    HandshakePortParse(usize, String),
}

/// Non-fatal, per-connection parse failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("bad logon line")]
    BadLogon,
    #[error("bad RUNMATCHES command")]
    BadRunMatches,
}
