//! Minimal stand-in for the external game-rules library.
//!
//! The real ACPC game-definition grammar (blinds, stack sizes, betting
//! rounds, card counts, ...) is out of scope per spec.md §1 — a real
//! deployment links against the actual rules library. All the
//! scheduler needs out of a game file is `numPlayers`, so that's all
//! this module extracts.

use std::path::Path;
use thiserror::Error;

pub const MAX_PLAYERS: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RulesError {
    #[error("game file has no numPlayers field")]
    MissingNumPlayers,
    #[error("numPlayers value {0:?} is not a valid integer")]
    BadNumPlayers(String),
    #[error("numPlayers {0} is out of range 1..={MAX_PLAYERS}")]
    NumPlayersOutOfRange(usize),
}

/// The slice of a game definition the scheduler actually consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameDef {
    pub num_players: usize,
}

impl GameDef {
    pub fn parse(contents: &str) -> Result<Self, RulesError> {
        for line in contents.lines() {
            let line = line.trim();
            let Some(rest) = line.strip_prefix("numPlayers") else { continue };
            let rest = rest.trim_start_matches([' ', '\t', '=']).trim();
            let value: usize = rest
                .split_whitespace()
                .next()
                .ok_or_else(|| RulesError::BadNumPlayers(rest.to_string()))?
                .parse()
                .map_err(|_| RulesError::BadNumPlayers(rest.to_string()))?;
            if value == 0 || value > MAX_PLAYERS {
                return Err(RulesError::NumPlayersOutOfRange(value));
            }
            return Ok(GameDef { num_players: value });
        }
        Err(RulesError::MissingNumPlayers)
    }

    pub fn load(path: &Path) -> std::io::Result<Result<Self, RulesError>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }
}
