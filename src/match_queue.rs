//! Match descriptors (C3).
//!
//! A `Match` is a queued-or-running request: which game, which user,
//! how many runs remain, and the seat assignments. The mutable
//! per-user/per-game bookkeeping (`waitStart`, `curRunningJobs`) lives
//! on [`crate::server::ServerState`] rather than here, since `Config`
//! itself is immutable — see `config.rs`.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::connection::Connection;
use crate::pool::Handle;

/// One player seat: bound to a submitting client's connection, or to a
/// configured bot.
#[derive(Debug, Clone, Copy)]
pub enum Seat {
    Network(Handle<Connection>),
    Bot(usize),
}

/// A parsed, not-yet-enqueued `RUNMATCHES` request (built by
/// `protocol.rs`, consumed by `Match::new`).
pub struct MatchSpec {
    pub game: usize,
    pub num_runs: i64,
    pub tag: String,
    pub seed: u32,
    pub players: Vec<Seat>,
}

#[derive(Debug)]
pub struct Match {
    pub game: usize,
    pub user: usize,
    pub num_runs: i64,
    /// The seed as submitted on the wire; zero means "let the server
    /// draw one".
    pub submitted_seed: u32,
    /// Decided once at enqueue time from `submitted_seed != 0 &&
    /// num_runs > 1` — the literal-vs-derived bifurcation in spec.md
    /// §3 is fixed at submission, not re-evaluated per dispatch.
    use_rng_for_seed: bool,
    rng: Option<StdRng>,
    pub tag: String,
    pub queue_time: Instant,
    pub players: Vec<Seat>,
    pub is_running: bool,
}

impl Match {
    pub fn new(spec: MatchSpec, user: usize, now: Instant) -> Self {
        let use_rng_for_seed = spec.seed != 0 && spec.num_runs > 1;
        let rng = use_rng_for_seed.then(|| StdRng::seed_from_u64(spec.seed as u64));
        Self {
            game: spec.game,
            user,
            num_runs: spec.num_runs,
            submitted_seed: spec.seed,
            use_rng_for_seed,
            rng,
            tag: spec.tag,
            queue_time: now,
            players: spec.players,
            is_running: false,
        }
    }

    pub fn local_bot_count(&self) -> usize {
        self.players.iter().filter(|seat| matches!(seat, Seat::Bot(_))).count()
    }

    pub fn references_connection(&self, handle: Handle<Connection>) -> bool {
        self.players.iter().any(|seat| matches!(seat, Seat::Network(h) if *h == handle))
    }

    /// The seed to hand the referee for the next dispatch, per the
    /// bifurcation fixed at construction time.
    pub fn next_seed(&mut self, server_rng: &mut StdRng) -> u32 {
        if let Some(rng) = self.rng.as_mut() {
            rng.r#gen()
        } else if self.submitted_seed != 0 {
            self.submitted_seed
        } else {
            server_rng.r#gen()
        }
    }
}
