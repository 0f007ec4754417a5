//! Scheduler policy (C5).
//!
//! One pass repeatedly selects and dispatches the best runnable match
//! until either nothing is runnable or a budget refuses the best
//! candidate — see spec §4.3. Kept free of I/O and of `ServerState`'s
//! connection/job bookkeeping where possible so the selection policy
//! itself stays unit-testable.

use std::time::Instant;

use crate::error::DispatchError;
use crate::job;
use crate::match_queue::Match;
use crate::pool::Handle;
use crate::server::{ChildRole, ServerState};

pub enum PassOutcome {
    /// Dispatched at least one job this pass.
    Dispatched,
    /// Nothing runnable, or the best candidate was denied by a budget.
    Idle,
}

/// Run the scheduling pass to completion: repeatedly dispatch until no
/// runnable match remains or the global bot budget refuses the best
/// one. A `DispatchError` here is process-fatal (spec §7: fork and
/// handshake failures are not recoverable in situ).
pub async fn run_pass(state: &mut ServerState) -> Result<PassOutcome, DispatchError> {
    let mut dispatched_any = false;
    loop {
        garbage_collect(state);
        match try_dispatch_one(state).await? {
            Some(()) => dispatched_any = true,
            None => break,
        }
    }
    Ok(if dispatched_any { PassOutcome::Dispatched } else { PassOutcome::Idle })
}

/// Remove any non-running match whose `numRuns` has hit zero. Running
/// matches are left alone even at `numRuns == 0`; they are reclaimed
/// when their job finishes.
fn garbage_collect(state: &mut ServerState) {
    let dead: Vec<Handle<Match>> = state
        .matches
        .iter()
        .filter(|(_, m)| !m.is_running && m.num_runs <= 0)
        .map(|(h, _)| h)
        .collect();
    for handle in dead {
        state.matches.remove(handle);
    }
}

fn running_bots(state: &ServerState) -> usize {
    state
        .jobs
        .iter()
        .filter_map(|(_, job)| state.matches.get(job.match_handle))
        .map(|m| m.local_bot_count())
        .sum()
}

fn has_budget(state: &ServerState, game_idx: usize) -> bool {
    let cap = state.config.games[game_idx].max_running_jobs;
    cap == 0 || state.cur_running_jobs[game_idx] < cap
}

/// Strict priority: smaller `waitStart` wins; ties broken by smaller
/// `queueTime`; ties on both keep the earlier-encountered candidate.
fn select_best_match(state: &ServerState) -> Option<Handle<Match>> {
    let mut best: Option<(Handle<Match>, Instant, Instant)> = None;
    for (handle, m) in state.matches.iter() {
        if m.is_running || m.num_runs <= 0 || !has_budget(state, m.game) {
            continue;
        }
        let wait_start = state.wait_start[m.user];
        let queue_time = m.queue_time;
        let better = match &best {
            None => true,
            Some((_, best_wait, best_queue)) => {
                (wait_start, queue_time) < (*best_wait, *best_queue)
            }
        };
        if better {
            best = Some((handle, wait_start, queue_time));
        }
    }
    best.map(|(h, _, _)| h)
}

/// Attempt to dispatch one job. `Ok(Some(()))` means a job was
/// started; `Ok(None)` means the pass is done (nothing runnable, or
/// the global bot budget refused the best candidate).
async fn try_dispatch_one(state: &mut ServerState) -> Result<Option<()>, DispatchError> {
    let Some(handle) = select_best_match(state) else {
        return Ok(None);
    };

    let running = running_bots(state);
    let local_bots = state.matches.get(handle).expect("handle from select_best_match is live").local_bot_count();
    if state.config.max_running_bots > 0 && running + local_bots > state.config.max_running_bots as usize {
        return Ok(None);
    }

    let game_idx = state.matches.get(handle).unwrap().game;
    let seed = {
        let (matches, rng) = (&mut state.matches, &mut state.rng);
        matches.get_mut(handle).unwrap().next_seed(rng)
    };

    let outcome = {
        let match_ref = state.matches.get(handle).expect("handle from select_best_match is live");
        job::spawn_job(&state.config, game_idx, handle, match_ref, seed, &state.hostname, &mut state.conns).await?
    };

    let job_handle = state.jobs.insert(outcome.job);
    job::spawn_reapers(job_handle, outcome.dealer_child, outcome.bot_children, state.event_tx.clone());

    state.cur_running_jobs[game_idx] += 1;
    let now = Instant::now();
    let m = state.matches.get_mut(handle).expect("handle from select_best_match is live");
    m.is_running = true;
    m.num_runs -= 1;
    m.queue_time = now;
    let user_idx = m.user;
    state.wait_start[user_idx] = now;

    Ok(Some(()))
}

/// Reap event-loop-visible bookkeeping for a child exit (C4's
/// "reaping" step, but event-driven rather than polled — see
/// `job::spawn_reapers`). Frees the job's budget and clears the
/// match's `isRunning` once every child of the job has exited.
pub fn handle_child_exit(state: &mut ServerState, job_handle: Handle<crate::job::MatchJob>, role: ChildRole) {
    let Some(job) = state.jobs.get_mut(job_handle) else { return };
    match role {
        ChildRole::Dealer => job.dealer_alive = false,
        ChildRole::Bot(seat) => {
            if let Some(alive) = job.bot_alive.get_mut(seat) {
                *alive = false;
            }
        }
    }
    if !job.is_finished() {
        return;
    }
    let match_handle = job.match_handle;
    state.jobs.remove(job_handle);
    if let Some(m) = state.matches.get_mut(match_handle) {
        m.is_running = false;
        let game_idx = m.game;
        state.cur_running_jobs[game_idx] = state.cur_running_jobs[game_idx].saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::match_queue::{MatchSpec, Seat};
    use crate::pool::Arena;
    use std::time::Instant;

    fn two_game_config() -> Config {
        let mut config = Config::default();
        config.games.push(crate::config::GameConfig {
            game_file: "a.game".into(),
            game: crate::rules::GameDef { num_players: 1 },
            bots: vec![crate::config::BotSpec { name: "b".to_string(), command: "/bin/b".into() }],
            max_match_runs: 10,
            max_running_jobs: 0,
            match_hands: 10,
        });
        config.users.push(crate::config::UserSpec { name: "alice".to_string(), password: "p".to_string() });
        config.users.push(crate::config::UserSpec { name: "bob".to_string(), password: "p".to_string() });
        config
    }

    fn bare_state(config: Config) -> ServerState {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        ServerState {
            config: config.clone(),
            conns: Arena::new(),
            matches: Arena::new(),
            jobs: Arena::new(),
            rng: rand::rngs::StdRng::seed_from_u64(0),
            hostname: "127.0.0.1".to_string(),
            cur_running_jobs: vec![0; config.games.len()],
            wait_start: vec![Instant::now(); config.users.len()],
            event_tx: tx,
        }
    }

    fn push_match(state: &mut ServerState, user: usize, queue_time: Instant) -> Handle<Match> {
        let spec = MatchSpec { game: 0, num_runs: 1, tag: "t".to_string(), seed: 0, players: vec![Seat::Bot(0)] };
        let mut m = Match::new(spec, user, queue_time);
        m.queue_time = queue_time;
        state.matches.insert(m)
    }

    use rand::SeedableRng;

    #[test]
    fn select_best_prefers_smaller_wait_start() {
        let mut state = bare_state(two_game_config());
        let now = Instant::now();
        state.wait_start[0] = now;
        state.wait_start[1] = now - std::time::Duration::from_secs(10);
        push_match(&mut state, 0, now);
        let bob_match = push_match(&mut state, 1, now);
        assert_eq!(select_best_match(&state), Some(bob_match));
    }

    #[test]
    fn select_best_breaks_wait_start_tie_by_queue_time() {
        let mut state = bare_state(two_game_config());
        let now = Instant::now();
        let earlier = push_match(&mut state, 0, now - std::time::Duration::from_secs(5));
        push_match(&mut state, 0, now);
        assert_eq!(select_best_match(&state), Some(earlier));
    }

    #[test]
    fn select_best_skips_games_without_budget() {
        let mut state = bare_state(two_game_config());
        state.config.games[0].max_running_jobs = 1;
        state.cur_running_jobs[0] = 1;
        push_match(&mut state, 0, Instant::now());
        assert_eq!(select_best_match(&state), None);
    }

    #[test]
    fn garbage_collect_drops_exhausted_pending_matches_only() {
        let mut state = bare_state(two_game_config());
        let spec = MatchSpec { game: 0, num_runs: 0, tag: "t".to_string(), seed: 0, players: vec![Seat::Bot(0)] };
        let dead = state.matches.insert(Match::new(spec, 0, Instant::now()));
        let spec2 = MatchSpec { game: 0, num_runs: 0, tag: "t2".to_string(), seed: 0, players: vec![Seat::Bot(0)] };
        let mut running = Match::new(spec2, 0, Instant::now());
        running.is_running = true;
        let running_handle = state.matches.insert(running);

        garbage_collect(&mut state);

        assert!(state.matches.get(dead).is_none());
        assert!(state.matches.get(running_handle).is_some());
    }
}
