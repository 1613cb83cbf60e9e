//! Search coordinator.
//!
//! A run moves through `Idle -> Running -> {Found | StoppedByUser | Exhausted}`.
//! [`SearchHandle::start`] validates the container, builds a rayon pool of
//! `workers` threads and broadcasts one worker loop onto each of them from a
//! dedicated coordinator thread. Workers share one [`SearchState`] and never
//! wait on each other: attempted counts are coalesced per sub-batch, the
//! sampled key for display is published with a non-blocking `try_lock`, and
//! only the winner publication takes a lock unconditionally.
//!
//! ```no_run
//! use packoxide::search::{SearchConfig, SearchHandle};
//!
//! # fn main() -> packoxide::Result<()> {
//! let data = std::fs::read("contents.json").unwrap();
//! let handle = SearchHandle::start(data, SearchConfig::default())?;
//! println!("{:?}", handle.poll());
//! handle.request_stop();
//! println!("{:?}", handle.join());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::container::Container;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::generator::{CounterPool, Enumerator, RandomSampler, Strategy, DEFAULT_RESERVATION};
use crate::key::Key;
use crate::validator::{Policy, Validator, Verdict};

/// Candidates a worker handles between two looks at the shared flags.
pub const SUB_BATCH: usize = 1024;

/// Upper bound on worker threads.
pub const MAX_WORKERS: usize = 256;

/// Hardware concurrency, or 8 when it cannot be queried.
pub fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(8).clamp(1, MAX_WORKERS)
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub strategy: Strategy,
    pub workers: usize,
    pub engine: Engine,
    pub policy: Policy,
    /// Counters a sequential worker claims per reservation.
    pub reservation: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Random,
            workers: default_workers(),
            engine: Engine::detect(),
            policy: Policy::default(),
            reservation: DEFAULT_RESERVATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle,
    Running,
    Found,
    StoppedByUser,
    Exhausted,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            1 => Phase::Running,
            2 => Phase::Found,
            3 => Phase::StoppedByUser,
            4 => Phase::Exhausted,
            _ => Phase::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Found | Phase::StoppedByUser | Phase::Exhausted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Found => "found",
            Phase::StoppedByUser => "stopped",
            Phase::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// How a run ended. Exactly one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Found(Key),
    Cancelled,
    Exhausted,
}

impl Outcome {
    pub fn key(&self) -> Option<&Key> {
        match self {
            Outcome::Found(key) => Some(key),
            _ => None,
        }
    }

    fn phase(&self) -> Phase {
        match self {
            Outcome::Found(_) => Phase::Found,
            Outcome::Cancelled => Phase::StoppedByUser,
            Outcome::Exhausted => Phase::Exhausted,
        }
    }
}

/// Shared progress and result state of one run.
#[derive(Debug)]
pub struct SearchState {
    attempted: AtomicU64,
    plausible: AtomicU64,
    phase: AtomicU8,
    stop: AtomicBool,
    found: AtomicBool,
    winner: Mutex<Option<Key>>,
    last_sampled: Mutex<Key>,
    finished: Mutex<Option<(Outcome, Duration)>>,
}

// Workers never leave shared data half-written, so a poisoned lock still
// holds a usable value.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            attempted: AtomicU64::new(0),
            plausible: AtomicU64::new(0),
            phase: AtomicU8::new(Phase::Idle as u8),
            stop: AtomicBool::new(false),
            found: AtomicBool::new(false),
            winner: Mutex::new(None),
            last_sampled: Mutex::new(Key::ZERO),
            finished: Mutex::new(None),
        }
    }

    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    /// Keys that matched the whole prefix but failed the text check.
    pub fn plausible(&self) -> u64 {
        self.plausible.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn is_found(&self) -> bool {
        self.found.load(Ordering::Acquire)
    }

    /// The winning key. Read under the same lock that sets the found flag.
    pub fn winner(&self) -> Option<Key> {
        *lock(&self.winner)
    }

    pub fn last_sampled(&self) -> Key {
        *lock(&self.last_sampled)
    }

    /// Returns false if another key already won.
    fn publish_winner(&self, key: Key) -> bool {
        let mut winner = lock(&self.winner);
        if winner.is_some() {
            return false;
        }
        *winner = Some(key);
        self.found.store(true, Ordering::Release);
        true
    }

    // Display only; skipped when the lock is busy.
    fn publish_sample(&self, key: &Key) {
        if let Ok(mut last) = self.last_sampled.try_lock() {
            *last = *key;
        }
    }

    fn record(&self, n: u64) {
        self.attempted.fetch_add(n, Ordering::Relaxed);
    }

    fn should_halt(&self) -> bool {
        self.is_found() || self.stop_requested()
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn finish(&self, outcome: Outcome, elapsed: Duration) {
        *lock(&self.finished) = Some((outcome, elapsed));
        self.set_phase(outcome.phase());
    }

    fn finished(&self) -> Option<(Outcome, Duration)> {
        *lock(&self.finished)
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a run's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub attempted: u64,
    pub plausible: u64,
    /// Wall time since start, frozen once the run ends.
    pub elapsed: Duration,
    pub last_sampled: Key,
    pub phase: Phase,
    pub outcome: Option<Outcome>,
}

/// Keys per second between consecutive status samples.
#[derive(Debug, Default, Clone)]
pub struct RateMeter {
    attempted: u64,
    elapsed: Duration,
}

impl RateMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self, status: &Status) -> f64 {
        let keys = status.attempted.saturating_sub(self.attempted);
        let secs = status.elapsed.saturating_sub(self.elapsed).as_secs_f64();
        self.attempted = status.attempted;
        self.elapsed = status.elapsed;
        if secs > 0.0 {
            keys as f64 / secs
        } else {
            0.0
        }
    }
}

/// A running (or finished) search.
///
/// Dropping the handle requests a stop and waits for the workers.
#[derive(Debug)]
pub struct SearchHandle {
    state: Arc<SearchState>,
    started: Instant,
    coordinator: Option<JoinHandle<Outcome>>,
}

enum Source {
    Random,
    Sequential(CounterPool),
}

impl SearchHandle {
    /// Validate `data` as a container and start searching its ciphertext.
    ///
    /// Malformed input and configuration errors are reported here, before
    /// any worker thread exists.
    pub fn start(data: Vec<u8>, config: SearchConfig) -> Result<Self> {
        let container = Container::parse(data)?;
        Self::start_with(&container, config)
    }

    pub fn start_with(container: &Container, config: SearchConfig) -> Result<Self> {
        if config.workers == 0 {
            return Err(Error::NoWorkers);
        }
        let workers = if config.workers > MAX_WORKERS {
            warn!("{} workers requested, capping at {MAX_WORKERS}", config.workers);
            MAX_WORKERS
        } else {
            config.workers
        };

        let validator = Validator::new(container.ciphertext(), config.policy, config.engine)?;
        let source = match config.strategy {
            Strategy::Random => Source::Random,
            Strategy::Sequential { start, end } => {
                Source::Sequential(CounterPool::new(start..end, config.reservation)?)
            }
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("packoxide-worker-{i}"))
            .build()?;

        info!(
            "searching {} ciphertext bytes: {} workers, {} backend, {} strategy, checking {} bytes",
            container.ciphertext().len(),
            workers,
            config.engine.backend(),
            config.strategy,
            validator.checked_len()
        );

        let state = Arc::new(SearchState::new());
        state.set_phase(Phase::Running);
        let started = Instant::now();

        let shared = Arc::clone(&state);
        let coordinator = thread::Builder::new()
            .name("packoxide-search".into())
            .spawn(move || coordinate(pool, &validator, &source, &shared, started))
            .map_err(Error::Spawn)?;

        Ok(Self { state, started, coordinator: Some(coordinator) })
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Snapshot of the progress counters. Never blocks on workers.
    pub fn poll(&self) -> Status {
        let finished = self.state.finished();
        Status {
            attempted: self.state.attempted(),
            plausible: self.state.plausible(),
            elapsed: finished.map_or_else(|| self.started.elapsed(), |(_, elapsed)| elapsed),
            last_sampled: self.state.last_sampled(),
            phase: self.state.phase(),
            outcome: finished.map(|(outcome, _)| outcome),
        }
    }

    /// Ask the workers to stop after their current sub-batch.
    pub fn request_stop(&self) {
        self.state.request_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.coordinator.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the run to end.
    ///
    /// A panic inside a worker is resumed on the calling thread.
    pub fn join(mut self) -> Outcome {
        match self.coordinator.take() {
            Some(handle) => match handle.join() {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => self.state.finished().map_or(Outcome::Cancelled, |(outcome, _)| outcome),
        }
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.coordinator.take() {
            self.state.request_stop();
            if handle.join().is_err() {
                warn!("search thread panicked while the handle was dropped");
            }
        }
    }
}

fn coordinate(
    pool: rayon::ThreadPool,
    validator: &Validator,
    source: &Source,
    state: &SearchState,
    started: Instant,
) -> Outcome {
    pool.broadcast(|ctx| {
        debug!("worker {} of {} running", ctx.index(), ctx.num_threads());
        match source {
            Source::Random => random_worker(validator, state),
            Source::Sequential(counters) => sequential_worker(validator, state, counters),
        }
    });

    // A winner beats a stop request that raced with it.
    let outcome = match state.winner() {
        Some(key) => Outcome::Found(key),
        None if state.stop_requested() => Outcome::Cancelled,
        None => Outcome::Exhausted,
    };
    let elapsed = started.elapsed();
    state.finish(outcome, elapsed);
    info!(
        "search {} after {} keys in {:.1}s",
        outcome.phase(),
        state.attempted(),
        elapsed.as_secs_f64()
    );
    outcome
}

fn random_worker(validator: &Validator, state: &SearchState) {
    let mut sampler = RandomSampler::from_entropy();
    let mut batch = vec![Key::ZERO; SUB_BATCH];
    loop {
        sampler.fill(&mut batch);
        if scan(validator, state, &batch) || state.should_halt() {
            return;
        }
    }
}

fn sequential_worker(validator: &Validator, state: &SearchState, counters: &CounterPool) {
    let mut batch = vec![Key::ZERO; SUB_BATCH];
    while let Some(range) = counters.reserve() {
        debug!("reserved counters {}..{}", range.start, range.end);
        let mut keys = Enumerator::new(range);
        loop {
            let n = keys.fill(&mut batch);
            if n == 0 {
                break;
            }
            if scan(validator, state, &batch[..n]) || state.should_halt() {
                return;
            }
        }
    }
}

/// Validate one sub-batch. True when a key in it was confirmed.
fn scan(validator: &Validator, state: &SearchState, keys: &[Key]) -> bool {
    let Some(first) = keys.first() else {
        return false;
    };
    state.publish_sample(first);

    let quads = keys.chunks_exact(4);
    let tail = quads.remainder();
    for (q, quad) in quads.enumerate() {
        let verdicts = validator.check_x4([&quad[0], &quad[1], &quad[2], &quad[3]]);
        for (j, verdict) in verdicts.into_iter().enumerate() {
            if settle(state, &quad[j], verdict) {
                state.record((q * 4 + j + 1) as u64);
                return true;
            }
        }
    }
    let done = keys.len() - tail.len();
    for (j, key) in tail.iter().enumerate() {
        if settle(state, key, validator.check(key)) {
            state.record((done + j + 1) as u64);
            return true;
        }
    }
    state.record(keys.len() as u64);
    false
}

fn settle(state: &SearchState, key: &Key, verdict: Verdict) -> bool {
    match verdict {
        Verdict::Confirmed { .. } => {
            if state.publish_winner(*key) {
                info!("key confirmed: {key}");
            }
            true
        }
        Verdict::Plausible { offset } => {
            state.plausible.fetch_add(1, Ordering::Relaxed);
            debug!("near miss {key}: prefix matched, byte {offset} is not text");
            false
        }
        Verdict::Reject { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::seal;
    use crate::generator::encode;

    const PLAINTEXT: &[u8] = br#"{"content":[{"path":"manifest.json","key":"s3cr3tK3yF0rTh1sF1l3"}]}"#;

    fn sealed(counter: u64) -> Vec<u8> {
        seal("pack", &encode(counter), PLAINTEXT, Engine::portable()).unwrap()
    }

    fn sequential(start: u64, count: u64, workers: usize) -> SearchConfig {
        SearchConfig {
            strategy: Strategy::sequential(start, Some(count)),
            workers,
            reservation: 500,
            ..SearchConfig::default()
        }
    }

    #[test]
    fn first_winner_is_kept() {
        let state = SearchState::new();
        assert!(state.publish_winner(encode(1)));
        assert!(!state.publish_winner(encode(2)));
        assert!(state.is_found());
        assert_eq!(state.winner(), Some(encode(1)));
    }

    #[test]
    fn phase_round_trips_through_its_tag() {
        for p in [Phase::Idle, Phase::Running, Phase::Found, Phase::StoppedByUser, Phase::Exhausted] {
            assert_eq!(Phase::from_u8(p as u8), p);
        }
        assert!(!Phase::Running.is_terminal());
        assert!(Phase::Exhausted.is_terminal());
    }

    #[test]
    fn rate_meter_uses_deltas() {
        let mut meter = RateMeter::new();
        let mut status = Status {
            attempted: 1_000,
            plausible: 0,
            elapsed: Duration::from_secs(1),
            last_sampled: Key::ZERO,
            phase: Phase::Running,
            outcome: None,
        };
        assert_eq!(meter.sample(&status), 1_000.0);
        status.attempted = 4_000;
        status.elapsed = Duration::from_secs(2);
        assert_eq!(meter.sample(&status), 3_000.0);
        assert_eq!(meter.sample(&status), 0.0);
    }

    #[test]
    fn scan_counts_up_to_the_winner() {
        let container = Container::parse(sealed(10)).unwrap();
        let validator =
            Validator::new(container.ciphertext(), Policy::default(), Engine::detect()).unwrap();
        let state = SearchState::new();
        let keys: Vec<Key> = (0..23).map(encode).collect();

        assert!(scan(&validator, &state, &keys));
        assert_eq!(state.attempted(), 11);
        assert_eq!(state.winner(), Some(encode(10)));
    }

    #[test]
    fn scan_checks_the_tail_past_the_last_quad() {
        let container = Container::parse(sealed(21)).unwrap();
        let validator =
            Validator::new(container.ciphertext(), Policy::default(), Engine::detect()).unwrap();
        let state = SearchState::new();
        let keys: Vec<Key> = (0..22).map(encode).collect();

        assert!(scan(&validator, &state, &keys));
        assert_eq!(state.attempted(), 22);
        assert_eq!(state.winner(), Some(encode(21)));
    }

    #[test]
    fn sequential_search_finds_the_key() {
        let handle = SearchHandle::start(sealed(4_321), sequential(0, 10_000, 3)).unwrap();
        let outcome = handle.join();
        assert_eq!(outcome, Outcome::Found(encode(4_321)));
    }

    #[test]
    fn poll_reports_terminal_state() {
        let handle = SearchHandle::start(sealed(7), sequential(0, 100, 1)).unwrap();
        while !handle.poll().phase.is_terminal() {
            thread::sleep(Duration::from_millis(5));
        }
        let status = handle.poll();
        assert_eq!(status.phase, Phase::Found);
        assert_eq!(status.outcome, Some(Outcome::Found(encode(7))));
        assert_eq!(status.attempted, 8);
        assert_eq!(handle.join(), Outcome::Found(encode(7)));
    }

    #[test]
    fn dropping_a_running_handle_stops_and_joins() {
        let config = SearchConfig { workers: 2, ..SearchConfig::default() };
        let handle = SearchHandle::start(sealed(3), config).unwrap();
        let state = Arc::clone(&handle.state);
        drop(handle);
        assert!(state.stop_requested());
        assert_eq!(state.phase(), Phase::StoppedByUser);
        assert_eq!(state.finished().map(|(outcome, _)| outcome), Some(Outcome::Cancelled));
        assert!(state.attempted() > 0);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = SearchHandle::start(sealed(0), sequential(0, 10, 0)).unwrap_err();
        assert!(matches!(err, Error::NoWorkers));
    }

    #[test]
    fn empty_range_is_rejected() {
        let err = SearchHandle::start(sealed(0), sequential(5, 0, 2)).unwrap_err();
        assert!(matches!(err, Error::EmptyRange));
    }
}
