//! Candidate key generation.
//!
//! Two strategies over [`ALPHABET`], both producing 32-symbol keys:
//!
//! * random sampling: every position drawn independently and uniformly, no
//!   memory, collisions between workers accepted;
//! * sequential enumeration: counter `c` maps to its base-62 digits, most
//!   significant first, left-padded with `'0'`. A shared [`CounterPool`]
//!   hands out disjoint counter ranges, and each worker walks its range with
//!   an [`Enumerator`].
//!
//! Only the 2^64 keys reachable from a `u64` counter can be enumerated (the
//! top 21 symbols are always `'0'`); the full 62^32 space is only reachable
//! by sampling.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Uniform;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::key::{Key, ALPHABET, DIGIT, KEY_SYMBOLS, RADIX};

/// Default number of counters a worker reserves at once.
pub const DEFAULT_RESERVATION: u64 = 1_000_000;

/// How a search produces candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Uniform random keys until found or stopped. Never exhausts.
    Random,
    /// Counters `start..end` (end exclusive) in order.
    Sequential { start: u64, end: u64 },
}

impl Strategy {
    /// `count` counters from `start`; `None` runs to the end of the `u64` range.
    pub fn sequential(start: u64, count: Option<u64>) -> Self {
        let end = match count {
            Some(count) => start.saturating_add(count),
            None => u64::MAX,
        };
        Strategy::Sequential { start, end }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Random => write!(f, "random"),
            Strategy::Sequential { start, end } => write!(f, "sequential [{start}, {end})"),
        }
    }
}

/// Counter to key, base 62, most significant symbol first.
pub fn encode(mut counter: u64) -> Key {
    let mut key = Key::ZERO;
    let bytes = key.as_bytes_mut();
    let mut i = KEY_SYMBOLS;
    while counter > 0 {
        i -= 1;
        bytes[i] = ALPHABET[(counter % RADIX) as usize];
        counter /= RADIX;
    }
    key
}

/// Key to counter. `None` for keys outside the alphabet or beyond `u64`.
pub fn decode(key: &Key) -> Option<u64> {
    key.as_bytes().iter().try_fold(0u64, |acc, &b| {
        let digit = DIGIT[b as usize];
        if digit == 0xFF {
            return None;
        }
        acc.checked_mul(RADIX)?.checked_add(digit as u64)
    })
}

/// Advance a canonical key to the next counter in place, wrapping at 62^32.
#[inline]
pub fn increment(key: &mut Key) {
    for b in key.as_bytes_mut().iter_mut().rev() {
        let next = DIGIT[*b as usize] as usize + 1;
        if next < ALPHABET.len() {
            *b = ALPHABET[next];
            return;
        }
        *b = ALPHABET[0];
    }
}

/// Uniform sampler over the full key space.
pub struct RandomSampler<R = SmallRng> {
    rng: R,
    symbol: Uniform<usize>,
}

impl RandomSampler<SmallRng> {
    pub fn from_entropy() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }
}

impl<R: Rng> RandomSampler<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng, symbol: Uniform::new(0, ALPHABET.len()) }
    }

    pub fn sample(&mut self) -> Key {
        let mut key = Key::ZERO;
        for b in key.as_bytes_mut().iter_mut() {
            *b = ALPHABET[self.rng.sample(&self.symbol)];
        }
        key
    }

    pub fn fill(&mut self, out: &mut [Key]) {
        for slot in out {
            *slot = self.sample();
        }
    }
}

/// Shared source of disjoint counter ranges.
#[derive(Debug)]
pub struct CounterPool {
    next: AtomicU64,
    end: u64,
    reservation: u64,
}

impl CounterPool {
    pub fn new(range: Range<u64>, reservation: u64) -> Result<Self> {
        if range.is_empty() {
            return Err(Error::EmptyRange);
        }
        Ok(Self {
            next: AtomicU64::new(range.start),
            end: range.end,
            reservation: reservation.max(1),
        })
    }

    /// Atomically claim the next range; `None` once the pool is drained.
    ///
    /// Claimed ranges never overlap and never extend past the pool end.
    pub fn reserve(&self) -> Option<Range<u64>> {
        let end = self.end;
        let step = self.reservation;
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur < end).then(|| cur.saturating_add(step).min(end))
            })
            .ok()
            .map(|start| start..start.saturating_add(step).min(end))
    }

    /// Counters not yet handed out.
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.next.load(Ordering::Acquire))
    }
}

/// Walks one reserved counter range, keeping the current key incrementally.
#[derive(Debug, Clone)]
pub struct Enumerator {
    next: u64,
    end: u64,
    current: Key,
}

impl Enumerator {
    pub fn new(range: Range<u64>) -> Self {
        Self { next: range.start, end: range.end.max(range.start), current: encode(range.start) }
    }

    /// Counter of the next key [`Enumerator::fill`] would produce.
    pub fn position(&self) -> u64 {
        self.next
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }

    /// Write up to `out.len()` consecutive keys, returning how many.
    pub fn fill(&mut self, out: &mut [Key]) -> usize {
        let n = (out.len() as u64).min(self.remaining()) as usize;
        for slot in &mut out[..n] {
            *slot = self.current;
            increment(&mut self.current);
        }
        self.next += n as u64;
        n
    }
}

impl Iterator for Enumerator {
    type Item = Key;

    fn next(&mut self) -> Option<Key> {
        if self.next >= self.end {
            return None;
        }
        let key = self.current;
        increment(&mut self.current);
        self.next += 1;
        Some(key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (n, usize::try_from(self.remaining()).ok())
    }
}
