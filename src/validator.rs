//! Known-plaintext validation of candidate keys.
//!
//! The encrypted metadata is a JSON document that always starts with
//! `{"content":`. A candidate is decrypted one CFB8 byte at a time and
//! dropped at the first byte that cannot belong to that document:
//!
//! 1. bytes inside the known prefix must match it exactly;
//! 2. the next `extended` bytes must be printable ASCII or TAB/LF/CR.
//!
//! Almost every wrong key dies on byte 0, after a single block encryption.
//! There is exactly one policy; every search path goes through [`Validator`].

use crate::cfb8::FeedbackRegister;
use crate::engine::{encrypt_x4, Block, BlockEncrypt, Engine, Schedule};
use crate::error::{Error, Result};
use crate::key::Key;

/// Plaintext prefix of every encrypted `contents.json`.
pub const CONTENT_PREFIX: &[u8] = b"{\"content\":";

/// Shortest ciphertext a validation can run against.
pub const MIN_CIPHERTEXT: usize = 4;

/// Default number of heuristically checked bytes after the prefix.
pub const DEFAULT_EXTENDED: usize = 21;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    prefix: Vec<u8>,
    extended: usize,
}

impl Policy {
    pub fn new(prefix: impl Into<Vec<u8>>, extended: usize) -> Self {
        Self { prefix: prefix.into(), extended }
    }

    /// Only the exact prefix, no printable-text span.
    pub fn prefix_only() -> Self {
        Self::new(CONTENT_PREFIX, 0)
    }

    pub fn with_extended(mut self, extended: usize) -> Self {
        self.extended = extended;
        self
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn extended(&self) -> usize {
        self.extended
    }

    /// Bytes this policy wants to see, before clamping to the ciphertext.
    pub fn span(&self) -> usize {
        self.prefix.len().saturating_add(self.extended)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(CONTENT_PREFIX, DEFAULT_EXTENDED)
    }
}

/// Printable ASCII plus the whitespace JSON writers emit.
#[inline]
pub fn is_texty(b: u8) -> bool {
    matches!(b, 0x20..=0x7E | b'\t' | b'\n' | b'\r')
}

/// Result of validating one key.
///
/// `offset` is the index of the first failing plaintext byte, so a failed
/// validation cost `offset + 1` block encryptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A byte inside the known prefix did not match.
    Reject { offset: usize },
    /// The whole prefix matched but the text heuristic failed later on.
    Plausible { offset: usize },
    /// Every checked byte passed.
    Confirmed { checked: usize },
}

impl Verdict {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Verdict::Confirmed { .. })
    }

    /// Block encryptions spent reaching this verdict.
    pub fn blocks(&self) -> usize {
        match *self {
            Verdict::Reject { offset } | Verdict::Plausible { offset } => offset + 1,
            Verdict::Confirmed { checked } => checked,
        }
    }
}

/// Applies a [`Policy`] to candidate keys against one ciphertext.
///
/// Keeps a private copy of the ciphertext bytes it checks and no per-key
/// state, so one validator is shared by every worker; each call builds its
/// own schedule and feedback register.
#[derive(Debug, Clone)]
pub struct Validator {
    window: Box<[u8]>,
    policy: Policy,
    engine: Engine,
}

impl Validator {
    pub fn new(ciphertext: &[u8], policy: Policy, engine: Engine) -> Result<Self> {
        if ciphertext.len() < MIN_CIPHERTEXT {
            return Err(Error::TooShort { len: ciphertext.len(), min: MIN_CIPHERTEXT });
        }
        if policy.span() == 0 {
            return Err(Error::EmptyPolicy);
        }
        let checked = policy.span().min(ciphertext.len());
        Ok(Self { window: ciphertext[..checked].into(), policy, engine })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Plaintext bytes a key must survive to be confirmed.
    pub fn checked_len(&self) -> usize {
        self.window.len()
    }

    pub fn check(&self, key: &Key) -> Verdict {
        let schedule = self.engine.schedule(key.as_bytes());
        self.check_with(&schedule, key)
    }

    /// Validate with a caller-supplied cipher for `key`.
    pub fn check_with<C: BlockEncrypt + ?Sized>(&self, cipher: &C, key: &Key) -> Verdict {
        self.resume(cipher, FeedbackRegister::from_key(key.as_bytes()), 0)
    }

    /// Validate four keys, sharing the first feedback step.
    ///
    /// The first block of all four keys goes through [`encrypt_x4`], each
    /// under its own schedule. Keys that survive byte 0 continue one at a
    /// time. Verdicts are identical to four [`Validator::check`] calls.
    pub fn check_x4(&self, keys: [&Key; 4]) -> [Verdict; 4] {
        let schedules: [Schedule; 4] = keys.map(|k| self.engine.schedule(k.as_bytes()));
        let schedules = [&schedules[0], &schedules[1], &schedules[2], &schedules[3]];
        let registers = keys.map(|k| FeedbackRegister::from_key(k.as_bytes()));
        let keystream = encrypt_x4(schedules, &registers.map(|r| *r.as_block()));
        self.settle_x4(schedules, registers, &keystream)
    }

    /// Finish four validations whose first block is already encrypted.
    fn settle_x4<C: BlockEncrypt + ?Sized>(
        &self,
        ciphers: [&C; 4],
        registers: [FeedbackRegister; 4],
        keystream: &[Block; 4],
    ) -> [Verdict; 4] {
        let first = self.window[0];
        let mut verdicts = [Verdict::Reject { offset: 0 }; 4];
        for i in 0..4 {
            let plain = first ^ keystream[i][0];
            if !self.accepts(0, plain) {
                verdicts[i] = self.fail(0);
                continue;
            }
            let mut register = registers[i];
            register.push(first);
            verdicts[i] = self.resume(ciphers[i], register, 1);
        }
        verdicts
    }

    fn resume<C: BlockEncrypt + ?Sized>(
        &self,
        cipher: &C,
        mut register: FeedbackRegister,
        start: usize,
    ) -> Verdict {
        for (i, &c) in self.window.iter().enumerate().skip(start) {
            let plain = register.decrypt_byte(cipher, c);
            if !self.accepts(i, plain) {
                return self.fail(i);
            }
        }
        Verdict::Confirmed { checked: self.window.len() }
    }

    #[inline]
    fn accepts(&self, offset: usize, plain: u8) -> bool {
        match self.policy.prefix.get(offset) {
            Some(&expected) => plain == expected,
            None => is_texty(plain),
        }
    }

    #[inline]
    fn fail(&self, offset: usize) -> Verdict {
        if offset < self.policy.prefix.len() {
            Verdict::Reject { offset }
        } else {
            Verdict::Plausible { offset }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfb8;
    use std::cell::Cell;

    const PLAINTEXT: &[u8] =
        b"{\"content\":[{\"path\":\"textures/blocks/stone.png\",\"key\":\"Qe7rT2yU9iO4pA1sD6fG3hJ8kL5zX0cV\"}]}";

    fn key() -> Key {
        "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5E".parse().unwrap()
    }

    fn seal(key: &Key, plain: &[u8]) -> Vec<u8> {
        let schedule = Engine::portable().schedule(key.as_bytes());
        let mut buf = plain.to_vec();
        cfb8::encrypt(&schedule, FeedbackRegister::from_key(key.as_bytes()).as_block(), &mut buf);
        buf
    }

    struct Counting<'a> {
        inner: &'a Schedule,
        calls: Cell<usize>,
    }

    impl BlockEncrypt for Counting<'_> {
        fn encrypt_block(&self, block: &Block) -> Block {
            self.calls.set(self.calls.get() + 1);
            self.inner.encrypt_block(block)
        }
    }

    #[test]
    fn right_key_is_confirmed() {
        let ct = seal(&key(), PLAINTEXT);
        let v = Validator::new(&ct, Policy::default(), Engine::detect()).unwrap();
        assert_eq!(v.checked_len(), 32);
        assert_eq!(v.check(&key()), Verdict::Confirmed { checked: 32 });
    }

    #[test]
    fn wrong_key_is_rejected() {
        let ct = seal(&key(), PLAINTEXT);
        let v = Validator::new(&ct, Policy::default(), Engine::detect()).unwrap();
        let other: Key = "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5F".parse().unwrap();
        assert!(!v.check(&other).is_confirmed());
    }

    #[test]
    fn first_byte_mismatch_costs_one_block() {
        let mut ct = seal(&key(), PLAINTEXT);
        ct[0] ^= 0x01;
        let v = Validator::new(&ct, Policy::default(), Engine::portable()).unwrap();
        let schedule = Engine::portable().schedule(key().as_bytes());
        let counting = Counting { inner: &schedule, calls: Cell::new(0) };

        let verdict = v.check_with(&counting, &key());
        assert_eq!(verdict, Verdict::Reject { offset: 0 });
        assert_eq!(counting.calls.get(), 1);
        assert_eq!(verdict.blocks(), 1);
    }

    #[test]
    fn stops_at_first_failure_inside_prefix() {
        let mut ct = seal(&key(), PLAINTEXT);
        ct[5] ^= 0x40;
        let v = Validator::new(&ct, Policy::default(), Engine::portable()).unwrap();
        let schedule = Engine::portable().schedule(key().as_bytes());
        let counting = Counting { inner: &schedule, calls: Cell::new(0) };

        assert_eq!(v.check_with(&counting, &key()), Verdict::Reject { offset: 5 });
        assert_eq!(counting.calls.get(), 6);
    }

    #[test]
    fn binary_after_prefix_is_plausible_not_confirmed() {
        let mut plain = CONTENT_PREFIX.to_vec();
        plain.extend_from_slice(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        let ct = seal(&key(), &plain);
        let v = Validator::new(&ct, Policy::default(), Engine::detect()).unwrap();
        assert_eq!(v.check(&key()), Verdict::Plausible { offset: CONTENT_PREFIX.len() });

        let lenient = Validator::new(&ct, Policy::prefix_only(), Engine::detect()).unwrap();
        assert_eq!(lenient.check(&key()), Verdict::Confirmed { checked: CONTENT_PREFIX.len() });
    }

    #[test]
    fn short_ciphertext_clamps_checked_length() {
        let ct = seal(&key(), &PLAINTEXT[..6]);
        let v = Validator::new(&ct, Policy::default(), Engine::detect()).unwrap();
        assert_eq!(v.checked_len(), 6);
        assert_eq!(v.check(&key()), Verdict::Confirmed { checked: 6 });
    }

    #[test]
    fn rejects_too_short_and_empty_policy() {
        assert!(matches!(
            Validator::new(&[1, 2, 3], Policy::default(), Engine::portable()),
            Err(Error::TooShort { len: 3, min: MIN_CIPHERTEXT })
        ));
        assert!(matches!(
            Validator::new(&[1, 2, 3, 4], Policy::new(Vec::new(), 0), Engine::portable()),
            Err(Error::EmptyPolicy)
        ));
    }

    #[test]
    fn x4_agrees_with_single_checks() {
        let ct = seal(&key(), PLAINTEXT);
        let v = Validator::new(&ct, Policy::default(), Engine::detect()).unwrap();
        let keys: Vec<Key> = [
            "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5A",
            "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5B",
            "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5E",
            "00000000000000000000000000000000",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();

        let batched = v.check_x4([&keys[0], &keys[1], &keys[2], &keys[3]]);
        for (k, verdict) in keys.iter().zip(batched) {
            assert_eq!(verdict, v.check(k), "{k}");
        }
        assert!(batched[2].is_confirmed());
    }

    fn counting_x4(schedules: &[Schedule]) -> Vec<Counting<'_>> {
        schedules.iter().map(|inner| Counting { inner, calls: Cell::new(0) }).collect()
    }

    #[test]
    fn x4_first_byte_mismatch_costs_one_block_per_key() {
        let mut ct = seal(&key(), PLAINTEXT);
        ct[0] ^= 0x01;
        let v = Validator::new(&ct, Policy::default(), Engine::portable()).unwrap();
        let keys = [key(); 4];
        let schedules: Vec<Schedule> =
            keys.iter().map(|k| Engine::portable().schedule(k.as_bytes())).collect();
        let counting = counting_x4(&schedules);
        let ciphers = [&counting[0], &counting[1], &counting[2], &counting[3]];
        let registers = keys.map(|k| FeedbackRegister::from_key(k.as_bytes()));
        let keystream: [Block; 4] =
            core::array::from_fn(|i| ciphers[i].encrypt_block(registers[i].as_block()));

        let verdicts = v.settle_x4(ciphers, registers, &keystream);
        assert_eq!(verdicts, [Verdict::Reject { offset: 0 }; 4]);
        assert!(counting.iter().all(|c| c.calls.get() == 1));
        assert_eq!(v.check_x4([&keys[0], &keys[1], &keys[2], &keys[3]]), verdicts);
    }

    #[test]
    fn x4_survivor_continues_alone() {
        let mut ct = seal(&key(), PLAINTEXT);
        ct[5] ^= 0x40;
        let v = Validator::new(&ct, Policy::default(), Engine::portable()).unwrap();
        let other: Key = "00000000000000000000000000000000".parse().unwrap();
        let keys = [other, key(), other, other];
        let schedules: Vec<Schedule> =
            keys.iter().map(|k| Engine::portable().schedule(k.as_bytes())).collect();
        let counting = counting_x4(&schedules);
        let ciphers = [&counting[0], &counting[1], &counting[2], &counting[3]];
        let registers = keys.map(|k| FeedbackRegister::from_key(k.as_bytes()));
        let keystream: [Block; 4] =
            core::array::from_fn(|i| ciphers[i].encrypt_block(registers[i].as_block()));

        let verdicts = v.settle_x4(ciphers, registers, &keystream);
        assert_eq!(verdicts[1], Verdict::Reject { offset: 5 });
        assert_eq!(counting[1].calls.get(), 6);
        for i in [0, 2, 3] {
            assert_eq!(counting[i].calls.get(), verdicts[i].blocks());
        }
    }

    #[test]
    fn huge_extended_span_saturates() {
        let policy = Policy::new(CONTENT_PREFIX, usize::MAX);
        assert_eq!(policy.span(), usize::MAX);

        let ct = seal(&key(), PLAINTEXT);
        let v = Validator::new(&ct, policy, Engine::portable()).unwrap();
        assert_eq!(v.checked_len(), ct.len());
        assert_eq!(v.check(&key()), Verdict::Confirmed { checked: ct.len() });

        let wrong: Key = "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5F".parse().unwrap();
        assert!(!v.check(&wrong).is_confirmed());
    }

    #[test]
    fn texty_bytes() {
        assert!(is_texty(b' '));
        assert!(is_texty(b'~'));
        assert!(is_texty(b'\n'));
        assert!(!is_texty(0x7F));
        assert!(!is_texty(0x00));
        assert!(!is_texty(0xC3));
    }
}
