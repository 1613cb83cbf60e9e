//! AES-256 single-block encryption.
//!
//! Two interchangeable backends produce bit-identical output:
//!
//! | Backend | Implementation |
//! |---------|----------------|
//! | [`Backend::Portable`] | table S-box + `xtime` MixColumns, any target |
//! | [`Backend::Accelerated`] | AES-NI round instructions, x86/x86_64 with runtime detection |
//!
//! Only the forward direction exists; the 8-bit feedback mode never needs the
//! inverse cipher.

use std::fmt;

use cfg_if::cfg_if;

use crate::error::{Error, Result};

mod soft;

cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        mod ni;

        fn accelerated_available() -> bool {
            ni::is_supported()
        }

        fn accelerated_x4(schedules: [&Schedule; 4], blocks: &[Block; 4]) -> Option<[Block; 4]> {
            match schedules.map(|s| &s.0) {
                [Inner::Accelerated(a), Inner::Accelerated(b), Inner::Accelerated(c), Inner::Accelerated(d)] => {
                    // SAFETY: accelerated schedules only exist after runtime detection.
                    Some(unsafe { ni::encrypt_x4([a, b, c, d], blocks) })
                }
                _ => None,
            }
        }
    } else {
        fn accelerated_available() -> bool {
            false
        }

        fn accelerated_x4(_: [&Schedule; 4], _: &[Block; 4]) -> Option<[Block; 4]> {
            None
        }
    }
}

pub const KEY_LEN: usize = 32;
pub const BLOCK_LEN: usize = 16;
pub(crate) const ROUNDS: usize = 14;

pub type Block = [u8; BLOCK_LEN];

/// Which implementation computes the rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Portable,
    Accelerated,
}

impl Backend {
    /// The fastest backend this host can run.
    pub fn detect() -> Self {
        if accelerated_available() {
            Backend::Accelerated
        } else {
            Backend::Portable
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            Backend::Portable => true,
            Backend::Accelerated => accelerated_available(),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Portable => write!(f, "portable"),
            Backend::Accelerated => write!(f, "accelerated"),
        }
    }
}

/// A backend that has been checked against the host.
///
/// Holding an `Engine` proves the backend can run, so key expansion through
/// it cannot fail for a well-formed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Engine {
    backend: Backend,
}

impl Engine {
    pub fn new(backend: Backend) -> Result<Self> {
        if backend.is_available() {
            Ok(Self { backend })
        } else {
            Err(Error::BackendUnavailable(backend))
        }
    }

    pub fn detect() -> Self {
        Self { backend: Backend::detect() }
    }

    pub fn portable() -> Self {
        Self { backend: Backend::Portable }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Expand a key into its fifteen round keys.
    pub fn schedule(&self, key: &[u8; KEY_LEN]) -> Schedule {
        match self.backend {
            Backend::Portable => Schedule(Inner::Portable(soft::expand(key))),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            // SAFETY: Engine::new/detect only hand out Accelerated after runtime detection.
            Backend::Accelerated => Schedule(Inner::Accelerated(unsafe { ni::expand(key) })),
            #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
            Backend::Accelerated => unreachable!("accelerated engine on unsupported target"),
        }
    }

    pub fn schedule_from_slice(&self, key: &[u8]) -> Result<Schedule> {
        let key: &[u8; KEY_LEN] = key.try_into().map_err(|_| Error::KeyLength(key.len()))?;
        Ok(self.schedule(key))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::detect()
    }
}

/// Round-key material derived from one key. Never mutated after expansion.
#[derive(Clone)]
pub struct Schedule(Inner);

#[derive(Clone)]
enum Inner {
    Portable(soft::RoundKeys),
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    Accelerated(ni::RoundKeys),
}

impl Schedule {
    pub fn backend(&self) -> Backend {
        match self.0 {
            Inner::Portable(_) => Backend::Portable,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Inner::Accelerated(_) => Backend::Accelerated,
        }
    }

    #[inline]
    pub fn encrypt_block(&self, block: &Block) -> Block {
        match &self.0 {
            Inner::Portable(rk) => soft::encrypt_block(rk, block),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            // SAFETY: this variant is only built by an Engine that passed detection.
            Inner::Accelerated(rk) => unsafe { ni::encrypt_block(rk, block) },
        }
    }

    pub fn encrypt_slice(&self, block: &[u8]) -> Result<Block> {
        let block: &Block = block.try_into().map_err(|_| Error::BlockLength(block.len()))?;
        Ok(self.encrypt_block(block))
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("backend", &self.backend())
            .finish_non_exhaustive()
    }
}

/// Anything that can encrypt one block in place of a [`Schedule`].
pub trait BlockEncrypt {
    fn encrypt_block(&self, block: &Block) -> Block;
}

impl BlockEncrypt for Schedule {
    #[inline]
    fn encrypt_block(&self, block: &Block) -> Block {
        Schedule::encrypt_block(self, block)
    }
}

/// Encrypt four blocks, block `i` under `schedules[i]`.
///
/// When all four schedules are accelerated the rounds are interleaved in one
/// call; otherwise this is four single-block calls.
pub fn encrypt_x4(schedules: [&Schedule; 4], blocks: &[Block; 4]) -> [Block; 4] {
    if let Some(out) = accelerated_x4(schedules, blocks) {
        return out;
    }

    [
        schedules[0].encrypt_block(&blocks[0]),
        schedules[1].encrypt_block(&blocks[1]),
        schedules[2].encrypt_block(&blocks[2]),
        schedules[3].encrypt_block(&blocks[3]),
    ]
}
