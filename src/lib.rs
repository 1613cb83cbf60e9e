//! # packoxide
//!
//! Recovers the 32-symbol AES-256 key protecting an encrypted resource pack
//! `contents.json`. The metadata is encrypted with AES-256 in 8-bit cipher
//! feedback mode, with the first 16 key bytes as IV, and always starts with
//! `{"content":`. That known prefix lets a wrong key be rejected after a
//! single block encryption.
//!
//! * [`engine`]: AES-256 block encryption, portable and AES-NI paths.
//! * [`cfb8`]: the byte-wise feedback mode.
//! * [`validator`]: known-plaintext verdicts for candidate keys.
//! * [`generator`]: random sampling and base-62 counter enumeration.
//! * [`search`]: the multi-threaded search with progress and cancellation.
//! * [`container`]: the 256-byte header plus ciphertext file format.

pub mod cfb8;
pub mod container;
pub mod engine;
pub mod error;
pub mod generator;
pub mod key;
pub mod search;
pub mod validator;

pub use container::Container;
pub use engine::{Backend, Engine};
pub use error::{Error, ErrorKind, Result};
pub use generator::Strategy;
pub use key::Key;
pub use search::{Outcome, SearchConfig, SearchHandle, Status};
pub use validator::{Policy, Validator, Verdict};
