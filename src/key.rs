//! Candidate keys: 32 symbols over a 62-letter alphabet.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub const KEY_SYMBOLS: usize = 32;

/// Digits, then lowercase, then uppercase. `'0'` is the zero symbol.
pub const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const RADIX: u64 = ALPHABET.len() as u64;

// Reverse lookup for ALPHABET; 0xFF marks symbols outside it.
const fn build_digits() -> [u8; 256] {
    let mut table = [0xFFu8; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

pub(crate) const DIGIT: [u8; 256] = build_digits();

/// A 32-byte AES-256 key whose bytes are ASCII symbols.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_SYMBOLS]);

impl Key {
    /// All zero symbols, the image of counter 0.
    pub const ZERO: Key = Key([b'0'; KEY_SYMBOLS]);

    pub fn from_bytes(bytes: [u8; KEY_SYMBOLS]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SYMBOLS] {
        &self.0
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8; KEY_SYMBOLS] {
        &mut self.0
    }

    /// True when every byte is drawn from [`ALPHABET`].
    pub fn is_canonical(&self) -> bool {
        self.0.iter().all(|&b| DIGIT[b as usize] != 0xFF)
    }
}

impl Default for Key {
    fn default() -> Self {
        Key::ZERO
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys parsed with FromStr are ASCII; anything else is shown lossily.
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

/// Accepts any 32 printable ASCII characters. The container format does not
/// restrict keys to the alphabet, only the search does.
impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != KEY_SYMBOLS {
            return Err(Error::InvalidKey(format!(
                "expected {KEY_SYMBOLS} characters, got {}",
                bytes.len()
            )));
        }
        if let Some(pos) = bytes.iter().position(|b| !b.is_ascii_graphic()) {
            return Err(Error::InvalidKey(format!("non-printable character at position {pos}")));
        }
        let mut key = [0u8; KEY_SYMBOLS];
        key.copy_from_slice(bytes);
        Ok(Key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_no_duplicates() {
        let mut seen = [false; 256];
        for &b in ALPHABET {
            assert!(!seen[b as usize], "duplicate symbol {}", b as char);
            seen[b as usize] = true;
        }
        assert_eq!(RADIX, 62);
    }

    #[test]
    fn parse_and_display() {
        let key: Key = "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5E".parse().unwrap();
        assert_eq!(key.to_string(), "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5E");
        assert!(key.is_canonical());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("short".parse::<Key>().is_err());
        assert!("Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5 ".parse::<Key>().is_err());
        let odd: Key = "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5!".parse().unwrap();
        assert!(!odd.is_canonical());
    }
}
