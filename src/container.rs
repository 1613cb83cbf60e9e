//! Encrypted `contents.json` container.
//!
//! ## Layout
//!
//! ```text
//! 0x000  u32 LE   version (written as 0)
//! 0x004  [u8; 4]  magic FC B9 CF 9B
//! 0x008  ...      zero padding
//! 0x010  u8       content id length
//! 0x011  [u8; n]  content id (UTF-8, usually the pack UUID)
//!  ...            zero padding up to 0x100
//! 0x100  ...      CFB8 ciphertext, IV = first 16 key bytes, to end of file
//! ```
//!
//! Only the magic and the overall length are validated; the remaining header
//! fields are informational.

use crate::cfb8::{self, FeedbackRegister};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::validator::MIN_CIPHERTEXT;

pub const HEADER_LEN: usize = 0x100;
pub const MAGIC: [u8; 4] = [0xFC, 0xB9, 0xCF, 0x9B];
pub const MAGIC_OFFSET: usize = 4;
pub const CONTENT_ID_OFFSET: usize = 0x10;

/// Longest content id that still fits inside the header.
pub const MAX_CONTENT_ID: usize = HEADER_LEN - CONTENT_ID_OFFSET - 1;

/// Smallest buffer that can be searched.
pub const MIN_LEN: usize = HEADER_LEN + MIN_CIPHERTEXT;

/// A validated container buffer.
#[derive(Debug, Clone)]
pub struct Container {
    data: Vec<u8>,
}

impl Container {
    /// Validate length and magic. Nothing else is inspected.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < MIN_LEN {
            return Err(Error::TooShort { len: data.len(), min: MIN_LEN });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[MAGIC_OFFSET..MAGIC_OFFSET + 4]);
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
        Ok(Self { data })
    }

    pub fn version(&self) -> u32 {
        u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    /// The content id, if its length byte is in range and the bytes are UTF-8.
    pub fn content_id(&self) -> Option<&str> {
        let len = self.data[CONTENT_ID_OFFSET] as usize;
        let start = CONTENT_ID_OFFSET + 1;
        if len == 0 || start + len > HEADER_LEN {
            return None;
        }
        std::str::from_utf8(&self.data[start..start + len]).ok()
    }

    pub fn header(&self) -> &[u8] {
        &self.data[..HEADER_LEN]
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.data[HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decrypt the whole metadata document with `key`.
    ///
    /// Any key "decrypts"; check the result with a
    /// [`Validator`](crate::validator::Validator) first.
    pub fn decrypt(&self, key: &Key, engine: Engine) -> Vec<u8> {
        let schedule = engine.schedule(key.as_bytes());
        let mut plain = self.ciphertext().to_vec();
        cfb8::decrypt(&schedule, FeedbackRegister::from_key(key.as_bytes()).as_block(), &mut plain);
        plain
    }
}

/// Build a container around `plaintext`, encrypted under `key`.
pub fn seal(content_id: &str, key: &Key, plaintext: &[u8], engine: Engine) -> Result<Vec<u8>> {
    let id = content_id.as_bytes();
    if id.len() > MAX_CONTENT_ID {
        return Err(Error::ContentIdTooLong(id.len()));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&MAGIC);
    out.resize(CONTENT_ID_OFFSET, 0);
    out.push(id.len() as u8);
    out.extend_from_slice(id);
    out.resize(HEADER_LEN, 0);

    let schedule = engine.schedule(key.as_bytes());
    let mut body = plaintext.to_vec();
    cfb8::encrypt(&schedule, FeedbackRegister::from_key(key.as_bytes()).as_block(), &mut body);
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "9f1c2a3e-5b6d-4e7f-8a9b-0c1d2e3f4a5b";

    fn key() -> Key {
        "Kf3x9QpLm2Zt7Rb1Yc8Wd4Hn6Vg0Js5E".parse().unwrap()
    }

    #[test]
    fn seal_then_parse() {
        let plain = br#"{"content":[]}"#;
        let bytes = seal(UUID, &key(), plain, Engine::detect()).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + plain.len());

        let c = Container::parse(bytes).unwrap();
        assert_eq!(c.version(), 0);
        assert_eq!(c.content_id(), Some(UUID));
        assert_eq!(c.ciphertext().len(), plain.len());
        assert_eq!(c.decrypt(&key(), Engine::portable()), plain);
    }

    #[test]
    fn too_short_is_malformed() {
        let mut data = vec![0u8; MIN_LEN - 1];
        data[4..8].copy_from_slice(&MAGIC);
        let err = Container::parse(data).unwrap_err();
        assert!(matches!(err, Error::TooShort { len, min } if len == MIN_LEN - 1 && min == MIN_LEN));
        assert!(err.is_malformed_input());
    }

    #[test]
    fn magic_mismatch_is_malformed() {
        let mut data = seal(UUID, &key(), b"{\"content\":[]}", Engine::portable()).unwrap();
        data[7] ^= 0xFF;
        let err = Container::parse(data).unwrap_err();
        assert!(matches!(err, Error::BadMagic([0xFC, 0xB9, 0xCF, 0x64])));
    }

    #[test]
    fn content_id_length_is_bounded() {
        let longest = "x".repeat(MAX_CONTENT_ID);
        let bytes = seal(&longest, &key(), b"{\"content\":[]}", Engine::portable()).unwrap();
        assert_eq!(Container::parse(bytes).unwrap().content_id(), Some(longest.as_str()));

        let long = "x".repeat(MAX_CONTENT_ID + 1);
        assert!(matches!(
            seal(&long, &key(), b"{}", Engine::portable()),
            Err(Error::ContentIdTooLong(240))
        ));
    }

    #[test]
    fn missing_content_id_reads_as_none() {
        let bytes = seal("", &key(), b"{\"content\":[]}", Engine::portable()).unwrap();
        assert_eq!(Container::parse(bytes).unwrap().content_id(), None);
    }
}
