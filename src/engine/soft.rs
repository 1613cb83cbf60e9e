//! Portable AES-256 built from explicit GF(2^8) arithmetic.
//!
//! The S-box is not pasted in as a literal: it is computed at compile time
//! from the multiplicative inverse in GF(2^8) followed by the Rijndael affine
//! map, and MixColumns uses `xtime` directly. Not constant-time.

use super::{Block, ROUNDS};

/// Multiply two field elements modulo x^8 + x^4 + x^3 + x + 1.
const fn gmul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            p ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1B;
        }
        b >>= 1;
    }
    p
}

/// a^254, which is a^-1 for a != 0 and maps 0 to 0.
const fn ginv(a: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut e = 254u32;
    while e > 0 {
        if e & 1 == 1 {
            result = gmul(result, base);
        }
        base = gmul(base, base);
        e >>= 1;
    }
    result
}

const fn build_sbox() -> [u8; 256] {
    let mut sbox = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let b = ginv(i as u8);
        sbox[i] = b
            ^ b.rotate_left(1)
            ^ b.rotate_left(2)
            ^ b.rotate_left(3)
            ^ b.rotate_left(4)
            ^ 0x63;
        i += 1;
    }
    sbox
}

pub(crate) const SBOX: [u8; 256] = build_sbox();

// x^0 .. x^6; AES-256 needs seven of them.
const RCON: [u8; 7] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40];

#[inline(always)]
fn xtime(a: u8) -> u8 {
    (a << 1) ^ (((a >> 7) & 1) * 0x1B)
}

/// Fifteen 16-byte round keys.
#[derive(Clone)]
pub(crate) struct RoundKeys([Block; ROUNDS + 1]);

pub(crate) fn expand(key: &[u8; 32]) -> RoundKeys {
    // 60 words of 4 bytes, Nk = 8.
    let mut w = [[0u8; 4]; 4 * (ROUNDS + 1)];
    for (i, word) in w.iter_mut().take(8).enumerate() {
        word.copy_from_slice(&key[i * 4..i * 4 + 4]);
    }
    for i in 8..w.len() {
        let mut t = w[i - 1];
        if i % 8 == 0 {
            t = [
                SBOX[t[1] as usize] ^ RCON[i / 8 - 1],
                SBOX[t[2] as usize],
                SBOX[t[3] as usize],
                SBOX[t[0] as usize],
            ];
        } else if i % 8 == 4 {
            t = t.map(|b| SBOX[b as usize]);
        }
        for j in 0..4 {
            w[i][j] = w[i - 8][j] ^ t[j];
        }
    }

    let mut rk = [[0u8; 16]; ROUNDS + 1];
    for (r, round) in rk.iter_mut().enumerate() {
        for c in 0..4 {
            round[c * 4..c * 4 + 4].copy_from_slice(&w[r * 4 + c]);
        }
    }
    RoundKeys(rk)
}

#[inline(always)]
fn add_round_key(s: &mut Block, rk: &Block) {
    for (b, k) in s.iter_mut().zip(rk) {
        *b ^= k;
    }
}

/// SubBytes and ShiftRows in one pass. State is column-major.
#[inline(always)]
fn sub_shift(s: &Block) -> Block {
    let mut out = [0u8; 16];
    for c in 0..4 {
        for r in 0..4 {
            out[r + 4 * c] = SBOX[s[r + 4 * ((c + r) % 4)] as usize];
        }
    }
    out
}

#[inline(always)]
fn mix_columns(s: &mut Block) {
    for col in s.chunks_exact_mut(4) {
        let (a0, a1, a2, a3) = (col[0], col[1], col[2], col[3]);
        let t = a0 ^ a1 ^ a2 ^ a3;
        col[0] = a0 ^ t ^ xtime(a0 ^ a1);
        col[1] = a1 ^ t ^ xtime(a1 ^ a2);
        col[2] = a2 ^ t ^ xtime(a2 ^ a3);
        col[3] = a3 ^ t ^ xtime(a3 ^ a0);
    }
}

pub(crate) fn encrypt_block(rk: &RoundKeys, block: &Block) -> Block {
    let mut s = *block;
    add_round_key(&mut s, &rk.0[0]);
    for round in &rk.0[1..ROUNDS] {
        s = sub_shift(&s);
        mix_columns(&mut s);
        add_round_key(&mut s, round);
    }
    s = sub_shift(&s);
    add_round_key(&mut s, &rk.0[ROUNDS]);
    s
}
