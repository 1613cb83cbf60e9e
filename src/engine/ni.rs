//! AES-NI backend.
//!
//! Every function here is `unsafe` because it is compiled with the `aes`
//! target feature; callers must have confirmed [`is_supported`] first. The
//! only caller is [`super::Engine`], which checks once at construction.

#[cfg(target_arch = "x86")]
use core::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;

use super::{Block, ROUNDS};

#[derive(Clone, Copy)]
pub(crate) struct RoundKeys([__m128i; ROUNDS + 1]);

pub(crate) fn is_supported() -> bool {
    std::is_x86_feature_detected!("aes") && std::is_x86_feature_detected!("sse2")
}

/// Mix the previous even round key with the RotWord/SubWord/Rcon word.
#[inline]
#[target_feature(enable = "aes,sse2")]
unsafe fn expand_even(key: __m128i, assist: __m128i) -> __m128i {
    let assist = _mm_shuffle_epi32::<0xFF>(assist);
    let key = _mm_xor_si128(key, _mm_slli_si128::<4>(key));
    let key = _mm_xor_si128(key, _mm_slli_si128::<4>(key));
    let key = _mm_xor_si128(key, _mm_slli_si128::<4>(key));
    _mm_xor_si128(key, assist)
}

/// Odd round keys only take SubWord, no rotation and no Rcon.
#[inline]
#[target_feature(enable = "aes,sse2")]
unsafe fn expand_odd(key: __m128i, assist: __m128i) -> __m128i {
    let assist = _mm_shuffle_epi32::<0xAA>(assist);
    let key = _mm_xor_si128(key, _mm_slli_si128::<4>(key));
    let key = _mm_xor_si128(key, _mm_slli_si128::<4>(key));
    let key = _mm_xor_si128(key, _mm_slli_si128::<4>(key));
    _mm_xor_si128(key, assist)
}

#[target_feature(enable = "aes,sse2")]
pub(crate) unsafe fn expand(key: &[u8; 32]) -> RoundKeys {
    let mut rk = [_mm_setzero_si128(); ROUNDS + 1];
    rk[0] = _mm_loadu_si128(key.as_ptr() as *const __m128i);
    rk[1] = _mm_loadu_si128(key[16..].as_ptr() as *const __m128i);

    macro_rules! pair {
        ($i:expr, $rcon:literal) => {
            rk[$i] = expand_even(rk[$i - 2], _mm_aeskeygenassist_si128::<$rcon>(rk[$i - 1]));
            rk[$i + 1] = expand_odd(rk[$i - 1], _mm_aeskeygenassist_si128::<0x00>(rk[$i]));
        };
    }
    pair!(2, 0x01);
    pair!(4, 0x02);
    pair!(6, 0x04);
    pair!(8, 0x08);
    pair!(10, 0x10);
    pair!(12, 0x20);
    rk[14] = expand_even(rk[12], _mm_aeskeygenassist_si128::<0x40>(rk[13]));

    RoundKeys(rk)
}

#[target_feature(enable = "aes,sse2")]
pub(crate) unsafe fn encrypt_block(rk: &RoundKeys, block: &Block) -> Block {
    let mut s = _mm_loadu_si128(block.as_ptr() as *const __m128i);
    s = _mm_xor_si128(s, rk.0[0]);
    for k in &rk.0[1..ROUNDS] {
        s = _mm_aesenc_si128(s, *k);
    }
    s = _mm_aesenclast_si128(s, rk.0[ROUNDS]);

    let mut out = [0u8; 16];
    _mm_storeu_si128(out.as_mut_ptr() as *mut __m128i, s);
    out
}

/// Four blocks, four schedules, rounds interleaved so the AES units stay
/// busy. Block `i` only ever sees `rks[i]`.
#[target_feature(enable = "aes,sse2")]
pub(crate) unsafe fn encrypt_x4(rks: [&RoundKeys; 4], blocks: &[Block; 4]) -> [Block; 4] {
    let mut s = [_mm_setzero_si128(); 4];
    for i in 0..4 {
        s[i] = _mm_xor_si128(
            _mm_loadu_si128(blocks[i].as_ptr() as *const __m128i),
            rks[i].0[0],
        );
    }
    for r in 1..ROUNDS {
        s[0] = _mm_aesenc_si128(s[0], rks[0].0[r]);
        s[1] = _mm_aesenc_si128(s[1], rks[1].0[r]);
        s[2] = _mm_aesenc_si128(s[2], rks[2].0[r]);
        s[3] = _mm_aesenc_si128(s[3], rks[3].0[r]);
    }

    let mut out = [[0u8; 16]; 4];
    for i in 0..4 {
        let last = _mm_aesenclast_si128(s[i], rks[i].0[ROUNDS]);
        _mm_storeu_si128(out[i].as_mut_ptr() as *mut __m128i, last);
    }
    out
}
