//! Payload masking
//!
//! XOR with a repeating 4-byte key. `apply_mask` picks the widest path the
//! CPU offers (AVX2, SSE2, NEON) and finishes tails with the word and byte
//! loops; every path is byte-identical to `apply_mask_scalar`.

/// Mask (or unmask) `buf` in place
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    #[cfg(target_arch = "x86_64")]
    {
        if buf.len() >= 32 && is_x86_feature_detected!("avx2") {
            // SAFETY: AVX2 availability checked at runtime
            unsafe { apply_mask_avx2(buf, mask) };
            return;
        }
        if buf.len() >= 16 {
            // SAFETY: SSE2 is part of the x86_64 baseline
            unsafe { apply_mask_sse2(buf, mask) };
            return;
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if buf.len() >= 16 {
            // SAFETY: NEON is part of the aarch64 baseline
            unsafe { apply_mask_neon(buf, mask) };
            return;
        }
    }

    apply_mask_words(buf, mask);
}

/// Reference byte-at-a-time implementation
#[inline]
pub fn apply_mask_scalar(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// 8 bytes per step, scalar tail
#[inline]
pub fn apply_mask_words(buf: &mut [u8], mask: [u8; 4]) {
    let half = u32::from_ne_bytes(mask) as u64;
    let key = half | (half << 32);

    let mut chunks = buf.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ key;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }
    // remainder starts at a multiple of 8, so the key phase is 0
    apply_mask_scalar(chunks.into_remainder(), mask);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn apply_mask_sse2(buf: &mut [u8], mask: [u8; 4]) {
    use std::arch::x86_64::*;

    let key = _mm_set1_epi32(i32::from_ne_bytes(mask));
    let mut chunks = buf.chunks_exact_mut(16);
    for chunk in &mut chunks {
        let ptr = chunk.as_mut_ptr() as *mut __m128i;
        let data = _mm_loadu_si128(ptr as *const __m128i);
        _mm_storeu_si128(ptr, _mm_xor_si128(data, key));
    }
    apply_mask_words(chunks.into_remainder(), mask);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn apply_mask_avx2(buf: &mut [u8], mask: [u8; 4]) {
    use std::arch::x86_64::*;

    let key = _mm256_set1_epi32(i32::from_ne_bytes(mask));
    let mut chunks = buf.chunks_exact_mut(32);
    for chunk in &mut chunks {
        let ptr = chunk.as_mut_ptr() as *mut __m256i;
        let data = _mm256_loadu_si256(ptr as *const __m256i);
        _mm256_storeu_si256(ptr, _mm256_xor_si256(data, key));
    }
    apply_mask_words(chunks.into_remainder(), mask);
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn apply_mask_neon(buf: &mut [u8], mask: [u8; 4]) {
    use std::arch::aarch64::*;

    let key = vreinterpretq_u8_u32(vdupq_n_u32(u32::from_ne_bytes(mask)));
    let mut chunks = buf.chunks_exact_mut(16);
    for chunk in &mut chunks {
        let ptr = chunk.as_mut_ptr();
        let data = vld1q_u8(ptr);
        vst1q_u8(ptr, veorq_u8(data, key));
    }
    apply_mask_words(chunks.into_remainder(), mask);
}
