//! Vector kernels over byte slices.
//!
//! Three operations back every hot path in the crate: constant-by-vector
//! multiply, multiply-accumulate, and multi-source xor. Each exists in a
//! scalar form, a 128-bit SSSE3 form and a 256-bit AVX2 form; the SIMD forms
//! multiply through the low/high nibble shuffle split
//! (`c * x == LOW_TBL[c][x & 0xf] ^ HIGH_TBL[c][x >> 4]`).
//!
//! The host capability is probed once and stored in the [`Kernel`] an encoder
//! carries, so the hot loops dispatch on a fixed enum rather than re-probing.
//! Kernels walk their input in 16 KiB unit blocks (half of a 32 KiB L1 data
//! cache), finish the sub-lane tail scalarly, and switch the xor family to
//! non-temporal stores once a destination no longer fits in half of L1.

use crate::galois::MUL_TBL;

/// SIMD capability of the running CPU, as seen by the kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Capability {
    /// Byte-at-a-time table lookups only.
    None,
    /// 128-bit lanes (SSSE3 `pshufb`).
    Simd128,
    /// 256-bit lanes (AVX2 `vpshufb`).
    Simd256,
}

/// Probes the CPU once. Non-x86 hosts run the scalar backend.
pub(crate) fn capability() -> Capability {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if is_x86_feature_detected!("avx2") {
            return Capability::Simd256;
        }
        if is_x86_feature_detected!("ssse3") {
            return Capability::Simd128;
        }
    }
    Capability::None
}

/// Unit block size: half of a 32 KiB L1 data cache.
pub(crate) const UNIT: usize = 16 * 1024;

/// Destinations larger than this use non-temporal stores in the xor kernels.
const NON_TEMPORAL_MIN: usize = 8 * 1024;

/// Dispatches the vector kernels through the capability selected at
/// construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Kernel {
    cap: Capability,
}

impl Kernel {
    pub(crate) fn new() -> Self {
        Self {
            cap: capability(),
        }
    }

    #[cfg(test)]
    pub(crate) fn scalar() -> Self {
        Self {
            cap: Capability::None,
        }
    }

    /// `dst[i] = c * src[i]`.
    pub(crate) fn mul_vect(&self, c: u8, src: &[u8], dst: &mut [u8]) {
        debug_assert_eq!(src.len(), dst.len());
        if c == 0 {
            dst.fill(0);
            return;
        }
        if c == 1 {
            dst.copy_from_slice(src);
            return;
        }
        let len = dst.len();
        let mut start = 0;
        while start < len {
            let end = (start + UNIT).min(len);
            self.mul_block(c, &src[start..end], &mut dst[start..end]);
            start = end;
        }
    }

    /// `dst[i] ^= c * src[i]`.
    pub(crate) fn mul_vect_add(&self, c: u8, src: &[u8], dst: &mut [u8]) {
        debug_assert_eq!(src.len(), dst.len());
        if c == 0 {
            return;
        }
        let len = dst.len();
        let mut start = 0;
        while start < len {
            let end = (start + UNIT).min(len);
            self.mul_add_block(c, &src[start..end], &mut dst[start..end]);
            start = end;
        }
    }

    /// `dst = srcs[0] ^ srcs[1] ^ ..`; the previous contents of `dst` are
    /// discarded.
    pub(crate) fn xor_vect(&self, dst: &mut [u8], srcs: &[&[u8]]) {
        self.xor_inner(dst, srcs, false);
    }

    /// `dst ^= srcs[0] ^ srcs[1] ^ ..`.
    pub(crate) fn xor_vect_add(&self, dst: &mut [u8], srcs: &[&[u8]]) {
        self.xor_inner(dst, srcs, true);
    }

    fn xor_inner(&self, dst: &mut [u8], srcs: &[&[u8]], acc: bool) {
        for s in srcs {
            debug_assert_eq!(s.len(), dst.len());
        }
        let nt = dst.len() > NON_TEMPORAL_MIN;
        let len = dst.len();
        let mut chunk_srcs: Vec<&[u8]> = Vec::with_capacity(srcs.len());
        let mut start = 0;
        while start < len {
            let end = (start + UNIT).min(len);
            chunk_srcs.clear();
            chunk_srcs.extend(srcs.iter().map(|s| &s[start..end]));
            self.xor_block(&mut dst[start..end], &chunk_srcs, acc, nt);
            start = end;
        }
    }

    fn mul_block(&self, c: u8, src: &[u8], dst: &mut [u8]) {
        match self.cap {
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Capability::Simd256 => unsafe { x86::mul_avx2(c, src, dst) },
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Capability::Simd128 => unsafe { x86::mul_ssse3(c, src, dst) },
            _ => mul_scalar(c, src, dst),
        }
    }

    fn mul_add_block(&self, c: u8, src: &[u8], dst: &mut [u8]) {
        match self.cap {
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Capability::Simd256 => unsafe { x86::mul_add_avx2(c, src, dst) },
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Capability::Simd128 => unsafe { x86::mul_add_ssse3(c, src, dst) },
            _ => mul_add_scalar(c, src, dst),
        }
    }

    fn xor_block(&self, dst: &mut [u8], srcs: &[&[u8]], acc: bool, nt: bool) {
        match self.cap {
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Capability::Simd256 => unsafe { x86::xor_avx2(dst, srcs, acc, nt) },
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Capability::Simd128 => unsafe { x86::xor_ssse3(dst, srcs, acc, nt) },
            _ => xor_scalar_range(dst, srcs, acc, 0, dst.len()),
        }
    }
}

fn mul_scalar(c: u8, src: &[u8], dst: &mut [u8]) {
    let tbl = &MUL_TBL[c as usize];
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = tbl[s as usize];
    }
}

fn mul_add_scalar(c: u8, src: &[u8], dst: &mut [u8]) {
    let tbl = &MUL_TBL[c as usize];
    for (d, &s) in dst.iter_mut().zip(src) {
        *d ^= tbl[s as usize];
    }
}

fn xor_scalar_range(dst: &mut [u8], srcs: &[&[u8]], acc: bool, from: usize, to: usize) {
    for i in from..to {
        let mut b = if acc { dst[i] } else { 0 };
        for s in srcs {
            b ^= s[i];
        }
        dst[i] = b;
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86 {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    use super::xor_scalar_range;
    use crate::galois::{HIGH_TBL, LOW_TBL, MUL_TBL};

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn mul_avx2(c: u8, src: &[u8], dst: &mut [u8]) {
        unsafe {
            let lo = _mm256_broadcastsi128_si256(_mm_loadu_si128(
                LOW_TBL[c as usize].as_ptr() as *const __m128i
            ));
            let hi = _mm256_broadcastsi128_si256(_mm_loadu_si128(
                HIGH_TBL[c as usize].as_ptr() as *const __m128i
            ));
            let mask = _mm256_set1_epi8(0x0f);
            let len = dst.len();
            let mut i = 0;
            while i + 32 <= len {
                let x = _mm256_loadu_si256(src.as_ptr().add(i) as *const __m256i);
                let l = _mm256_shuffle_epi8(lo, _mm256_and_si256(x, mask));
                let h = _mm256_shuffle_epi8(hi, _mm256_and_si256(_mm256_srli_epi64::<4>(x), mask));
                _mm256_storeu_si256(
                    dst.as_mut_ptr().add(i) as *mut __m256i,
                    _mm256_xor_si256(l, h),
                );
                i += 32;
            }
            let tbl = &MUL_TBL[c as usize];
            while i < len {
                dst[i] = tbl[src[i] as usize];
                i += 1;
            }
        }
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn mul_add_avx2(c: u8, src: &[u8], dst: &mut [u8]) {
        unsafe {
            let lo = _mm256_broadcastsi128_si256(_mm_loadu_si128(
                LOW_TBL[c as usize].as_ptr() as *const __m128i
            ));
            let hi = _mm256_broadcastsi128_si256(_mm_loadu_si128(
                HIGH_TBL[c as usize].as_ptr() as *const __m128i
            ));
            let mask = _mm256_set1_epi8(0x0f);
            let len = dst.len();
            let mut i = 0;
            while i + 32 <= len {
                let x = _mm256_loadu_si256(src.as_ptr().add(i) as *const __m256i);
                let l = _mm256_shuffle_epi8(lo, _mm256_and_si256(x, mask));
                let h = _mm256_shuffle_epi8(hi, _mm256_and_si256(_mm256_srli_epi64::<4>(x), mask));
                let prev = _mm256_loadu_si256(dst.as_ptr().add(i) as *const __m256i);
                let prod = _mm256_xor_si256(l, h);
                _mm256_storeu_si256(
                    dst.as_mut_ptr().add(i) as *mut __m256i,
                    _mm256_xor_si256(prev, prod),
                );
                i += 32;
            }
            let tbl = &MUL_TBL[c as usize];
            while i < len {
                dst[i] ^= tbl[src[i] as usize];
                i += 1;
            }
        }
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn xor_avx2(dst: &mut [u8], srcs: &[&[u8]], acc: bool, nt: bool) {
        unsafe {
            let len = dst.len();
            let mut i = 0;
            if nt {
                // Streaming stores need a 32-byte aligned destination.
                let prefix = dst.as_ptr().align_offset(32).min(len);
                xor_scalar_range(dst, srcs, acc, 0, prefix);
                i = prefix;
                while i + 32 <= len {
                    let mut v = if acc {
                        _mm256_load_si256(dst.as_ptr().add(i) as *const __m256i)
                    } else {
                        _mm256_setzero_si256()
                    };
                    for s in srcs {
                        v = _mm256_xor_si256(
                            v,
                            _mm256_loadu_si256(s.as_ptr().add(i) as *const __m256i),
                        );
                    }
                    _mm256_stream_si256(dst.as_mut_ptr().add(i) as *mut __m256i, v);
                    i += 32;
                }
                _mm_sfence();
            } else {
                while i + 32 <= len {
                    let mut v = if acc {
                        _mm256_loadu_si256(dst.as_ptr().add(i) as *const __m256i)
                    } else {
                        _mm256_setzero_si256()
                    };
                    for s in srcs {
                        v = _mm256_xor_si256(
                            v,
                            _mm256_loadu_si256(s.as_ptr().add(i) as *const __m256i),
                        );
                    }
                    _mm256_storeu_si256(dst.as_mut_ptr().add(i) as *mut __m256i, v);
                    i += 32;
                }
            }
            xor_scalar_range(dst, srcs, acc, i, len);
        }
    }

    #[target_feature(enable = "ssse3")]
    pub(super) unsafe fn mul_ssse3(c: u8, src: &[u8], dst: &mut [u8]) {
        unsafe {
            let lo = _mm_loadu_si128(LOW_TBL[c as usize].as_ptr() as *const __m128i);
            let hi = _mm_loadu_si128(HIGH_TBL[c as usize].as_ptr() as *const __m128i);
            let mask = _mm_set1_epi8(0x0f);
            let len = dst.len();
            let mut i = 0;
            while i + 16 <= len {
                let x = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
                let l = _mm_shuffle_epi8(lo, _mm_and_si128(x, mask));
                let h = _mm_shuffle_epi8(hi, _mm_and_si128(_mm_srli_epi64::<4>(x), mask));
                _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, _mm_xor_si128(l, h));
                i += 16;
            }
            let tbl = &MUL_TBL[c as usize];
            while i < len {
                dst[i] = tbl[src[i] as usize];
                i += 1;
            }
        }
    }

    #[target_feature(enable = "ssse3")]
    pub(super) unsafe fn mul_add_ssse3(c: u8, src: &[u8], dst: &mut [u8]) {
        unsafe {
            let lo = _mm_loadu_si128(LOW_TBL[c as usize].as_ptr() as *const __m128i);
            let hi = _mm_loadu_si128(HIGH_TBL[c as usize].as_ptr() as *const __m128i);
            let mask = _mm_set1_epi8(0x0f);
            let len = dst.len();
            let mut i = 0;
            while i + 16 <= len {
                let x = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
                let l = _mm_shuffle_epi8(lo, _mm_and_si128(x, mask));
                let h = _mm_shuffle_epi8(hi, _mm_and_si128(_mm_srli_epi64::<4>(x), mask));
                let prev = _mm_loadu_si128(dst.as_ptr().add(i) as *const __m128i);
                _mm_storeu_si128(
                    dst.as_mut_ptr().add(i) as *mut __m128i,
                    _mm_xor_si128(prev, _mm_xor_si128(l, h)),
                );
                i += 16;
            }
            let tbl = &MUL_TBL[c as usize];
            while i < len {
                dst[i] ^= tbl[src[i] as usize];
                i += 1;
            }
        }
    }

    #[target_feature(enable = "ssse3")]
    pub(super) unsafe fn xor_ssse3(dst: &mut [u8], srcs: &[&[u8]], acc: bool, nt: bool) {
        unsafe {
            let len = dst.len();
            let mut i = 0;
            if nt {
                let prefix = dst.as_ptr().align_offset(16).min(len);
                xor_scalar_range(dst, srcs, acc, 0, prefix);
                i = prefix;
                while i + 16 <= len {
                    let mut v = if acc {
                        _mm_load_si128(dst.as_ptr().add(i) as *const __m128i)
                    } else {
                        _mm_setzero_si128()
                    };
                    for s in srcs {
                        v = _mm_xor_si128(v, _mm_loadu_si128(s.as_ptr().add(i) as *const __m128i));
                    }
                    _mm_stream_si128(dst.as_mut_ptr().add(i) as *mut __m128i, v);
                    i += 16;
                }
                _mm_sfence();
            } else {
                while i + 16 <= len {
                    let mut v = if acc {
                        _mm_loadu_si128(dst.as_ptr().add(i) as *const __m128i)
                    } else {
                        _mm_setzero_si128()
                    };
                    for s in srcs {
                        v = _mm_xor_si128(v, _mm_loadu_si128(s.as_ptr().add(i) as *const __m128i));
                    }
                    _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, v);
                    i += 16;
                }
            }
            xor_scalar_range(dst, srcs, acc, i, len);
        }
    }
}
