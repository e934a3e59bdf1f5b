//! Dense byte matrices over GF(2^8).
//!
//! Matrices are flat row-major buffers; a row of an `n`-column matrix `m`
//! lives at `m[r * n..(r + 1) * n]`. The module provides multiplication,
//! in-place Gauss-Jordan inversion, and the two encoding-matrix builders.
//! An encoding matrix for a `(d, p)` code has `d + p` rows and `d` columns,
//! with the identity in the top `d` rows and the generator matrix below it.

use crate::errors::Error;
use crate::galois as gf;

/// Multiplies `a` (`rows` x `inner`) by `b` (`inner` x `cols`) into `out`.
pub(crate) fn mul(a: &[u8], b: &[u8], rows: usize, inner: usize, cols: usize, out: &mut [u8]) {
    for r in 0..rows {
        let ar = &a[r * inner..(r + 1) * inner];
        let or = &mut out[r * cols..(r + 1) * cols];
        or.fill(0);
        for (i, &av) in ar.iter().enumerate() {
            if av == 0 {
                continue;
            }
            let tbl = &gf::MUL_TBL[av as usize];
            let br = &b[i * cols..(i + 1) * cols];
            for (o, &bv) in or.iter_mut().zip(br) {
                *o ^= tbl[bv as usize];
            }
        }
    }
}

/// Inverts the `n` x `n` matrix `m` into `out`.
///
/// Gauss-Jordan with partial pivoting over the augmented matrix `[m | I]`,
/// which is laid out in the caller-provided `raw` scratch of `2 * n * n`
/// bytes. `raw` is destroyed in the process. Fails with
/// [`Error::SingularMatrix`] when a column has no usable pivot.
pub(crate) fn invert(m: &[u8], n: usize, raw: &mut [u8], out: &mut [u8]) -> Result<(), Error> {
    let w = 2 * n;
    let raw = &mut raw[..n * w];
    raw.fill(0);
    for r in 0..n {
        raw[r * w..r * w + n].copy_from_slice(&m[r * n..(r + 1) * n]);
        raw[r * w + n + r] = 1;
    }
    for c in 0..n {
        let mut pivot = c;
        while pivot < n && raw[pivot * w + c] == 0 {
            pivot += 1;
        }
        if pivot == n {
            return Err(Error::SingularMatrix);
        }
        if pivot != c {
            let (upper, lower) = raw.split_at_mut(pivot * w);
            upper[c * w..c * w + w].swap_with_slice(&mut lower[..w]);
        }
        let d = raw[c * w + c];
        if d != 1 {
            let tbl = &gf::MUL_TBL[gf::inv(d) as usize];
            for v in &mut raw[c * w..c * w + w] {
                *v = tbl[*v as usize];
            }
        }
        for r in 0..n {
            if r == c {
                continue;
            }
            let f = raw[r * w + c];
            if f == 0 {
                continue;
            }
            let tbl = &gf::MUL_TBL[f as usize];
            let (pivot_row, row) = if c < r {
                let (a, b) = raw.split_at_mut(r * w);
                (&a[c * w..c * w + w], &mut b[..w])
            } else {
                let (a, b) = raw.split_at_mut(c * w);
                (&b[..w], &mut a[r * w..r * w + w])
            };
            for (v, &pv) in row.iter_mut().zip(pivot_row) {
                *v ^= tbl[pv as usize];
            }
        }
    }
    for r in 0..n {
        out[r * n..(r + 1) * n].copy_from_slice(&raw[r * w + n..r * w + w]);
    }
    Ok(())
}

/// Builds the systematic Vandermonde encoding matrix for a `(d, p)` code.
///
/// Row `i` of the raw Vandermonde matrix is `[i^0, i^1, .., i^(d-1)]` with
/// `i` taken as a field element. Multiplying by the inverse of its top
/// `d` x `d` square turns the top into the identity while keeping every
/// `d`-row subset invertible.
pub(crate) fn gen_encode_matrix_vand(d: usize, p: usize) -> Result<Vec<u8>, Error> {
    let t = d + p;
    let mut vm = vec![0u8; t * d];
    for i in 0..t {
        for j in 0..d {
            vm[i * d + j] = gf::pow(i as u8, j);
        }
    }
    let mut raw = vec![0u8; 2 * d * d];
    let mut im = vec![0u8; d * d];
    invert(&vm[..d * d], d, &mut raw, &mut im).map_err(|_| Error::BuildFailed)?;
    let mut em = vec![0u8; t * d];
    mul(&vm, &im, t, d, d, &mut em);
    Ok(em)
}

/// Builds the Cauchy encoding matrix for a `(d, p)` code.
///
/// The bottom rows are `C[i][j] = 1 / (i ^ j)` for `i` in `d..d+p`, the
/// classic construction with disjoint index sets; any `d`-row subset is
/// invertible by the Cauchy determinant formula.
pub(crate) fn gen_encode_matrix_cauchy(d: usize, p: usize) -> Vec<u8> {
    let t = d + p;
    let mut em = vec![0u8; t * d];
    for i in 0..d {
        em[i * d + i] = 1;
    }
    for i in d..t {
        for j in 0..d {
            em[i * d + j] = gf::inv((i ^ j) as u8);
        }
    }
    em
}
