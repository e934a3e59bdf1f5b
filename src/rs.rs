//! Reed-Solomon core.
//!
//! Works on a stripe of `data + parity` equal-length byte rows. Encoding is
//! the generator-matrix product `P = G * D`, walked in 16 KiB unit blocks so
//! the parity rows of a block stay in L1 across the whole `(i, j)` inner
//! loop. Reconstruction inverts the survivor submatrix of the encoding
//! matrix, regenerates missing data rows from the survivors, then missing
//! parity rows from the completed data.
//!
//! The inverse of the survivor submatrix only depends on the survivor set,
//! so small codes memoise it in a concurrent map keyed by the survivor
//! bitmask. The cache is a pure accelerator: reads never block an insert,
//! inserts are last-writer-wins (every writer stores the same bytes), and
//! results are identical with the cache disabled.

use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::Error;
use crate::kernel::{Kernel, UNIT};
use crate::matrix;

#[derive(Debug)]
pub(crate) struct ReedSolomon {
    pub(crate) data: usize,
    pub(crate) parity: usize,
    /// `(data + parity) x data` encoding matrix, identity on top.
    encode: Vec<u8>,
    /// Bottom `parity` rows of `encode`.
    gen_matrix: Vec<u8>,
    pub(crate) kernel: Kernel,
    inverse_cache: Option<DashMap<u32, Arc<Vec<u8>>>>,
}

/// The cache key is a bitmask over vector indices, so it is only usable when
/// the stripe fits in 32 bits; bounding (data, parity) also bounds the cache
/// cardinality at C(data+parity, data).
fn cache_enabled(data: usize, parity: usize) -> bool {
    data < 15 && parity < 5
}

fn fingerprint(has: &[usize]) -> u32 {
    let mut key = 0u32;
    for &h in has {
        key |= 1 << h;
    }
    key
}

impl ReedSolomon {
    pub(crate) fn new(data: usize, parity: usize, encode: Vec<u8>, kernel: Kernel) -> Self {
        Self::with_cache(data, parity, encode, kernel, cache_enabled(data, parity))
    }

    pub(crate) fn with_cache(
        data: usize,
        parity: usize,
        encode: Vec<u8>,
        kernel: Kernel,
        enable_cache: bool,
    ) -> Self {
        debug_assert_eq!(encode.len(), (data + parity) * data);
        let gen_matrix = encode[data * data..].to_vec();
        Self {
            data,
            parity,
            encode,
            gen_matrix,
            kernel,
            inverse_cache: enable_cache.then(DashMap::new),
        }
    }

    #[inline]
    pub(crate) fn gen_coeff(&self, j: usize, i: usize) -> u8 {
        self.gen_matrix[j * self.data + i]
    }

    /// Fills the parity rows of `vects` from the data rows.
    pub(crate) fn encode_vects(&self, vects: &mut [&mut [u8]]) -> Result<(), Error> {
        check_sizes(vects, self.data + self.parity)?;
        let (dv, pv) = vects.split_at_mut(self.data);
        let sources: Vec<&[u8]> = dv.iter().map(|v| &**v).collect();
        self.mul_matrix(&self.gen_matrix, &sources, pv);
        Ok(())
    }

    /// Regenerates the rows listed in `lost` from the `data` survivors in
    /// `has`. With `data_only` the parity entries of `lost` are skipped.
    ///
    /// `has` must hold exactly `data` valid row indices and be disjoint from
    /// `lost`; both are the caller's contract to enforce with the public
    /// checks. Row content outside `has` is never read before it is written.
    pub(crate) fn reconst(
        &self,
        vects: &mut [&mut [u8]],
        has: &[usize],
        lost: &[usize],
        data_only: bool,
    ) -> Result<(), Error> {
        let d = self.data;
        let p = self.parity;
        if has.len() != d {
            return Err(Error::NotEnoughShards {
                has: has.len(),
                need: d,
            });
        }
        let (d_lost, p_lost) = split_lost(d, lost);
        if d_lost.len() > p || p_lost.len() > p {
            return Err(Error::NotEnoughShards {
                has: has.len(),
                need: d,
            });
        }
        if !d_lost.is_empty() {
            let gen_rows = self.make_gen(has, &d_lost)?;
            let (sources, mut outputs) = partition(vects, has, &d_lost);
            self.mul_matrix(&gen_rows, &sources, &mut outputs);
        }
        if data_only {
            return Ok(());
        }
        if !p_lost.is_empty() {
            let mut gen_rows = vec![0u8; p_lost.len() * d];
            for (i, &l) in p_lost.iter().enumerate() {
                gen_rows[i * d..(i + 1) * d].copy_from_slice(&self.encode[l * d..(l + 1) * d]);
            }
            let data_rows: Vec<usize> = (0..d).collect();
            let (sources, mut outputs) = partition(vects, &data_rows, &p_lost);
            self.mul_matrix(&gen_rows, &sources, &mut outputs);
        }
        Ok(())
    }

    /// Applies `parity[j] ^= gen[j][row] * delta` for the implicit
    /// `delta = old ^ new` of a single changed data row.
    pub(crate) fn update(&self, old: &[u8], new: &[u8], row: usize, parity: &mut [&mut [u8]]) {
        for (j, pv) in parity.iter_mut().enumerate() {
            let c = self.gen_coeff(j, row);
            self.kernel.mul_vect_add(c, old, pv);
            self.kernel.mul_vect_add(c, new, pv);
        }
    }

    /// Outer loop over unit-sized byte chunks, inner loop over the matrix, so
    /// each output chunk is still cached when the next source row hits it.
    fn mul_matrix(&self, gen_m: &[u8], dv: &[&[u8]], pv: &mut [&mut [u8]]) {
        let d = dv.len();
        let size = dv[0].len();
        let mut start = 0;
        while start < size {
            let end = (start + UNIT).min(size);
            for i in 0..d {
                for (j, out) in pv.iter_mut().enumerate() {
                    let c = gen_m[j * d + i];
                    if i == 0 {
                        self.kernel.mul_vect(c, &dv[0][start..end], &mut out[start..end]);
                    } else {
                        self.kernel
                            .mul_vect_add(c, &dv[i][start..end], &mut out[start..end]);
                    }
                }
            }
            start = end;
        }
    }

    /// Builds the generator for the missing data rows: the `d_lost` rows of
    /// the inverted survivor submatrix.
    fn make_gen(&self, has: &[usize], d_lost: &[usize]) -> Result<Vec<u8>, Error> {
        let d = self.data;
        if let Some(cache) = &self.inverse_cache {
            if let Some(im) = cache.get(&fingerprint(has)) {
                return Ok(extract_rows(&im, d_lost, d));
            }
        }
        let mut buf = vec![0u8; 3 * d * d];
        let (m, raw) = buf.split_at_mut(d * d);
        for (i, &l) in has.iter().enumerate() {
            m[i * d..(i + 1) * d].copy_from_slice(&self.encode[l * d..(l + 1) * d]);
        }
        let mut im = vec![0u8; d * d];
        matrix::invert(m, d, raw, &mut im)?;
        let gen_rows = extract_rows(&im, d_lost, d);
        if let Some(cache) = &self.inverse_cache {
            cache.insert(fingerprint(has), Arc::new(im));
        }
        Ok(gen_rows)
    }
}

fn extract_rows(im: &[u8], rows: &[usize], d: usize) -> Vec<u8> {
    let mut out = vec![0u8; rows.len() * d];
    for (i, &l) in rows.iter().enumerate() {
        out[i * d..(i + 1) * d].copy_from_slice(&im[l * d..(l + 1) * d]);
    }
    out
}

pub(crate) fn split_lost(d: usize, lost: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let mut d_lost = Vec::new();
    let mut p_lost = Vec::new();
    for &l in lost {
        if l < d {
            d_lost.push(l);
        } else {
            p_lost.push(l);
        }
    }
    d_lost.sort_unstable();
    p_lost.sort_unstable();
    (d_lost, p_lost)
}

/// Reborrows the rows named by `sources` immutably and the rows named by
/// `outputs` mutably, preserving list order. The two lists must be disjoint
/// and in range.
pub(crate) fn partition<'a>(
    vects: &'a mut [&mut [u8]],
    sources: &[usize],
    outputs: &[usize],
) -> (Vec<&'a [u8]>, Vec<&'a mut [u8]>) {
    let mut srcs: Vec<Option<&'a [u8]>> = vec![None; sources.len()];
    let mut outs: Vec<Option<&'a mut [u8]>> = Vec::with_capacity(outputs.len());
    outs.resize_with(outputs.len(), || None);
    for (i, v) in vects.iter_mut().enumerate() {
        if let Some(pos) = sources.iter().position(|&s| s == i) {
            srcs[pos] = Some(&**v);
        } else if let Some(pos) = outputs.iter().position(|&o| o == i) {
            outs[pos] = Some(&mut **v);
        }
    }
    (
        srcs.into_iter().map(|s| s.unwrap()).collect(),
        outs.into_iter().map(|o| o.unwrap()).collect(),
    )
}

pub(crate) fn check_sizes(vects: &[&mut [u8]], total: usize) -> Result<usize, Error> {
    if vects.len() != total {
        return Err(Error::SizeMismatch {
            expected: total,
            got: vects.len(),
        });
    }
    let size = vects[0].len();
    if size == 0 {
        return Err(Error::SizeZero);
    }
    for v in vects.iter() {
        if v.len() != size {
            return Err(Error::SizeMismatch {
                expected: size,
                got: v.len(),
            });
        }
    }
    Ok(size)
}
