//! X-Reed-Solomon encoding and reconstruction.
//!
//! An XRS stripe is a plain Reed-Solomon stripe with one twist: every vector
//! is split into two equal halves `a` and `b`, and the `a`-halves of the data
//! vectors are folded (xor-piggybacked) into the `b`-halves of the parity
//! vectors `k+1..k+m-1`. The first parity keeps its pure RS content. For
//! every piggybacked parity `p` the invariant
//!
//! ```text
//! b[p] == f(b)[p] ^ a[i0] ^ a[i1] ^ ..        (i0, i1, .. = xor set of p)
//! ```
//!
//! holds, where `f(b)` is what RS encoding of the `b`-halves alone would
//! produce. Everything this module does - encoding, whole-stripe repair, the
//! cheap single-loss repair, incremental update - is bookkeeping around that
//! one identity.

use std::collections::BTreeMap;

use crate::errors::Error;
use crate::kernel::Kernel;
use crate::matrix;
use crate::rs::ReedSolomon;

/// XRS encoder for a `(data_num, parity_num)` stripe.
///
/// The encoder is immutable after construction and may be shared across
/// threads; callers own the vectors and no two concurrent calls may pass the
/// same vector mutably.
#[derive(Debug)]
pub struct Xrs {
    rs: ReedSolomon,
    /// parity index -> data indices whose `a`-halves it carries. The first
    /// parity has no entry.
    xor_set: BTreeMap<usize, Vec<usize>>,
    /// data index -> the parity index carrying it.
    owner: Vec<usize>,
}

fn check_cfg(data_num: usize, parity_num: usize) -> Result<(), Error> {
    if parity_num == 1 {
        return Err(Error::IllegalParity(parity_num));
    }
    if data_num == 0 || parity_num == 0 || data_num + parity_num >= 256 {
        return Err(Error::IllegalArgs(data_num, parity_num));
    }
    Ok(())
}

/// Distributes the data indices `0..d` round-robin across the parity
/// indices `d+1..d+p`, one index per parity per round. The first parity
/// (index `d`) stays clean so single-loss repair has one pure RS `b`-half
/// to decode against.
fn make_xor_set(d: usize, p: usize) -> BTreeMap<usize, Vec<usize>> {
    let mut set: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut a = 0;
    while a < d {
        for i in d + 1..d + p {
            if a == d {
                break;
            }
            set.entry(i).or_default().push(a);
            a += 1;
        }
    }
    set
}

impl Xrs {
    /// Creates an XRS encoder on a systematic Vandermonde basis.
    ///
    /// # Errors
    /// * [`Error::IllegalParity`] - `parity_num` is 1; the piggyback needs a
    ///   second parity.
    /// * [`Error::IllegalArgs`] - `data_num` or `parity_num` is 0, or
    ///   `data_num + parity_num` is 256 or more.
    /// * [`Error::BuildFailed`] - the Vandermonde matrix could not be put
    ///   into systematic form (does not happen for any legal configuration).
    pub fn new(data_num: usize, parity_num: usize) -> Result<Self, Error> {
        check_cfg(data_num, parity_num)?;
        let encode = matrix::gen_encode_matrix_vand(data_num, parity_num)?;
        Ok(Self::from_matrix(data_num, parity_num, encode))
    }

    /// Creates an XRS encoder on a Cauchy basis.
    ///
    /// Every submatrix of a Cauchy matrix is invertible, so unlike [`new`]
    /// this constructor cannot fail to build; the error set is otherwise the
    /// same.
    ///
    /// [`new`]: Xrs::new
    pub fn new_cauchy(data_num: usize, parity_num: usize) -> Result<Self, Error> {
        check_cfg(data_num, parity_num)?;
        let encode = matrix::gen_encode_matrix_cauchy(data_num, parity_num);
        Ok(Self::from_matrix(data_num, parity_num, encode))
    }

    fn from_matrix(data_num: usize, parity_num: usize, encode: Vec<u8>) -> Self {
        let xor_set = make_xor_set(data_num, parity_num);
        let mut owner = vec![0; data_num];
        for (&p, list) in &xor_set {
            for &i in list {
                owner[i] = p;
            }
        }
        Self {
            rs: ReedSolomon::new(data_num, parity_num, encode, Kernel::new()),
            xor_set,
            owner,
        }
    }

    /// Returns the number of data vectors.
    pub fn data_num(&self) -> usize {
        self.rs.data
    }

    /// Returns the number of parity vectors.
    pub fn parity_num(&self) -> usize {
        self.rs.parity
    }

    /// Returns the total number of vectors in a stripe (data + parity).
    pub fn block_num(&self) -> usize {
        self.rs.data + self.rs.parity
    }

    /// Expected repair traffic of a random single-vector loss relative to a
    /// conventional RS code with the same geometry.
    ///
    /// A lost data vector is repaired from `data_num - 1` half-vectors of
    /// `b`, two parity halves and the sibling `a`-halves instead of
    /// `data_num` whole vectors, which is where the saving comes from.
    pub fn repair_traffic_ratio(&self) -> f64 {
        let d = self.rs.data as f64;
        let p = self.rs.parity as f64;
        (d + d / (p - 1.0)) / (2.0 * d)
    }

    /// Encodes the stripe: computes all parity vectors from the data
    /// vectors in place.
    ///
    /// `vects` is the whole stripe, data vectors first, parity vectors (of
    /// any prior content) after them.
    ///
    /// # Errors
    /// * [`Error::SizeMismatch`] - vector count differs from
    ///   [`block_num`](Xrs::block_num), or the vectors have unequal lengths.
    /// * [`Error::SizeZero`] / [`Error::SizeOdd`] - vectors are empty or not
    ///   splittable into two equal halves.
    ///
    /// # Examples
    /// ```rust
    /// # use erasure_xrs::Xrs;
    /// const VECT_LEN: usize = 64;
    /// let xrs = Xrs::new(4, 2).unwrap();
    /// let mut vects: Vec<Vec<u8>> = (0..6).map(|i| vec![i as u8; VECT_LEN]).collect();
    /// xrs.encode(&mut vects).expect("encoding failed");
    /// ```
    pub fn encode<V: AsMut<[u8]>>(&self, vects: &mut [V]) -> Result<(), Error> {
        let size = self.check_vects(vects)?;
        let half = size / 2;
        let mut refs: Vec<&mut [u8]> = vects.iter_mut().map(|v| v.as_mut()).collect();
        self.rs.encode_vects(&mut refs)?;
        for &p in self.xor_set.keys() {
            self.apply_piggyback(&mut refs, p, half);
        }
        Ok(())
    }

    /// Repairs the vectors listed in `need_reconst` from the `data_num`
    /// survivors listed in `has`, in place.
    ///
    /// The caller vouches for the content of every vector in `has`; the
    /// repaired content is written into the `need_reconst` vectors (and the
    /// other missing vectors may be rewritten as scratch). Surviving parity
    /// vectors are restored to their encoded form before returning.
    ///
    /// A request for exactly one data vector takes the cheaper
    /// [`reconst_one`](Xrs::reconst_one) path, which reads the half-vectors
    /// named by [`need_vects`](Xrs::need_vects) and assumes the rest of the
    /// stripe is intact.
    ///
    /// # Errors
    /// * [`Error::IllegalIndex`] - an index in `has` or `need_reconst` is out
    ///   of range.
    /// * [`Error::ConflictingSets`] - `has` and `need_reconst` overlap.
    /// * [`Error::NotEnoughShards`] - `has` does not name exactly
    ///   [`data_num`](Xrs::data_num) distinct survivors.
    /// * [`Error::SingularMatrix`] - the survivor submatrix failed to invert
    ///   (unreachable for the shipped constructions, reported defensively).
    /// * Size errors as for [`encode`](Xrs::encode).
    ///
    /// # Examples
    /// ```rust
    /// # use erasure_xrs::Xrs;
    /// const VECT_LEN: usize = 64;
    /// let xrs = Xrs::new(4, 2).unwrap();
    /// let mut vects: Vec<Vec<u8>> = (0..6).map(|i| vec![i as u8; VECT_LEN]).collect();
    /// xrs.encode(&mut vects).expect("encoding failed");
    /// let want = vects.clone();
    /// // Lose a data vector and a parity vector.
    /// vects[1].fill(0);
    /// vects[5].fill(0);
    /// xrs.reconst(&mut vects, &[0, 2, 3, 4], &[1, 5]).expect("reconstruction failed");
    /// assert_eq!(vects, want);
    /// ```
    pub fn reconst<V: AsMut<[u8]>>(
        &self,
        vects: &mut [V],
        has: &[usize],
        need_reconst: &[usize],
    ) -> Result<(), Error> {
        self.reconst_inner(vects, has, need_reconst, false)
    }

    /// Like [`reconst`](Xrs::reconst), but only repairs the data vectors in
    /// `need_reconst`; parity entries are ignored.
    pub fn reconst_data<V: AsMut<[u8]>>(
        &self,
        vects: &mut [V],
        has: &[usize],
        need_reconst: &[usize],
    ) -> Result<(), Error> {
        self.reconst_inner(vects, has, need_reconst, true)
    }

    /// Repairs a single lost data vector with minimum I/O.
    ///
    /// Only the half-vectors named by [`need_vects`](Xrs::need_vects) are
    /// read: the `b`-halves of the other data vectors, the `b`-halves of the
    /// first parity and of the parity carrying `need_reconst`, and the
    /// `a`-halves of the other data vectors carried by that same parity.
    /// Roughly three quarters of the conventional RS repair read.
    ///
    /// # Errors
    /// * [`Error::IllegalIndex`] - `need_reconst` is not a data index.
    /// * Size errors as for [`encode`](Xrs::encode).
    ///
    /// # Examples
    /// ```rust
    /// # use erasure_xrs::Xrs;
    /// const VECT_LEN: usize = 64;
    /// let xrs = Xrs::new(4, 2).unwrap();
    /// let mut vects: Vec<Vec<u8>> = (0..6).map(|i| vec![i as u8; VECT_LEN]).collect();
    /// xrs.encode(&mut vects).expect("encoding failed");
    /// let want = vects[2].clone();
    /// vects[2].fill(0);
    /// xrs.reconst_one(&mut vects, 2).expect("reconstruction failed");
    /// assert_eq!(vects[2], want);
    /// ```
    pub fn reconst_one<V: AsMut<[u8]>>(
        &self,
        vects: &mut [V],
        need_reconst: usize,
    ) -> Result<(), Error> {
        let (a_need, b_need) = self.need_vects(need_reconst)?;
        let size = self.check_vects(vects)?;
        let half = size / 2;
        let d = self.rs.data;
        let p_x = b_need[1];
        let mut refs: Vec<&mut [u8]> = vects.iter_mut().map(|v| v.as_mut()).collect();

        // Decode the b-halves against the first parity, with the lost data
        // row and the RS form of the carrying parity as the two outputs. The
        // RS form lands in scratch so the piggybacked b-half stays intact.
        let mut rs_form = vec![0u8; half];
        {
            let mut rs_form_slot = Some(rs_form.as_mut_slice());
            let mut b_refs: Vec<&mut [u8]> = Vec::with_capacity(refs.len());
            for (i, v) in refs.iter_mut().enumerate() {
                if i == p_x {
                    b_refs.push(rs_form_slot.take().unwrap());
                } else {
                    b_refs.push(&mut v[half..]);
                }
            }
            let mut b_has: Vec<usize> = (0..d).collect();
            b_has[need_reconst] = d;
            self.rs
                .reconst(&mut b_refs, &b_has, &[need_reconst, p_x], false)?;
        }

        // a_lost = b[p_x] ^ f(b)[p_x] ^ (sibling a-halves).
        let mut dst: Option<&mut [u8]> = None;
        let mut piggybacked: Option<&[u8]> = None;
        let mut siblings: Vec<Option<&[u8]>> = vec![None; a_need.len()];
        for (i, v) in refs.iter_mut().enumerate() {
            if i == need_reconst {
                dst = Some(&mut v[..half]);
            } else if i == p_x {
                piggybacked = Some(&v[half..]);
            } else if let Some(pos) = a_need.iter().position(|&x| x == i) {
                siblings[pos] = Some(&v[..half]);
            }
        }
        let mut srcs: Vec<&[u8]> = Vec::with_capacity(a_need.len() + 2);
        srcs.push(piggybacked.unwrap());
        srcs.push(&rs_form);
        srcs.extend(siblings.into_iter().map(|s| s.unwrap()));
        self.rs.kernel.xor_vect(dst.unwrap(), &srcs);
        Ok(())
    }

    /// Names the half-vectors [`reconst_one`](Xrs::reconst_one) reads to
    /// repair the data vector `need_reconst`.
    ///
    /// Returns `(a_need, b_need)`: `a_need` holds the data indices whose
    /// `a`-halves are read, `b_need` holds the first parity and the parity
    /// carrying `need_reconst`, in that order; the `b`-halves of all data
    /// vectors except `need_reconst` itself are always read as well.
    ///
    /// # Errors
    /// * [`Error::IllegalIndex`] - `need_reconst` is not a data index.
    pub fn need_vects(&self, need_reconst: usize) -> Result<(Vec<usize>, Vec<usize>), Error> {
        let d = self.rs.data;
        if need_reconst >= d {
            return Err(Error::IllegalIndex(need_reconst));
        }
        let p_x = self.owner[need_reconst];
        let a_need: Vec<usize> = self.xor_set[&p_x]
            .iter()
            .copied()
            .filter(|&i| i != need_reconst)
            .collect();
        Ok((a_need, vec![d, p_x]))
    }

    /// Adjusts the parity vectors after a single data vector changed from
    /// `old_data` to `new_data`, without re-encoding the stripe.
    ///
    /// `parity` holds the `parity_num` parity vectors only.
    ///
    /// # Errors
    /// * [`Error::IllegalIndex`] - `update_row` is not a data index.
    /// * Size errors as for [`encode`](Xrs::encode).
    ///
    /// # Examples
    /// ```rust
    /// # use erasure_xrs::Xrs;
    /// const VECT_LEN: usize = 64;
    /// let xrs = Xrs::new(4, 2).unwrap();
    /// let mut vects: Vec<Vec<u8>> = (0..6).map(|i| vec![i as u8; VECT_LEN]).collect();
    /// xrs.encode(&mut vects).expect("encoding failed");
    /// let old = vects[1].clone();
    /// let new = vec![0xCC; VECT_LEN];
    /// xrs.update(&old, &new, 1, &mut vects[4..]).expect("update failed");
    /// // The incremental update matches a full re-encode.
    /// let mut expect: Vec<Vec<u8>> = (0..6).map(|i| vec![i as u8; VECT_LEN]).collect();
    /// expect[1] = new;
    /// xrs.encode(&mut expect).expect("encoding failed");
    /// assert_eq!(vects[4..], expect[4..]);
    /// ```
    pub fn update<V: AsMut<[u8]>>(
        &self,
        old_data: &[u8],
        new_data: &[u8],
        update_row: usize,
        parity: &mut [V],
    ) -> Result<(), Error> {
        let d = self.rs.data;
        if update_row >= d {
            return Err(Error::IllegalIndex(update_row));
        }
        let size = self.check_parity_vects(parity, old_data.len())?;
        if new_data.len() != size {
            return Err(Error::SizeMismatch {
                expected: size,
                got: new_data.len(),
            });
        }
        let half = size / 2;
        let mut prefs: Vec<&mut [u8]> = parity.iter_mut().map(|v| v.as_mut()).collect();
        self.rs.update(old_data, new_data, update_row, &mut prefs);
        let p_x = self.owner[update_row];
        self.rs.kernel.xor_vect_add(
            &mut prefs[p_x - d][half..],
            &[&old_data[..half], &new_data[..half]],
        );
        Ok(())
    }

    /// Folds data vectors into (or out of) the parity at the given rows.
    ///
    /// `data_vects[i]` is the content being inserted at row
    /// `replace_rows[i]` where the stripe previously held zeros, or the
    /// content being removed; the two cases are the same operation because
    /// GF(2^8) addition is self-inverse. `parity` holds the `parity_num`
    /// parity vectors only.
    ///
    /// # Errors
    /// * [`Error::IllegalIndex`] - a replace row is not a data index.
    /// * [`Error::SizeMismatch`] - `data_vects` and `replace_rows` disagree
    ///   in length, or any vector length disagrees with the rest.
    /// * [`Error::SizeZero`] / [`Error::SizeOdd`] as for
    ///   [`encode`](Xrs::encode).
    pub fn replace<T: AsRef<[u8]>, V: AsMut<[u8]>>(
        &self,
        data_vects: &[T],
        replace_rows: &[usize],
        parity: &mut [V],
    ) -> Result<(), Error> {
        let d = self.rs.data;
        if data_vects.len() != replace_rows.len() {
            return Err(Error::SizeMismatch {
                expected: replace_rows.len(),
                got: data_vects.len(),
            });
        }
        for &r in replace_rows {
            if r >= d {
                return Err(Error::IllegalIndex(r));
            }
        }
        if data_vects.is_empty() {
            return Ok(());
        }
        let size = self.check_parity_vects(parity, data_vects[0].as_ref().len())?;
        for v in data_vects {
            if v.as_ref().len() != size {
                return Err(Error::SizeMismatch {
                    expected: size,
                    got: v.as_ref().len(),
                });
            }
        }
        let half = size / 2;
        let mut prefs: Vec<&mut [u8]> = parity.iter_mut().map(|v| v.as_mut()).collect();
        for (v, &r) in data_vects.iter().zip(replace_rows) {
            let v = v.as_ref();
            for (j, pv) in prefs.iter_mut().enumerate() {
                self.rs.kernel.mul_vect_add(self.rs.gen_coeff(j, r), v, pv);
            }
            let p_x = self.owner[r];
            self.rs
                .kernel
                .xor_vect_add(&mut prefs[p_x - d][half..], &[&v[..half]]);
        }
        Ok(())
    }

    fn reconst_inner<V: AsMut<[u8]>>(
        &self,
        vects: &mut [V],
        has: &[usize],
        need_reconst: &[usize],
        data_only: bool,
    ) -> Result<(), Error> {
        let d = self.rs.data;
        let total = self.block_num();
        for &i in has.iter().chain(need_reconst) {
            if i >= total {
                return Err(Error::IllegalIndex(i));
            }
        }
        if let Some(&i) = need_reconst.iter().find(|&&i| has.contains(&i)) {
            return Err(Error::ConflictingSets(i));
        }
        let mut has_sorted = has.to_vec();
        has_sorted.sort_unstable();
        has_sorted.dedup();
        if has_sorted.len() != d {
            return Err(Error::NotEnoughShards {
                has: has_sorted.len(),
                need: d,
            });
        }
        let mut need_sorted = need_reconst.to_vec();
        need_sorted.sort_unstable();
        need_sorted.dedup();
        if need_sorted.is_empty() {
            return Ok(());
        }
        // A single lost data vector has a strictly cheaper path.
        if need_sorted.len() == 1 && need_sorted[0] < d {
            return self.reconst_one(vects, need_sorted[0]);
        }

        let size = self.check_vects(vects)?;
        let half = size / 2;
        let p_need: Vec<usize> = need_sorted.iter().copied().filter(|&i| i >= d).collect();
        let lost_all: Vec<usize> = (0..total)
            .filter(|i| has_sorted.binary_search(i).is_err())
            .collect();
        let mut refs: Vec<&mut [u8]> = vects.iter_mut().map(|v| v.as_mut()).collect();

        // Stage 1: repair the a-halves of everything missing.
        {
            let mut a_refs: Vec<&mut [u8]> = refs.iter_mut().map(|v| &mut v[..half]).collect();
            self.rs
                .reconst(&mut a_refs, &has_sorted, &lost_all, data_only)?;
        }

        // Stage 2: strip the piggyback off the surviving parities, restoring
        // their RS form in place so stage 3 can decode against them.
        let touched: Vec<usize> = has_sorted
            .iter()
            .copied()
            .filter(|&h| h >= d && self.xor_set.contains_key(&h))
            .collect();
        for &h in &touched {
            self.apply_piggyback(&mut refs, h, half);
        }

        // Stage 3: repair the b-halves. All missing data rows are repaired,
        // not only the requested ones, so parity regeneration always reads
        // complete data.
        let mut b_lost: Vec<usize> = lost_all.iter().copied().filter(|&i| i < d).collect();
        if !data_only {
            b_lost.extend(p_need.iter().copied());
        }
        {
            let mut b_refs: Vec<&mut [u8]> = refs.iter_mut().map(|v| &mut v[half..]).collect();
            self.rs
                .reconst(&mut b_refs, &has_sorted, &b_lost, data_only)?;
        }

        // Stage 4: re-apply the piggyback, both to the parities just
        // regenerated and to the survivors stripped in stage 2.
        if !data_only {
            for &p in &p_need {
                if self.xor_set.contains_key(&p) {
                    self.apply_piggyback(&mut refs, p, half);
                }
            }
        }
        for &h in &touched {
            self.apply_piggyback(&mut refs, h, half);
        }
        Ok(())
    }

    /// Xors the `a`-halves of the xor set of parity `p` into its `b`-half.
    /// Applying it twice round-trips, so the same helper piggybacks,
    /// un-piggybacks and restores.
    fn apply_piggyback(&self, refs: &mut [&mut [u8]], p: usize, half: usize) {
        let list = &self.xor_set[&p];
        let mut dst: Option<&mut [u8]> = None;
        let mut srcs: Vec<Option<&[u8]>> = vec![None; list.len()];
        for (i, v) in refs.iter_mut().enumerate() {
            if i == p {
                dst = Some(&mut v[half..]);
            } else if let Some(pos) = list.iter().position(|&x| x == i) {
                srcs[pos] = Some(&v[..half]);
            }
        }
        let srcs: Vec<&[u8]> = srcs.into_iter().map(|s| s.unwrap()).collect();
        self.rs.kernel.xor_vect_add(dst.unwrap(), &srcs);
    }

    fn check_vects<V: AsMut<[u8]>>(&self, vects: &mut [V]) -> Result<usize, Error> {
        let total = self.block_num();
        if vects.len() != total {
            return Err(Error::SizeMismatch {
                expected: total,
                got: vects.len(),
            });
        }
        let size = vects[0].as_mut().len();
        check_even(size)?;
        for v in vects.iter_mut() {
            if v.as_mut().len() != size {
                return Err(Error::SizeMismatch {
                    expected: size,
                    got: v.as_mut().len(),
                });
            }
        }
        Ok(size)
    }

    fn check_parity_vects<V: AsMut<[u8]>>(
        &self,
        parity: &mut [V],
        size: usize,
    ) -> Result<usize, Error> {
        if parity.len() != self.rs.parity {
            return Err(Error::SizeMismatch {
                expected: self.rs.parity,
                got: parity.len(),
            });
        }
        check_even(size)?;
        for v in parity.iter_mut() {
            if v.as_mut().len() != size {
                return Err(Error::SizeMismatch {
                    expected: size,
                    got: v.as_mut().len(),
                });
            }
        }
        Ok(size)
    }
}

fn check_even(size: usize) -> Result<(), Error> {
    if size == 0 {
        return Err(Error::SizeZero);
    }
    if size & 1 == 1 {
        return Err(Error::SizeOdd(size));
    }
    Ok(())
}
