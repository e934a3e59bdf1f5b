//! X-Reed-Solomon (XRS) erasure coding over GF(2^8).
//!
//! XRS keeps the failure tolerance of a `(k, m)` Reed-Solomon code while
//! cutting the repair traffic of the common failure - a single lost data
//! vector - to roughly three quarters of the conventional cost. It does so
//! by splitting every vector into two halves and xor-piggybacking the data
//! `a`-halves into the parity `b`-halves, so one lost data vector can be
//! rebuilt from half-vectors instead of whole ones.
//!
//! The field is GF(2^8) with the primitive polynomial
//! `x^8 + x^4 + x^3 + x^2 + 1` (0x11d). Vector arithmetic runs on the best
//! available backend - AVX2, SSSE3 or portable table lookups - selected once
//! per encoder.
//!
//! # Examples
//! ```rust
//! use erasure_xrs::Xrs;
//!
//! const VECT_LEN: usize = 1024;
//! let xrs = Xrs::new(10, 4).unwrap();
//! let mut vects: Vec<Vec<u8>> = (0..14).map(|i| vec![i as u8; VECT_LEN]).collect();
//! xrs.encode(&mut vects).expect("encoding failed");
//! let want = vects.clone();
//!
//! // Lose up to `parity_num` vectors, then repair them from any
//! // `data_num` survivors.
//! for &lost in &[0usize, 4, 11, 12] {
//!     vects[lost].fill(0);
//! }
//! let has = [1, 2, 3, 5, 6, 7, 8, 9, 10, 13];
//! xrs.reconst(&mut vects, &has, &[0, 4, 11, 12]).expect("reconstruction failed");
//! assert_eq!(vects, want);
//! ```

mod errors;
mod galois;
mod kernel;
mod matrix;
mod rs;
mod xrs;

pub use errors::Error;
pub use xrs::Xrs;
