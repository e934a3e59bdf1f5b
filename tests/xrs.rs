use erasure_xrs::{Error, Xrs};
use rand::{Rng, SeedableRng, rngs::StdRng};

const KB: usize = 1 << 10;
const TEST_DATA_NUM: usize = 10;
const TEST_PARITY_NUM: usize = 4;
// Covers the AVX2/SSSE3 lane widths, their tails and the byte-by-byte path.
const VERIFY_SIZE: usize = 256 + 32 + 16 + 8 + 2;

fn fill_random(rng: &mut StdRng, v: &mut [u8]) {
    rng.fill(v);
}

fn new_stripe(rng: &mut StdRng, d: usize, p: usize, size: usize) -> Vec<Vec<u8>> {
    let mut vects = vec![vec![0u8; size]; d + p];
    for v in vects.iter_mut().take(d) {
        fill_random(rng, v);
    }
    vects
}

fn make_lost(rng: &mut StdRng, total: usize, count: usize) -> Vec<usize> {
    let mut lost = Vec::with_capacity(count);
    while lost.len() < count {
        let n = rng.random_range(0..total);
        if !lost.contains(&n) {
            lost.push(n);
        }
    }
    lost.sort_unstable();
    lost
}

fn make_has(total: usize, d: usize, lost: &[usize]) -> Vec<usize> {
    (0..total).filter(|i| !lost.contains(i)).take(d).collect()
}

// The k=5+5, size-2 stripe with parity precomputed out-of-band (MATLAB),
// carried over from the original test suite. The bytes belong to the Cauchy
// basis.
#[test]
fn verify_encode_fixture() {
    let xrs = Xrs::new_cauchy(5, 5).unwrap();
    let mut vects: Vec<Vec<u8>> = vec![
        vec![0, 0],
        vec![4, 7],
        vec![2, 4],
        vec![6, 9],
        vec![8, 11],
        vec![0, 0],
        vec![0, 0],
        vec![0, 0],
        vec![0, 0],
        vec![0, 0],
    ];
    xrs.encode(&mut vects).expect("encoding failed");
    assert_eq!(vects[5], vec![97, 156]);
    assert_eq!(vects[6], vec![173, 117]);
    assert_eq!(vects[7], vec![218, 110]);
    assert_eq!(vects[8], vec![107, 59]);
    assert_eq!(vects[9], vec![110, 153]);
}

#[test]
fn verify_encode_idempotent() {
    let xrs = Xrs::new(TEST_DATA_NUM, TEST_PARITY_NUM).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let mut vects = new_stripe(&mut rng, TEST_DATA_NUM, TEST_PARITY_NUM, 128);
    xrs.encode(&mut vects).expect("encoding failed");
    let first = vects.clone();
    xrs.encode(&mut vects).expect("encoding failed");
    assert_eq!(vects, first);
}

fn verify_reconst(xrs: &Xrs, seed: u64) {
    let d = xrs.data_num();
    let p = xrs.parity_num();
    let total = xrs.block_num();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut size = 2;
    while size <= VERIFY_SIZE {
        let mut expect = new_stripe(&mut rng, d, p, size);
        xrs.encode(&mut expect).expect("encoding failed");

        let n_lost = rng.random_range(1..=p);
        let lost = make_lost(&mut rng, total, n_lost);
        let has = make_has(total, d, &lost);
        let mut result = expect.clone();
        for &l in &lost {
            result[l].fill(0);
        }
        xrs.reconst(&mut result, &has, &lost).expect("reconstruction failed");
        // The whole stripe comes back, surviving parities included.
        assert_eq!(result, expect, "size={size} lost={lost:?}");
        size += 2;
    }
}

#[test]
fn verify_reconst_vandermonde() {
    let xrs = Xrs::new(TEST_DATA_NUM, TEST_PARITY_NUM).unwrap();
    verify_reconst(&xrs, 2);
}

#[test]
fn verify_reconst_cauchy() {
    let xrs = Xrs::new_cauchy(TEST_DATA_NUM, TEST_PARITY_NUM).unwrap();
    verify_reconst(&xrs, 3);
}

#[test]
fn verify_reconst_wide_configs() {
    for (d, p) in [(1, 2), (2, 2), (5, 3), (5, 5), (14, 10), (28, 4)] {
        let xrs = Xrs::new(d, p).unwrap();
        let mut rng = StdRng::seed_from_u64(d as u64 * 31 + p as u64);
        for _ in 0..8 {
            let size = 2 * rng.random_range(1..=40usize);
            let mut expect = new_stripe(&mut rng, d, p, size);
            xrs.encode(&mut expect).expect("encoding failed");
            let n_lost = rng.random_range(1..=p);
            let lost = make_lost(&mut rng, d + p, n_lost);
            let has = make_has(d + p, d, &lost);
            let mut result = expect.clone();
            for &l in &lost {
                result[l].fill(0);
            }
            xrs.reconst(&mut result, &has, &lost).expect("reconstruction failed");
            assert_eq!(result, expect, "d={d} p={p} size={size} lost={lost:?}");
        }
    }
}

// Port of the original "reconstruct rows {0,4,11,12} from the rest" stripe
// shape, checked as encode/reconstruct equality.
#[test]
fn verify_reconst_fixture_shape() {
    let xrs = Xrs::new_cauchy(10, 4).unwrap();
    let mut vects: Vec<Vec<u8>> = vec![
        vec![0, 13, 12, 1],
        vec![4, 14, 14, 5],
        vec![2, 17, 19, 7],
        vec![6, 23, 32, 7],
        vec![21, 24, 25, 23],
        vec![33, 36, 26, 35],
        vec![44, 27, 37, 47],
        vec![11, 42, 43, 16],
        vec![13, 101, 103, 46],
        vec![98, 177, 186, 65],
        vec![0; 4],
        vec![0; 4],
        vec![0; 4],
        vec![0; 4],
    ];
    xrs.encode(&mut vects).expect("encoding failed");
    let expect = vects.clone();
    for &l in &[0usize, 4, 11, 12] {
        vects[l].fill(0);
    }
    let has = [1, 2, 3, 5, 6, 7, 8, 9, 10, 13];
    xrs.reconst(&mut vects, &has, &[0, 4, 11, 12])
        .expect("reconstruction failed");
    assert_eq!(vects, expect);
}

#[test]
fn verify_reconst_data_leaves_parity_alone() {
    let xrs = Xrs::new(10, 4).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let mut expect = new_stripe(&mut rng, 10, 4, 66);
    xrs.encode(&mut expect).expect("encoding failed");

    let lost = [0usize, 4, 11, 12];
    let has = make_has(14, 10, &lost);
    let mut result = expect.clone();
    for &l in &lost {
        result[l].fill(0);
    }
    xrs.reconst_data(&mut result, &has, &[0, 4])
        .expect("reconstruction failed");
    assert_eq!(result[0], expect[0]);
    assert_eq!(result[4], expect[4]);
    // Surviving vectors, the piggybacked parity 13 included, are untouched.
    for &h in &has {
        assert_eq!(result[h], expect[h], "survivor {h}");
    }
}

fn verify_reconst_one(xrs: &Xrs, size: usize, seed: u64) {
    let d = xrs.data_num();
    let total = xrs.block_num();
    let half = size / 2;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut expect = new_stripe(&mut rng, d, xrs.parity_num(), size);
    xrs.encode(&mut expect).expect("encoding failed");

    for lost in 0..d {
        let (a_need, b_need) = xrs.need_vects(lost).expect("need_vects failed");
        let mut result = expect.clone();
        result[lost].fill(0);
        // Blank everything reconst_one does not read, proving it only needs
        // the vectors named by need_vects.
        for j in 0..total {
            if j != lost && !a_need.contains(&j) {
                result[j][..half].fill(0);
            }
        }
        for j in d..total {
            if !b_need.contains(&j) {
                result[j][half..].fill(0);
            }
        }
        xrs.reconst_one(&mut result, lost).expect("reconstruction failed");
        assert_eq!(result[lost], expect[lost], "size={size} lost={lost}");
    }
}

#[test]
fn verify_reconst_one_sweep() {
    let xrs = Xrs::new(TEST_DATA_NUM, TEST_PARITY_NUM).unwrap();
    let mut size = 2;
    while size <= VERIFY_SIZE {
        verify_reconst_one(&xrs, size, size as u64);
        size += 26;
    }
}

#[test]
fn verify_reconst_one_large() {
    // Any single data loss in 12+4 at 1 KiB restores from the need_vects
    // reads alone.
    let xrs = Xrs::new(12, 4).unwrap();
    verify_reconst_one(&xrs, 1024, 9);
}

#[test]
fn verify_reconst_dispatches_single_data_loss() {
    let xrs = Xrs::new(TEST_DATA_NUM, TEST_PARITY_NUM).unwrap();
    let mut rng = StdRng::seed_from_u64(6);
    let mut expect = new_stripe(&mut rng, TEST_DATA_NUM, TEST_PARITY_NUM, 64);
    xrs.encode(&mut expect).expect("encoding failed");
    for lost in 0..TEST_DATA_NUM {
        let mut one = expect.clone();
        one[lost].fill(0);
        let mut full = one.clone();
        let has: Vec<usize> = (0..14).filter(|&i| i != lost).take(10).collect();
        xrs.reconst(&mut full, &has, &[lost]).expect("reconstruction failed");
        xrs.reconst_one(&mut one, lost).expect("reconstruction failed");
        assert_eq!(full, one, "lost={lost}");
        assert_eq!(full[lost], expect[lost], "lost={lost}");
    }
}

// Incremental update must land on the same parity as a full re-encode.
#[test]
fn verify_update() {
    let xrs = Xrs::new(TEST_DATA_NUM, TEST_PARITY_NUM).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let mut size = 2;
    while size <= VERIFY_SIZE {
        let update_row = rng.random_range(0..TEST_DATA_NUM);
        let mut update_ret = new_stripe(&mut rng, TEST_DATA_NUM, TEST_PARITY_NUM, size);
        xrs.encode(&mut update_ret).expect("encoding failed");

        let old_data = update_ret[update_row].clone();
        let mut new_data = vec![0u8; size];
        fill_random(&mut rng, &mut new_data);

        let mut encode_ret = update_ret.clone();
        encode_ret[update_row] = new_data.clone();
        xrs.encode(&mut encode_ret).expect("encoding failed");

        xrs.update(&old_data, &new_data, update_row, &mut update_ret[TEST_DATA_NUM..])
            .expect("update failed");
        assert_eq!(
            update_ret[TEST_DATA_NUM..],
            encode_ret[TEST_DATA_NUM..],
            "size={size} row={update_row}"
        );
        size += 2;
    }
}

// Folding vectors in and back out of zeroed rows is a parity round-trip.
#[test]
fn verify_replace() {
    let xrs = Xrs::new(10, 4).unwrap();
    let mut rng = StdRng::seed_from_u64(8);
    let size = 128;

    let rows = [1usize, 4, 7];
    let mut datas: Vec<Vec<u8>> = vec![vec![0u8; size]; rows.len()];
    for v in datas.iter_mut() {
        fill_random(&mut rng, v);
    }

    let mut stripe = vec![vec![0u8; size]; 14];
    for (v, &r) in datas.iter().zip(&rows) {
        stripe[r] = v.clone();
    }
    let mut expect = stripe.clone();
    xrs.encode(&mut expect).expect("encoding failed");

    // Insert into the parity of an all-zero stripe.
    let mut zero_stripe = vec![vec![0u8; size]; 14];
    xrs.encode(&mut zero_stripe).expect("encoding failed");
    let mut parity = zero_stripe[10..].to_vec();
    xrs.replace(&datas, &rows, &mut parity).expect("replace failed");
    assert_eq!(parity[..], expect[10..]);

    // Removing the same content returns to the all-zero parity.
    xrs.replace(&datas, &rows, &mut parity).expect("replace failed");
    assert_eq!(parity[..], zero_stripe[10..]);
}

// Crosses the 16 KiB unit blocks and the non-temporal store threshold.
#[test]
fn verify_large_vects() {
    let xrs = Xrs::new(TEST_DATA_NUM, TEST_PARITY_NUM).unwrap();
    let mut rng = StdRng::seed_from_u64(10);
    for size in [64 * KB, 64 * KB + 66] {
        let mut expect = new_stripe(&mut rng, TEST_DATA_NUM, TEST_PARITY_NUM, size);
        xrs.encode(&mut expect).expect("encoding failed");

        let lost = [0usize, 4, 11, 12];
        let has = make_has(14, 10, &lost);
        let mut result = expect.clone();
        for &l in &lost {
            result[l].fill(0);
        }
        xrs.reconst(&mut result, &has, &lost).expect("reconstruction failed");
        assert_eq!(result, expect, "size={size}");

        let mut one = expect.clone();
        one[3].fill(0);
        xrs.reconst_one(&mut one, 3).expect("reconstruction failed");
        assert_eq!(one, expect, "size={size}");
    }
}

// One encoder shared across threads; the inverse cache takes concurrent
// last-writer-wins inserts for the same survivor sets.
#[test]
fn verify_concurrent_reconst() {
    let xrs = Xrs::new(8, 4).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let mut expect = new_stripe(&mut rng, 8, 4, 256);
    xrs.encode(&mut expect).expect("encoding failed");

    std::thread::scope(|s| {
        for t in 0..4u64 {
            let xrs = &xrs;
            let expect = &expect;
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + t);
                for _ in 0..16 {
                    let n_lost = rng.random_range(2..=4);
                    let lost = make_lost(&mut rng, 12, n_lost);
                    let has = make_has(12, 8, &lost);
                    let mut work = expect.clone();
                    for &l in &lost {
                        work[l].fill(0);
                    }
                    xrs.reconst(&mut work, &has, &lost).expect("reconstruction failed");
                    assert_eq!(&work, expect, "lost={lost:?}");
                }
            });
        }
    });
}

#[test]
fn verify_argument_rejection() {
    assert_eq!(Xrs::new(10, 1).unwrap_err(), Error::IllegalParity(1));
    assert_eq!(Xrs::new_cauchy(10, 1).unwrap_err(), Error::IllegalParity(1));
    assert_eq!(Xrs::new(254, 2).unwrap_err(), Error::IllegalArgs(254, 2));
    assert_eq!(Xrs::new(0, 2).unwrap_err(), Error::IllegalArgs(0, 2));

    let xrs = Xrs::new(4, 2).unwrap();
    let mut odd = vec![vec![0u8; 7]; 6];
    assert_eq!(xrs.encode(&mut odd).unwrap_err(), Error::SizeOdd(7));
    let mut empty = vec![vec![0u8; 0]; 6];
    assert_eq!(xrs.encode(&mut empty).unwrap_err(), Error::SizeZero);

    let mut vects = vec![vec![0u8; 8]; 6];
    assert_eq!(
        xrs.reconst(&mut vects, &[0, 1, 2, 3], &[2]).unwrap_err(),
        Error::ConflictingSets(2)
    );
    assert_eq!(
        xrs.reconst(&mut vects, &[0, 1, 2], &[4]).unwrap_err(),
        Error::NotEnoughShards { has: 3, need: 4 }
    );
    assert_eq!(
        xrs.reconst_one(&mut vects, 4).unwrap_err(),
        Error::IllegalIndex(4)
    );
    assert_eq!(xrs.need_vects(4).unwrap_err(), Error::IllegalIndex(4));
}
