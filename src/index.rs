//! Closed-form maps between condensed (upper-triangle, row-major) indices and
//! `(row, col)` pairs of an `n × n` matrix.
//!
//! For `n` items the condensed form stores
//! `[d(0,1), d(0,2), .., d(0,n-1), d(1,2), .., d(n-2,n-1)]`.
//!
//! - `k(i, j) = n*i - i*(i+1)/2 + j - 1 - i` for `i < j`
//! - `i(k) = n - 2 - floor(sqrt(-8k + 4n(n-1) - 7)/2 - 0.5)`
//! - `j(k) = k + i + 1 - n(n-1)/2 + (n-i)(n-i-1)/2`
//!
//! All maps are O(1); they are called once per matrix cell.

use crate::error::{DistError, Result};

/// Number of unordered pairs among `n` items.
#[inline]
pub fn condensed_len(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Condensed index of the pair `(i, j)`, `i < j < n`.
#[inline]
pub fn square_to_condensed(i: usize, j: usize, n: usize) -> usize {
    debug_assert!(i < j && j < n, "square_to_condensed needs i < j < n");
    n * i - ((i * (i + 1)) >> 1) + j - 1 - i
}

/// Row `i` of condensed index `k`.
#[inline]
pub fn calc_row_idx(k: usize, n: usize) -> usize {
    debug_assert!(n >= 2 && k < condensed_len(n));
    let kf = k as f64;
    let nf = n as f64;
    // exact integers in f64 up to 2^53; the max() only guards rounding at the last index
    let disc = (-8.0 * kf + 4.0 * nf * (nf - 1.0) - 7.0).max(0.0);
    let offset = (disc.sqrt() / 2.0 - 0.5).floor().max(0.0) as usize;
    let mut i = (n - 2).saturating_sub(offset);

    // sqrt can land one ulp on the wrong side of a perfect square
    if square_to_condensed(i, i + 1, n) > k {
        i -= 1;
    } else if i + 2 < n && square_to_condensed(i + 1, i + 2, n) <= k {
        i += 1;
    }
    i
}

/// Column `j` of condensed index `k`, given its row `i`.
#[inline]
pub fn calc_col_idx(k: usize, i: usize, n: usize) -> usize {
    k + i + 1 + (n - i) * (n - i - 1) / 2 - condensed_len(n)
}

/// `(i, j)` pair of condensed index `k`.
#[inline]
pub fn condensed_to_square(k: usize, n: usize) -> (usize, usize) {
    let i = calc_row_idx(k, n);
    (i, calc_col_idx(k, i, n))
}

/// Recover `n` from the length of a condensed vector.
///
/// An empty vector maps to a single sample. Fails with `MalformedInput` if
/// `len` is not a triangular number.
pub fn samples_from_condensed_length(len: usize) -> Result<usize> {
    let n = (0.5 * (1.0 + (1.0 + 8.0 * len as f64).sqrt())).round() as usize;
    if condensed_len(n) != len {
        return Err(DistError::malformed(format!(
            "condensed length {len} is not n(n-1)/2 for any integer n"
        )));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_sample_ordering() {
        let n = 4;
        let expected = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
        for (k, &(i, j)) in expected.iter().enumerate() {
            assert_eq!(square_to_condensed(i, j, n), k);
            assert_eq!(condensed_to_square(k, n), (i, j));
        }
    }

    #[test]
    fn test_round_trip_small_n() {
        for n in 2..80usize {
            let mut k = 0;
            for i in 0..n {
                for j in (i + 1)..n {
                    assert_eq!(square_to_condensed(i, j, n), k, "n={n} i={i} j={j}");
                    assert_eq!(condensed_to_square(k, n), (i, j), "n={n} k={k}");
                    k += 1;
                }
            }
            assert_eq!(k, condensed_len(n));
        }
    }

    #[test]
    fn test_boundaries_large_n() {
        for &n in &[2usize, 3, 1_000, 65_537, 200_003] {
            let last = condensed_len(n) - 1;
            assert_eq!(condensed_to_square(last, n), (n - 2, n - 1));
            assert_eq!(condensed_to_square(0, n), (0, 1));
            // first and last entry of every row near the end
            for i in n.saturating_sub(5)..(n - 1) {
                let first = square_to_condensed(i, i + 1, n);
                let row_last = square_to_condensed(i, n - 1, n);
                assert_eq!(condensed_to_square(first, n), (i, i + 1));
                assert_eq!(condensed_to_square(row_last, n), (i, n - 1));
            }
        }
    }

    #[test]
    fn test_samples_from_condensed_length() {
        assert_eq!(samples_from_condensed_length(0).unwrap(), 1);
        assert_eq!(samples_from_condensed_length(1).unwrap(), 2);
        assert_eq!(samples_from_condensed_length(6).unwrap(), 4);
        assert_eq!(
            samples_from_condensed_length(condensed_len(123_456)).unwrap(),
            123_456
        );
        for bad in [2usize, 4, 5, 7, 11, 14] {
            assert!(matches!(
                samples_from_condensed_length(bad),
                Err(DistError::MalformedInput { .. })
            ));
        }
    }
}
