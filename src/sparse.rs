//! Dense square distances -> sparse nearest-neighbour graph (COO).

use std::time::Instant;

use log::info;
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::config::thread_pool;
use crate::error::{DistError, Result};

/// Directed sparse graph in coordinate form. Edges are grouped by row, rows in
/// increasing order, columns increasing within a row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseCoo {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub dists: Vec<f32>,
}

impl SparseCoo {
    pub fn len(&self) -> usize {
        self.dists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dists.is_empty()
    }

    /// `(row, col, dist)` triples in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.dists)
            .map(|((&r, &c), &d)| (r, c, d))
    }
}

fn by_distance_then_column(a: &(usize, f32), b: &(usize, f32)) -> std::cmp::Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

fn row_neighbours(row: ArrayView1<'_, f32>, i: usize, dist_cutoff: f32, k_nearest: usize) -> Vec<(usize, f32)> {
    let mut kept: Vec<(usize, f32)> = row
        .iter()
        .copied()
        .enumerate()
        .filter(|&(j, d)| j != i && !d.is_nan() && (dist_cutoff <= 0.0 || d <= dist_cutoff))
        .collect();

    if k_nearest > 0 && kept.len() > k_nearest {
        // ties at the k-th distance go to the lower column index
        kept.select_nth_unstable_by(k_nearest - 1, by_distance_then_column);
        kept.truncate(k_nearest);
    }
    kept.sort_unstable_by_key(|&(j, _)| j);
    kept
}

/// Keep, per row, the columns within `dist_cutoff` (if `> 0`) and among the
/// `k_nearest` smallest distances (if `> 0`). The diagonal is never emitted and
/// the graph is not symmetrised.
pub fn sparsify(
    dense: ArrayView2<'_, f32>,
    dist_cutoff: f32,
    k_nearest: usize,
    num_threads: usize,
) -> Result<SparseCoo> {
    if dist_cutoff.is_nan() {
        return Err(DistError::invalid_config("distance cutoff is NaN"));
    }
    if dist_cutoff <= 0.0 && k_nearest == 0 {
        return Err(DistError::invalid_config(
            "sparsify needs a positive distance cutoff or k_nearest > 0",
        ));
    }
    let n = dense.nrows();
    if dense.ncols() != n {
        return Err(DistError::malformed(format!(
            "expected a square matrix, got {}x{}",
            n,
            dense.ncols()
        )));
    }
    let pool = thread_pool(num_threads)?;

    let t0 = Instant::now();
    // collect() keeps row order, whatever the scheduling
    let per_row: Vec<Vec<(usize, f32)>> = pool.install(|| {
        (0..n)
            .into_par_iter()
            .map(|i| row_neighbours(dense.row(i), i, dist_cutoff, k_nearest))
            .collect()
    });

    let nnz: usize = per_row.iter().map(Vec::len).sum();
    let mut coo = SparseCoo {
        rows: Vec::with_capacity(nnz),
        cols: Vec::with_capacity(nnz),
        dists: Vec::with_capacity(nnz),
    };
    for (i, edges) in per_row.into_iter().enumerate() {
        for (j, d) in edges {
            coo.rows.push(i);
            coo.cols.push(j);
            coo.dists.push(d);
        }
    }
    info!(
        "sparsified {}x{} matrix to {} edges (cutoff={}, kNN={}) in {} ms",
        n,
        n,
        nnz,
        dist_cutoff,
        k_nearest,
        t0.elapsed().as_millis()
    );
    Ok(coo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_nearest_neighbour_three_samples() {
        let m = array![[0.0f32, 1.0, 2.0], [1.0, 0.0, 3.0], [2.0, 3.0, 0.0]];
        let coo = sparsify(m.view(), 0.0, 1, 2).unwrap();
        let edges: Vec<_> = coo.iter().collect();
        assert_eq!(edges, vec![(0, 1, 1.0), (1, 0, 1.0), (2, 0, 2.0)]);
    }

    #[test]
    fn test_cutoff_only() {
        let m = array![[0.0f32, 0.5, 0.2], [0.5, 0.0, 0.9], [0.2, 0.9, 0.0]];
        let coo = sparsify(m.view(), 0.5, 0, 1).unwrap();
        let edges: Vec<_> = coo.iter().collect();
        assert_eq!(edges, vec![(0, 1, 0.5), (0, 2, 0.2), (1, 0, 0.5), (2, 0, 0.2)]);
    }

    #[test]
    fn test_cutoff_and_knn_combined() {
        let m = array![
            [0.0f32, 0.1, 0.2, 0.3],
            [0.1, 0.0, 0.7, 0.8],
            [0.2, 0.7, 0.0, 0.9],
            [0.3, 0.8, 0.9, 0.0]
        ];
        let coo = sparsify(m.view(), 0.25, 2, 3).unwrap();
        let edges: Vec<_> = coo.iter().collect();
        assert_eq!(edges, vec![(0, 1, 0.1), (0, 2, 0.2), (1, 0, 0.1), (2, 0, 0.2)]);
    }

    #[test]
    fn test_ties_prefer_lower_column() {
        let m = array![[0.0f32, 0.4, 0.4, 0.4], [0.4, 0.0, 0.4, 0.4], [0.4, 0.4, 0.0, 0.4], [0.4, 0.4, 0.4, 0.0]];
        let coo = sparsify(m.view(), 0.0, 2, 4).unwrap();
        let edges: Vec<_> = coo.iter().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(
            edges,
            vec![(0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1), (3, 0), (3, 1)]
        );
    }

    #[test]
    fn test_both_limits_disabled_is_rejected() {
        let m = Array2::<f32>::zeros((3, 3));
        assert!(matches!(
            sparsify(m.view(), 0.0, 0, 1),
            Err(DistError::InvalidConfiguration { .. })
        ));
        let rect = Array2::<f32>::zeros((2, 3));
        assert!(matches!(
            sparsify(rect.view(), 0.5, 0, 1),
            Err(DistError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_bounds_and_determinism() {
        let n = 50;
        let m = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                0.0
            } else {
                (((i + 1) * (j + 1) * 37) % 101) as f32 / 101.0
            }
        });
        let one = sparsify(m.view(), 0.6, 5, 1).unwrap();
        let eight = sparsify(m.view(), 0.6, 5, 8).unwrap();
        assert_eq!(one, eight);

        let mut per_row = vec![0usize; n];
        for (r, c, d) in one.iter() {
            assert_ne!(r, c);
            assert!(d <= 0.6);
            per_row[r] += 1;
        }
        assert!(per_row.iter().all(|&cnt| cnt <= 5));
        assert!(one.rows.windows(2).all(|w| w[0] <= w[1]));
    }
}
