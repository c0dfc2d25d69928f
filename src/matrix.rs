//! Condensed (long) <-> square distance matrices.
//!
//! Square matrices are filled one row per task: every output cell is written
//! by exactly one worker, so the result does not depend on the thread count.

use std::time::Instant;

use log::debug;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::config::thread_pool;
use crate::error::{DistError, Result};
use crate::index::{condensed_len, condensed_to_square, samples_from_condensed_length, square_to_condensed};

#[inline]
fn self_block_value(block: &[f32], r: usize, c: usize, n: usize) -> f32 {
    match r.cmp(&c) {
        std::cmp::Ordering::Less => block[square_to_condensed(r, c, n)],
        std::cmp::Ordering::Greater => block[square_to_condensed(c, r, n)],
        std::cmp::Ordering::Equal => 0.0,
    }
}

/// Build a square matrix from condensed blocks.
///
/// - `ref_ref`: condensed reference self-distances, length `n_ref(n_ref-1)/2`
/// - `query_ref`: optional dense `n_ref × n_query` reference-vs-query block
/// - `query_query`: optional condensed query self-distances (needs `query_ref`)
///
/// The result is `(n_ref + n_query)²`, symmetric, with a zero diagonal. When
/// `query_query` is absent the query-query quadrant stays zero.
pub fn assemble_square(
    ref_ref: &[f32],
    query_ref: Option<ArrayView2<'_, f32>>,
    query_query: Option<&[f32]>,
    num_threads: usize,
) -> Result<Array2<f32>> {
    let pool = thread_pool(num_threads)?;
    let n_ref = samples_from_condensed_length(ref_ref.len())?;

    let n_query = match &query_ref {
        Some(block) => {
            if block.nrows() != n_ref {
                return Err(DistError::malformed(format!(
                    "query-ref block has {} rows, expected n_ref = {}",
                    block.nrows(),
                    n_ref
                )));
            }
            block.ncols()
        }
        None => 0,
    };
    if let Some(qq) = query_query {
        if query_ref.is_none() {
            return Err(DistError::malformed(
                "query-query distances given without a query-ref block",
            ));
        }
        if qq.len() != condensed_len(n_query) {
            return Err(DistError::malformed(format!(
                "query-query block has length {}, expected {} for {} queries",
                qq.len(),
                condensed_len(n_query),
                n_query
            )));
        }
    }

    let total = n_ref + n_query;
    let t0 = Instant::now();
    let mut out = vec![0.0f32; total * total];
    if total > 0 {
        pool.install(|| {
            out.par_chunks_mut(total).enumerate().for_each(|(r, row)| {
                if r < n_ref {
                    for c in 0..n_ref {
                        row[c] = self_block_value(ref_ref, r, c, n_ref);
                    }
                    if let Some(block) = &query_ref {
                        for q in 0..n_query {
                            row[n_ref + q] = block[[r, q]];
                        }
                    }
                } else {
                    let q = r - n_ref;
                    if let Some(block) = &query_ref {
                        for c in 0..n_ref {
                            row[c] = block[[c, q]];
                        }
                    }
                    if let Some(qq) = query_query {
                        for c in 0..n_query {
                            row[n_ref + c] = self_block_value(qq, q, c, n_query);
                        }
                    }
                }
            });
        });
    }
    debug!(
        "assembled {}x{} square matrix (n_ref={}, n_query={}) in {} ms",
        total,
        total,
        n_ref,
        n_query,
        t0.elapsed().as_millis()
    );

    Array2::from_shape_vec((total, total), out).map_err(|e| DistError::malformed(e.to_string()))
}

/// Extract the upper triangle of a square matrix in condensed order.
///
/// Left inverse of [`assemble_square`] for a single block.
pub fn flatten_to_condensed(square: ArrayView2<'_, f32>, num_threads: usize) -> Result<Vec<f32>> {
    let pool = thread_pool(num_threads)?;
    let n = square.nrows();
    if square.ncols() != n {
        return Err(DistError::malformed(format!(
            "expected a square matrix, got {}x{}",
            n,
            square.ncols()
        )));
    }

    let mut out = vec![0.0f32; condensed_len(n)];
    pool.install(|| {
        out.par_iter_mut().enumerate().for_each(|(k, d)| {
            let (i, j) = condensed_to_square(k, n);
            *d = square[[i, j]];
        });
    });
    Ok(out)
}

/// Single-population square form of a condensed vector.
pub fn long_to_square(dists: &[f32], num_threads: usize) -> Result<Array2<f32>> {
    assemble_square(dists, None, None, num_threads)
}

/// Three-block square form: the query-ref distances are in the long,
/// reference-major order the distance engine emits (`r * n_query + q`).
pub fn long_to_square_multi(
    ref_ref: &[f32],
    query_ref: &[f32],
    query_query: &[f32],
    num_threads: usize,
) -> Result<Array2<f32>> {
    let n_ref = samples_from_condensed_length(ref_ref.len())?;
    if query_ref.len() % n_ref != 0 {
        return Err(DistError::malformed(format!(
            "query-ref length {} is not a multiple of n_ref = {}",
            query_ref.len(),
            n_ref
        )));
    }
    let n_query = query_ref.len() / n_ref;
    let block = ArrayView2::from_shape((n_ref, n_query), query_ref)
        .map_err(|e| DistError::malformed(e.to_string()))?;
    assemble_square(ref_ref, Some(block), Some(query_query), num_threads)
}
