//! Pairwise core/accessory distances between sketches.
//!
//! For each pair the Jaccard similarity `s(k)` is taken at every k-mer length and
//! `ln s(k) = a + b·k` is fitted by least squares. The slope gives the core
//! distance `1 - exp(b)`, the intercept the accessory distance `1 - exp(a)`.
//!
//! Pairs are laid out as rows of the output matrix:
//! - self comparison: condensed order `(0,1), (0,2), .., (n-2,n-1)`
//! - ref vs query: reference-major, row `r * n_query + q`

use std::time::Instant;

use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;

use crate::config::{thread_pool, Backend, DistanceMode, EngineConfig};
use crate::error::{DistError, Result};
use crate::index::{condensed_len, condensed_to_square};
use crate::sketch::Sketch;

/// Similarities are clamped to this before taking the log, so a pair that
/// shares nothing at some k still yields finite, bounded distances.
pub const MIN_SIMILARITY: f64 = 1e-10;

/// Column of the core distance in core/accessory output.
pub const CORE_COLUMN: usize = 0;
/// Column of the accessory distance in core/accessory output.
pub const ACCESSORY_COLUMN: usize = 1;

#[inline]
pub(crate) fn clamp_similarity(s: f64) -> f64 {
    if s.is_nan() {
        MIN_SIMILARITY
    } else {
        s.clamp(MIN_SIMILARITY, 1.0)
    }
}

/// Pre-centred k-mer lengths for the regression: the centred values and
/// their sum of squares do not depend on the pair.
#[derive(Clone, Debug)]
pub struct KmerDesign {
    kmers: Vec<f64>,
    mean: f64,
    centred: Vec<f64>,
    sxx: f64,
}

impl KmerDesign {
    pub fn new(kmer_lengths: &[usize]) -> Self {
        let kmers: Vec<f64> = kmer_lengths.iter().map(|&k| k as f64).collect();
        let mean = kmers.iter().sum::<f64>() / kmers.len().max(1) as f64;
        let centred: Vec<f64> = kmers.iter().map(|k| k - mean).collect();
        let sxx = centred.iter().map(|c| c * c).sum();
        Self {
            kmers,
            mean,
            centred,
            sxx,
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn centred(&self) -> &[f64] {
        &self.centred
    }

    pub fn sxx(&self) -> f64 {
        self.sxx
    }

    /// `(core, accessory)` from one similarity per k-mer length (same order
    /// as the design). Both distances lie in [0, 1].
    pub fn fit(&self, similarities: &[f64]) -> (f32, f32) {
        debug_assert_eq!(similarities.len(), self.kmers.len());
        let mut sxy = 0.0;
        let mut sy = 0.0;
        for (c, &s) in self.centred.iter().zip(similarities) {
            let y = clamp_similarity(s).ln();
            sxy += c * y;
            sy += y;
        }
        let slope = sxy / self.sxx;
        let intercept = sy / self.kmers.len() as f64 - slope * self.mean;
        (distance_from_coefficient(slope), distance_from_coefficient(intercept))
    }
}

#[inline]
pub(crate) fn distance_from_coefficient(c: f64) -> f32 {
    if c < 0.0 {
        (1.0 - c.exp()) as f32
    } else {
        0.0
    }
}

/// The pairs one call compares and how results are laid out.
pub struct PairwiseJob<'a, S: Sketch> {
    pub ref_sketches: &'a [S],
    pub query_sketches: &'a [S],
    pub kmer_lengths: &'a [usize],
    pub mode: DistanceMode,
    /// Only `ref_sketches` is used; pairs are `i < j` in condensed order.
    pub self_comparison: bool,
}

impl<'a, S: Sketch> PairwiseJob<'a, S> {
    pub fn n_pairs(&self) -> usize {
        if self.self_comparison {
            condensed_len(self.ref_sketches.len())
        } else {
            self.ref_sketches.len() * self.query_sketches.len()
        }
    }

    pub fn n_columns(&self) -> usize {
        match self.mode {
            DistanceMode::CoreAccessory => 2,
            DistanceMode::Jaccard => self.kmer_lengths.len(),
        }
    }

    /// `(ref index, query index)` of output row `row`.
    #[inline]
    pub fn pair(&self, row: usize) -> (usize, usize) {
        if self.self_comparison {
            condensed_to_square(row, self.ref_sketches.len())
        } else {
            let n_query = self.query_sketches.len();
            (row / n_query, row % n_query)
        }
    }

    #[inline]
    fn sketches(&self, row: usize) -> (&'a S, &'a S) {
        let (i, j) = self.pair(row);
        if self.self_comparison {
            (&self.ref_sketches[i], &self.ref_sketches[j])
        } else {
            (&self.ref_sketches[i], &self.query_sketches[j])
        }
    }
}

/// A way of computing every pair of a [`PairwiseJob`]. Implementations must
/// agree with each other to floating-point tolerance.
pub trait PairwiseDistanceBackend<S: Sketch> {
    fn name(&self) -> &'static str;

    /// `n_pairs × n_columns` distances.
    fn distances(&self, job: &PairwiseJob<'_, S>) -> Result<Array2<f32>>;
}

/// rayon backend: pairs are independent, each worker fits its own regression.
#[derive(Clone, Copy, Debug)]
pub struct CpuBackend {
    num_threads: usize,
}

impl CpuBackend {
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads }
    }
}

impl<S: Sketch> PairwiseDistanceBackend<S> for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn distances(&self, job: &PairwiseJob<'_, S>) -> Result<Array2<f32>> {
        let pool = thread_pool(self.num_threads)?;
        let n_pairs = job.n_pairs();
        let n_cols = job.n_columns();
        let design = KmerDesign::new(job.kmer_lengths);
        let mut out = vec![0.0f32; n_pairs * n_cols];

        pool.install(|| {
            out.par_chunks_mut(n_cols).enumerate().try_for_each_init(
                || Vec::with_capacity(job.kmer_lengths.len()),
                |sims: &mut Vec<f64>, (row, dst)| -> Result<()> {
                    let (a, b) = job.sketches(row);
                    sims.clear();
                    for &k in job.kmer_lengths {
                        sims.push(a.similarity_at(b, k)?);
                    }
                    match job.mode {
                        DistanceMode::CoreAccessory => {
                            let (core, accessory) = design.fit(sims);
                            dst[CORE_COLUMN] = core;
                            dst[ACCESSORY_COLUMN] = accessory;
                        }
                        DistanceMode::Jaccard => {
                            for (d, s) in dst.iter_mut().zip(sims.iter()) {
                                *d = (1.0 - s) as f32;
                            }
                        }
                    }
                    Ok(())
                },
            )
        })?;

        Array2::from_shape_vec((n_pairs, n_cols), out).map_err(|e| DistError::malformed(e.to_string()))
    }
}

/// Backend named by the configuration.
pub fn select_backend<S: Sketch>(config: &EngineConfig) -> Result<Box<dyn PairwiseDistanceBackend<S>>> {
    match config.backend {
        Backend::Cpu => Ok(Box::new(CpuBackend::new(config.num_threads))),
        #[cfg(feature = "cuda")]
        Backend::Gpu { device_id } => Ok(Box::new(crate::distance_gpu::GpuBackend::new(
            device_id,
            config.block_rows,
        ))),
        #[cfg(not(feature = "cuda"))]
        Backend::Gpu { .. } => Err(DistError::invalid_config(
            "GPU backend requested but sketchdist was built without the `cuda` feature",
        )),
    }
}

fn validate_kmer_lengths(kmer_lengths: &[usize], mode: DistanceMode) -> Result<()> {
    if kmer_lengths.is_empty() {
        return Err(DistError::invalid_config("no k-mer lengths given"));
    }
    if kmer_lengths.contains(&0) {
        return Err(DistError::invalid_config("k-mer length 0 is not valid"));
    }
    let mut sorted = kmer_lengths.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != kmer_lengths.len() {
        return Err(DistError::invalid_config(format!(
            "duplicate k-mer lengths in {kmer_lengths:?}"
        )));
    }
    if mode == DistanceMode::CoreAccessory && sorted.len() < 2 {
        return Err(DistError::invalid_config(
            "core/accessory regression needs at least two distinct k-mer lengths",
        ));
    }
    Ok(())
}

fn check_kmers<S: Sketch>(sketches: &[S], kmer_lengths: &[usize]) -> Result<()> {
    for sketch in sketches {
        if let Some(&k) = kmer_lengths.iter().find(|&&k| !sketch.has_kmer(k)) {
            return Err(DistError::missing_kmer(k, sketch.name()));
        }
    }
    Ok(())
}

fn same_samples<S: Sketch>(ref_sketches: &[S], query_sketches: &[S]) -> bool {
    ref_sketches.len() == query_sketches.len()
        && ref_sketches
            .iter()
            .zip(query_sketches)
            .all(|(r, q)| r.name() == q.name())
}

/// Same samples in the same order: compare only the upper triangle.
fn is_self_comparison<S: Sketch>(ref_sketches: &[S], query_sketches: &[S]) -> bool {
    std::ptr::eq(ref_sketches, query_sketches) || same_samples(ref_sketches, query_sketches)
}

/// Distances between all pairs of sketches.
///
/// When `query_sketches` holds the same samples as `ref_sketches` the result has
/// one row per unordered pair in condensed order; otherwise one row per
/// (reference, query) pair, reference-major. Columns are (core, accessory) or,
/// in Jaccard mode, one Jaccard distance per k-mer length.
pub fn compute_distances<S: Sketch>(
    ref_sketches: &[S],
    query_sketches: &[S],
    kmer_lengths: &[usize],
    config: &EngineConfig,
) -> Result<Array2<f32>> {
    let self_comparison = is_self_comparison(ref_sketches, query_sketches);
    compute_pairwise(ref_sketches, query_sketches, kmer_lengths, config, self_comparison)
}

/// [`compute_distances`] with the layout chosen by the caller. With
/// `self_comparison` both sides must name the same samples in the same order.
pub fn compute_pairwise<S: Sketch>(
    ref_sketches: &[S],
    query_sketches: &[S],
    kmer_lengths: &[usize],
    config: &EngineConfig,
    self_comparison: bool,
) -> Result<Array2<f32>> {
    config.validate()?;
    validate_kmer_lengths(kmer_lengths, config.mode)?;
    if self_comparison && !same_samples(ref_sketches, query_sketches) {
        return Err(DistError::malformed(
            "self comparison needs the same samples on both sides",
        ));
    }
    check_kmers(ref_sketches, kmer_lengths)?;
    check_kmers(query_sketches, kmer_lengths)?;

    let job = PairwiseJob {
        ref_sketches,
        query_sketches,
        kmer_lengths,
        mode: config.mode,
        self_comparison,
    };
    let backend = select_backend::<S>(config)?;
    info!(
        "{} backend: {} x {} sketches, {} pairs, k = {:?}, mode = {:?}",
        backend.name(),
        ref_sketches.len(),
        if job.self_comparison { ref_sketches.len() } else { query_sketches.len() },
        job.n_pairs(),
        kmer_lengths,
        config.mode
    );

    let t0 = Instant::now();
    let dists = backend.distances(&job)?;
    info!("pairwise distances in {} ms", t0.elapsed().as_millis());
    debug!("distance matrix shape {:?}", dists.dim());
    Ok(dists)
}

/// Raw Jaccard distance between two sketches at one k-mer length.
pub fn jaccard_distance<S: Sketch>(a: &S, b: &S, kmer_len: usize) -> Result<f32> {
    Ok((1.0 - a.similarity_at(b, kmer_len)?) as f32)
}
