//! Database-level operations: load sketches from stores, compute distances,
//! and hand the result to the matrix layer.

use log::info;
use ndarray::Array2;

use crate::config::{DistanceMode, EngineConfig};
use crate::distance::{compute_distances, compute_pairwise, jaccard_distance as sketch_jaccard_distance, ACCESSORY_COLUMN, CORE_COLUMN};
use crate::error::{DistError, Result};
use crate::matrix::long_to_square;
use crate::sketch::{versions_match, Sketch, SketchStore};
use crate::sparse::{sparsify, SparseCoo};

/// Which distance component feeds the sparse graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DistanceColumn {
    #[default]
    Core,
    Accessory,
}

impl DistanceColumn {
    pub fn index(self) -> usize {
        match self {
            Self::Core => CORE_COLUMN,
            Self::Accessory => ACCESSORY_COLUMN,
        }
    }
}

/// All distances between `ref_names` in `ref_store` and `query_names` in
/// `query_store`. Identical name lists in stores of the same version are
/// compared as one population (condensed rows); otherwise every reference is
/// paired with every query.
pub fn query_database<R, Q, S>(
    ref_store: &R,
    query_store: &Q,
    ref_names: &[String],
    query_names: &[String],
    kmer_lengths: &[usize],
    config: &EngineConfig,
) -> Result<Array2<f32>>
where
    R: SketchStore<Sketch = S>,
    Q: SketchStore<Sketch = S>,
    S: Sketch,
{
    // fail fast before touching the stores
    config.validate()?;
    let same_version = versions_match(ref_store.version(), query_store.version());
    // one population only when the names and the databases agree
    let self_comparison = same_version && ref_names == query_names;

    let ref_sketches = ref_store.load(ref_names, kmer_lengths)?;
    let query_sketches = query_store.load(query_names, kmer_lengths)?;
    info!(
        "loaded {} reference and {} query sketches",
        ref_sketches.len(),
        query_sketches.len()
    );
    compute_pairwise(&ref_sketches, &query_sketches, kmer_lengths, config, self_comparison)
}

/// Self-comparison of `names`, reduced to a sparse graph on one distance
/// component.
#[allow(clippy::too_many_arguments)]
pub fn sparse_query<T: SketchStore>(
    store: &T,
    names: &[String],
    kmer_lengths: &[usize],
    dist_cutoff: f32,
    k_nearest: usize,
    column: DistanceColumn,
    config: &EngineConfig,
) -> Result<SparseCoo> {
    if config.mode != DistanceMode::CoreAccessory {
        return Err(DistError::invalid_config(
            "sparse queries use core/accessory distances",
        ));
    }
    if dist_cutoff.is_nan() || (dist_cutoff <= 0.0 && k_nearest == 0) {
        return Err(DistError::invalid_config(
            "sparse query needs a positive distance cutoff or k_nearest > 0",
        ));
    }
    config.validate()?;

    let sketches = store.load(names, kmer_lengths)?;
    let dists = compute_distances(&sketches, &sketches, kmer_lengths, config)?;
    let long: Vec<f32> = dists.column(column.index()).to_vec();
    let square = long_to_square(&long, config.num_threads)?;
    sparsify(square.view(), dist_cutoff, k_nearest, config.num_threads)
}

/// Raw Jaccard distance between two samples of one store.
pub fn jaccard_distance<T: SketchStore>(
    store: &T,
    sample1: &str,
    sample2: &str,
    kmer_len: usize,
) -> Result<f32> {
    let names = [sample1.to_owned(), sample2.to_owned()];
    let sketches = store.load(&names, &[kmer_len])?;
    sketch_jaccard_distance(&sketches[0], &sketches[1], kmer_len)
}
