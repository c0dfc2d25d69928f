//! Pairwise genetic distances between sketched genomes.
//!
//! Core and accessory distances are estimated from MinHash sketches at
//! several k-mer lengths, then reshaped into square matrices, reduced to
//! sparse nearest-neighbour graphs, or labelled against a 2D boundary.

pub mod config;
pub mod distance;
#[cfg(feature = "cuda")]
pub mod distance_gpu;
pub mod error;
pub mod index;
pub mod io;
pub mod matrix;
pub mod query;
pub mod sketch;
pub mod sparse;
pub mod threshold;

pub use config::{Backend, DistanceMode, EngineConfig};
pub use distance::{compute_distances, compute_pairwise, CpuBackend, PairwiseDistanceBackend, PairwiseJob};
pub use error::{DistError, Result};
pub use index::{condensed_to_square, samples_from_condensed_length, square_to_condensed};
pub use matrix::{assemble_square, flatten_to_condensed, long_to_square, long_to_square_multi};
pub use query::{jaccard_distance, query_database, sparse_query, DistanceColumn};
pub use sketch::{MemoryStore, MinHashSketch, Sketch, SketchStore};
pub use sparse::{sparsify, SparseCoo};
pub use threshold::{assign_threshold, BoundarySlope};
