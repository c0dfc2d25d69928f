//! Explicit run configuration.
//!
//! Nothing in the library reads ambient state: every operation receives its
//! thread count (and, for the distance engine, its backend and mode) from the caller,
//! and runs inside a dedicated rayon pool of exactly that size.

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{DistError, Result};

/// Default number of rows per GPU tile edge.
pub const DEFAULT_BLOCK_ROWS: usize = 1024;

/// Which execution unit computes the pairwise distances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// rayon worker pool, one regression per pair
    Cpu,
    /// CUDA batch kernel on the given device (requires the `cuda` feature)
    Gpu { device_id: usize },
}

/// What the distance engine reports for each pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceMode {
    /// Two columns: core and accessory distance from the regression over k.
    CoreAccessory,
    /// One column per k-mer length: raw Jaccard distance, no regression.
    Jaccard,
}

/// Configuration of one `compute_distances` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub num_threads: usize,
    pub backend: Backend,
    pub mode: DistanceMode,
    /// Rows per tile edge for the batch backend.
    pub block_rows: usize,
}

impl EngineConfig {
    /// CPU, core/accessory mode.
    pub fn cpu(num_threads: usize) -> Self {
        Self {
            num_threads,
            backend: Backend::Cpu,
            mode: DistanceMode::CoreAccessory,
            block_rows: DEFAULT_BLOCK_ROWS,
        }
    }

    /// GPU on `device_id`, core/accessory mode.
    pub fn gpu(device_id: usize) -> Self {
        Self {
            num_threads: 1,
            backend: Backend::Gpu { device_id },
            mode: DistanceMode::CoreAccessory,
            block_rows: DEFAULT_BLOCK_ROWS,
        }
    }

    pub fn with_mode(mut self, mode: DistanceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_block_rows(mut self, block_rows: usize) -> Self {
        self.block_rows = block_rows;
        self
    }

    pub fn use_gpu(&self) -> bool {
        matches!(self.backend, Backend::Gpu { .. })
    }

    /// Reject unsupported combinations before any work starts.
    pub fn validate(&self) -> Result<()> {
        check_threads(self.num_threads)?;
        if self.block_rows == 0 {
            return Err(DistError::invalid_config("block_rows must be > 0"));
        }
        if self.mode == DistanceMode::Jaccard && self.use_gpu() {
            return Err(DistError::invalid_config(
                "extracting Jaccard distances is not supported on GPU",
            ));
        }
        if self.use_gpu() && !cfg!(feature = "cuda") {
            return Err(DistError::invalid_config(
                "GPU backend requested but sketchdist was built without the `cuda` feature",
            ));
        }
        Ok(())
    }
}

pub(crate) fn check_threads(num_threads: usize) -> Result<()> {
    if num_threads == 0 {
        return Err(DistError::invalid_config("num_threads must be > 0"));
    }
    Ok(())
}

/// Build a private pool with exactly `num_threads` workers.
pub fn thread_pool(num_threads: usize) -> Result<ThreadPool> {
    check_threads(num_threads)?;
    Ok(ThreadPoolBuilder::new().num_threads(num_threads).build()?)
}
