//! CUDA batch backend: every pair's similarities and regression on the device.
//! Distances come back as `f32` in the same row layout as the CPU backend.

use anyhow::{bail, Context};
use cudarc::driver::{CudaContext, CudaSlice, LaunchConfig, PushKernelArg};
use cudarc::nvrtc::compile_ptx;
use log::{debug, info, warn};
use ndarray::Array2;
use std::time::Instant;

use crate::config::DistanceMode;
use crate::distance::{KmerDesign, PairwiseDistanceBackend, PairwiseJob, MIN_SIMILARITY};
use crate::error::{DistError, Result};
use crate::sketch::Sketch;

const THREADS_PER_BLOCK: usize = 256;

/// Kernel: one thread per pair.
/// sketches: [n_samples * n_kmers * sketch_size] bins, sample-major then k-major
/// out: [n_tile * 2] (core, accessory), row = pair - pair_start
///
/// The regression uses the pre-centred k-mer lengths from the host so the
/// arithmetic matches the CPU path term for term.
const KERNEL_SRC: &str = r#"
__device__ __forceinline__ long long row_start(long long i, long long n) {
    return n * i - ((i * (i + 1)) >> 1);
}

__device__ long long calc_row_idx(long long k, long long n) {
    double disc = (double)(-8 * k + 4 * n * (n - 1) - 7);
    if (disc < 0.0) disc = 0.0;
    double off = floor(__dsqrt_rn(disc) / 2.0 - 0.5);
    if (off < 0.0) off = 0.0;
    long long i = n - 2 - (long long)off;
    if (i < 0) i = 0;
    if (row_start(i, n) > k) {
        i -= 1;
    } else if (i + 2 < n && row_start(i + 1, n) <= k) {
        i += 1;
    }
    return i;
}

__device__ __forceinline__ long long calc_col_idx(long long k, long long i, long long n) {
    return k + i + 1 - n * (n - 1) / 2 + (n - i) * ((n - i) - 1) / 2;
}

extern "C" __global__
void core_accessory_pairs(
    const unsigned long long* __restrict__ sketches,
    int n_kmers, int sketch_size,
    const double* __restrict__ centred,   // [n_kmers] k - mean(k)
    double k_mean, double sxx, double min_sim,
    long long n_ref, long long n_query, long long query_offset,
    int self_comparison,
    long long pair_start, long long n_tile,
    float* __restrict__ out
){
    const long long t = (long long)blockIdx.x * (long long)blockDim.x + threadIdx.x;
    if (t >= n_tile) return;
    const long long p = pair_start + t;

    long long i, j;
    if (self_comparison) {
        i = calc_row_idx(p, n_ref);
        j = calc_col_idx(p, i, n_ref);
    } else {
        i = p / n_query;
        j = query_offset + p % n_query;
    }

    const size_t stride = (size_t)n_kmers * (size_t)sketch_size;
    const unsigned long long* a = sketches + (size_t)i * stride;
    const unsigned long long* b = sketches + (size_t)j * stride;

    double sxy = 0.0;
    double sy = 0.0;
    for (int kk = 0; kk < n_kmers; ++kk) {
        const size_t off = (size_t)kk * (size_t)sketch_size;
        unsigned int diff = 0u;
        for (int t2 = 0; t2 < sketch_size; ++t2) {
            diff += (a[off + t2] != b[off + t2]);
        }
        double s = 1.0 - (double)((float)diff / (float)sketch_size);
        if (s < min_sim) s = min_sim;
        if (s > 1.0) s = 1.0;
        const double y = log(s);
        sxy += centred[kk] * y;
        sy += y;
    }
    const double slope = sxy / sxx;
    const double intercept = sy / (double)n_kmers - slope * k_mean;

    out[2 * t]     = slope < 0.0 ? (float)(1.0 - exp(slope)) : 0.0f;
    out[2 * t + 1] = intercept < 0.0 ? (float)(1.0 - exp(intercept)) : 0.0f;
}
"#;

const KERNEL_NAME: &str = "core_accessory_pairs";

/// How many CUDA devices are visible.
pub fn device_count() -> anyhow::Result<usize> {
    Ok(CudaContext::device_count()? as usize)
}

#[inline]
fn mib(x: usize) -> f64 {
    (x as f64) / (1024.0 * 1024.0)
}

/// CUDA backend on one device. Pairs are processed in tiles of
/// `block_rows²` pairs through one reusable device buffer.
#[derive(Clone, Copy, Debug)]
pub struct GpuBackend {
    device_id: usize,
    block_rows: usize,
}

impl GpuBackend {
    pub fn new(device_id: usize, block_rows: usize) -> Self {
        Self {
            device_id,
            block_rows,
        }
    }
}

/// Flatten signatures sample-major, k-major; every sketch needs a signature
/// of the same length at every k.
fn flatten_signatures<'s, S: Sketch + 's>(
    sketches: impl IntoIterator<Item = &'s S>,
    kmer_lengths: &[usize],
) -> Result<(Vec<u64>, usize)> {
    let mut flat = Vec::new();
    let mut sketch_size = None;
    for sketch in sketches {
        for &k in kmer_lengths {
            let sig = sketch.signature(k).ok_or_else(|| {
                DistError::malformed(format!(
                    "sketch '{}' has no signature at k={k}; the GPU backend needs MinHash signatures",
                    sketch.name()
                ))
            })?;
            match sketch_size {
                None => sketch_size = Some(sig.len()),
                Some(size) if size != sig.len() => {
                    return Err(DistError::malformed(format!(
                        "sketch '{}' has {} bins at k={k}, expected {size}",
                        sketch.name(),
                        sig.len()
                    )))
                }
                _ => {}
            }
            flat.extend_from_slice(sig);
        }
    }
    Ok((flat, sketch_size.unwrap_or(0)))
}

#[allow(clippy::too_many_arguments)]
fn core_accessory_on_device(
    device_id: usize,
    sketches_flat: &[u64],
    n_kmers: usize,
    sketch_size: usize,
    design: &KmerDesign,
    n_ref: usize,
    n_query: usize,
    self_comparison: bool,
    n_pairs: usize,
    mut block_rows: usize,
) -> anyhow::Result<Vec<f32>> {
    let ng = device_count()?;
    if ng == 0 {
        bail!("No CUDA devices available");
    }
    if device_id >= ng {
        bail!("CUDA device {device_id} requested but only {ng} visible");
    }

    // Optional safety cap so a too-large block_rows doesn't explode memory
    let cap = 4096usize;
    if block_rows > cap {
        warn!("GPU: capping block_rows from {} → {} for stability", block_rows, cap);
        block_rows = cap;
    }
    let tile_pairs = (block_rows * block_rows).min(n_pairs).max(1);

    let ctx = CudaContext::new(device_id)?;
    let stream = ctx.default_stream();

    let ptx = compile_ptx(KERNEL_SRC)?;
    let module = ctx.load_module(ptx)?;
    let func = module
        .load_function(KERNEL_NAME)
        .with_context(|| format!("load function '{KERNEL_NAME}'"))?;

    let d_sketches: CudaSlice<u64> = stream.clone_htod(sketches_flat)?;
    let d_centred: CudaSlice<f64> = stream.clone_htod(design.centred())?;
    info!(
        "GPU {}: uploaded sketches: {:.2} MiB, {} pairs in tiles of {}",
        device_id,
        mib(sketches_flat.len() * std::mem::size_of::<u64>()),
        n_pairs,
        tile_pairs
    );

    let mut d_tile: CudaSlice<f32> = stream
        .alloc_zeros(tile_pairs * 2)
        .with_context(|| format!("alloc d_tile: {:.2} MiB", mib(tile_pairs * 2 * 4)))?;
    let mut h_tile = vec![0.0f32; tile_pairs * 2];
    let mut out = vec![0.0f32; n_pairs * 2];

    let n_kmers_i32 = n_kmers as i32;
    let sketch_size_i32 = sketch_size as i32;
    let k_mean = design.mean();
    let sxx = design.sxx();
    let min_sim = MIN_SIMILARITY;
    let n_ref_i64 = n_ref as i64;
    let n_query_i64 = n_query as i64;
    // in self mode the buffer holds the reference sketches only
    let query_offset_i64 = if self_comparison { 0i64 } else { n_ref as i64 };
    let self_i32 = self_comparison as i32;

    let mut start = 0usize;
    while start < n_pairs {
        let len = (n_pairs - start).min(tile_pairs);
        let t_tile = Instant::now();

        let cfg = LaunchConfig {
            grid_dim: (((len + THREADS_PER_BLOCK - 1) / THREADS_PER_BLOCK) as u32, 1, 1),
            block_dim: (THREADS_PER_BLOCK as u32, 1, 1),
            shared_mem_bytes: 0,
        };
        let start_i64 = start as i64;
        let len_i64 = len as i64;

        let mut launch = stream.launch_builder(&func);
        launch.arg(&d_sketches);
        launch.arg(&n_kmers_i32);
        launch.arg(&sketch_size_i32);
        launch.arg(&d_centred);
        launch.arg(&k_mean);
        launch.arg(&sxx);
        launch.arg(&min_sim);
        launch.arg(&n_ref_i64);
        launch.arg(&n_query_i64);
        launch.arg(&query_offset_i64);
        launch.arg(&self_i32);
        launch.arg(&start_i64);
        launch.arg(&len_i64);
        launch.arg(&mut d_tile);

        unsafe { launch.launch(cfg) }?;
        // stream-ordered D2H is sufficient
        stream.memcpy_dtoh(&d_tile, &mut h_tile)?;
        out[start * 2..(start + len) * 2].copy_from_slice(&h_tile[..len * 2]);

        debug!(
            "GPU {}: pairs {}..{} done in {} ms",
            device_id,
            start,
            start + len,
            t_tile.elapsed().as_millis()
        );
        start += len;
    }
    Ok(out)
}

impl<S: Sketch> PairwiseDistanceBackend<S> for GpuBackend {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn distances(&self, job: &PairwiseJob<'_, S>) -> Result<Array2<f32>> {
        if job.mode != DistanceMode::CoreAccessory {
            return Err(DistError::invalid_config(
                "extracting Jaccard distances is not supported on GPU",
            ));
        }
        let n_pairs = job.n_pairs();
        if n_pairs == 0 {
            return Ok(Array2::zeros((0, 2)));
        }

        let (flat, sketch_size) = if job.self_comparison {
            flatten_signatures(job.ref_sketches, job.kmer_lengths)?
        } else {
            flatten_signatures(
                job.ref_sketches.iter().chain(job.query_sketches),
                job.kmer_lengths,
            )?
        };
        let design = KmerDesign::new(job.kmer_lengths);

        let out = core_accessory_on_device(
            self.device_id,
            &flat,
            job.kmer_lengths.len(),
            sketch_size,
            &design,
            job.ref_sketches.len(),
            job.query_sketches.len(),
            job.self_comparison,
            n_pairs,
            self.block_rows,
        )?;
        Array2::from_shape_vec((n_pairs, 2), out).map_err(|e| DistError::malformed(e.to_string()))
    }
}
