#![allow(dead_code)]

use sketchdist::{MemoryStore, MinHashSketch};

pub const KMERS: [usize; 4] = [15, 19, 23, 27];
pub const SKETCH_SIZE: usize = 512;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// splitmix64
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// A sketch diverged from a shared ancestor: each bin at length `k` is
/// replaced with probability `1 - (1 - rate)^k`.
pub fn diverged(name: &str, seed: u64, rate: f64) -> MinHashSketch {
    let sigs = KMERS.iter().map(|&k| {
        let p_change = 1.0 - (1.0 - rate).powi(k as i32);
        let sig: Vec<u64> = (0..SKETCH_SIZE as u64)
            .map(|b| {
                let ancestral = mix(b ^ ((k as u64) << 32));
                let draw = mix(seed.wrapping_mul(0x1000_0000_01b3) ^ ancestral);
                if (draw as f64 / u64::MAX as f64) < p_change {
                    draw
                } else {
                    ancestral
                }
            })
            .collect();
        (k, sig)
    });
    MinHashSketch::new(name, sigs).unwrap()
}

pub fn population(n: usize, prefix: &str, seed: u64) -> Vec<MinHashSketch> {
    (0..n)
        .map(|i| diverged(&format!("{prefix}{i}"), seed + i as u64 + 1, 0.002 + 0.003 * i as f64))
        .collect()
}

pub fn names(sketches: &[MinHashSketch]) -> Vec<String> {
    use sketchdist::Sketch;
    sketches.iter().map(|s| s.name().to_owned()).collect()
}

pub fn store(sketches: &[MinHashSketch]) -> MemoryStore {
    sketches.iter().cloned().collect()
}
