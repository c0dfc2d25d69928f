//! What the distance engine needs from a sketch, and where sketches come from.
//!
//! Sketch construction (hashing k-mers out of sequence data) and the on-disk
//! database layout are handled elsewhere; this module only holds the contract
//! plus a MinHash-signature sketch and an in-memory store that satisfy it.

use std::collections::{BTreeMap, HashMap};

use anndists::dist::{DistHamming, Distance};
use log::warn;

use crate::error::{DistError, Result};

/// A per-sample summary answering similarity queries at fixed k-mer lengths.
pub trait Sketch: Sync {
    fn name(&self) -> &str;

    /// k-mer lengths this sketch was built with.
    fn kmer_lengths(&self) -> Vec<usize>;

    fn has_kmer(&self, kmer_len: usize) -> bool {
        self.kmer_lengths().contains(&kmer_len)
    }

    /// Jaccard similarity to `other` at `kmer_len`, in [0, 1].
    fn similarity_at(&self, other: &Self, kmer_len: usize) -> Result<f64>;

    /// Fixed-size signature at `kmer_len`, where bin-wise equality estimates
    /// the Jaccard index. Needed by the batch (GPU) backend only.
    fn signature(&self, _kmer_len: usize) -> Option<&[u64]> {
        None
    }
}

/// MinHash sketch: one signature of `sketch_size` bins per k-mer length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinHashSketch {
    name: String,
    sketch_size: usize,
    signatures: BTreeMap<usize, Vec<u64>>,
}

impl MinHashSketch {
    /// Build from precomputed signatures, all of the same non-zero length.
    pub fn new(
        name: impl Into<String>,
        signatures: impl IntoIterator<Item = (usize, Vec<u64>)>,
    ) -> Result<Self> {
        let name = name.into();
        let signatures: BTreeMap<usize, Vec<u64>> = signatures.into_iter().collect();
        let sketch_size = match signatures.values().next() {
            Some(sig) => sig.len(),
            None => {
                return Err(DistError::malformed(format!(
                    "sketch '{name}' has no k-mer lengths"
                )))
            }
        };
        if sketch_size == 0 {
            return Err(DistError::malformed(format!("sketch '{name}' has empty signatures")));
        }
        if let Some((k, sig)) = signatures.iter().find(|(_, sig)| sig.len() != sketch_size) {
            return Err(DistError::malformed(format!(
                "sketch '{name}': signature at k={k} has {} bins, expected {sketch_size}",
                sig.len()
            )));
        }
        Ok(Self {
            name,
            sketch_size,
            signatures,
        })
    }

    pub fn sketch_size(&self) -> usize {
        self.sketch_size
    }

    fn bins(&self, kmer_len: usize) -> Result<&[u64]> {
        self.signatures
            .get(&kmer_len)
            .map(Vec::as_slice)
            .ok_or_else(|| DistError::missing_kmer(kmer_len, &self.name))
    }
}

impl Sketch for MinHashSketch {
    fn name(&self) -> &str {
        &self.name
    }

    fn kmer_lengths(&self) -> Vec<usize> {
        self.signatures.keys().copied().collect()
    }

    fn has_kmer(&self, kmer_len: usize) -> bool {
        self.signatures.contains_key(&kmer_len)
    }

    fn similarity_at(&self, other: &Self, kmer_len: usize) -> Result<f64> {
        if self.sketch_size() != other.sketch_size() {
            return Err(DistError::malformed(format!(
                "sketch sizes differ: '{}' has {} bins, '{}' has {}",
                self.name,
                self.sketch_size(),
                other.name,
                other.sketch_size()
            )));
        }
        let a = self.bins(kmer_len)?;
        let b = other.bins(kmer_len)?;
        // DistHamming gives the fraction of differing bins
        let d = DistHamming.eval(a, b) as f64;
        Ok((1.0 - d).clamp(0.0, 1.0))
    }

    fn signature(&self, kmer_len: usize) -> Option<&[u64]> {
        self.signatures.get(&kmer_len).map(Vec::as_slice)
    }
}

/// Source of sketches: a database of named samples built by one tool version.
pub trait SketchStore {
    type Sketch: Sketch;

    /// Version string of the tool that built the database.
    fn version(&self) -> &str;

    /// Sketches for `names`, in that order. Every sketch must carry all of
    /// `kmer_lengths`.
    fn load(&self, names: &[String], kmer_lengths: &[usize]) -> Result<Vec<Self::Sketch>>;
}

/// Sketch store held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    version: String,
    sketches: HashMap<String, MinHashSketch>,
}

impl MemoryStore {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            sketches: HashMap::new(),
        }
    }

    /// Add a sketch, replacing any previous one with the same name.
    pub fn insert(&mut self, sketch: MinHashSketch) {
        self.sketches.insert(sketch.name().to_owned(), sketch);
    }

    pub fn len(&self) -> usize {
        self.sketches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sketches.is_empty()
    }
}

impl FromIterator<MinHashSketch> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = MinHashSketch>>(iter: I) -> Self {
        let mut store = MemoryStore::new(env!("CARGO_PKG_VERSION"));
        for sketch in iter {
            store.insert(sketch);
        }
        store
    }
}

impl SketchStore for MemoryStore {
    type Sketch = MinHashSketch;

    fn version(&self) -> &str {
        &self.version
    }

    fn load(&self, names: &[String], kmer_lengths: &[usize]) -> Result<Vec<MinHashSketch>> {
        names
            .iter()
            .map(|name| {
                let sketch = self
                    .sketches
                    .get(name)
                    .ok_or_else(|| DistError::MissingSample { sample: name.clone() })?;
                if let Some(&k) = kmer_lengths.iter().find(|&&k| !sketch.has_kmer(k)) {
                    return Err(DistError::missing_kmer(k, name));
                }
                Ok(sketch.clone())
            })
            .collect()
    }
}

/// Compare database versions; a mismatch is only a warning.
pub fn versions_match(ref_version: &str, query_version: &str) -> bool {
    if ref_version != query_version {
        warn!(
            "versions of input databases sketches are different ({} vs {}), results may not be compatible",
            ref_version, query_version
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch(name: &str, sigs: &[(usize, Vec<u64>)]) -> MinHashSketch {
        MinHashSketch::new(name, sigs.iter().cloned()).unwrap()
    }

    #[test]
    fn test_similarity_is_fraction_of_equal_bins() {
        let a = sketch("a", &[(15, vec![1, 2, 3, 4]), (21, vec![5, 6, 7, 8])]);
        let b = sketch("b", &[(15, vec![1, 2, 9, 9]), (21, vec![5, 9, 9, 9])]);
        assert!((a.similarity_at(&b, 15).unwrap() - 0.5).abs() < 1e-6);
        assert!((a.similarity_at(&b, 21).unwrap() - 0.25).abs() < 1e-6);
        assert!((a.similarity_at(&a, 21).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(a.kmer_lengths(), vec![15, 21]);
    }

    #[test]
    fn test_missing_kmer_and_size_mismatch() {
        let a = sketch("a", &[(15, vec![1, 2, 3, 4])]);
        let b = sketch("b", &[(15, vec![1, 2])]);
        assert!(matches!(
            a.similarity_at(&a, 17),
            Err(DistError::MissingKmer { kmer: 17, .. })
        ));
        assert_eq!((a.sketch_size(), b.sketch_size()), (4, 2));
        assert!(matches!(
            a.similarity_at(&b, 15),
            Err(DistError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_constructor_rejects_uneven_signatures() {
        assert!(MinHashSketch::new("x", vec![(15, vec![1, 2]), (17, vec![1])]).is_err());
        assert!(MinHashSketch::new("x", Vec::<(usize, Vec<u64>)>::new()).is_err());
        assert!(MinHashSketch::new("x", vec![(15, vec![])]).is_err());
    }

    #[test]
    fn test_memory_store_load() {
        let store: MemoryStore = vec![
            sketch("s1", &[(15, vec![1, 2]), (17, vec![3, 4])]),
            sketch("s2", &[(15, vec![1, 2])]),
        ]
        .into_iter()
        .collect();
        assert_eq!(store.len(), 2);

        let loaded = store.load(&["s1".to_string()], &[15, 17]).unwrap();
        assert_eq!(loaded[0].name(), "s1");

        assert!(matches!(
            store.load(&["s2".to_string()], &[15, 17]),
            Err(DistError::MissingKmer { kmer: 17, .. })
        ));
        assert!(matches!(
            store.load(&["nope".to_string()], &[15]),
            Err(DistError::MissingSample { .. })
        ));
    }

    #[test]
    fn test_versions_match() {
        assert!(versions_match("1.0.0", "1.0.0"));
        assert!(!versions_match("1.0.0", "1.1.0"));
    }
}
