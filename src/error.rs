//! Error types for the distance engine and the matrix transforms.

use thiserror::Error;

/// Errors returned by every fallible operation of the crate.
///
/// All variants are fatal for the call that produced them: no partial matrix,
/// graph or label vector is ever returned alongside an error.
#[derive(Debug, Error)]
pub enum DistError {
    /// Input data has the wrong shape or content (non-triangular condensed length,
    /// wrong column count, mismatched sketch sizes, ...).
    #[error("Malformed input: {message}")]
    MalformedInput {
        /// Description of what is wrong with the input
        message: String,
    },

    /// A sketch was not built with one of the requested k-mer lengths.
    #[error("Sample '{sample}' has no sketch at k-mer length {kmer}")]
    MissingKmer {
        /// Requested k-mer length
        kmer: usize,
        /// Name of the offending sample
        sample: String,
    },

    /// A requested sample is not present in a sketch store.
    #[error("Sample '{sample}' not found in sketch database")]
    MissingSample {
        /// Name of the missing sample
        sample: String,
    },

    /// Parameters are invalid or combine options that are not supported.
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Description of the rejected setting
        message: String,
    },

    /// The per-call worker pool could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Failure inside the CUDA backend (device, compilation, transfer or launch).
    #[cfg(feature = "cuda")]
    #[error("Accelerator error: {0:#}")]
    Accelerator(#[from] anyhow::Error),
}

impl DistError {
    /// Create a MalformedInput error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    /// Create an InvalidConfiguration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a MissingKmer error.
    pub fn missing_kmer(kmer: usize, sample: impl Into<String>) -> Self {
        Self::MissingKmer {
            kmer,
            sample: sample.into(),
        }
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, DistError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DistError::malformed("condensed length 5 is not triangular");
        assert_eq!(
            err.to_string(),
            "Malformed input: condensed length 5 is not triangular"
        );

        let err = DistError::invalid_config("num_threads must be > 0");
        assert!(err.to_string().starts_with("Invalid configuration"));

        let err = DistError::missing_kmer(21, "sample_3");
        assert_eq!(
            err.to_string(),
            "Sample 'sample_3' has no sketch at k-mer length 21"
        );
    }
}
