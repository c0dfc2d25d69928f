//! Assign each (core, accessory) distance pair to a side of a 2D boundary.

use ndarray::{Array1, ArrayView2};
use rayon::prelude::*;

use crate::config::thread_pool;
use crate::error::{DistError, Result};

/// |test| below this counts as lying on the boundary.
pub const BOUNDARY_EPSILON: f64 = 1e-10;

/// Label of a pair strictly inside the boundary (same cluster).
pub const WITHIN: f32 = -1.0;
/// Label of a pair on the boundary.
pub const ON_BOUNDARY: f32 = 0.0;
/// Label of a pair outside the boundary (different clusters).
pub const BEYOND: f32 = 1.0;

/// Shape of the decision boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundarySlope {
    /// `core = x_max`
    Vertical,
    /// `accessory = y_max`
    Horizontal,
    /// Line through the intercepts `(x_max, 0)` and `(0, y_max)`.
    Diagonal,
}

impl TryFrom<i32> for BoundarySlope {
    type Error = DistError;

    fn try_from(slope: i32) -> Result<Self> {
        match slope {
            0 => Ok(Self::Vertical),
            1 => Ok(Self::Horizontal),
            2 => Ok(Self::Diagonal),
            other => Err(DistError::invalid_config(format!(
                "boundary slope must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl BoundarySlope {
    /// Signed test value: negative inside, positive outside.
    #[inline]
    pub fn test(self, core: f64, accessory: f64, x_max: f64, y_max: f64) -> f64 {
        match self {
            Self::Vertical => core - x_max,
            Self::Horizontal => accessory - y_max,
            Self::Diagonal => accessory * x_max + core * y_max - x_max * y_max,
        }
    }
}

#[inline]
fn label(test: f64) -> f32 {
    if test.abs() < BOUNDARY_EPSILON {
        ON_BOUNDARY
    } else if test < 0.0 {
        WITHIN
    } else {
        BEYOND
    }
}

/// Label every row of a two-column (core, accessory) matrix with
/// [`WITHIN`], [`ON_BOUNDARY`] or [`BEYOND`].
pub fn assign_threshold(
    dists: ArrayView2<'_, f32>,
    slope: BoundarySlope,
    x_max: f32,
    y_max: f32,
    num_threads: usize,
) -> Result<Array1<f32>> {
    if dists.ncols() != 2 {
        return Err(DistError::malformed(format!(
            "threshold assignment needs 2 columns (core, accessory), got {}",
            dists.ncols()
        )));
    }
    if !x_max.is_finite() || !y_max.is_finite() {
        return Err(DistError::invalid_config("boundary intercepts must be finite"));
    }
    let pool = thread_pool(num_threads)?;
    let (x_max, y_max) = (x_max as f64, y_max as f64);

    let labels: Vec<f32> = pool.install(|| {
        (0..dists.nrows())
            .into_par_iter()
            .map(|r| {
                let core = dists[[r, 0]] as f64;
                let accessory = dists[[r, 1]] as f64;
                label(slope.test(core, accessory, x_max, y_max))
            })
            .collect()
    });
    Ok(Array1::from_vec(labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_vertical_boundary_ignores_accessory() {
        let d = array![[0.6f32, 0.0], [0.4, 0.9], [0.4, 0.0], [0.6, 0.9], [0.5, 0.3]];
        let labels = assign_threshold(d.view(), BoundarySlope::Vertical, 0.5, 0.0, 2).unwrap();
        assert_eq!(labels.to_vec(), vec![BEYOND, WITHIN, WITHIN, BEYOND, ON_BOUNDARY]);
    }

    #[test]
    fn test_horizontal_boundary() {
        let d = array![[0.9f32, 0.1], [0.0, 0.3]];
        let labels = assign_threshold(d.view(), BoundarySlope::Horizontal, 0.0, 0.2, 1).unwrap();
        assert_eq!(labels.to_vec(), vec![WITHIN, BEYOND]);
    }

    #[test]
    fn test_diagonal_boundary() {
        // line through (0.5, 0) and (0, 1.0)
        let d = array![[0.1f32, 0.1], [0.4, 0.5], [0.25, 0.5], [0.0, 0.0], [0.5, 0.0]];
        let labels = assign_threshold(d.view(), BoundarySlope::Diagonal, 0.5, 1.0, 3).unwrap();
        assert_eq!(labels.to_vec(), vec![WITHIN, BEYOND, ON_BOUNDARY, WITHIN, ON_BOUNDARY]);
    }

    #[test]
    fn test_slope_codes() {
        assert_eq!(BoundarySlope::try_from(0).unwrap(), BoundarySlope::Vertical);
        assert_eq!(BoundarySlope::try_from(1).unwrap(), BoundarySlope::Horizontal);
        assert_eq!(BoundarySlope::try_from(2).unwrap(), BoundarySlope::Diagonal);
        assert!(matches!(
            BoundarySlope::try_from(3),
            Err(DistError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_wrong_column_count() {
        let d = Array2::<f32>::zeros((4, 3));
        assert!(matches!(
            assign_threshold(d.view(), BoundarySlope::Vertical, 0.5, 0.5, 1),
            Err(DistError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_thread_count_does_not_change_labels() {
        let d = Array2::from_shape_fn((1000, 2), |(r, c)| ((r * (c + 3) * 17) % 97) as f32 / 97.0);
        let a = assign_threshold(d.view(), BoundarySlope::Diagonal, 0.4, 0.6, 1).unwrap();
        let b = assign_threshold(d.view(), BoundarySlope::Diagonal, 0.4, 0.6, 8).unwrap();
        assert_eq!(a, b);
    }
}
