//! Per-sample feature standardization.
//!
//! Statistics are fit on the matrix being transformed and returned with it.
//! There is no way to apply one sample's statistics to another.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::dataset::InputError;

/// Relative spread below which a column is treated as constant.
const DEGENERATE_STD_TOLERANCE: f64 = 1e-12;

/// A zero-variance column was zeroed instead of divided by zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegenerateFeatureWarning {
    /// Column index in the feature matrix.
    pub column: usize,
    /// The column's constant value.
    pub value: f64,
}

impl std::fmt::Display for DegenerateFeatureWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "feature column {} is constant ({}); scaled to 0",
            self.column, self.value
        )
    }
}

/// A standardized feature matrix together with the statistics used.
#[derive(Debug, Clone)]
pub struct ScaledMatrix {
    data: Array2<f64>,
    means: Array1<f64>,
    std_devs: Array1<f64>,
    warnings: Vec<DegenerateFeatureWarning>,
}

impl ScaledMatrix {
    /// The scaled values, one row per sampled record.
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Per-column means of the input.
    #[must_use]
    pub const fn means(&self) -> &Array1<f64> {
        &self.means
    }

    /// Per-column population standard deviations of the input.
    #[must_use]
    pub const fn std_devs(&self) -> &Array1<f64> {
        &self.std_devs
    }

    /// Columns that were constant in the input.
    #[must_use]
    pub fn warnings(&self) -> &[DegenerateFeatureWarning] {
        &self.warnings
    }

    /// Number of rows.
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }
}

/// Standardizes every column to zero mean and unit variance.
///
/// Constant columns are set to 0 and reported as
/// [`DegenerateFeatureWarning`]s.
///
/// # Errors
///
/// Returns [`InputError::EmptyDataset`] if `matrix` has no rows.
pub fn fit_transform(matrix: ArrayView2<'_, f64>) -> Result<ScaledMatrix, InputError> {
    let means = matrix.mean_axis(Axis(0)).ok_or(InputError::EmptyDataset)?;
    let std_devs = matrix.std_axis(Axis(0), 0.0);

    let mut data = matrix.to_owned();
    let mut warnings = Vec::new();

    for (column, mut values) in data.axis_iter_mut(Axis(1)).enumerate() {
        let mean = means[column];
        let std_dev = std_devs[column];

        if !std_dev.is_finite() || std_dev <= DEGENERATE_STD_TOLERANCE * mean.abs().max(1.0) {
            let warning = DegenerateFeatureWarning {
                column,
                value: mean,
            };
            log::warn!("{warning}");
            warnings.push(warning);
            values.fill(0.0);
            continue;
        }

        values.mapv_inplace(|x| (x - mean) / std_dev);
    }

    Ok(ScaledMatrix {
        data,
        means,
        std_devs,
        warnings,
    })
}
