// ABOUTME: Covariance, Pearson correlation and axis scale factors over real-valued columns
// ABOUTME: Works on a validated RealMatrix so the math never sees text or missing cells

use super::{Cell, Columns, RealOptions};
use crate::error::{EtlError, Result};

/// Square matrix indexed `[row][col]`
pub type Matrix = Vec<Vec<f64>>;

/// Rectangular, fully numeric view of a [`Columns`] table
#[derive(Debug, Clone, PartialEq)]
pub struct RealMatrix {
    pub names: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl TryFrom<&Columns> for RealMatrix {
    type Error = EtlError;

    fn try_from(table: &Columns) -> Result<Self> {
        if let Some((min, max)) = table.length_bounds() {
            if min != max {
                return Err(EtlError::RaggedInput { min, max });
            }
        }
        let mut columns = Vec::with_capacity(table.num_columns());
        for (name, cells) in table.names().iter().zip(table.as_column_wise_lists()) {
            let mut values = Vec::with_capacity(cells.len());
            for (row, cell) in cells.iter().enumerate() {
                match cell {
                    Cell::Real(x) => values.push(*x),
                    other => {
                        return Err(EtlError::ParseFailure {
                            column: name.clone(),
                            row,
                            value: other.to_string(),
                        })
                    }
                }
            }
            columns.push(values);
        }
        Ok(Self {
            names: table.names().to_vec(),
            columns,
        })
    }
}

impl RealMatrix {
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// [`best_scale_factor`] between two columns; negative indices count from the end
    pub fn best_scale_factor(&self, x: isize, y: isize) -> Option<f64> {
        let n = self.columns.len() as isize;
        let pick = |i: isize| {
            if n == 0 || i >= n || i < -n {
                None
            } else {
                Some(&self.columns[i.rem_euclid(n) as usize])
            }
        };
        best_scale_factor(pick(x)?, pick(y)?)
    }
}

/// Covariance matrix with `n - ddof` as the divisor (`ddof = 0` is population covariance)
pub fn cov(matrix: &RealMatrix, ddof: usize) -> Result<Matrix> {
    let n = matrix.num_rows();
    if n <= ddof {
        return Err(EtlError::InvalidArgument(format!(
            "covariance needs more than ddof={} samples, got {}",
            ddof, n
        )));
    }
    let means: Vec<f64> = matrix
        .columns
        .iter()
        .map(|c| c.iter().sum::<f64>() / n as f64)
        .collect();
    let k = matrix.columns.len();
    let divisor = (n - ddof) as f64;
    let mut out = vec![vec![0.0; k]; k];
    for i in 0..k {
        for j in i..k {
            let s: f64 = matrix.columns[i]
                .iter()
                .zip(&matrix.columns[j])
                .map(|(a, b)| (a - means[i]) * (b - means[j]))
                .sum();
            out[i][j] = s / divisor;
            out[j][i] = out[i][j];
        }
    }
    Ok(out)
}

/// Pearson correlation matrix derived from [`cov`].
///
/// The diagonal is exactly 1.0. Off-diagonal entries are
/// `cov[i][j] / sqrt(cov[i][i] * cov[j][j])`, except that a zero variance product
/// divides by 1 instead of failing, so a constant column correlates as 0.
pub fn pierson(matrix: &RealMatrix, ddof: usize) -> Result<Matrix> {
    let c = cov(matrix, ddof)?;
    let k = c.len();
    let mut rho = vec![vec![1.0; k]; k];
    for i in 0..k {
        for j in (i + 1)..k {
            let product = c[i][i] * c[j][j];
            let divisor = if product == 0.0 { 1.0 } else { product };
            rho[i][j] = c[i][j] / divisor.sqrt();
            rho[j][i] = rho[i][j];
        }
    }
    Ok(rho)
}

/// Ratio of the larger-magnitude extreme of `y` to that of `x`, for sharing a chart axis
///
/// # Examples
///
/// ```
/// # use tabular_etl::columns::best_scale_factor;
/// assert_eq!(best_scale_factor(&[1.0, 2.0], &[-10.0, 5.0]), Some(5.0));
/// assert_eq!(best_scale_factor(&[], &[1.0]), None);
/// ```
pub fn best_scale_factor(x: &[f64], y: &[f64]) -> Option<f64> {
    fn extreme(values: &[f64]) -> Option<f64> {
        let min = values.iter().copied().reduce(f64::min)?;
        let max = values.iter().copied().reduce(f64::max)?;
        Some(min.abs().max(max))
    }
    Some(extreme(y)? / extreme(x)?)
}

impl Columns {
    /// Make the table tall and real, then compute its covariance matrix
    pub fn cov(&mut self, ddof: usize, options: &RealOptions) -> Result<Matrix> {
        let matrix = self.prepare_real(options)?;
        cov(&matrix, ddof)
    }

    /// Make the table tall and real, then compute its Pearson correlation matrix
    pub fn pierson(&mut self, ddof: usize, options: &RealOptions) -> Result<Matrix> {
        let matrix = self.prepare_real(options)?;
        pierson(&matrix, ddof)
    }

    fn prepare_real(&mut self, options: &RealOptions) -> Result<RealMatrix> {
        if let Some((min, max)) = self.length_bounds() {
            if min != max {
                return Err(EtlError::RaggedInput { min, max });
            }
        }
        self.make_tall().make_real(options);
        RealMatrix::try_from(&*self)
    }
}
