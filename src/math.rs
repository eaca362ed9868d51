use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array, Array1, Array2, ArrayView1};
use num_traits::Float;

use crate::Result;

/// Relative singular-value cut-off below which a least-squares system is treated as rank deficient
pub const RANK_TOLERANCE: f64 = 1e-12;

/// Generate the Vandermonde matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (n x degree + 1) matrix. Each row of the matrix is a geometric
/// progression for an individual observation `x` from power `0` to `degree` inclusive.
///
/// # Panics
///
/// The generator panics in the event that `degree` cannot be converted to `i32`. As the maximum
/// value which can be represented by an `i32` is `2_147_483_647i32` this is unlikely to occur so
/// the error probably does not need to be gracefully handled.
///
/// # Examples
///
/// ```
/// use towing_tank::math::vandermonde;
/// use ndarray::arr2;
///
/// let observations: Vec<f64> = vec![2., 3.];
/// let vander = vandermonde(&observations, 2).unwrap();
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
pub fn vandermonde<T: Float>(x: &[T], degree: usize) -> Result<Array2<T>> {
    let vals = x.iter().flat_map(|xi| {
        (0..=degree).map(|i| xi.powi(i32::try_from(i).expect("{i} doesn't fit in `i32`")))
    });

    Ok(Array::from_iter(vals).into_shape((x.len(), degree + 1))?)
}

/// Least-squares solution of `a · c = b`
///
/// Solved through the singular value decomposition of `a`. Returns `None` when `a` is rank
/// deficient, in which case the solution is not unique.
#[must_use]
pub fn least_squares(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let (rows, cols) = a.dim();
    if rows < cols || b.len() != rows {
        return None;
    }
    let matrix = DMatrix::from_row_slice(rows, cols, &a.iter().copied().collect::<Vec<_>>());
    let rhs = DVector::from_iterator(rows, b.iter().copied());

    let svd = matrix.svd(true, true);
    let largest = svd.singular_values.max();
    if largest == 0.0 || svd.rank(largest * RANK_TOLERANCE) < cols {
        return None;
    }
    let solution = svd.solve(&rhs, largest * RANK_TOLERANCE).ok()?;
    Some(solution.iter().copied().collect())
}

/// Sum which does not depend on the order of `values`
///
/// Values are summed in ascending order, so any permutation of the input produces a bit-identical
/// result.
#[must_use]
pub fn stable_sum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut values: Vec<f64> = values.into_iter().collect();
    values.sort_by(f64::total_cmp);
    values.into_iter().sum()
}

/// Arithmetic mean, `None` for an empty input
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: ArrayView1<'_, f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(stable_sum(values.iter().copied()) / values.len() as f64)
}

/// Sample (n - 1) standard deviation
///
/// A single value has no spread and yields zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn standard_deviation(values: ArrayView1<'_, f64>) -> Option<f64> {
    let mean = mean(values)?;
    if values.len() < 2 {
        return Some(0.0);
    }
    let squares = stable_sum(values.iter().map(|v| (v - mean).powi(2)));
    Some((squares / (values.len() - 1) as f64).sqrt())
}

/// Smallest and largest value, ignoring NaN
#[must_use]
pub fn min_max(values: ArrayView1<'_, f64>) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .minmax_by(f64::total_cmp)
        .into_option()
}

/// `n` evenly spaced values covering `[start, end]` inclusive
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        n => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|ii| if ii == n - 1 { end } else { step.mul_add(ii as f64, start) })
                .collect()
        }
    }
}
