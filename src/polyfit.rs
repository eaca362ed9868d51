//! Least-squares polynomial fitting
//!
//! Coefficients are stored in ascending order of power, `c[0] + c[1] u + ... + c[n] u^n`. When a
//! fit is [`Scaling::Scaled`] the abscissa `u` is the input `x` mapped linearly from the fit
//! window onto `[-1, 1]`, which keeps the Vandermonde system well conditioned for the degree 4-7
//! trend fits used against Froude number.

use ndarray::Array1;

use crate::math::{least_squares, vandermonde};
use crate::{Error, Result};

/// How the abscissa is presented to the solver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scaling {
    /// Fit directly in `x`
    Unscaled,
    /// Map the fit window onto `[-1, 1]` before fitting
    Scaled,
}

#[derive(Clone, Debug)]
pub struct FitResult {
    degree: usize,
    coefficients: Array1<f64>,
    /// Smallest and largest abscissa the fit was made over
    window: (f64, f64),
    scaling: Scaling,
}

impl FitResult {
    /// The fitted coefficients, in ascending order of power
    #[must_use]
    pub const fn solution(&self) -> &Array1<f64> {
        &self.coefficients
    }

    #[must_use]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    #[must_use]
    pub const fn window(&self) -> (f64, f64) {
        self.window
    }

    #[must_use]
    pub const fn scaling(&self) -> Scaling {
        self.scaling
    }

    #[must_use]
    pub fn window_contains(&self, x: &f64) -> bool {
        (self.window.0..=self.window.1).contains(x)
    }

    fn map_abscissa(&self, x: f64) -> f64 {
        match self.scaling {
            Scaling::Unscaled => x,
            Scaling::Scaled => map_to_unit(x, self.window),
        }
    }

    /// Evaluate the fitted polynomial at `x`
    #[must_use]
    pub fn evaluate(&self, x: f64) -> f64 {
        polyeval(
            self.coefficients.as_slice().unwrap_or(&[]),
            self.map_abscissa(x),
        )
    }

    /// Evaluate the fitted polynomial at each of `xs`
    #[must_use]
    pub fn evaluate_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|x| self.evaluate(*x)).collect()
    }
}

fn map_to_unit(x: f64, (lo, hi): (f64, f64)) -> f64 {
    if hi > lo {
        (2.0f64.mul_add(x, -(lo + hi))) / (hi - lo)
    } else {
        0.0
    }
}

/// Fit a polynomial of `degree` to `(x, y)` by least squares
///
/// # Errors
/// - [`Error::InsufficientData`] when `x` and `y` differ in length or are empty
/// - [`Error::IllConditionedFit`] when `degree` is not smaller than the number of distinct `x`, or
///   the system is numerically rank deficient
pub fn polyfit(x: &[f64], y: &[f64], degree: usize, scaling: Scaling) -> Result<FitResult> {
    if x.len() != y.len() {
        return Err(Error::InsufficientData(format!(
            "{} abscissae but {} ordinates",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(Error::InsufficientData("no points to fit".to_owned()));
    }

    let distinct = distinct_count(x);
    if degree >= distinct {
        return Err(Error::IllConditionedFit { degree, distinct });
    }

    let window = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });

    let mapped = match scaling {
        Scaling::Unscaled => x.to_vec(),
        Scaling::Scaled => x.iter().map(|v| map_to_unit(*v, window)).collect(),
    };

    let a = vandermonde(&mapped, degree)?;
    let b = Array1::from_vec(y.to_vec());
    let coefficients =
        least_squares(&a, &b).ok_or(Error::IllConditionedFit { degree, distinct })?;

    Ok(FitResult {
        degree,
        coefficients,
        window,
        scaling,
    })
}

fn distinct_count(x: &[f64]) -> usize {
    let mut sorted = x.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

/// Evaluate a polynomial with ascending `coefficients` at `x` by Horner's rule
#[must_use]
pub fn polyeval(coefficients: &[f64], x: f64) -> f64 {
    coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, c| acc.mul_add(x, *c))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extremum {
    Minimum,
    Maximum,
}

/// The smallest or largest value of the fit over the sampled `domain`
///
/// This is a search over the evaluated points, not a root find on the derivative. Returns `None`
/// for an empty domain.
#[must_use]
pub fn extremum(fit: &FitResult, domain: &[f64], kind: Extremum) -> Option<(f64, f64)> {
    domain
        .iter()
        .map(|x| (*x, fit.evaluate(*x)))
        .filter(|(_, y)| !y.is_nan())
        .reduce(|best, candidate| {
            let better = match kind {
                Extremum::Minimum => candidate.1 < best.1,
                Extremum::Maximum => candidate.1 > best.1,
            };
            if better {
                candidate
            } else {
                best
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray_rand::rand::{Rng, SeedableRng};
    use proptest::prelude::*;
    use rand_isaac::Isaac64Rng;

    use crate::math::linspace;

    fn cubic(x: f64) -> f64 {
        0.5f64.mul_add(x.powi(3), (-2.0f64).mul_add(x, 1.0))
    }

    #[test]
    fn noiseless_polynomial_coefficients_are_recovered() {
        let x = linspace(-2.0, 3.0, 25);
        let y: Vec<f64> = x.iter().map(|x| cubic(*x)).collect();

        let fit = polyfit(&x, &y, 3, Scaling::Unscaled).unwrap();
        let expected = [1.0, -2.0, 0.0, 0.5];
        for (expected, calculated) in expected.iter().zip(fit.solution()) {
            approx::assert_relative_eq!(*expected, *calculated, epsilon = 1e-9);
        }
    }

    #[test]
    fn scaled_and_unscaled_fits_evaluate_identically() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let x = linspace(0.1, 0.5, 30);
        let y: Vec<f64> = x
            .iter()
            .map(|x| 5.0f64.mul_add(x.powi(2), -8.0) + rng.gen_range(-0.05..0.05))
            .collect();

        let scaled = polyfit(&x, &y, 5, Scaling::Scaled).unwrap();
        let unscaled = polyfit(&x, &y, 5, Scaling::Unscaled).unwrap();

        for x in linspace(0.1, 0.5, 11) {
            approx::assert_relative_eq!(
                scaled.evaluate(x),
                unscaled.evaluate(x),
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn degree_not_below_distinct_points_is_ill_conditioned() {
        let x = [0.2, 0.2, 0.3, 0.3];
        let y = [1.0, 1.1, 2.0, 2.1];
        let result = polyfit(&x, &y, 2, Scaling::Scaled);
        assert!(matches!(
            result,
            Err(Error::IllConditionedFit {
                degree: 2,
                distinct: 2
            })
        ));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let result = polyfit(&[1.0, 2.0], &[1.0], 1, Scaling::Unscaled);
        assert!(matches!(result, Err(Error::InsufficientData(_))));
    }

    #[test]
    fn horner_evaluation_matches_direct_sum() {
        let coefficients = [1.0, -2.0, 0.0, 0.5];
        for x in linspace(-3.0, 3.0, 13) {
            approx::assert_relative_eq!(polyeval(&coefficients, x), cubic(x), epsilon = 1e-12);
        }
    }

    #[test]
    fn extremum_is_taken_over_sampled_points() {
        // (x - 0.3)^2 - 8, minimum at x = 0.3
        let x = linspace(0.1, 0.5, 9);
        let y: Vec<f64> = x.iter().map(|x| (x - 0.3).powi(2) - 8.0).collect();
        let fit = polyfit(&x, &y, 2, Scaling::Scaled).unwrap();

        let domain = linspace(0.1, 0.5, 401);
        let (x_min, y_min) = extremum(&fit, &domain, Extremum::Minimum).unwrap();
        approx::assert_relative_eq!(x_min, 0.3, epsilon = 1e-3);
        approx::assert_relative_eq!(y_min, -8.0, epsilon = 1e-9);

        let (x_max, _) = extremum(&fit, &domain, Extremum::Maximum).unwrap();
        assert!((x_max - 0.1).abs() < 1e-12 || (x_max - 0.5).abs() < 1e-12);

        assert!(extremum(&fit, &[], Extremum::Minimum).is_none());
    }

    proptest! {
        #[test]
        // A polynomial of degree n - 1 passes through all n distinct points
        fn interpolating_fit_reproduces_input_points(
            y in proptest::collection::vec(-10.0f64..10.0, 2..7),
            offset in 0.0f64..1.0,
            spacing in 0.05f64..0.5,
        ) {
            #[allow(clippy::cast_precision_loss)]
            let x: Vec<f64> = (0..y.len()).map(|ii| spacing.mul_add(ii as f64, offset)).collect();
            let fit = polyfit(&x, &y, y.len() - 1, Scaling::Scaled).unwrap();
            for (xi, yi) in x.iter().zip(&y) {
                prop_assert!((fit.evaluate(*xi) - yi).abs() < 1e-6);
            }
        }
    }
}
