//! Froude-number trend fits and their repeat-run uncertainty
//!
//! For every condition, each fitted quantity gets two polynomial fits side by side: one through
//! the bucket averages (the typical trend) and one through the bucket minima (the worst case).

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::aggregate::{ConditionAggregate, ConditionCode, FieldStatistic};
use crate::config::Config;
use crate::math::linspace;
use crate::polyfit::{extremum, polyfit, Extremum, FitResult, Scaling};
use crate::run::Column;
use crate::Result;

/// A point `(froude number, value)`
pub type Point = (f64, f64);

/// A polynomial fit evaluated over its own window
#[derive(Clone, Debug)]
pub struct FittedCurve {
    pub fit: FitResult,
    /// Evaluated curve, ascending in Froude number
    pub curve: Vec<Point>,
    pub minimum: Option<Point>,
    pub maximum: Option<Point>,
}

/// Fit `y` against `x` and evaluate the result at `samples` evenly spaced abscissae
///
/// # Errors
/// Propagates the [`polyfit`] failures.
pub fn fit_series(x: &[f64], y: &[f64], degree: usize, samples: usize) -> Result<FittedCurve> {
    let fit = polyfit(x, y, degree, Scaling::Scaled)?;
    let (lo, hi) = fit.window();
    let domain = linspace(lo, hi, samples);
    let curve = domain.iter().copied().zip(fit.evaluate_many(&domain)).collect();

    Ok(FittedCurve {
        minimum: extremum(&fit, &domain, Extremum::Minimum),
        maximum: extremum(&fit, &domain, Extremum::Maximum),
        curve,
        fit,
    })
}

/// Everything needed to plot one quantity of one condition against Froude number
#[derive(Clone, Debug)]
pub struct UncertaintyOverlay {
    pub condition: ConditionCode,
    pub quantity: Column,
    pub degree: usize,
    /// Every individual run
    pub raw: Vec<Point>,
    pub average: Vec<Point>,
    pub minimum: Vec<Point>,
    /// Repeat spread, `max - min`, per bucket
    pub spread: Vec<Point>,
    /// `None` when the averaged series cannot carry a fit of `degree`
    pub average_fit: Option<FittedCurve>,
    pub minimum_fit: Option<FittedCurve>,
}

fn finite(points: impl Iterator<Item = Point>) -> Vec<Point> {
    points.filter(|(x, y)| x.is_finite() && y.is_finite()).collect()
}

fn fit_points(points: &[Point], degree: usize, samples: usize, label: &str) -> Option<FittedCurve> {
    let (x, y): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();
    match fit_series(&x, &y, degree, samples) {
        Ok(curve) => Some(curve),
        Err(e) => {
            warn!("{label} fit skipped: {e}");
            None
        }
    }
}

/// Build the overlay of `quantity` for one condition
#[must_use]
pub fn overlay(aggregate: &ConditionAggregate, quantity: Column, degree: usize, samples: usize) -> UncertaintyOverlay {
    let condition = aggregate.condition;
    let raw = finite(
        aggregate
            .runs
            .iter()
            .map(|s| (s.froude_number(), s.get(quantity))),
    );
    let fields: Vec<(f64, FieldStatistic)> = aggregate
        .envelope
        .iter()
        .map(|e| (e.froude, e.field(quantity)))
        .collect();
    let average = finite(fields.iter().map(|(fr, f)| (*fr, f.average)));
    let minimum = finite(fields.iter().map(|(fr, f)| (*fr, f.min)));
    let spread = finite(fields.iter().map(|(fr, f)| (*fr, f.spread())));

    let label = format!("condition {condition} {}", quantity.header());
    let average_fit = fit_points(&average, degree, samples, &format!("{label} average"));
    let minimum_fit = fit_points(&minimum, degree, samples, &format!("{label} minimum"));

    UncertaintyOverlay {
        condition,
        quantity,
        degree,
        raw,
        average,
        minimum,
        spread,
        average_fit,
        minimum_fit,
    }
}

/// Overlays for every non-empty condition and every configured quantity
#[must_use]
pub fn fit_conditions(aggregates: &BTreeMap<ConditionCode, ConditionAggregate>, config: &Config) -> Vec<UncertaintyOverlay> {
    let mut overlays = vec![];
    for (code, aggregate) in aggregates {
        if aggregate.is_empty() {
            continue;
        }
        let Some(spec) = config.condition(*code) else {
            debug!("condition {code} has no fit degree configured");
            continue;
        };
        for quantity in &config.fitted_quantities {
            overlays.push(overlay(
                aggregate,
                *quantity,
                spec.fit_degree,
                config.curve_samples,
            ));
        }
    }
    overlays
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::aggregate::aggregate;
    use crate::run::tests::summary;

    #[test]
    fn curve_spans_the_fit_window() {
        let x = [0.1, 0.2, 0.3, 0.4, 0.5];
        let y: Vec<f64> = x.iter().map(|x| (x - 0.3f64).powi(2) - 1.0).collect();
        let fitted = fit_series(&x, &y, 2, 41).unwrap();

        assert_eq!(fitted.curve.len(), 41);
        approx::assert_relative_eq!(fitted.curve[0].0, 0.1);
        approx::assert_relative_eq!(fitted.curve[40].0, 0.5);
        let (x_min, y_min) = fitted.minimum.unwrap();
        approx::assert_relative_eq!(x_min, 0.3, epsilon = 1e-9);
        approx::assert_relative_eq!(y_min, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn overlay_carries_both_fits() {
        // Three speeds, two repeats each; sinkage deepens with speed
        let runs: Vec<_> = [(0.8, -3.0), (0.8, -3.4), (1.2, -6.0), (1.2, -6.6), (1.6, -9.0), (1.6, -9.2)]
            .into_iter()
            .enumerate()
            .map(|(ii, (speed, heave))| summary(u32::try_from(ii).unwrap() + 1, 5, speed, heave))
            .collect();
        let aggregates = aggregate(&runs, Some(3)).unwrap();
        let condition = &aggregates[&ConditionCode::new(5).unwrap()];

        let overlay = overlay(condition, Column::Heave, 2, 20);
        assert_eq!(overlay.raw.len(), 6);
        assert_eq!(overlay.average.len(), 3);
        approx::assert_relative_eq!(overlay.average[0].1, -3.2, epsilon = 1e-12);
        approx::assert_relative_eq!(overlay.minimum[1].1, -6.6);
        approx::assert_relative_eq!(overlay.spread[2].1, 0.2, epsilon = 1e-12);

        let average = overlay.average_fit.unwrap();
        let worst = overlay.minimum_fit.unwrap();
        // Exact interpolation through three points
        for (x, y) in &overlay.average {
            approx::assert_relative_eq!(average.fit.evaluate(*x), *y, epsilon = 1e-9);
        }
        assert!(worst.minimum.unwrap().1 < average.minimum.unwrap().1);
    }

    #[test]
    fn too_few_buckets_leave_the_fit_empty() {
        let runs = [summary(1, 6, 1.0, -5.0), summary(2, 6, 1.4, -7.0)];
        let aggregates = aggregate(&runs, Some(3)).unwrap();
        let overlay = overlay(&aggregates[&ConditionCode::new(6).unwrap()], Column::Heave, 5, 20);
        assert_eq!(overlay.average.len(), 2);
        assert!(overlay.average_fit.is_none());
        assert!(overlay.minimum_fit.is_none());
    }

    #[test]
    fn every_configured_quantity_is_fitted() {
        let config = Config::default();
        let runs: Vec<_> = (0..8)
            .map(|ii| summary(ii + 1, 1, 0.6 + 0.15 * f64::from(ii), -2.0 - f64::from(ii)))
            .collect();
        let aggregates = aggregate(&runs, config.froude_decimals).unwrap();
        let overlays = fit_conditions(&aggregates, &config);

        assert_eq!(overlays.len(), config.fitted_quantities.len());
        assert!(overlays.iter().all(|o| o.condition.get() == 1 && o.degree == 5));
        assert!(overlays.iter().all(|o| o.average_fit.is_some()));
    }
}
