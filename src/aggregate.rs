//! Grouping of repeated runs
//!
//! Runs are partitioned by condition code, then bucketed by Froude number within a condition. A
//! bucket holds the repeats of one nominal speed; its average replaces the noisy single repeats
//! downstream and its min/max envelope is the repeat-run uncertainty.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::Deserialize;

use crate::math::{mean, min_max, standard_deviation};
use crate::run::{Column, RunSummary, COLUMN_COUNT};
use crate::{Error, Result};

/// Experimental configuration of a run, 1..=13
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "u8")]
pub struct ConditionCode(u8);

impl ConditionCode {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 13;

    /// # Errors
    /// [`Error::InvalidCondition`] outside 1..=13.
    pub fn new(code: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&code) {
            Ok(Self(code))
        } else {
            Err(Error::InvalidCondition(i64::from(code)))
        }
    }

    /// Condition code stored as a table value
    ///
    /// # Errors
    /// [`Error::InvalidCondition`] unless `value` is a whole number in 1..=13.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_value(value: f64) -> Result<Self> {
        if value.fract() != 0.0 || !(f64::from(Self::MIN)..=f64::from(Self::MAX)).contains(&value) {
            return Err(Error::InvalidCondition(if value.is_finite() {
                value as i64
            } else {
                -1
            }));
        }
        Self::new(value as u8)
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Every valid condition code in ascending order
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN..=Self::MAX).map(Self)
    }
}

impl TryFrom<u8> for ConditionCode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Self::new(code)
    }
}

impl From<ConditionCode> for u8 {
    fn from(code: ConditionCode) -> Self {
        code.0
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable partition of runs by condition code
///
/// Every code 1..=13 is present in the result; codes without runs map to an empty group.
#[must_use]
pub fn partition_by_condition(summaries: &[RunSummary]) -> BTreeMap<ConditionCode, Vec<RunSummary>> {
    let mut groups: BTreeMap<ConditionCode, Vec<RunSummary>> =
        ConditionCode::all().map(|code| (code, vec![])).collect();
    for summary in summaries {
        groups.entry(summary.condition).or_default().push(*summary);
    }
    groups
}

/// Froude number used as an exact-match bucket key
///
/// Keys order numerically. With `decimals` set, the measured Froude number is first rounded to
/// its nominal value, so repeats of one carriage speed share a key.
#[derive(Clone, Copy, Debug)]
pub struct FroudeKey(f64);

impl FroudeKey {
    #[must_use]
    pub fn new(froude_number: f64, decimals: Option<u32>) -> Self {
        let value = match decimals {
            Some(decimals) => {
                let scale = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
                (froude_number * scale).round() / scale
            }
            None => froude_number,
        };
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for FroudeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FroudeKey {}

impl PartialOrd for FroudeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FroudeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Bucket the runs of one condition by Froude number, in ascending Froude order
#[must_use]
pub fn partition_by_froude(group: &[RunSummary], decimals: Option<u32>) -> BTreeMap<FroudeKey, Vec<RunSummary>> {
    let mut buckets: BTreeMap<FroudeKey, Vec<RunSummary>> = BTreeMap::new();
    for summary in group {
        buckets
            .entry(FroudeKey::new(summary.froude_number(), decimals))
            .or_default()
            .push(*summary);
    }
    buckets
}

fn bucket_rows(bucket: &[RunSummary]) -> Result<Array2<f64>> {
    let first = bucket
        .first()
        .ok_or_else(|| Error::InsufficientData("empty bucket".to_owned()))?;
    if let Some(other) = bucket.iter().find(|s| s.condition != first.condition) {
        return Err(Error::MixedConditions {
            first: first.condition.get(),
            other: other.condition.get(),
        });
    }
    let rows: Vec<Array1<f64>> = bucket.iter().map(RunSummary::to_row).collect();
    Ok(Array2::from_shape_fn((rows.len(), COLUMN_COUNT), |(ii, jj)| {
        rows[ii][jj]
    }))
}

/// Entries of a bucket column that are defined; undefined fields are NaN in a results row
fn defined(column: ArrayView1<'_, f64>) -> Array1<f64> {
    column.iter().copied().filter(|v| !v.is_nan()).collect()
}

fn defined_mean(column: ArrayView1<'_, f64>) -> f64 {
    mean(defined(column).view()).unwrap_or(f64::NAN)
}

/// Elementwise mean of every numeric field of the bucket's runs
///
/// The result does not depend on the order of `bucket`. Its run number is the lowest run number
/// of the bucket. A field undefined in some repeats is averaged over the repeats that define it,
/// and stays undefined only when no repeat does.
///
/// # Errors
/// [`Error::InsufficientData`] for an empty bucket, [`Error::MixedConditions`] when the runs
/// belong to different conditions.
pub fn average(bucket: &[RunSummary]) -> Result<RunSummary> {
    let rows = bucket_rows(bucket)?;
    let mut averaged = rows.map_axis(Axis(0), defined_mean);
    averaged[Column::Run.index()] = bucket
        .iter()
        .map(|s| f64::from(s.run))
        .fold(f64::INFINITY, f64::min);
    RunSummary::from_row(averaged.view())
}

/// Minimum, maximum, average and spread of one field across a bucket
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldStatistic {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub stddev: f64,
}

impl FieldStatistic {
    /// Repeat-run spread, `max - min`
    #[must_use]
    pub fn spread(&self) -> f64 {
        self.max - self.min
    }
}

/// Repeat-run envelope of one Froude bucket
#[derive(Clone, Debug, PartialEq)]
pub struct GroupStatistic {
    pub condition: ConditionCode,
    pub froude: f64,
    pub count: usize,
    pub min: Array1<f64>,
    pub max: Array1<f64>,
    pub average: Array1<f64>,
    pub stddev: Array1<f64>,
}

impl GroupStatistic {
    #[must_use]
    pub fn field(&self, column: Column) -> FieldStatistic {
        let ii = column.index();
        FieldStatistic {
            min: self.min[ii],
            max: self.max[ii],
            average: self.average[ii],
            stddev: self.stddev[ii],
        }
    }
}

/// Elementwise min, max, average and standard deviation of a bucket
///
/// Every statistic of a field is taken over the same defined entries, as in [`average`].
///
/// # Errors
/// As [`average`].
pub fn min_max_envelope(froude: FroudeKey, bucket: &[RunSummary]) -> Result<GroupStatistic> {
    let rows = bucket_rows(bucket)?;
    let condition = bucket[0].condition;
    let extremes = rows.map_axis(Axis(0), |column| min_max(column));

    Ok(GroupStatistic {
        condition,
        froude: froude.value(),
        count: bucket.len(),
        min: extremes.mapv(|e| e.map_or(f64::NAN, |(lo, _)| lo)),
        max: extremes.mapv(|e| e.map_or(f64::NAN, |(_, hi)| hi)),
        average: rows.map_axis(Axis(0), defined_mean),
        stddev: rows.map_axis(Axis(0), |column| {
            standard_deviation(defined(column).view()).unwrap_or(f64::NAN)
        }),
    })
}

/// Aggregates of one condition, every series in ascending Froude order
#[derive(Clone, Debug)]
pub struct ConditionAggregate {
    pub condition: ConditionCode,
    pub runs: Vec<RunSummary>,
    /// One averaged run per Froude bucket
    pub averaged: Vec<RunSummary>,
    /// One envelope per Froude bucket
    pub envelope: Vec<GroupStatistic>,
}

impl ConditionAggregate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Partition, bucket, average and envelope every condition
///
/// # Errors
/// Propagates failures of [`average`] and [`min_max_envelope`].
pub fn aggregate(summaries: &[RunSummary], decimals: Option<u32>) -> Result<BTreeMap<ConditionCode, ConditionAggregate>> {
    partition_by_condition(summaries)
        .into_iter()
        .map(|(condition, runs)| -> Result<(ConditionCode, ConditionAggregate)> {
            let mut averaged = vec![];
            let mut envelope = vec![];
            for (froude, bucket) in partition_by_froude(&runs, decimals) {
                averaged.push(average(&bucket)?);
                envelope.push(min_max_envelope(froude, &bucket)?);
            }
            Ok((
                condition,
                ConditionAggregate {
                    condition,
                    runs,
                    averaged,
                    envelope,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use ndarray_rand::rand::seq::SliceRandom;
    use ndarray_rand::rand::SeedableRng;
    use proptest::prelude::*;
    use rand_isaac::Isaac64Rng;

    use crate::run::tests::summary;

    fn arbitrary_summaries() -> impl Strategy<Value = Vec<RunSummary>> {
        proptest::collection::vec((1u8..=13, 0.5f64..2.0, -12.0f64..-1.0), 0..40).prop_map(
            |runs| {
                runs.into_iter()
                    .enumerate()
                    .map(|(ii, (condition, speed, heave))| {
                        summary(u32::try_from(ii).unwrap() + 1, condition, speed, heave)
                    })
                    .collect()
            },
        )
    }

    #[test]
    fn every_condition_code_is_present() {
        let groups = partition_by_condition(&[summary(1, 4, 1.0, -5.0)]);
        assert_eq!(groups.len(), 13);
        assert_eq!(groups[&ConditionCode::new(4).unwrap()].len(), 1);
        assert!(groups[&ConditionCode::new(5).unwrap()].is_empty());
    }

    #[test]
    fn condition_codes_outside_range_are_invalid() {
        assert!(ConditionCode::new(0).is_err());
        assert!(ConditionCode::new(14).is_err());
        assert!(ConditionCode::from_value(2.5).is_err());
        assert_eq!(ConditionCode::from_value(13.0).unwrap().get(), 13);
    }

    #[test]
    fn repeats_at_one_froude_number_form_an_envelope() {
        // Two repeats at the same carriage speed, heave -8.0 and -8.4 mm
        let speed = 0.23 * (crate::calibration::GRAVITY * 2.0).sqrt();
        let runs = [summary(10, 7, speed, -8.0), summary(11, 7, speed, -8.4)];

        let buckets = partition_by_froude(&runs, None);
        assert_eq!(buckets.len(), 1);
        let (froude, bucket) = buckets.into_iter().next().unwrap();
        approx::assert_relative_eq!(froude.value(), 0.23, epsilon = 1e-12);

        let averaged = average(&bucket).unwrap();
        approx::assert_relative_eq!(averaged.hydro.heave, -8.2, epsilon = 1e-12);
        assert_eq!(averaged.run, 10);

        let envelope = min_max_envelope(froude, &bucket).unwrap();
        let heave = envelope.field(Column::Heave);
        approx::assert_relative_eq!(heave.average, -8.2, epsilon = 1e-12);
        approx::assert_relative_eq!(heave.min, -8.4);
        approx::assert_relative_eq!(heave.max, -8.0);
        approx::assert_relative_eq!(heave.spread(), 0.4, epsilon = 1e-12);
        assert_eq!(envelope.count, 2);
    }

    #[test]
    fn undefined_fields_are_left_out_of_every_statistic() {
        let mut dropout = summary(20, 3, 1.0, -5.0);
        dropout.sampling_rate = None;
        dropout.drag.pct_dev = None;
        let mut silent = summary(21, 3, 1.0, -5.2);
        silent.drag.pct_dev = None;
        let bucket = [dropout, silent];

        let averaged = average(&bucket).unwrap();
        assert_eq!(averaged.sampling_rate, Some(200.0));
        assert_eq!(averaged.drag.pct_dev, None);

        let buckets = partition_by_froude(&bucket, Some(3));
        let (froude, bucket) = buckets.into_iter().next().unwrap();
        let envelope = min_max_envelope(froude, &bucket).unwrap();
        let rate = envelope.field(Column::SamplingRate);
        approx::assert_relative_eq!(rate.min, 200.0);
        approx::assert_relative_eq!(rate.max, 200.0);
        approx::assert_relative_eq!(rate.average, 200.0);
        approx::assert_relative_eq!(rate.stddev, 0.0);
        let pct_dev = envelope.field(Column::DragPctDev);
        assert!(pct_dev.min.is_nan() && pct_dev.average.is_nan() && pct_dev.stddev.is_nan());
    }

    #[test]
    fn buckets_are_in_ascending_froude_order() {
        let runs = [
            summary(1, 2, 1.6, -9.0),
            summary(2, 2, 0.8, -3.0),
            summary(3, 2, 1.2, -6.0),
        ];
        let aggregates = aggregate(&runs, Some(2)).unwrap();
        let condition = &aggregates[&ConditionCode::new(2).unwrap()];
        let froude: Vec<f64> = condition.envelope.iter().map(|e| e.froude).collect();
        assert_eq!(froude.len(), 3);
        assert!(froude.windows(2).all(|w| w[0] < w[1]));
        assert!(aggregates[&ConditionCode::new(3).unwrap()].is_empty());
    }

    #[test]
    fn nominal_rounding_merges_near_repeats() {
        let runs = [summary(1, 1, 1.400, -7.0), summary(2, 1, 1.401, -7.2)];
        assert_eq!(partition_by_froude(&runs, None).len(), 2);
        assert_eq!(partition_by_froude(&runs, Some(2)).len(), 1);
    }

    #[test]
    fn mixed_conditions_cannot_be_averaged() {
        let runs = [summary(1, 1, 1.0, -7.0), summary(2, 2, 1.0, -7.2)];
        assert!(matches!(
            average(&runs),
            Err(Error::MixedConditions { .. })
        ));
        assert!(matches!(average(&[]), Err(Error::InsufficientData(_))));
    }

    proptest! {
        #[test]
        fn condition_partition_covers_every_run_once(summaries in arbitrary_summaries()) {
            let groups = partition_by_condition(&summaries);
            let runs: Vec<u32> = groups.values().flatten().map(|s| s.run).collect();
            let unique: HashSet<u32> = runs.iter().copied().collect();
            prop_assert_eq!(runs.len(), summaries.len());
            prop_assert_eq!(unique.len(), summaries.len());
            for (code, group) in &groups {
                prop_assert!(group.iter().all(|s| s.condition == *code));
            }
        }

        #[test]
        fn average_is_invariant_under_permutation(
            summaries in arbitrary_summaries().prop_filter("need runs", |s| !s.is_empty()),
            seed in any::<u64>(),
        ) {
            let condition = summaries[0].condition;
            let bucket: Vec<RunSummary> = summaries.into_iter().filter(|s| s.condition == condition).collect();
            let mut shuffled = bucket.clone();
            shuffled.shuffle(&mut Isaac64Rng::seed_from_u64(seed));

            let expected = average(&bucket).unwrap().to_row();
            let actual = average(&shuffled).unwrap().to_row();
            for (e, a) in expected.iter().zip(actual.iter()) {
                prop_assert_eq!(e.to_bits(), a.to_bits());
            }
        }
    }
}
