//! Sensor calibration fitting
//!
//! Each calibration file holds `(value, voltage, slope)` samples for one sensor. A straight line
//! is fitted from voltage to physical value and its quality quantified by R², adjusted R², the
//! residual distribution and the standard error of estimate (SEE).
//!
//! The 1×/2×/3× SEE bands are quoted as ≈68/95/99% confidence under a normality assumption. No
//! Student-t correction is applied for the small sample counts of a calibration, downstream
//! reports quote these multipliers as they are.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::read_input;
use crate::math::stable_sum;
use crate::{Error, Result};

/// Lines preceding the sample table in a calibration file
pub const HEADER_LINES: usize = 15;

/// Calibration files of the campaign, numbered from one
pub const CALIBRATION_FILES: RangeInclusive<usize> = 1..=17;

/// Standard gravity used by the campaign (m/s²)
pub const GRAVITY: f64 = 9.806;

/// Convert a load-cell reading in grams to newtons
#[must_use]
pub fn grams_to_newtons(grams: f64) -> f64 {
    grams / 1000.0 * GRAVITY
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum SensorType {
    LoadCell,
    AftLvdt,
    FwdLvdt,
}

impl SensorType {
    /// The sensor a calibration file index belongs to
    ///
    /// Files 1-7 calibrate the load cell, 8-12 the aft LVDT and 13-17 the forward LVDT.
    #[must_use]
    pub const fn from_file_index(index: usize) -> Option<Self> {
        match index {
            1..=7 => Some(Self::LoadCell),
            8..=12 => Some(Self::AftLvdt),
            13..=17 => Some(Self::FwdLvdt),
            _ => None,
        }
    }

    /// Unit of the fitted physical value
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::LoadCell => "N",
            Self::AftLvdt | Self::FwdLvdt => "mm",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadCell => "load cell",
            Self::AftLvdt => "aft LVDT",
            Self::FwdLvdt => "fwd LVDT",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    #[must_use]
    pub fn predict(&self, x: f64) -> f64 {
        self.slope.mul_add(x, self.intercept)
    }
}

fn check_lengths(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() == y.len() {
        Ok(())
    } else {
        Err(Error::InsufficientData(format!(
            "{} abscissae but {} ordinates",
            x.len(),
            y.len()
        )))
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    stable_sum(values.iter().copied()) / values.len() as f64
}

/// Ordinary least-squares line through `(x, y)`
///
/// # Errors
/// [`Error::InsufficientData`] for fewer than two points or when all `x` coincide.
pub fn fit_linear(x: &[f64], y: &[f64]) -> Result<LinearFit> {
    check_lengths(x, y)?;
    if x.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "a line needs two points, got {}",
            x.len()
        )));
    }

    let x_mean = mean(x);
    let y_mean = mean(y);
    let sxx = stable_sum(x.iter().map(|xi| (xi - x_mean).powi(2)));
    if sxx == 0.0 {
        return Err(Error::InsufficientData(
            "abscissa has zero variance".to_owned(),
        ));
    }
    let sxy = stable_sum(
        x.iter()
            .zip(y)
            .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean)),
    );

    let slope = sxy / sxx;
    Ok(LinearFit {
        slope,
        intercept: slope.mul_add(-x_mean, y_mean),
    })
}

fn residuals<'a>(x: &'a [f64], y: &'a [f64], fit: &'a LinearFit) -> impl Iterator<Item = f64> + 'a {
    x.iter().zip(y).map(|(xi, yi)| yi - fit.predict(*xi))
}

fn sum_squared_residuals(x: &[f64], y: &[f64], fit: &LinearFit) -> f64 {
    stable_sum(residuals(x, y, fit).map(|r| r.powi(2)))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GoodnessOfFit {
    pub r2: f64,
    /// Undefined for two points, where the line has no residual degrees of freedom
    pub r2_adj: Option<f64>,
}

/// Coefficient of determination and its adjusted form for a two-parameter line
///
/// # Errors
/// [`Error::UndefinedFit`] when `y` has no variance.
#[allow(clippy::cast_precision_loss)]
pub fn goodness_of_fit(x: &[f64], y: &[f64], fit: &LinearFit) -> Result<GoodnessOfFit> {
    check_lengths(x, y)?;
    let n = y.len();
    if n == 0 {
        return Err(Error::InsufficientData("no points".to_owned()));
    }
    let y_mean = mean(y);
    let ss_total = stable_sum(y.iter().map(|yi| (yi - y_mean).powi(2)));
    if ss_total == 0.0 {
        return Err(Error::UndefinedFit("total sum of squares is zero".to_owned()));
    }
    let ratio = sum_squared_residuals(x, y, fit) / ss_total;

    let r2_adj = (n > 2).then(|| 1.0 - ratio * (n - 1) as f64 / (n - 2) as f64);

    Ok(GoodnessOfFit {
        r2: 1.0 - ratio,
        r2_adj,
    })
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResidualStats {
    pub mean_error: f64,
    /// Sample (n - 1) standard deviation of the residuals
    pub stddev_error: f64,
}

/// Mean and spread of `y - (slope x + intercept)`
///
/// # Errors
/// [`Error::InsufficientData`] for an empty input.
#[allow(clippy::cast_precision_loss)]
pub fn residual_stats(x: &[f64], y: &[f64], fit: &LinearFit) -> Result<ResidualStats> {
    check_lengths(x, y)?;
    if x.is_empty() {
        return Err(Error::InsufficientData("no points".to_owned()));
    }
    let errors: Vec<f64> = residuals(x, y, fit).collect();
    let mean_error = mean(&errors);
    let stddev_error = if errors.len() > 1 {
        (stable_sum(errors.iter().map(|e| (e - mean_error).powi(2))) / (errors.len() - 1) as f64)
            .sqrt()
    } else {
        0.0
    };
    Ok(ResidualStats {
        mean_error,
        stddev_error,
    })
}

/// Residual standard error of a straight-line fit
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StandardError {
    pub see: f64,
}

impl StandardError {
    /// `multiple × SEE`
    #[must_use]
    pub fn band(&self, multiple: u8) -> f64 {
        f64::from(multiple) * self.see
    }

    /// ≈68% band
    #[must_use]
    pub fn one(&self) -> f64 {
        self.band(1)
    }

    /// ≈95% band
    #[must_use]
    pub fn two(&self) -> f64 {
        self.band(2)
    }

    /// ≈99% band
    #[must_use]
    pub fn three(&self) -> f64 {
        self.band(3)
    }
}

/// `sqrt(SSresid / (n - 2))` of the least-squares line through `(x, y)`
///
/// # Errors
/// [`Error::InsufficientData`] for fewer than three points or a degenerate abscissa.
#[allow(clippy::cast_precision_loss)]
pub fn standard_error(x: &[f64], y: &[f64]) -> Result<StandardError> {
    let fit = fit_linear(x, y)?;
    if x.len() < 3 {
        return Err(Error::InsufficientData(format!(
            "standard error needs three points, got {}",
            x.len()
        )));
    }
    let see = (sum_squared_residuals(x, y, &fit) / (x.len() - 2) as f64).sqrt();
    Ok(StandardError { see })
}

/// Fit of one calibration file
#[derive(Clone, Debug)]
pub struct CalibrationFit {
    pub index: usize,
    pub sensor: SensorType,
    /// Zero offset quoted in the file header
    pub zero: Option<f64>,
    /// Calibration factor quoted in the file header
    pub factor: Option<f64>,
    pub samples: usize,
    pub line: LinearFit,
    pub goodness: GoodnessOfFit,
    pub residuals: ResidualStats,
    pub standard_error: Option<StandardError>,
}

/// Raw content of one calibration file
#[derive(Clone, Debug)]
pub struct CalibrationData {
    pub index: usize,
    pub sensor: SensorType,
    pub zero: Option<f64>,
    pub factor: Option<f64>,
    /// Reference value, grams for the load cell and millimetres for the LVDTs
    pub value: Vec<f64>,
    pub voltage: Vec<f64>,
    pub slope: Vec<f64>,
}

#[derive(Deserialize)]
struct Row(f64, f64, f64);

/// File name of calibration file `index`
#[must_use]
pub fn calibration_file_name(index: usize) -> String {
    format!("CAL{index:02}.txt")
}

impl CalibrationData {
    /// Create a `CalibrationData` from an on-disk representation
    ///
    /// # Errors
    /// [`Error::MissingFile`] when `filepath` does not exist, [`Error::Unreadable`] when it cannot
    /// be read, [`Error::Parse`] for an index outside the calibration ranges or a malformed sample
    /// table.
    ///
    /// The header is free text and need not be UTF-8; undecodable bytes are replaced.
    pub fn from_file(filepath: &Path, index: usize) -> Result<Self> {
        let bytes = read_input(filepath)?;
        Self::parse(&String::from_utf8_lossy(&bytes), index)
    }

    /// # Errors
    /// See [`CalibrationData::from_file`].
    pub fn parse(contents: &str, index: usize) -> Result<Self> {
        let sensor = SensorType::from_file_index(index).ok_or_else(|| {
            Error::Parse(format!("calibration file index {index} has no sensor type"))
        })?;

        let mut lines = contents.lines();
        let mut zero = None;
        let mut factor = None;
        for line in lines.by_ref().take(HEADER_LINES) {
            match parse_header_field(line) {
                Some(HeaderField::Zero(value)) => zero = Some(value),
                Some(HeaderField::Factor(value)) => factor = Some(value),
                None => {}
            }
        }

        let body: Vec<&str> = lines.filter(|line| !line.trim().is_empty()).collect();
        let delimiter = if body.first().is_some_and(|line| line.contains('\t')) {
            b'\t'
        } else {
            b','
        };
        let body = body.join("\n");
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let mut value = vec![];
        let mut voltage = vec![];
        let mut slope = vec![];
        for result in rdr.deserialize() {
            let record: Row = result?;
            value.push(record.0);
            voltage.push(record.1);
            slope.push(record.2);
        }

        Ok(Self {
            index,
            sensor,
            zero,
            factor,
            value,
            voltage,
            slope,
        })
    }

    /// Physical value the line is fitted to, in newtons for the load cell
    #[must_use]
    pub fn physical_values(&self) -> Vec<f64> {
        match self.sensor {
            SensorType::LoadCell => self.value.iter().copied().map(grams_to_newtons).collect(),
            SensorType::AftLvdt | SensorType::FwdLvdt => self.value.clone(),
        }
    }

    /// Fit voltage to physical value
    ///
    /// # Errors
    /// Propagates failures of the line fit and goodness of fit.
    pub fn fit(&self) -> Result<CalibrationFit> {
        let x = &self.voltage;
        let y = self.physical_values();

        let line = fit_linear(x, &y)?;
        let goodness = goodness_of_fit(x, &y, &line)?;
        let residuals = residual_stats(x, &y, &line)?;
        let standard_error = match standard_error(x, &y) {
            Ok(see) => Some(see),
            Err(e) => {
                debug!("calibration {}: no standard error ({e})", self.index);
                None
            }
        };

        Ok(CalibrationFit {
            index: self.index,
            sensor: self.sensor,
            zero: self.zero,
            factor: self.factor,
            samples: x.len(),
            line,
            goodness,
            residuals,
            standard_error,
        })
    }
}

enum HeaderField {
    Zero(f64),
    Factor(f64),
}

fn parse_header_field(line: &str) -> Option<HeaderField> {
    let split = line.find([':', '=', '\t', ','])?;
    let key = line[..split].trim().to_ascii_lowercase();
    let value: f64 = line[split + 1..]
        .trim_start_matches([':', '=', '\t', ',', ' '])
        .split([',', '\t', ' '])
        .next()?
        .trim()
        .parse()
        .ok()?;

    if key.starts_with("zero") {
        Some(HeaderField::Zero(value))
    } else if key.starts_with("calibration factor") || key == "cf" {
        Some(HeaderField::Factor(value))
    } else {
        None
    }
}

/// Uncertainty quoted for one sensor across its calibration files
#[derive(Clone, Copy, Debug)]
pub struct SensorUncertainty {
    pub sensor: SensorType,
    pub files: usize,
    pub mean_see: f64,
    pub worst_see: f64,
}

/// All calibration fits of a campaign, partitioned by sensor type
#[derive(Debug, Default)]
pub struct CalibrationSet {
    by_sensor: BTreeMap<SensorType, Vec<CalibrationFit>>,
    skipped: Vec<(usize, String)>,
}

impl CalibrationSet {
    #[must_use]
    pub fn sensor(&self, sensor: SensorType) -> &[CalibrationFit] {
        self.by_sensor.get(&sensor).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibrationFit> {
        self.by_sensor.values().flatten()
    }

    /// File indices left out, with the reason
    #[must_use]
    pub fn skipped(&self) -> &[(usize, String)] {
        &self.skipped
    }

    fn insert(&mut self, fit: CalibrationFit) {
        self.by_sensor.entry(fit.sensor).or_default().push(fit);
    }

    /// Mean and largest SEE per sensor type
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn uncertainty(&self) -> Vec<SensorUncertainty> {
        self.by_sensor
            .iter()
            .filter_map(|(sensor, fits)| {
                let sees: Vec<f64> = fits
                    .iter()
                    .filter_map(|fit| fit.standard_error.map(|se| se.see))
                    .collect();
                if sees.is_empty() {
                    return None;
                }
                Some(SensorUncertainty {
                    sensor: *sensor,
                    files: sees.len(),
                    mean_see: stable_sum(sees.iter().copied()) / sees.len() as f64,
                    worst_see: sees.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                })
            })
            .collect()
    }
}

/// Fit every calibration file in `directory`
///
/// Missing or unusable files are logged and skipped, they never abort the batch.
///
/// # Errors
/// Every per-file failure is recoverable, so this only fails on an error outside any one file.
pub fn build(directory: &Path) -> Result<CalibrationSet> {
    let mut set = CalibrationSet::default();
    for index in CALIBRATION_FILES {
        let path: PathBuf = directory.join(calibration_file_name(index));
        let fit = CalibrationData::from_file(&path, index).and_then(|data| data.fit());
        match fit {
            Ok(fit) => {
                debug!(
                    "calibration {index} ({}): slope {:.4} {}/V, r2 {:.6}",
                    fit.sensor,
                    fit.line.slope,
                    fit.sensor.unit(),
                    fit.goodness.r2
                );
                set.insert(fit);
            }
            Err(e) if e.is_recoverable() => {
                warn!("skipping calibration {index}: {e}");
                set.skipped.push((index, e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    info!(
        "fitted {} calibration files, skipped {}",
        set.iter().count(),
        set.skipped.len()
    );
    Ok(set)
}
