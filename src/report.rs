//! Delimited tables handed to the plotting and reporting tools
//!
//! Every table is written twice: comma-delimited at full precision and tab-delimited at four
//! significant digits. Undefined values are written as `NaN`, never as zero.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use tracing::info;

use crate::aggregate::{ConditionAggregate, ConditionCode};
use crate::calibration::CalibrationSet;
use crate::curve::{FittedCurve, Point, UncertaintyOverlay};
use crate::run::{Column, RunSummary, RunTable};
use crate::Result;

/// Where the form factor used for the full-scale extrapolation came from
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FormFactorSource {
    /// Prohaska fit over this many form-factor runs
    Prohaska { runs: usize },
    Configured,
}

/// Everything one pass of the pipeline produces
#[derive(Debug)]
pub struct Report {
    pub calibration: CalibrationSet,
    pub runs: RunTable,
    pub form_factor: f64,
    pub form_factor_source: FormFactorSource,
    pub aggregates: BTreeMap<ConditionCode, ConditionAggregate>,
    pub overlays: Vec<UncertaintyOverlay>,
}

impl Report {
    /// One averaged run per condition and Froude bucket, conditions in ascending order
    #[must_use]
    pub fn averaged_runs(&self) -> Vec<RunSummary> {
        self.aggregates
            .values()
            .flat_map(|aggregate| aggregate.averaged.iter().copied())
            .collect()
    }
}

/// The two delimited forms of a table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delimited {
    /// Comma-delimited, full precision
    Comma,
    /// Tab-delimited, four significant digits
    Tab,
}

impl Delimited {
    pub const BOTH: [Self; 2] = [Self::Comma, Self::Tab];

    const fn delimiter(self) -> u8 {
        match self {
            Self::Comma => b',',
            Self::Tab => b'\t',
        }
    }

    const fn extension(self) -> &'static str {
        match self {
            Self::Comma => "csv",
            Self::Tab => "tsv",
        }
    }

    fn format(self, value: f64) -> String {
        match self {
            Self::Comma => value.to_string(),
            Self::Tab => format_significant(value, 4),
        }
    }
}

/// Format `value` to `digits` significant digits, in the manner of `%g`
///
/// Trailing zeros are dropped; exponents below -4 or at least `digits` switch to scientific
/// notation.
#[must_use]
pub fn format_significant(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_owned();
    }
    let digits = digits.max(1);
    let scientific = format!("{:.*e}", digits - 1, value);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let max_exponent = i32::try_from(digits).unwrap_or(i32::MAX);

    if exponent < -4 || exponent >= max_exponent {
        format!("{}e{exponent}", strip_zeros(mantissa))
    } else {
        let decimals = usize::try_from(max_exponent - 1 - exponent).unwrap_or(0);
        strip_zeros(&format!("{value:.decimals$}")).to_owned()
    }
}

fn strip_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// A table cell
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        Self::Number(value.unwrap_or(f64::NAN))
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

#[allow(clippy::cast_precision_loss)]
impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

/// A header row and its records, ready to be written in either form
#[derive(Clone, Debug, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| (*h).to_owned()).collect(),
            rows: vec![],
        }
    }

    fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    /// Write the table to `stem` with the extension of `form`, returning the written path
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn write(&self, stem: &Path, form: Delimited) -> Result<PathBuf> {
        let path = stem.with_extension(form.extension());
        let mut writer = WriterBuilder::new()
            .delimiter(form.delimiter())
            .flexible(true)
            .from_path(&path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| match cell {
                Cell::Text(text) => text.clone(),
                Cell::Number(value) => form.format(*value),
            }))?;
        }
        writer.flush()?;
        Ok(path)
    }
}

/// The 48-column results table of `summaries`
#[must_use]
pub fn results_table<'a>(summaries: impl IntoIterator<Item = &'a RunSummary>) -> Table {
    let headers: Vec<&str> = Column::ALL.iter().map(|c| c.header()).collect();
    let mut table = Table::new(&headers);
    for summary in summaries {
        table.push(summary.to_row().iter().map(|v| Cell::Number(*v)).collect());
    }
    table
}

/// One row per fitted calibration file
#[must_use]
pub fn calibration_table(calibration: &CalibrationSet) -> Table {
    let mut table = Table::new(&[
        "index",
        "sensor",
        "zero",
        "factor",
        "samples",
        "slope",
        "intercept",
        "r2",
        "r2_adj",
        "mean_error",
        "stddev_error",
        "see_1",
        "see_2",
        "see_3",
    ]);
    for fit in calibration.iter() {
        let see = fit.standard_error;
        table.push(vec![
            fit.index.into(),
            Cell::Text(fit.sensor.to_string()),
            fit.zero.into(),
            fit.factor.into(),
            fit.samples.into(),
            fit.line.slope.into(),
            fit.line.intercept.into(),
            fit.goodness.r2.into(),
            fit.goodness.r2_adj.into(),
            fit.residuals.mean_error.into(),
            fit.residuals.stddev_error.into(),
            see.map(|s| s.one()).into(),
            see.map(|s| s.two()).into(),
            see.map(|s| s.three()).into(),
        ]);
    }
    table
}

/// Mean and worst SEE per sensor type
#[must_use]
pub fn sensor_uncertainty_table(calibration: &CalibrationSet) -> Table {
    let mut table = Table::new(&["sensor", "unit", "files", "mean_see", "worst_see"]);
    for uncertainty in calibration.uncertainty() {
        table.push(vec![
            Cell::Text(uncertainty.sensor.to_string()),
            uncertainty.sensor.unit().into(),
            uncertainty.files.into(),
            uncertainty.mean_see.into(),
            uncertainty.worst_see.into(),
        ]);
    }
    table
}

fn fit_row(overlay: &UncertaintyOverlay, series: &str, curve: Option<&FittedCurve>) -> Vec<Cell> {
    let point = |p: Option<Point>| -> [Cell; 2] {
        [p.map(|(x, _)| x).into(), p.map(|(_, y)| y).into()]
    };
    let mut row: Vec<Cell> = vec![
        f64::from(overlay.condition.get()).into(),
        overlay.quantity.header().into(),
        series.into(),
        overlay.degree.into(),
    ];
    match curve {
        Some(curve) => {
            let (lo, hi) = curve.fit.window();
            row.extend([lo.into(), hi.into()]);
            row.extend(point(curve.minimum));
            row.extend(point(curve.maximum));
            row.extend(curve.fit.solution().iter().map(|c| Cell::Number(*c)));
        }
        None => row.extend((0..6).map(|_| Cell::Number(f64::NAN))),
    }
    row
}

/// Coefficients and extrema of every trend fit, one row per fitted series
///
/// Rows are flexible: the scaled-abscissa coefficients `c0..cN` follow the fixed columns.
#[must_use]
pub fn fit_table(overlays: &[UncertaintyOverlay]) -> Table {
    let mut table = Table::new(&[
        "condition",
        "quantity",
        "series",
        "degree",
        "window_start",
        "window_end",
        "minimum_froude",
        "minimum_value",
        "maximum_froude",
        "maximum_value",
        "coefficients",
    ]);
    for overlay in overlays {
        table.push(fit_row(overlay, "average", overlay.average_fit.as_ref()));
        table.push(fit_row(overlay, "minimum", overlay.minimum_fit.as_ref()));
    }
    table
}

fn curve_points(fit: Option<&FittedCurve>) -> &[Point] {
    fit.map_or(&[][..], |c| c.curve.as_slice())
}

/// Long-form plotting data of one overlay: `series, froude_number, value`
#[must_use]
pub fn overlay_table(overlay: &UncertaintyOverlay) -> Table {
    let mut table = Table::new(&["series", "froude_number", overlay.quantity.header()]);
    let series: [(&str, &[Point]); 6] = [
        ("raw", overlay.raw.as_slice()),
        ("average", overlay.average.as_slice()),
        ("minimum", overlay.minimum.as_slice()),
        ("spread", overlay.spread.as_slice()),
        ("average_fit", curve_points(overlay.average_fit.as_ref())),
        ("minimum_fit", curve_points(overlay.minimum_fit.as_ref())),
    ];
    for (name, points) in series {
        for (x, y) in points {
            table.push(vec![name.into(), (*x).into(), (*y).into()]);
        }
    }
    table
}

/// Persist every table of `report` under `output_dir`, in both delimited forms
///
/// # Errors
/// Returns an error if the directory or any file cannot be written.
pub fn write_all(output_dir: &Path, report: &Report) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;
    let averaged = report.averaged_runs();

    let mut tables = vec![
        ("results".to_owned(), results_table(report.runs.iter())),
        ("averaged_results".to_owned(), results_table(&averaged)),
        ("calibration".to_owned(), calibration_table(&report.calibration)),
        (
            "sensor_uncertainty".to_owned(),
            sensor_uncertainty_table(&report.calibration),
        ),
        ("fits".to_owned(), fit_table(&report.overlays)),
    ];
    for overlay in &report.overlays {
        let name = format!(
            "overlay_c{:02}_{}",
            overlay.condition.get(),
            overlay.quantity.header()
        );
        tables.push((name, overlay_table(overlay)));
    }

    let mut written = vec![];
    for (name, table) in &tables {
        for form in Delimited::BOTH {
            written.push(table.write(&output_dir.join(name), form)?);
        }
    }
    info!("wrote {} tables to {}", written.len(), output_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempdir::TempDir;

    use crate::run::read_results;
    use crate::run::tests::summary;

    #[test]
    fn significant_digits_follow_printf_g() {
        assert_eq!(format_significant(1234.5678, 4), "1235");
        assert_eq!(format_significant(0.000_123_456, 4), "0.0001235");
        assert_eq!(format_significant(123_456.0, 4), "1.235e5");
        assert_eq!(format_significant(9.999_95, 4), "10");
        assert_eq!(format_significant(-0.5, 4), "-0.5");
        assert_eq!(format_significant(0.0, 4), "0");
        assert_eq!(format_significant(1.1394e-6, 4), "1.139e-6");
        assert_eq!(format_significant(f64::NAN, 4), "NaN");
    }

    #[test]
    fn results_table_reads_back() {
        let tmp_dir = TempDir::new("results_table_reads_back").unwrap();
        let mut runs = RunTable::new();
        let mut first = summary(3, 2, 1.1, -4.0);
        first.sampling_rate = None;
        runs.insert(first).unwrap();
        runs.insert(summary(4, 2, 1.3, -5.0)).unwrap();

        let table = results_table(runs.iter());
        assert_eq!(table.headers.len(), 48);
        assert_eq!(table.headers[27], Column::Condition.header());

        let path = table
            .write(&tmp_dir.path().join("results"), Delimited::Comma)
            .unwrap();
        let read = read_results(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.get(3), runs.get(3));
        assert!(read.get(3).unwrap().sampling_rate.is_none());

        let tab = table
            .write(&tmp_dir.path().join("results"), Delimited::Tab)
            .unwrap();
        let contents = std::fs::read_to_string(tab).unwrap();
        let second_line = contents.lines().nth(1).unwrap();
        assert_eq!(second_line.split('\t').count(), 48);
        assert!(second_line.starts_with("3\tNaN\t4000\t20\t"));
    }
}
