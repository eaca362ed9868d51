//! Run summaries and the results table
//!
//! A [`RunSummary`] is built once per reduced run and never mutated. Its flat form is a row of the
//! 48-column results table shared with the reporting side; [`Column`] fixes the order of that
//! table.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::Deserialize;

use crate::aggregate::ConditionCode;
use crate::channel::{zero_row_filter, ChannelStats, ReducedRun};
use crate::error::read_input;
use crate::hydro::{FullScaleResistance, Hydrodynamics};
use crate::{Error, Result};

/// Columns of the results table
pub const COLUMN_COUNT: usize = 48;

/// A column of the results table, in table order
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Run,
    SamplingRate,
    SampleCount,
    RecordTime,
    SpeedMin,
    SpeedMax,
    SpeedAvg,
    SpeedPctDev,
    FwdLvdtMin,
    FwdLvdtMax,
    FwdLvdtAvg,
    FwdLvdtPctDev,
    AftLvdtMin,
    AftLvdtMax,
    AftLvdtAvg,
    AftLvdtPctDev,
    DragMin,
    DragMax,
    DragAvg,
    DragPctDev,
    SpeedStd,
    FwdLvdtStd,
    AftLvdtStd,
    DragStd,
    WaterTemperature,
    KinematicViscosity,
    WaterDensity,
    Condition,
    WettedArea,
    ModelLength,
    FroudeNumber,
    ReynoldsNumber,
    TotalResistance,
    CtModel,
    CfModel,
    Cr,
    Heave,
    Trim,
    ShipSpeed,
    ShipSpeedKnots,
    ShipReynoldsNumber,
    CfShip,
    CtShip,
    RtShip,
    EffectivePower,
    FormFactor,
    CtShipFormFactor,
    RtShipFormFactor,
}

impl Column {
    pub const ALL: [Self; COLUMN_COUNT] = [
        Self::Run,
        Self::SamplingRate,
        Self::SampleCount,
        Self::RecordTime,
        Self::SpeedMin,
        Self::SpeedMax,
        Self::SpeedAvg,
        Self::SpeedPctDev,
        Self::FwdLvdtMin,
        Self::FwdLvdtMax,
        Self::FwdLvdtAvg,
        Self::FwdLvdtPctDev,
        Self::AftLvdtMin,
        Self::AftLvdtMax,
        Self::AftLvdtAvg,
        Self::AftLvdtPctDev,
        Self::DragMin,
        Self::DragMax,
        Self::DragAvg,
        Self::DragPctDev,
        Self::SpeedStd,
        Self::FwdLvdtStd,
        Self::AftLvdtStd,
        Self::DragStd,
        Self::WaterTemperature,
        Self::KinematicViscosity,
        Self::WaterDensity,
        Self::Condition,
        Self::WettedArea,
        Self::ModelLength,
        Self::FroudeNumber,
        Self::ReynoldsNumber,
        Self::TotalResistance,
        Self::CtModel,
        Self::CfModel,
        Self::Cr,
        Self::Heave,
        Self::Trim,
        Self::ShipSpeed,
        Self::ShipSpeedKnots,
        Self::ShipReynoldsNumber,
        Self::CfShip,
        Self::CtShip,
        Self::RtShip,
        Self::EffectivePower,
        Self::FormFactor,
        Self::CtShipFormFactor,
        Self::RtShipFormFactor,
    ];

    /// Zero-based position in a results row
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Header of the column in the delimited tables
    #[must_use]
    pub const fn header(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::SamplingRate => "sampling_rate_hz",
            Self::SampleCount => "sample_count",
            Self::RecordTime => "record_time_s",
            Self::SpeedMin => "speed_min_ms",
            Self::SpeedMax => "speed_max_ms",
            Self::SpeedAvg => "speed_avg_ms",
            Self::SpeedPctDev => "speed_pct_dev",
            Self::FwdLvdtMin => "fwd_lvdt_min_mm",
            Self::FwdLvdtMax => "fwd_lvdt_max_mm",
            Self::FwdLvdtAvg => "fwd_lvdt_avg_mm",
            Self::FwdLvdtPctDev => "fwd_lvdt_pct_dev",
            Self::AftLvdtMin => "aft_lvdt_min_mm",
            Self::AftLvdtMax => "aft_lvdt_max_mm",
            Self::AftLvdtAvg => "aft_lvdt_avg_mm",
            Self::AftLvdtPctDev => "aft_lvdt_pct_dev",
            Self::DragMin => "drag_min_n",
            Self::DragMax => "drag_max_n",
            Self::DragAvg => "drag_avg_n",
            Self::DragPctDev => "drag_pct_dev",
            Self::SpeedStd => "speed_std",
            Self::FwdLvdtStd => "fwd_lvdt_std",
            Self::AftLvdtStd => "aft_lvdt_std",
            Self::DragStd => "drag_std",
            Self::WaterTemperature => "water_temperature_c",
            Self::KinematicViscosity => "kinematic_viscosity",
            Self::WaterDensity => "water_density",
            Self::Condition => "condition",
            Self::WettedArea => "wetted_area_m2",
            Self::ModelLength => "model_length_m",
            Self::FroudeNumber => "froude_number",
            Self::ReynoldsNumber => "reynolds_number",
            Self::TotalResistance => "total_resistance_n",
            Self::CtModel => "ct_model",
            Self::CfModel => "cf_model",
            Self::Cr => "cr",
            Self::Heave => "heave_mm",
            Self::Trim => "trim_deg",
            Self::ShipSpeed => "ship_speed_ms",
            Self::ShipSpeedKnots => "ship_speed_knots",
            Self::ShipReynoldsNumber => "ship_reynolds_number",
            Self::CfShip => "cf_ship",
            Self::CtShip => "ct_ship",
            Self::RtShip => "rt_ship_n",
            Self::EffectivePower => "effective_power_kw",
            Self::FormFactor => "form_factor",
            Self::CtShipFormFactor => "ct_ship_form_factor",
            Self::RtShipFormFactor => "rt_ship_form_factor_n",
        }
    }
}

/// Reduced, immutable record of one run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSummary {
    pub run: u32,
    pub condition: ConditionCode,
    pub sampling_rate: Option<f64>,
    pub sample_count: usize,
    pub record_time: f64,
    pub speed: ChannelStats,
    pub fwd_lvdt: ChannelStats,
    pub aft_lvdt: ChannelStats,
    pub drag: ChannelStats,
    pub hydro: Hydrodynamics,
}

fn undefined_as_nan(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}

fn nan_as_undefined(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

impl RunSummary {
    #[must_use]
    pub fn new(reduced: &ReducedRun, condition: ConditionCode, hydro: Hydrodynamics) -> Self {
        Self {
            run: reduced.run,
            condition,
            sampling_rate: reduced.sampling_rate,
            sample_count: reduced.sample_count,
            record_time: reduced.record_time,
            speed: reduced.speed,
            fwd_lvdt: reduced.fwd_lvdt,
            aft_lvdt: reduced.aft_lvdt,
            drag: reduced.drag,
            hydro,
        }
    }

    /// Value of one results-table column
    #[must_use]
    pub fn get(&self, column: Column) -> f64 {
        self.to_row()[column.index()]
    }

    #[must_use]
    pub fn froude_number(&self) -> f64 {
        self.hydro.froude_number
    }

    /// Flatten into a results-table row
    ///
    /// Undefined values (no sampling rate, no percentage deviation) are written as NaN, never as
    /// zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_row(&self) -> Array1<f64> {
        let h = &self.hydro;
        let fs = &h.full_scale;
        Array1::from_vec(vec![
            f64::from(self.run),
            undefined_as_nan(self.sampling_rate),
            self.sample_count as f64,
            self.record_time,
            self.speed.min,
            self.speed.max,
            self.speed.mean,
            undefined_as_nan(self.speed.pct_dev),
            self.fwd_lvdt.min,
            self.fwd_lvdt.max,
            self.fwd_lvdt.mean,
            undefined_as_nan(self.fwd_lvdt.pct_dev),
            self.aft_lvdt.min,
            self.aft_lvdt.max,
            self.aft_lvdt.mean,
            undefined_as_nan(self.aft_lvdt.pct_dev),
            self.drag.min,
            self.drag.max,
            self.drag.mean,
            undefined_as_nan(self.drag.pct_dev),
            self.speed.stddev,
            self.fwd_lvdt.stddev,
            self.aft_lvdt.stddev,
            self.drag.stddev,
            h.water_temperature,
            h.kinematic_viscosity,
            h.water_density,
            f64::from(self.condition.get()),
            h.wetted_area,
            h.model_length,
            h.froude_number,
            h.reynolds_number,
            h.total_resistance,
            h.ct_model,
            h.cf_model,
            h.cr,
            h.heave,
            h.trim,
            fs.speed,
            fs.speed_knots,
            fs.reynolds_number,
            fs.cf,
            fs.ct,
            fs.rt,
            fs.effective_power,
            fs.form_factor,
            fs.ct_form_factor,
            fs.rt_form_factor,
        ])
    }

    /// Rebuild a summary from a results-table row
    ///
    /// # Errors
    /// [`Error::Parse`] for a row of the wrong length or a non-integral run number,
    /// [`Error::InvalidCondition`] for a condition code outside 1..=13.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_row(row: ArrayView1<'_, f64>) -> Result<Self> {
        if row.len() != COLUMN_COUNT {
            return Err(Error::Parse(format!(
                "results row has {} columns, expected {COLUMN_COUNT}",
                row.len()
            )));
        }
        let at = |column: Column| row[column.index()];

        let run = at(Column::Run);
        if run.fract() != 0.0 || !(0.0..=f64::from(u32::MAX)).contains(&run) {
            return Err(Error::Parse(format!("run number {run} is not a whole number")));
        }
        let condition = ConditionCode::from_value(at(Column::Condition))?;

        let stats = |min: Column, max: Column, avg: Column, pct_dev: Column, std: Column| ChannelStats {
            min: at(min),
            max: at(max),
            mean: at(avg),
            stddev: at(std),
            pct_dev: nan_as_undefined(at(pct_dev)),
        };

        Ok(Self {
            run: run as u32,
            condition,
            sampling_rate: nan_as_undefined(at(Column::SamplingRate)),
            sample_count: at(Column::SampleCount).round().max(0.0) as usize,
            record_time: at(Column::RecordTime),
            speed: stats(
                Column::SpeedMin,
                Column::SpeedMax,
                Column::SpeedAvg,
                Column::SpeedPctDev,
                Column::SpeedStd,
            ),
            fwd_lvdt: stats(
                Column::FwdLvdtMin,
                Column::FwdLvdtMax,
                Column::FwdLvdtAvg,
                Column::FwdLvdtPctDev,
                Column::FwdLvdtStd,
            ),
            aft_lvdt: stats(
                Column::AftLvdtMin,
                Column::AftLvdtMax,
                Column::AftLvdtAvg,
                Column::AftLvdtPctDev,
                Column::AftLvdtStd,
            ),
            drag: stats(
                Column::DragMin,
                Column::DragMax,
                Column::DragAvg,
                Column::DragPctDev,
                Column::DragStd,
            ),
            hydro: Hydrodynamics {
                water_temperature: at(Column::WaterTemperature),
                kinematic_viscosity: at(Column::KinematicViscosity),
                water_density: at(Column::WaterDensity),
                wetted_area: at(Column::WettedArea),
                model_length: at(Column::ModelLength),
                froude_number: at(Column::FroudeNumber),
                reynolds_number: at(Column::ReynoldsNumber),
                total_resistance: at(Column::TotalResistance),
                ct_model: at(Column::CtModel),
                cf_model: at(Column::CfModel),
                cr: at(Column::Cr),
                heave: at(Column::Heave),
                trim: at(Column::Trim),
                full_scale: FullScaleResistance {
                    speed: at(Column::ShipSpeed),
                    speed_knots: at(Column::ShipSpeedKnots),
                    reynolds_number: at(Column::ShipReynoldsNumber),
                    cf: at(Column::CfShip),
                    ct: at(Column::CtShip),
                    rt: at(Column::RtShip),
                    effective_power: at(Column::EffectivePower),
                    form_factor: at(Column::FormFactor),
                    ct_form_factor: at(Column::CtShipFormFactor),
                    rt_form_factor: at(Column::RtShipFormFactor),
                },
            },
        })
    }
}

/// A run left out of the table, and why
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedRun {
    pub run: u32,
    pub reason: String,
}

/// Arena of run summaries indexed by run number
///
/// Append-only while runs are reduced, read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct RunTable {
    runs: BTreeMap<u32, RunSummary>,
    skipped: Vec<SkippedRun>,
}

impl RunTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a run
    ///
    /// # Errors
    /// [`Error::DuplicateRun`] if the run number is already present; a reduced run is never
    /// replaced.
    pub fn insert(&mut self, summary: RunSummary) -> Result<()> {
        if self.runs.contains_key(&summary.run) {
            return Err(Error::DuplicateRun(summary.run));
        }
        self.runs.insert(summary.run, summary);
        Ok(())
    }

    pub fn skip(&mut self, run: u32, reason: String) {
        self.skipped.push(SkippedRun { run, reason });
    }

    #[must_use]
    pub fn get(&self, run: u32) -> Option<&RunSummary> {
        self.runs.get(&run)
    }

    /// Summaries in ascending run order
    pub fn iter(&self) -> impl Iterator<Item = &RunSummary> {
        self.runs.values()
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<RunSummary> {
        self.runs.values().copied().collect()
    }

    #[must_use]
    pub fn skipped(&self) -> &[SkippedRun] {
        &self.skipped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Results table, one row per run in ascending run order
    #[must_use]
    pub fn to_table(&self) -> Array2<f64> {
        let rows: Vec<Array1<f64>> = self.runs.values().map(RunSummary::to_row).collect();
        Array2::from_shape_fn((rows.len(), COLUMN_COUNT), |(ii, jj)| rows[ii][jj])
    }

    /// Build a table from results rows, dropping all-zero placeholder rows
    ///
    /// # Errors
    /// Propagates [`RunSummary::from_row`] failures and duplicate run numbers.
    pub fn from_table(table: &Array2<f64>) -> Result<Self> {
        let mut runs = Self::new();
        for row in zero_row_filter(table.view()).axis_iter(Axis(0)) {
            runs.insert(RunSummary::from_row(row)?)?;
        }
        Ok(runs)
    }
}

/// Read a comma-delimited results table with a header row
///
/// # Errors
/// [`Error::MissingFile`] if absent, [`Error::Unreadable`] if it cannot be read, [`Error::Csv`] or [`Error::Parse`] for malformed rows.
pub fn read_results(path: &Path) -> Result<RunTable> {
    let file = read_input(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(&file[..]);

    let mut values = vec![];
    for result in rdr.deserialize() {
        let record: Vec<f64> = result?;
        if record.len() != COLUMN_COUNT {
            return Err(Error::Parse(format!(
                "results row has {} columns, expected {COLUMN_COUNT}",
                record.len()
            )));
        }
        values.extend(record);
    }
    let rows = values.len() / COLUMN_COUNT;
    RunTable::from_table(&Array2::from_shape_vec((rows, COLUMN_COUNT), values)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use crate::hydro::HydroModel;
    use crate::config::Config;

    pub(crate) fn plateau(mean: f64) -> ChannelStats {
        ChannelStats {
            min: mean - 0.1,
            max: mean + 0.1,
            mean,
            stddev: 0.05,
            pct_dev: Some(0.1 / (mean + 0.1) * 100.0),
        }
    }

    /// A summary at `speed` m/s with the given heave, both LVDTs reading `heave`
    pub(crate) fn summary(run: u32, condition: u8, speed: f64, heave: f64) -> RunSummary {
        let config = Config::default();
        let model = HydroModel {
            model: config.model,
            water: config.water,
            full_scale: config.full_scale,
        };
        let reduced = ReducedRun {
            run,
            sampling_rate: Some(200.0),
            sample_count: 4000,
            record_time: 20.0,
            speed: plateau(speed),
            fwd_lvdt: plateau(heave),
            aft_lvdt: plateau(heave),
            drag: plateau(10.0 * speed.powi(2)),
        };
        let hydro = model.evaluate(&reduced, 1.18).unwrap();
        RunSummary::new(&reduced, ConditionCode::new(condition).unwrap(), hydro)
    }

    #[test]
    fn column_order_is_fixed() {
        assert_eq!(Column::ALL.len(), COLUMN_COUNT);
        for (ii, column) in Column::ALL.iter().enumerate() {
            assert_eq!(column.index(), ii);
        }
        // Condition code lives in the 28th column
        assert_eq!(Column::Condition.index() + 1, 28);
        assert_eq!(Column::RtShipFormFactor.index() + 1, 48);
    }

    #[test]
    fn summaries_survive_the_results_row() {
        let mut summary = summary(12, 3, 1.4, -7.5);
        summary.sampling_rate = None;
        let row = summary.to_row();
        assert_eq!(row.len(), COLUMN_COUNT);
        assert!(row[Column::SamplingRate.index()].is_nan());

        let rebuilt = RunSummary::from_row(row.view()).unwrap();
        assert_eq!(rebuilt, summary);
    }

    #[test]
    fn invalid_condition_in_row_is_rejected() {
        let mut row = summary(1, 1, 1.0, -5.0).to_row();
        row[Column::Condition.index()] = 14.0;
        assert!(matches!(
            RunSummary::from_row(row.view()),
            Err(Error::InvalidCondition(14))
        ));
    }

    #[test]
    fn run_table_rejects_duplicates_and_drops_zero_rows() {
        let mut table = RunTable::new();
        table.insert(summary(1, 1, 1.0, -5.0)).unwrap();
        assert!(matches!(
            table.insert(summary(1, 1, 1.1, -5.5)),
            Err(Error::DuplicateRun(1))
        ));
        table.insert(summary(2, 1, 1.2, -6.0)).unwrap();

        let mut rows = table.to_table();
        rows.push_row(Array1::zeros(COLUMN_COUNT).view()).unwrap();
        let rebuilt = RunTable::from_table(&rows).unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.get(2), table.get(2));
    }
}
