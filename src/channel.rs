//! Per-run channel reduction
//!
//! A raw run table has five columns, `time, speed, fwd_lvdt, aft_lvdt, drag`. Each channel is
//! mapped to physical units through the run's calibration record, the acceleration transients at
//! the head and tail are trimmed off and the steady-state plateau is summarised.

use std::fmt;
use std::path::Path;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::Deserialize;

use crate::calibration::grams_to_newtons;
use crate::config::TrimWindow;
use crate::error::read_input;
use crate::math::{mean, min_max, standard_deviation};
use crate::{Error, Result};

/// Columns of a raw run table
pub const RAW_COLUMNS: usize = 5;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Speed,
    FwdLvdt,
    AftLvdt,
    Drag,
}

impl Channel {
    pub const ALL: [Self; 4] = [Self::Speed, Self::FwdLvdt, Self::AftLvdt, Self::Drag];

    /// Column of the channel in a raw run table, column zero is time
    #[must_use]
    pub const fn column(self) -> usize {
        match self {
            Self::Speed => 1,
            Self::FwdLvdt => 2,
            Self::AftLvdt => 3,
            Self::Drag => 4,
        }
    }

    const fn slot(self) -> usize {
        self.column() - 1
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Speed => "speed",
            Self::FwdLvdt => "fwd_lvdt",
            Self::AftLvdt => "aft_lvdt",
            Self::Drag => "drag",
        };
        f.write_str(name)
    }
}

/// Zero offset and calibration factor of one channel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationRecord {
    pub zero: f64,
    pub factor: f64,
}

/// Calibration records of the four channels of one run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunCalibration {
    records: [CalibrationRecord; 4],
}

#[derive(Deserialize)]
struct CalibrationRow {
    channel: Channel,
    zero: f64,
    factor: f64,
}

impl RunCalibration {
    /// # Errors
    /// [`Error::MalformedCalibration`] if any factor is zero or not finite.
    pub fn new(records: [CalibrationRecord; 4]) -> Result<Self> {
        for (channel, record) in Channel::ALL.iter().zip(&records) {
            if record.factor == 0.0 || !record.factor.is_finite() || !record.zero.is_finite() {
                return Err(Error::MalformedCalibration(format!(
                    "{channel}: zero {} factor {}",
                    record.zero, record.factor
                )));
            }
        }
        Ok(Self { records })
    }

    /// Read a `channel,zero,factor` table
    ///
    /// # Errors
    /// [`Error::MissingFile`] if the file is absent, [`Error::Unreadable`] if it cannot be read,
    /// [`Error::MalformedCalibration`] if a channel
    /// is missing, repeated or has a zero factor.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = read_input(path)?;
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(&file[..]);

        let mut records: [Option<CalibrationRecord>; 4] = [None; 4];
        for result in rdr.deserialize() {
            let row: CalibrationRow = result?;
            let slot = &mut records[row.channel.slot()];
            if slot.is_some() {
                return Err(Error::MalformedCalibration(format!(
                    "{} is calibrated twice",
                    row.channel
                )));
            }
            *slot = Some(CalibrationRecord {
                zero: row.zero,
                factor: row.factor,
            });
        }

        let mut complete = [CalibrationRecord {
            zero: 0.0,
            factor: 0.0,
        }; 4];
        for (channel, (record, slot)) in Channel::ALL
            .iter()
            .zip(complete.iter_mut().zip(records))
        {
            *record = slot.ok_or_else(|| {
                Error::MalformedCalibration(format!("{channel} has no calibration record"))
            })?;
        }
        Self::new(complete)
    }

    #[must_use]
    pub const fn get(&self, channel: Channel) -> CalibrationRecord {
        self.records[channel.slot()]
    }
}

/// `(raw - zero) * factor`, elementwise
#[must_use]
pub fn to_physical(raw: ArrayView1<'_, f64>, zero: f64, factor: f64) -> Array1<f64> {
    raw.mapv(|value| (value - zero) * factor)
}

/// Drop `start_cut` samples from the head and `end_cut` from the tail
///
/// # Errors
/// [`Error::InsufficientSamples`] if nothing would remain.
pub fn trim(series: ArrayView1<'_, f64>, start_cut: usize, end_cut: usize) -> Result<ArrayView1<'_, f64>> {
    let len = series.len();
    if start_cut + end_cut >= len {
        return Err(Error::InsufficientSamples {
            len,
            start_cut,
            end_cut,
        });
    }
    Ok(series.slice_move(s![start_cut..len - end_cut]))
}

/// Summary of the steady-state plateau of one channel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    /// `(max - mean) / max` in percent, `None` when `max` is zero
    ///
    /// A valid steady-state run stays within about 3%.
    pub pct_dev: Option<f64>,
}

/// # Errors
/// [`Error::InsufficientSamples`] for an empty series.
pub fn reduce(series: ArrayView1<'_, f64>) -> Result<ChannelStats> {
    let insufficient = || Error::InsufficientSamples {
        len: series.len(),
        start_cut: 0,
        end_cut: 0,
    };
    let (min, max) = min_max(series).ok_or_else(insufficient)?;
    let mean = mean(series).ok_or_else(insufficient)?;
    let stddev = standard_deviation(series).ok_or_else(insufficient)?;
    let pct_dev = (max != 0.0).then(|| (max - mean) / max * 100.0);

    Ok(ChannelStats {
        min,
        max,
        mean,
        stddev,
        pct_dev,
    })
}

/// Remove rows whose every value is zero
///
/// All-zero rows are placeholders for missing runs or samples and must not enter any statistic.
#[must_use]
pub fn zero_row_filter(table: ArrayView2<'_, f64>) -> Array2<f64> {
    let keep: Vec<usize> = table
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|v| *v != 0.0))
        .map(|(ii, _)| ii)
        .collect();
    table.select(Axis(0), &keep)
}

/// File name of the raw table of `run`
#[must_use]
pub fn run_file_name(run: u32) -> String {
    format!("R{run}.csv")
}

/// File name of the calibration record of `run`
#[must_use]
pub fn run_calibration_file_name(run: u32) -> String {
    format!("R{run}_CAL.csv")
}

/// Raw table of one run
#[derive(Clone, Debug)]
pub struct RawRun {
    pub run: u32,
    samples: Array2<f64>,
}

#[derive(Deserialize)]
struct RawRow(f64, f64, f64, f64, f64);

impl RawRun {
    /// # Errors
    /// [`Error::Parse`] if `samples` does not have five columns.
    pub fn new(run: u32, samples: Array2<f64>) -> Result<Self> {
        if samples.ncols() != RAW_COLUMNS {
            return Err(Error::Parse(format!(
                "run {run}: expected {RAW_COLUMNS} columns, found {}",
                samples.ncols()
            )));
        }
        Ok(Self { run, samples })
    }

    /// Read a raw run table with a header row
    ///
    /// # Errors
    /// [`Error::MissingFile`] when the file is absent, [`Error::Unreadable`] when it cannot be read,
    /// [`Error::Csv`] for malformed rows.
    pub fn from_file(path: &Path, run: u32) -> Result<Self> {
        let file = read_input(path)?;
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(&file[..]);

        let mut values = vec![];
        for result in rdr.deserialize() {
            let RawRow(time, speed, fwd, aft, drag) = result?;
            values.extend_from_slice(&[time, speed, fwd, aft, drag]);
        }
        let rows = values.len() / RAW_COLUMNS;
        Self::new(run, Array2::from_shape_vec((rows, RAW_COLUMNS), values)?)
    }

    #[must_use]
    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.samples.view()
    }

    #[must_use]
    pub fn time(&self) -> ArrayView1<'_, f64> {
        self.samples.column(0)
    }

    #[must_use]
    pub fn channel(&self, channel: Channel) -> ArrayView1<'_, f64> {
        self.samples.column(channel.column())
    }
}

/// A run reduced to physical-unit channel statistics
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReducedRun {
    pub run: u32,
    /// Hz, `None` when the time column spans no time
    pub sampling_rate: Option<f64>,
    pub sample_count: usize,
    /// Seconds
    pub record_time: f64,
    /// m/s
    pub speed: ChannelStats,
    /// mm
    pub fwd_lvdt: ChannelStats,
    /// mm
    pub aft_lvdt: ChannelStats,
    /// N
    pub drag: ChannelStats,
}

impl ReducedRun {
    #[must_use]
    pub const fn stats(&self, channel: Channel) -> &ChannelStats {
        match channel {
            Channel::Speed => &self.speed,
            Channel::FwdLvdt => &self.fwd_lvdt,
            Channel::AftLvdt => &self.aft_lvdt,
            Channel::Drag => &self.drag,
        }
    }
}

/// Reduce one raw run
///
/// All-zero rows are filtered first, then every channel is converted, trimmed and summarised.
/// The drag channel is calibrated to grams and reported in newtons.
///
/// # Errors
/// [`Error::InsufficientSamples`] when the trim window exceeds the filtered run length.
#[allow(clippy::cast_precision_loss)]
pub fn reduce_run(raw: &RawRun, calibration: &RunCalibration, window: TrimWindow) -> Result<ReducedRun> {
    let table = zero_row_filter(raw.samples());
    let time = table.column(0);
    let sample_count = table.nrows();

    let span = if sample_count > 1 {
        time[sample_count - 1] - time[0]
    } else {
        0.0
    };
    let (record_time, sampling_rate) = if span > 0.0 {
        (span, Some((sample_count - 1) as f64 / span))
    } else {
        (0.0, None)
    };

    let reduce_channel = |channel: Channel| -> Result<ChannelStats> {
        let record = calibration.get(channel);
        let mut physical = to_physical(table.column(channel.column()), record.zero, record.factor);
        if channel == Channel::Drag {
            physical.mapv_inplace(grams_to_newtons);
        }
        reduce(trim(physical.view(), window.start_cut, window.end_cut)?)
    };

    Ok(ReducedRun {
        run: raw.run,
        sampling_rate,
        sample_count,
        record_time,
        speed: reduce_channel(Channel::Speed)?,
        fwd_lvdt: reduce_channel(Channel::FwdLvdt)?,
        aft_lvdt: reduce_channel(Channel::AftLvdt)?,
        drag: reduce_channel(Channel::Drag)?,
    })
}
