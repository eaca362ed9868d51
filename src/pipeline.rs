//! The batch reduction of a whole test campaign
//!
//! Stages run one after another, each consuming the whole output of the previous one:
//! calibration fits, run reduction into the [`RunTable`], the form factor, aggregation by
//! condition and Froude number, and the trend fits. A failure is confined to the run or fit it
//! belongs to; an unreadable input file is skipped like a missing one.

use tracing::{info, warn};

use crate::aggregate::{aggregate, ConditionCode};
use crate::calibration;
use crate::channel::{reduce_run, run_calibration_file_name, run_file_name, RawRun, ReducedRun, RunCalibration};
use crate::config::Config;
use crate::curve::fit_conditions;
use crate::hydro::{prohaska_form_factor, HydroModel, ProhaskaPoint};
use crate::report::{FormFactorSource, Report};
use crate::run::{RunSummary, RunTable};
use crate::{Error, Result};

impl From<&Config> for HydroModel {
    fn from(config: &Config) -> Self {
        Self {
            model: config.model,
            water: config.water,
            full_scale: config.full_scale,
        }
    }
}

/// Load and reduce one run from the run directory
///
/// # Errors
/// [`Error::MissingFile`] when either file of the run is absent, otherwise the reduction
/// failures of [`reduce_run`].
pub fn load_run(config: &Config, run: u32) -> Result<ReducedRun> {
    let dir = config.runs_dir();
    let raw = RawRun::from_file(&dir.join(run_file_name(run)), run)?;
    let calibration = RunCalibration::from_file(&dir.join(run_calibration_file_name(run)))?;
    reduce_run(&raw, &calibration, config.trim)
}

/// Record a recoverable failure of `run` against the table, or hand back a fatal one
fn skip_or_abort(runs: &mut RunTable, run: u32, e: Error) -> Result<()> {
    if !e.is_recoverable() {
        return Err(e);
    }
    match &e {
        Error::MissingFile(_) => warn!("run {run} skipped: {e}"),
        _ => warn!("run {run} rejected: {e}"),
    }
    runs.skip(run, e.to_string());
    Ok(())
}

/// Prohaska form factor over the reduced runs of `condition`
///
/// The form factor does not enter the model-scale coefficients the fit uses, so `provisional`
/// only fills the full-scale fields of the points.
fn prohaska_from_runs(
    model: &HydroModel,
    reduced: &[(ReducedRun, ConditionCode)],
    condition: ConditionCode,
    provisional: f64,
) -> Result<(f64, usize)> {
    let points: Vec<ProhaskaPoint> = reduced
        .iter()
        .filter(|(_, code)| *code == condition)
        .filter_map(|(run, _)| model.evaluate(run, provisional).ok())
        .map(|hydro| ProhaskaPoint {
            froude_number: hydro.froude_number,
            ct: hydro.ct_model,
            cf: hydro.cf_model,
        })
        .collect();
    let k = prohaska_form_factor(&points)?;
    if !k.is_finite() || k <= 0.0 {
        return Err(Error::UndefinedFit(format!("form factor {k} is not physical")));
    }
    Ok((k, points.len()))
}

/// Reduce every run named by `config` and fit the trends of every condition
///
/// # Errors
/// Returns an error only for failures that are not confined to one run, calibration file or
/// fit.
pub fn run(config: &Config) -> Result<Report> {
    let calibration = calibration::build(&config.calibration_dir())?;
    for uncertainty in calibration.uncertainty() {
        info!(
            "{}: mean SEE {:.4} {unit}, worst {:.4} {unit} over {} files",
            uncertainty.sensor,
            uncertainty.mean_see,
            uncertainty.worst_see,
            uncertainty.files,
            unit = uncertainty.sensor.unit()
        );
    }

    let mut runs = RunTable::new();
    let mut reduced = vec![];
    for run in config.runs.iter() {
        let Some(condition) = config.condition_of(run) else {
            warn!("run {run} skipped: no condition covers it");
            runs.skip(run, "no condition covers this run".to_owned());
            continue;
        };
        match load_run(config, run) {
            Ok(reduced_run) => reduced.push((reduced_run, condition)),
            Err(e) => skip_or_abort(&mut runs, run, e)?,
        }
    }

    let model = HydroModel::from(config);
    let configured = config.full_scale.form_factor;
    let (form_factor, form_factor_source) = match config.form_factor_condition {
        Some(condition) => match prohaska_from_runs(&model, &reduced, condition, configured) {
            Ok((k, count)) => {
                info!("form factor (1+k) = {k:.4} from {count} runs of condition {condition}");
                (k, FormFactorSource::Prohaska { runs: count })
            }
            Err(e) => {
                warn!("using configured form factor {configured}: {e}");
                (configured, FormFactorSource::Configured)
            }
        },
        None => (configured, FormFactorSource::Configured),
    };

    for (run, condition) in &reduced {
        match model.evaluate(run, form_factor) {
            Ok(hydro) => runs.insert(RunSummary::new(run, *condition, hydro))?,
            Err(e) => skip_or_abort(&mut runs, run.run, e)?,
        }
    }
    info!("{} runs reduced, {} skipped", runs.len(), runs.skipped().len());

    let aggregates = aggregate(&runs.summaries(), config.froude_decimals)?;
    let overlays = fit_conditions(&aggregates, config);
    let failed = overlays
        .iter()
        .filter(|o| o.average_fit.is_none() || o.minimum_fit.is_none())
        .count();
    info!("{} trend overlays, {failed} with a missing fit", overlays.len());

    Ok(Report {
        calibration,
        runs,
        form_factor,
        form_factor_source,
        aggregates,
        overlays,
    })
}
