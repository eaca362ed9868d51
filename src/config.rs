use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::Deserialize;

use crate::aggregate::ConditionCode;
use crate::run::Column;
use crate::{Error, Result};

/// Static configuration of a test campaign
///
/// Every field carries a default, so an empty TOML file yields the campaign constants.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `runs/` and `calibration/`
    pub data_root: PathBuf,
    /// Directory the delimited tables are written to
    pub output_dir: PathBuf,
    /// First and last run number, inclusive
    pub runs: RunRange,
    pub trim: TrimWindow,
    pub model: ModelParticulars,
    pub water: WaterProperties,
    pub full_scale: FullScale,
    /// Condition table, keyed by code
    pub conditions: Vec<ConditionSpec>,
    /// Results-table quantities fitted against Froude number for every condition
    pub fitted_quantities: Vec<Column>,
    /// Number of abscissae the fitted curves are evaluated at
    pub curve_samples: usize,
    /// Condition whose runs give the Prohaska form factor
    pub form_factor_condition: Option<ConditionCode>,
    /// Decimal places of the nominal Froude number repeats are bucketed by; exact match when absent
    pub froude_decimals: Option<u32>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct RunRange {
    pub first: u32,
    pub last: u32,
}

impl RunRange {
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.first..=self.last
    }
}

/// Samples discarded from the head and tail of a run to remove acceleration transients
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct TrimWindow {
    pub start_cut: usize,
    pub end_cut: usize,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ModelParticulars {
    /// Waterline length (m)
    pub length: f64,
    /// Wetted surface area (m²)
    pub wetted_area: f64,
    /// Longitudinal distance between the forward and aft LVDT (mm)
    pub lvdt_separation: f64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct WaterProperties {
    /// Tank water temperature (°C)
    pub temperature: f64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct FullScale {
    /// Geometric scale ratio λ
    pub scale_ratio: f64,
    /// Correlation allowance ΔCF
    pub correlation_allowance: f64,
    /// Form factor (1+k) used when no form-factor runs are available
    pub form_factor: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConditionSpec {
    pub code: ConditionCode,
    pub description: String,
    /// Inclusive run ranges belonging to this condition
    pub runs: Vec<RunRange>,
    /// Polynomial degree used for the Froude-number trend fits
    pub fit_degree: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            output_dir: PathBuf::from("results"),
            runs: RunRange { first: 1, last: 249 },
            trim: TrimWindow {
                start_cut: 1000,
                end_cut: 400,
            },
            model: ModelParticulars {
                length: 2.0,
                wetted_area: 0.58,
                lvdt_separation: 1000.0,
            },
            water: WaterProperties { temperature: 17.5 },
            full_scale: FullScale {
                scale_ratio: 21.6,
                correlation_allowance: 0.0,
                form_factor: 1.18,
            },
            conditions: default_conditions(),
            fitted_quantities: vec![Column::Heave, Column::Trim, Column::CtModel],
            curve_samples: 200,
            form_factor_condition: ConditionCode::new(13).ok(),
            froude_decimals: Some(3),
        }
    }
}

fn default_conditions() -> Vec<ConditionSpec> {
    // (code, description, first run, last run, degree)
    let table: [(u8, &str, u32, u32, usize); 13] = [
        (1, "1,500t, level static trim, no studs", 1, 35, 5),
        (2, "1,500t, level static trim, turbulence studs", 36, 62, 5),
        (3, "1,500t, level static trim, trim tab 5 deg", 63, 80, 4),
        (4, "1,500t, level static trim, trim tab 0 deg", 81, 98, 4),
        (5, "1,500t, level static trim, trim tab 10 deg", 99, 116, 4),
        (6, "1,500t, level static trim, 5mm studs", 117, 131, 5),
        (7, "1,500t, level static trim", 132, 146, 7),
        (8, "1,500t, -0.5 deg static trim", 147, 161, 7),
        (9, "1,500t, 0.5 deg static trim", 162, 176, 7),
        (10, "1,804t, level static trim", 177, 191, 6),
        (11, "1,804t, -0.5 deg static trim", 192, 206, 6),
        (12, "1,804t, 0.5 deg static trim", 207, 221, 6),
        (13, "form factor runs", 222, 249, 4),
    ];

    table
        .into_iter()
        .filter_map(|(code, description, first, last, fit_degree)| {
            Some(ConditionSpec {
                code: ConditionCode::new(code).ok()?,
                description: description.to_owned(),
                runs: vec![RunRange { first, last }],
                fit_degree,
            })
        })
        .collect()
}

impl Config {
    /// Read a TOML config, falling back to defaults for absent keys
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not deserialise.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// # Errors
    /// Returns an error if `contents` is not a valid config, or if the condition table is
    /// inconsistent.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (a, b) in self.conditions.iter().tuple_combinations() {
            if a.code == b.code {
                return Err(Error::InvalidConfig(format!(
                    "condition {} is declared twice",
                    a.code
                )));
            }
            let overlapping = a
                .runs
                .iter()
                .cartesian_product(&b.runs)
                .any(|(ra, rb)| ra.first <= rb.last && rb.first <= ra.last);
            if overlapping {
                return Err(Error::InvalidConfig(format!(
                    "conditions {} and {} share run numbers",
                    a.code, b.code
                )));
            }
        }
        if self.curve_samples < 2 {
            return Err(Error::InvalidConfig("curve_samples must be at least 2".to_owned()));
        }
        Ok(())
    }

    /// The condition a run number belongs to, if any
    #[must_use]
    pub fn condition_of(&self, run: u32) -> Option<ConditionCode> {
        self.conditions
            .iter()
            .find(|spec| {
                spec.runs
                    .iter()
                    .any(|range| (range.first..=range.last).contains(&run))
            })
            .map(|spec| spec.code)
    }

    #[must_use]
    pub fn condition(&self, code: ConditionCode) -> Option<&ConditionSpec> {
        self.conditions.iter().find(|spec| spec.code == code)
    }

    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.data_root.join("runs")
    }

    #[must_use]
    pub fn calibration_dir(&self) -> PathBuf {
        self.data_root.join("calibration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_campaign_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.trim.start_cut, 1000);
        assert_eq!(config.trim.end_cut, 400);
        assert_eq!(config.conditions.len(), 13);
        assert_eq!(config.condition_of(1).map(ConditionCode::get), Some(1));
        assert_eq!(config.condition_of(249).map(ConditionCode::get), Some(13));
        assert_eq!(config.condition_of(250), None);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let config = Config::from_toml(
            r#"
            curve_samples = 50
            fitted_quantities = ["heave", "trim"]

            [trim]
            start_cut = 10
            end_cut = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.curve_samples, 50);
        assert_eq!(config.trim, TrimWindow { start_cut: 10, end_cut: 5 });
        assert_eq!(config.fitted_quantities, vec![Column::Heave, Column::Trim]);
        approx::assert_relative_eq!(config.model.length, 2.0);
    }

    #[test]
    fn overlapping_condition_runs_are_rejected() {
        let result = Config::from_toml(
            r#"
            [[conditions]]
            code = 1
            description = "a"
            runs = [{ first = 1, last = 10 }]
            fit_degree = 4

            [[conditions]]
            code = 2
            description = "b"
            runs = [{ first = 10, last = 20 }]
            fit_degree = 4
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn out_of_range_condition_code_is_rejected() {
        let result = Config::from_toml(
            r#"
            [[conditions]]
            code = 14
            description = "a"
            runs = [{ first = 1, last = 10 }]
            fit_degree = 4
            "#,
        );
        assert!(result.is_err());
    }
}
