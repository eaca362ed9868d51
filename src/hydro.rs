//! Hydrodynamic quantities of a reduced run and their full-scale extrapolation
//!
//! Model-scale coefficients follow the ITTC 1957 correlation line. Full scale is reached by Froude
//! scaling, either with the two-dimensional ITTC 1957 method or the three-dimensional form-factor
//! method.

use crate::calibration::{fit_linear, GRAVITY};
use crate::channel::ReducedRun;
use crate::config::{FullScale, ModelParticulars, WaterProperties};
use crate::{Error, Result};

/// Sea water density at 15 °C (kg/m³)
pub const SEA_WATER_DENSITY: f64 = 1025.0;

/// Sea water kinematic viscosity at 15 °C (m²/s)
pub const SEA_WATER_VISCOSITY: f64 = 1.189_2e-6;

/// Metres per second in one knot
pub const KNOT: f64 = 0.514_444;

/// Fresh water kinematic viscosity (m²/s) at `temperature` °C
#[must_use]
pub fn fresh_water_viscosity(temperature: f64) -> f64 {
    let t = temperature - 12.0;
    (0.585e-3f64.mul_add(t, -0.033_61)).mul_add(t, 1.235_0) * 1e-6
}

/// Fresh water density (kg/m³) at `temperature` °C
#[must_use]
pub fn fresh_water_density(temperature: f64) -> f64 {
    let t = temperature;
    0.000_04f64.mul_add(t.powi(3), (-0.007_7f64).mul_add(t.powi(2), 0.055_2f64.mul_add(t, 1000.1)))
}

/// `V / sqrt(g L)`
#[must_use]
pub fn froude_number(speed: f64, length: f64) -> f64 {
    speed / (GRAVITY * length).sqrt()
}

/// `V L / ν`
#[must_use]
pub fn reynolds_number(speed: f64, length: f64, viscosity: f64) -> f64 {
    speed * length / viscosity
}

/// ITTC 1957 model-ship correlation line
#[must_use]
pub fn ittc_friction(reynolds: f64) -> f64 {
    0.075 / (reynolds.log10() - 2.0).powi(2)
}

/// `R / (½ ρ S V²)`
#[must_use]
pub fn resistance_coefficient(resistance: f64, density: f64, area: f64, speed: f64) -> f64 {
    resistance / (0.5 * density * area * speed.powi(2))
}

/// Mean sinkage of the two LVDTs (mm)
#[must_use]
pub fn heave(fwd: f64, aft: f64) -> f64 {
    (fwd + aft) / 2.0
}

/// Running trim in degrees, bow-up positive when the forward LVDT reads higher
#[must_use]
pub fn trim_angle(fwd: f64, aft: f64, separation: f64) -> f64 {
    ((fwd - aft) / separation).atan().to_degrees()
}

/// Hydrodynamic quantities of one run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hydrodynamics {
    pub water_temperature: f64,
    pub kinematic_viscosity: f64,
    pub water_density: f64,
    pub wetted_area: f64,
    pub model_length: f64,
    pub froude_number: f64,
    pub reynolds_number: f64,
    /// N
    pub total_resistance: f64,
    pub ct_model: f64,
    pub cf_model: f64,
    pub cr: f64,
    /// mm
    pub heave: f64,
    /// degrees
    pub trim: f64,
    pub full_scale: FullScaleResistance,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FullScaleResistance {
    /// m/s
    pub speed: f64,
    pub speed_knots: f64,
    pub reynolds_number: f64,
    pub cf: f64,
    /// ITTC 1957 method
    pub ct: f64,
    /// N, ITTC 1957 method
    pub rt: f64,
    /// kW, ITTC 1957 method
    pub effective_power: f64,
    /// (1+k)
    pub form_factor: f64,
    /// Form-factor method
    pub ct_form_factor: f64,
    /// N, form-factor method
    pub rt_form_factor: f64,
}

/// Evaluates the hydrodynamic quantities of reduced runs for one model and tank
#[derive(Clone, Copy, Debug)]
pub struct HydroModel {
    pub model: ModelParticulars,
    pub water: WaterProperties,
    pub full_scale: FullScale,
}

impl HydroModel {
    /// # Errors
    /// [`Error::InsufficientData`] when the run has no forward speed.
    pub fn evaluate(&self, run: &ReducedRun, form_factor: f64) -> Result<Hydrodynamics> {
        let speed = run.speed.mean;
        if speed <= 0.0 || !speed.is_finite() {
            return Err(Error::InsufficientData(format!(
                "run {} has no forward speed ({speed} m/s)",
                run.run
            )));
        }

        let length = self.model.length;
        let area = self.model.wetted_area;
        let temperature = self.water.temperature;
        let viscosity = fresh_water_viscosity(temperature);
        let density = fresh_water_density(temperature);

        let reynolds = reynolds_number(speed, length, viscosity);
        let total_resistance = run.drag.mean;
        let ct_model = resistance_coefficient(total_resistance, density, area, speed);
        let cf_model = ittc_friction(reynolds);

        let fwd = run.fwd_lvdt.mean;
        let aft = run.aft_lvdt.mean;

        Ok(Hydrodynamics {
            water_temperature: temperature,
            kinematic_viscosity: viscosity,
            water_density: density,
            wetted_area: area,
            model_length: length,
            froude_number: froude_number(speed, length),
            reynolds_number: reynolds,
            total_resistance,
            ct_model,
            cf_model,
            cr: ct_model - cf_model,
            heave: heave(fwd, aft),
            trim: trim_angle(fwd, aft, self.model.lvdt_separation),
            full_scale: self.extrapolate(speed, ct_model, cf_model, form_factor),
        })
    }

    fn extrapolate(&self, speed: f64, ct_model: f64, cf_model: f64, form_factor: f64) -> FullScaleResistance {
        let lambda = self.full_scale.scale_ratio;
        let delta_cf = self.full_scale.correlation_allowance;

        let ship_speed = speed * lambda.sqrt();
        let ship_length = self.model.length * lambda;
        let ship_area = self.model.wetted_area * lambda.powi(2);
        let reynolds = reynolds_number(ship_speed, ship_length, SEA_WATER_VISCOSITY);
        let cf = ittc_friction(reynolds);
        let dynamic_pressure = 0.5 * SEA_WATER_DENSITY * ship_area * ship_speed.powi(2);

        let ct = ct_model - cf_model + cf + delta_cf;
        let rt = ct * dynamic_pressure;

        let wave = form_factor.mul_add(-cf_model, ct_model);
        let ct_form_factor = form_factor.mul_add(cf, wave) + delta_cf;

        FullScaleResistance {
            speed: ship_speed,
            speed_knots: ship_speed / KNOT,
            reynolds_number: reynolds,
            cf,
            ct,
            rt,
            effective_power: rt * ship_speed / 1000.0,
            form_factor,
            ct_form_factor,
            rt_form_factor: ct_form_factor * dynamic_pressure,
        }
    }
}

/// Point of a Prohaska plot
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProhaskaPoint {
    pub froude_number: f64,
    pub ct: f64,
    pub cf: f64,
}

/// Form factor (1+k) by the Prohaska method
///
/// `CT/CF` is fitted linearly against `Fr⁴/CF`; the intercept is `1+k`.
///
/// # Errors
/// [`Error::InsufficientData`] for fewer than two usable points.
pub fn prohaska_form_factor(points: &[ProhaskaPoint]) -> Result<f64> {
    let (x, y): (Vec<f64>, Vec<f64>) = points
        .iter()
        .filter(|p| p.cf > 0.0 && p.ct.is_finite() && p.froude_number.is_finite())
        .map(|p| (p.froude_number.powi(4) / p.cf, p.ct / p.cf))
        .unzip();
    Ok(fit_linear(&x, &y)?.intercept)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channel::ChannelStats;

    fn plateau(mean: f64) -> ChannelStats {
        ChannelStats {
            min: mean,
            max: mean,
            mean,
            stddev: 0.0,
            pct_dev: Some(0.0),
        }
    }

    fn model() -> HydroModel {
        HydroModel {
            model: ModelParticulars {
                length: 2.0,
                wetted_area: 0.6,
                lvdt_separation: 1000.0,
            },
            water: WaterProperties { temperature: 15.0 },
            full_scale: FullScale {
                scale_ratio: 20.0,
                correlation_allowance: 0.0,
                form_factor: 1.2,
            },
        }
    }

    #[test]
    fn water_properties_match_tabulated_values() {
        // ITTC fresh water at 15 °C: ν = 1.1386e-6 m²/s, ρ ≈ 999.1 kg/m³
        approx::assert_relative_eq!(fresh_water_viscosity(15.0), 1.1386e-6, max_relative = 1e-3);
        approx::assert_relative_eq!(fresh_water_density(15.0), 999.1, max_relative = 1e-3);
    }

    #[test]
    fn friction_line_matches_ittc_1957() {
        approx::assert_relative_eq!(ittc_friction(1e7), 0.075 / 25.0);
    }

    #[test]
    fn trim_is_zero_for_level_sinkage() {
        approx::assert_relative_eq!(trim_angle(-8.0, -8.0, 1000.0), 0.0);
        approx::assert_relative_eq!(heave(-8.0, -8.4), -8.2, epsilon = 1e-12);
        approx::assert_relative_eq!(trim_angle(500.0, -500.0, 1000.0), 45.0, epsilon = 1e-12);
    }

    #[test]
    fn run_quantities_are_consistent() {
        let run = ReducedRun {
            run: 1,
            sampling_rate: Some(200.0),
            sample_count: 4000,
            record_time: 20.0,
            speed: plateau(1.5),
            fwd_lvdt: plateau(-6.0),
            aft_lvdt: plateau(-10.0),
            drag: plateau(12.0),
        };
        let model = model();
        let hydro = model.evaluate(&run, 1.2).unwrap();

        approx::assert_relative_eq!(hydro.froude_number, 1.5 / (GRAVITY * 2.0).sqrt());
        approx::assert_relative_eq!(hydro.cr, hydro.ct_model - hydro.cf_model);
        approx::assert_relative_eq!(hydro.heave, -8.0);
        assert!(hydro.trim > 0.0);

        // Froude scaling keeps the Froude number
        let fs = hydro.full_scale;
        approx::assert_relative_eq!(
            froude_number(fs.speed, 2.0 * 20.0),
            hydro.froude_number,
            max_relative = 1e-12
        );
        // Both methods agree when the form factor is one
        let no_form = model.evaluate(&run, 1.0).unwrap().full_scale;
        approx::assert_relative_eq!(no_form.ct, no_form.ct_form_factor, max_relative = 1e-12);
        // Friction is lower at full scale, so the total coefficient falls
        assert!(fs.ct < hydro.ct_model);
    }

    #[test]
    fn stationary_run_has_no_hydrodynamics() {
        let run = ReducedRun {
            run: 2,
            sampling_rate: None,
            sample_count: 10,
            record_time: 0.0,
            speed: plateau(0.0),
            fwd_lvdt: plateau(0.0),
            aft_lvdt: plateau(0.0),
            drag: plateau(0.0),
        };
        assert!(matches!(
            model().evaluate(&run, 1.2),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn prohaska_intercept_recovers_form_factor() {
        let one_plus_k = 1.15;
        let c = 0.8;
        let points: Vec<ProhaskaPoint> = [(0.10, 0.0045), (0.12, 0.0044), (0.14, 0.0043), (0.16, 0.0042)]
            .into_iter()
            .map(|(froude_number, cf)| ProhaskaPoint {
                froude_number,
                cf,
                ct: one_plus_k * cf + c * froude_number.powi(4),
            })
            .collect();
        approx::assert_relative_eq!(prohaska_form_factor(&points).unwrap(), one_plus_k, max_relative = 1e-9);
        assert!(prohaska_form_factor(&points[..1]).is_err());
    }
}
