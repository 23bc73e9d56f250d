use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{FairError, FairResult};
use crate::types::Bounds;

/// Raw, unvalidated request as a front end collects it. Vulnerability is a
/// percentage here; the iteration count may be left to the configured default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInput {
    pub asset_value: f64,
    pub tef_min: f64,
    pub tef_max: f64,
    pub vulnerability_percent: f64,
    pub primary_loss_min: f64,
    pub primary_loss_max: f64,
    pub secondary_loss_min: f64,
    pub secondary_loss_max: f64,
    #[serde(default)]
    pub iterations: Option<u32>,
}

/// Accepted parameters. Only obtainable through [`ParameterInput::validate`]
/// (or [`SimulationParameters::new`], which runs the same checks), so every
/// range the simulator sees is finite, non-negative and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationParameters {
    asset_value: f64,
    tef: Bounds,
    /// Unit fraction in `[0, 1]`.
    vulnerability: f64,
    /// Percentage as entered; `vulnerability` is derived from it.
    vulnerability_percent: f64,
    primary_loss: Bounds,
    secondary_loss: Bounds,
    iterations: u32,
}

impl ParameterInput {
    /// Check every constraint, in the order a user would fix them, and
    /// convert to the engine's representation.
    pub fn validate(&self, config: &EngineConfig) -> FairResult<SimulationParameters> {
        finite("asset_value", self.asset_value)?;
        if self.asset_value <= 0.0 {
            return Err(FairError::invalid("asset_value", "must be greater than 0"));
        }

        let tef = range("threat_event_frequency", self.tef_min, self.tef_max)?;

        finite("vulnerability_percent", self.vulnerability_percent)?;
        if !(0.0..=100.0).contains(&self.vulnerability_percent) {
            return Err(FairError::invalid(
                "vulnerability_percent",
                "must be between 0 and 100",
            ));
        }

        let primary_loss = range("primary_loss", self.primary_loss_min, self.primary_loss_max)?;
        let secondary_loss =
            range("secondary_loss", self.secondary_loss_min, self.secondary_loss_max)?;

        let iterations = self.iterations.unwrap_or(config.default_iterations);
        if !(config.min_iterations..=config.max_iterations).contains(&iterations) {
            return Err(FairError::invalid(
                "iterations",
                format!(
                    "must be between {} and {}",
                    config.min_iterations, config.max_iterations
                ),
            ));
        }

        Ok(SimulationParameters {
            asset_value: self.asset_value,
            tef,
            vulnerability: self.vulnerability_percent / 100.0,
            vulnerability_percent: self.vulnerability_percent,
            primary_loss,
            secondary_loss,
            iterations,
        })
    }
}

impl SimulationParameters {
    /// Build directly from engine-side values (vulnerability as a unit
    /// fraction). The configured iteration bounds only apply to user input
    /// via [`ParameterInput::validate`]; zero iterations is allowed here and
    /// simulates to an empty run.
    pub fn new(
        asset_value: f64,
        tef: Bounds,
        vulnerability: f64,
        primary_loss: Bounds,
        secondary_loss: Bounds,
        iterations: u32,
    ) -> FairResult<Self> {
        finite("asset_value", asset_value)?;
        if asset_value <= 0.0 {
            return Err(FairError::invalid("asset_value", "must be greater than 0"));
        }
        let tef = range("threat_event_frequency", tef.min, tef.max)?;
        finite("vulnerability", vulnerability)?;
        if !(0.0..=1.0).contains(&vulnerability) {
            return Err(FairError::invalid("vulnerability", "must be between 0 and 1"));
        }
        let primary_loss = range("primary_loss", primary_loss.min, primary_loss.max)?;
        let secondary_loss = range("secondary_loss", secondary_loss.min, secondary_loss.max)?;
        Ok(SimulationParameters {
            asset_value,
            tef,
            vulnerability,
            vulnerability_percent: vulnerability * 100.0,
            primary_loss,
            secondary_loss,
            iterations,
        })
    }

    pub fn asset_value(&self) -> f64 {
        self.asset_value
    }

    pub fn tef(&self) -> Bounds {
        self.tef
    }

    pub fn vulnerability(&self) -> f64 {
        self.vulnerability
    }

    /// The percentage the run was requested with. For parameters built from
    /// a fraction through [`SimulationParameters::new`] it is `fraction * 100`.
    pub fn vulnerability_percent(&self) -> f64 {
        self.vulnerability_percent
    }

    /// Restore the percentage recorded alongside a stored fraction.
    pub(crate) fn with_vulnerability_percent(mut self, percent: f64) -> Self {
        self.vulnerability_percent = percent;
        self
    }

    pub fn primary_loss(&self) -> Bounds {
        self.primary_loss
    }

    pub fn secondary_loss(&self) -> Bounds {
        self.secondary_loss
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Combined primary + secondary loss range.
    pub fn loss_magnitude(&self) -> Bounds {
        Bounds::new(
            self.primary_loss.min + self.secondary_loss.min,
            self.primary_loss.max + self.secondary_loss.max,
        )
    }

    /// Largest annual loss any scenario can produce.
    pub fn max_annual_loss(&self) -> f64 {
        self.tef.max * self.vulnerability * self.loss_magnitude().max
    }

    /// Analytic mean annual loss. The three factors are drawn independently,
    /// so the expectation is the product of the interval midpoints with the
    /// vulnerability draw centred on `vulnerability / 2`.
    pub fn expected_annual_loss(&self) -> f64 {
        self.tef.midpoint() * (self.vulnerability / 2.0) * self.loss_magnitude().midpoint()
    }

    /// The input that would validate back to these parameters.
    pub fn to_input(&self) -> ParameterInput {
        ParameterInput {
            asset_value: self.asset_value,
            tef_min: self.tef.min,
            tef_max: self.tef.max,
            vulnerability_percent: self.vulnerability_percent(),
            primary_loss_min: self.primary_loss.min,
            primary_loss_max: self.primary_loss.max,
            secondary_loss_min: self.secondary_loss.min,
            secondary_loss_max: self.secondary_loss.max,
            iterations: Some(self.iterations),
        }
    }
}

fn finite(field: &'static str, value: f64) -> FairResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FairError::invalid(field, format!("{value} is not a finite number")))
    }
}

fn range(field: &'static str, min: f64, max: f64) -> FairResult<Bounds> {
    finite(field, min)?;
    finite(field, max)?;
    if min < 0.0 || max < 0.0 {
        return Err(FairError::invalid(field, "bounds must not be negative"));
    }
    if min > max {
        return Err(FairError::invalid(field, format!("min {min} exceeds max {max}")));
    }
    Ok(Bounds::new(min, max))
}
