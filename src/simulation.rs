use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Uniform};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{FairError, FairResult};
use crate::params::SimulationParameters;
use crate::types::Bounds;

/// Iterations generated per ChaCha stream in [`Simulator::run_parallel`].
pub const PARALLEL_CHUNK: u32 = 4_096;

/// One simulated year. `index` is 1-based generation order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub index: u32,
    /// Threat events this year, drawn from the TEF range.
    pub tef: f64,
    /// Drawn from `[0, vulnerability]`: the configured vulnerability caps the
    /// draw rather than acting as a per-event threshold.
    pub vulnerability_draw: f64,
    /// Primary draw plus secondary draw.
    pub loss_magnitude: f64,
    pub annual_loss: f64,
}

/// The four uniform distributions a scenario is drawn from.
#[derive(Debug, Clone)]
struct Draws {
    tef: Uniform<f64>,
    vulnerability: Uniform<f64>,
    primary: Uniform<f64>,
    secondary: Uniform<f64>,
}

impl Draws {
    fn new(params: &SimulationParameters) -> FairResult<Self> {
        Ok(Draws {
            tef: closed("threat_event_frequency", params.tef())?,
            vulnerability: closed("vulnerability", Bounds::new(0.0, params.vulnerability()))?,
            primary: closed("primary_loss", params.primary_loss())?,
            secondary: closed("secondary_loss", params.secondary_loss())?,
        })
    }

    fn scenario<R: Rng + ?Sized>(&self, index: u32, rng: &mut R) -> FairResult<ScenarioResult> {
        let tef = checked("tef draw", self.tef.sample(rng))?;
        let vulnerability_draw = checked("vulnerability draw", self.vulnerability.sample(rng))?;
        let primary = self.primary.sample(rng);
        let secondary = self.secondary.sample(rng);
        let loss_magnitude = checked("loss magnitude", primary + secondary)?;
        let annual_loss = checked("annual loss", tef * vulnerability_draw * loss_magnitude)?;

        Ok(ScenarioResult { index, tef, vulnerability_draw, loss_magnitude, annual_loss })
    }
}

fn closed(field: &'static str, bounds: Bounds) -> FairResult<Uniform<f64>> {
    Uniform::new_inclusive(bounds.min, bounds.max)
        .map_err(|e| FairError::invalid(field, format!("cannot sample [{}, {}]: {e}", bounds.min, bounds.max)))
}

fn checked(stage: &'static str, value: f64) -> FairResult<f64> {
    if value.is_finite() { Ok(value) } else { Err(FairError::NonFinite { stage, value }) }
}

/// Draw `params.iterations()` independent scenarios from `rng`, in index
/// order. Either every scenario is produced or an error is returned.
pub fn simulate<R: Rng + ?Sized>(
    params: &SimulationParameters,
    rng: &mut R,
) -> FairResult<Vec<ScenarioResult>> {
    let draws = Draws::new(params)?;
    (1..=params.iterations()).map(|i| draws.scenario(i, rng)).collect()
}

/// Seeded scenario generator. The seed is kept so a stored run can be
/// reproduced exactly.
pub struct Simulator {
    seed: u64,
    rng: ChaCha20Rng,
}

impl Simulator {
    /// Use the configured seed, or draw a fresh one from the thread RNG.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::seeded(config.seed.unwrap_or_else(rand::random))
    }

    pub fn seeded(seed: u64) -> Self {
        Simulator { seed, rng: ChaCha20Rng::seed_from_u64(seed) }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sequential run on the simulator's own stream. Successive calls keep
    /// advancing the stream, so two runs from one `Simulator` differ.
    pub fn run(&mut self, params: &SimulationParameters) -> FairResult<Vec<ScenarioResult>> {
        simulate(params, &mut self.rng)
    }

    /// Rayon-parallel run. The index range is cut into [`PARALLEL_CHUNK`]
    /// blocks and block `k` draws from ChaCha stream `k` under the same seed,
    /// so the output depends only on the seed, never on thread count or
    /// scheduling. Results come back in index order.
    pub fn run_parallel(&self, params: &SimulationParameters) -> FairResult<Vec<ScenarioResult>> {
        let draws = Draws::new(params)?;
        let iterations = params.iterations();
        let chunks = iterations.div_ceil(PARALLEL_CHUNK);

        let seed = self.seed;

        let blocks: Vec<Vec<ScenarioResult>> = (0..chunks)
            .into_par_iter()
            .map(|chunk| {
                let mut rng = ChaCha20Rng::seed_from_u64(seed);
                rng.set_stream(u64::from(chunk));
                let first = chunk * PARALLEL_CHUNK + 1;
                let last = first.saturating_add(PARALLEL_CHUNK - 1).min(iterations);
                (first..=last)
                    .map(|i| draws.scenario(i, &mut rng))
                    .collect::<FairResult<Vec<_>>>()
            })
            .collect::<FairResult<_>>()?;

        Ok(blocks.into_iter().flatten().collect())
    }
}
