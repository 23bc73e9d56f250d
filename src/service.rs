//! Front-end facing operations: run, view, list, compare, export, delete.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::export;
use crate::params::{ParameterInput, SimulationParameters};
use crate::simulation::Simulator;
use crate::stats::{self, Histogram, SimulationSummary};
use crate::store::{ListQuery, NewSimulation, Page, SimulationStore, StoredSimulation};
use crate::types::SimulationId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(flatten)]
    pub input: ParameterInput,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: String,
    /// Generate on the rayon pool instead of a single stream.
    #[serde(default)]
    pub parallel: bool,
}

impl RunRequest {
    pub fn new(input: ParameterInput) -> Self {
        RunRequest { input, notes: String::new(), tags: String::new(), parallel: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub id: SimulationId,
    pub seed: u64,
    pub params: SimulationParameters,
    pub summary: SimulationSummary,
    pub histogram: Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationDetail {
    pub simulation: StoredSimulation,
    pub histogram: Histogram,
}

pub struct FairService {
    config: EngineConfig,
    store: SimulationStore,
}

impl FairService {
    pub fn new(config: EngineConfig, store: SimulationStore) -> ServiceResult<Self> {
        config.check()?;
        Ok(FairService { config, store })
    }

    /// Open the store at `config.db_path`.
    pub fn open(config: EngineConfig) -> ServiceResult<Self> {
        let store = SimulationStore::open(&config.db_path)?;
        Self::new(config, store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate, simulate, summarize and persist one run.
    pub fn run(&mut self, request: &RunRequest) -> ServiceResult<RunOutcome> {
        let params = request.input.validate(&self.config).inspect_err(|e| {
            warn!(error = %e, "rejected simulation request");
        })?;

        let started = Instant::now();
        let mut simulator = Simulator::from_config(&self.config);
        let seed = simulator.seed();
        let results = if request.parallel {
            simulator.run_parallel(&params)?
        } else {
            simulator.run(&params)?
        };
        let losses: Vec<f64> = results.iter().map(|r| r.annual_loss).collect();
        let summary = stats::summarize(&losses)?;
        let histogram = stats::histogram(&losses, self.config.histogram_bins)?;
        debug!(
            iterations = params.iterations(),
            parallel = request.parallel,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "simulation generated"
        );

        let id = self.store.save(&NewSimulation {
            params: &params,
            summary: &summary,
            results: &results,
            notes: &request.notes,
            tags: &request.tags,
            seed: Some(seed),
        })?;
        info!(%id, seed, iterations = params.iterations(), mean = summary.mean, "simulation saved");

        Ok(RunOutcome { id, seed, params, summary, histogram })
    }

    /// Stored run plus a histogram recomputed from its persisted losses.
    pub fn detail(&self, id: SimulationId) -> ServiceResult<SimulationDetail> {
        let simulation = self.store.get(id)?;
        let losses = self.store.annual_losses(id)?;
        let histogram = stats::histogram(&losses, self.config.histogram_bins)?;
        Ok(SimulationDetail { simulation, histogram })
    }

    pub fn list(&self, query: &ListQuery) -> ServiceResult<Page<StoredSimulation>> {
        Ok(self.store.list(query)?)
    }

    /// Details of 2 to `max_compare` distinct runs, in the order given.
    pub fn compare(&self, ids: &[SimulationId]) -> ServiceResult<Vec<SimulationDetail>> {
        if ids.len() < 2 {
            return Err(ServiceError::Compare {
                reason: "select at least 2 simulations".to_string(),
            });
        }
        if ids.len() > self.config.max_compare {
            return Err(ServiceError::Compare {
                reason: format!("at most {} simulations can be compared", self.config.max_compare),
            });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(ServiceError::Compare { reason: format!("simulation {dup} listed twice") });
        }
        ids.iter().map(|&id| self.detail(id)).collect()
    }

    pub fn export_csv<W: Write>(&self, id: SimulationId, out: &mut W) -> ServiceResult<()> {
        let simulation = self.store.get(id)?;
        let results = self.store.results(id)?;
        export::write_csv(out, &simulation, &results)?;
        Ok(())
    }

    /// Write the CSV export to `path`, or to the dated default file name in
    /// the working directory. Returns the path written.
    pub fn export_to_file(&self, id: SimulationId, path: Option<&Path>) -> ServiceResult<PathBuf> {
        let simulation = self.store.get(id)?;
        let results = self.store.results(id)?;
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(export::file_name(&simulation, Utc::now().date_naive())),
        };
        let mut writer = BufWriter::new(File::create(&path)?);
        export::write_csv(&mut writer, &simulation, &results)?;
        writer.flush()?;
        info!(%id, path = %path.display(), rows = results.len(), "simulation exported");
        Ok(path)
    }

    pub fn delete(&mut self, id: SimulationId) -> ServiceResult<()> {
        self.store.delete(id)?;
        info!(%id, "simulation deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FairError, StoreError};

    fn config() -> EngineConfig {
        EngineConfig { min_iterations: 10, default_iterations: 500, seed: Some(11), ..Default::default() }
    }

    fn service() -> FairService {
        FairService::new(config(), SimulationStore::open_in_memory().unwrap()).unwrap()
    }

    fn request() -> RunRequest {
        RunRequest::new(ParameterInput {
            asset_value: 1_000_000.0,
            tef_min: 0.1,
            tef_max: 5.0,
            vulnerability_percent: 25.0,
            primary_loss_min: 10_000.0,
            primary_loss_max: 500_000.0,
            secondary_loss_min: 0.0,
            secondary_loss_max: 100_000.0,
            iterations: None,
        })
    }

    #[test]
    fn run_persists_and_detail_rebuilds_histogram() {
        let mut svc = service();
        let outcome = svc.run(&request()).unwrap();
        assert_eq!(outcome.seed, 11);
        assert_eq!(outcome.params.iterations(), 500);
        assert_eq!(outcome.histogram.bin_count(), 50);
        assert_eq!(outcome.histogram.total(), 500);

        let detail = svc.detail(outcome.id).unwrap();
        assert_eq!(detail.simulation.summary, outcome.summary);
        assert_eq!(detail.histogram, outcome.histogram);
    }

    #[test]
    fn entered_vulnerability_survives_storage_and_export() {
        let mut svc = service();
        let mut req = request();
        req.input.vulnerability_percent = 7.0;
        let id = svc.run(&req).unwrap().id;

        let stored = svc.detail(id).unwrap().simulation;
        assert_eq!(stored.params.vulnerability_percent(), 7.0);
        assert_eq!(stored.params.vulnerability(), 0.07);
        assert_eq!(stored.params.to_input(), ParameterInput { iterations: Some(500), ..req.input });

        let mut buf = Vec::new();
        svc.export_csv(id, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let line = text.lines().find(|l| l.starts_with("Vulnerability %"));
        assert_eq!(line, Some("Vulnerability %,7"));
    }

    #[test]
    fn invalid_request_never_reaches_the_store() {
        let mut svc = service();
        let mut bad = request();
        bad.input.vulnerability_percent = 140.0;
        let err = svc.run(&bad).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Engine(FairError::InvalidParameter { field: "vulnerability_percent", .. })
        ));
        assert_eq!(svc.list(&ListQuery::new(svc.config())).unwrap().total, 0);
    }

    #[test]
    fn parallel_and_sequential_runs_both_complete() {
        let mut svc = service();
        let mut req = request();
        req.input.iterations = Some(9_000);
        req.parallel = true;
        let par = svc.run(&req).unwrap();
        assert_eq!(par.histogram.total(), 9_000);
        assert_eq!(svc.detail(par.id).unwrap().simulation.params.iterations(), 9_000);
    }

    #[test]
    fn compare_enforces_selection_size() {
        let mut svc = service();
        let a = svc.run(&request()).unwrap().id;
        let b = svc.run(&request()).unwrap().id;
        let c = svc.run(&request()).unwrap().id;
        let d = svc.run(&request()).unwrap().id;

        assert!(matches!(svc.compare(&[a]), Err(ServiceError::Compare { .. })));
        assert!(matches!(svc.compare(&[a, b, c, d]), Err(ServiceError::Compare { .. })));
        assert!(matches!(svc.compare(&[a, a]), Err(ServiceError::Compare { .. })));

        let details = svc.compare(&[c, a]).unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].simulation.id, c);
        assert_eq!(details[1].simulation.id, a);
    }

    #[test]
    fn compare_reports_missing_simulation() {
        let mut svc = service();
        let a = svc.run(&request()).unwrap().id;
        let err = svc.compare(&[a, SimulationId(404)]).unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::NotFound { .. })));
    }

    #[test]
    fn export_writes_every_iteration() {
        let mut svc = service();
        let id = svc.run(&request()).unwrap().id;
        let mut buf = Vec::new();
        svc.export_csv(id, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        // 11 parameter lines, blank, 8 statistics lines, blank, header, rows.
        assert_eq!(text.lines().count(), 11 + 1 + 8 + 1 + 1 + 500);
        assert!(text.lines().last().unwrap().starts_with("500,"));
    }

    #[test]
    fn delete_then_detail_is_not_found() {
        let mut svc = service();
        let id = svc.run(&request()).unwrap().id;
        svc.delete(id).unwrap();
        assert!(matches!(svc.detail(id), Err(ServiceError::Store(StoreError::NotFound { .. }))));
        assert!(matches!(svc.delete(id), Err(ServiceError::Store(StoreError::NotFound { .. }))));
    }
}
