use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FairError, FairResult};

pub const DEFAULT_ITERATIONS: u32 = 10_000;
pub const MIN_ITERATIONS: u32 = 1_000;
pub const MAX_ITERATIONS: u32 = 100_000;
pub const RESULTS_PER_PAGE: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;
pub const HISTOGRAM_BINS: usize = 50;
pub const MAX_COMPARE: usize = 3;

/// Engine-wide settings passed explicitly into validation, the simulator,
/// the store and the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub min_iterations: u32,
    pub max_iterations: u32,
    /// Used when a request leaves the iteration count unspecified.
    pub default_iterations: u32,
    pub page_size: u32,
    pub histogram_bins: usize,
    pub max_compare: usize,
    /// Fixed RNG seed. `None` seeds each run from OS entropy.
    pub seed: Option<u64>,
    pub db_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_iterations: MIN_ITERATIONS,
            max_iterations: MAX_ITERATIONS,
            default_iterations: DEFAULT_ITERATIONS,
            page_size: RESULTS_PER_PAGE,
            histogram_bins: HISTOGRAM_BINS,
            max_compare: MAX_COMPARE,
            seed: None,
            db_path: PathBuf::from("fairsim.db"),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with any `FAIRSIM_*` environment variables.
    pub fn from_env() -> FairResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] but reads through `lookup`, so tests
    /// don't have to mutate the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> FairResult<Self> {
        let mut config = EngineConfig::default();

        if let Some(v) = parse_var(&lookup, "FAIRSIM_MIN_ITERATIONS", "min_iterations")? {
            config.min_iterations = v;
        }
        if let Some(v) = parse_var(&lookup, "FAIRSIM_MAX_ITERATIONS", "max_iterations")? {
            config.max_iterations = v;
        }
        if let Some(v) = parse_var(&lookup, "FAIRSIM_DEFAULT_ITERATIONS", "default_iterations")? {
            config.default_iterations = v;
        }
        if let Some(v) = parse_var(&lookup, "FAIRSIM_PAGE_SIZE", "page_size")? {
            config.page_size = v;
        }
        if let Some(v) = parse_var(&lookup, "FAIRSIM_SEED", "seed")? {
            config.seed = Some(v);
        }
        if let Some(path) = lookup("FAIRSIM_DB").filter(|p| !p.trim().is_empty()) {
            config.db_path = PathBuf::from(path.trim());
        }

        config.check()?;
        Ok(config)
    }

    /// Reject settings no run could satisfy.
    pub fn check(&self) -> FairResult<()> {
        if self.min_iterations == 0 {
            return Err(FairError::invalid("min_iterations", "must be at least 1"));
        }
        if self.min_iterations > self.max_iterations {
            return Err(FairError::invalid(
                "min_iterations",
                format!(
                    "{} exceeds max_iterations {}",
                    self.min_iterations, self.max_iterations
                ),
            ));
        }
        if !(self.min_iterations..=self.max_iterations).contains(&self.default_iterations) {
            return Err(FairError::invalid(
                "default_iterations",
                format!(
                    "{} is outside [{}, {}]",
                    self.default_iterations, self.min_iterations, self.max_iterations
                ),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_LIMIT {
            return Err(FairError::invalid(
                "page_size",
                format!("must be between 1 and {MAX_PAGE_LIMIT}"),
            ));
        }
        if self.histogram_bins == 0 {
            return Err(FairError::invalid("histogram_bins", "must be at least 1"));
        }
        if self.max_compare < 2 {
            return Err(FairError::invalid("max_compare", "must allow at least 2 simulations"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &'static str,
) -> FairResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| FairError::invalid(field, format!("{key}={raw:?} is not a valid number"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_canonical_bounds() {
        let config = EngineConfig::default();
        assert_eq!(config.min_iterations, 1_000);
        assert_eq!(config.max_iterations, 100_000);
        assert_eq!(config.default_iterations, 10_000);
        assert_eq!(config.page_size, 20);
        assert_eq!(config.histogram_bins, 50);
        assert!(config.check().is_ok());
    }

    #[test]
    fn env_overlay_applies_values() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("FAIRSIM_MIN_ITERATIONS", "10"),
            ("FAIRSIM_DEFAULT_ITERATIONS", "50"),
            ("FAIRSIM_SEED", "7"),
            ("FAIRSIM_DB", "/tmp/runs.db"),
        ]))
        .unwrap();
        assert_eq!(config.min_iterations, 10);
        assert_eq!(config.default_iterations, 50);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.db_path, PathBuf::from("/tmp/runs.db"));
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup_from(&[("FAIRSIM_PAGE_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, FairError::InvalidParameter { field: "page_size", .. }));
    }

    #[test]
    fn inverted_iteration_bounds_rejected() {
        let config = EngineConfig { min_iterations: 500, max_iterations: 100, ..Default::default() };
        assert!(config.check().is_err());
    }

    #[test]
    fn default_outside_bounds_rejected() {
        let err = EngineConfig::from_lookup(lookup_from(&[("FAIRSIM_DEFAULT_ITERATIONS", "5")]))
            .unwrap_err();
        assert!(matches!(err, FairError::InvalidParameter { field: "default_iterations", .. }));
    }
}
