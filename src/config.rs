//! Service configuration.
//!
//! Configuration is read from an optional TOML file, then overridden by
//! `BIOSIM_*` environment variables, then validated as a whole.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CAPACITY;
use crate::epoch::DataLayout;
use crate::error::ConfigError;

/// Request and cache limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum locations in a normals request.
    pub max_coordinates_normals: usize,
    /// Maximum locations in a weather generation request.
    pub max_coordinates_generation: usize,
    /// Reference cache capacity.
    pub cache_capacity: usize,
    /// Maximum replicates per generation request.
    pub max_replicates: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_coordinates_normals: 50,
            max_coordinates_generation: 10,
            cache_capacity: DEFAULT_CAPACITY,
            max_replicates: 1_000,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Run pooled engines; off means one synchronous instance everywhere.
    pub multiprocess: bool,
    /// Production sizing; development caps pools at two workers.
    pub production: bool,
    /// Start engines on first use instead of at startup.
    pub lazy_start: bool,
}

impl WorkerSettings {
    /// Workers per pooled generation epoch.
    #[must_use]
    pub const fn generation_workers(&self) -> usize {
        match (self.multiprocess, self.production) {
            (false, _) => 1,
            (true, true) => 3,
            (true, false) => 2,
        }
    }

    /// Workers for a model with `nominal` processes: half the nominal count,
    /// at least one, at most two in development.
    #[must_use]
    pub fn model_workers(&self, nominal: usize) -> usize {
        if !self.multiprocess {
            return 1;
        }
        let workers = (nominal / 2).max(1);
        if self.production {
            workers
        } else {
            workers.min(2)
        }
    }
}

/// Daily rotation of the live epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    /// Run the rotation scheduler.
    pub enabled: bool,
    /// Seconds between day-change checks.
    pub check_interval_secs: u64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_secs: 3_600,
        }
    }
}

impl RotationSettings {
    /// Check interval as a duration.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Handling of years no epoch covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageSettings {
    /// Serve the covered years instead of rejecting the request.
    pub allow_partial: bool,
}

/// Top-level configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BioSimConfig {
    /// Installation root holding `data/` and `models/`.
    pub data_root: PathBuf,
    pub limits: Limits,
    pub workers: WorkerSettings,
    pub rotation: RotationSettings,
    pub coverage: CoverageSettings,
}

impl Default for BioSimConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            limits: Limits::default(),
            workers: WorkerSettings::default(),
            rotation: RotationSettings::default(),
            coverage: CoverageSettings::default(),
        }
    }
}

fn parse_positive_usize(raw: &str, env_name: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::Env {
            env_name: env_name.to_string(),
            message: "must be an integer > 0".to_string(),
        }),
    }
}

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

impl BioSimConfig {
    /// Parses a TOML document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse { message: e.to_string() })
    }

    /// Loads the optional file, applies `BIOSIM_*` environment overrides and
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` describing the first failing stage.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup` (the environment in production).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Env` for unparsable values.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(root) = lookup("BIOSIM_DATA_ROOT") {
            self.data_root = PathBuf::from(root);
        }
        if let Some(v) = lookup("BIOSIM_PRODUCTION_MODE") {
            self.workers.production = parse_bool(&v);
        }
        if let Some(v) = lookup("BIOSIM_MULTIPROCESS_MODE") {
            self.workers.multiprocess = parse_bool(&v);
        }
        if let Some(v) = lookup("BIOSIM_LAZY_START") {
            self.workers.lazy_start = parse_bool(&v);
        }
        if let Some(v) = lookup("BIOSIM_NB_MAX_COORDINATES_NORMALS") {
            self.limits.max_coordinates_normals = parse_positive_usize(&v, "BIOSIM_NB_MAX_COORDINATES_NORMALS")?;
        }
        if let Some(v) = lookup("BIOSIM_NB_MAX_COORDINATES_WG") {
            self.limits.max_coordinates_generation = parse_positive_usize(&v, "BIOSIM_NB_MAX_COORDINATES_WG")?;
        }
        if let Some(v) = lookup("BIOSIM_CACHE_CAPACITY") {
            self.limits.cache_capacity = parse_positive_usize(&v, "BIOSIM_CACHE_CAPACITY")?;
        }
        if let Some(v) = lookup("BIOSIM_UPDATER_ENABLED") {
            self.rotation.enabled = parse_bool(&v);
        }
        if let Some(v) = lookup("BIOSIM_ROTATION_CHECK_SECS") {
            self.rotation.check_interval_secs = parse_positive_usize(&v, "BIOSIM_ROTATION_CHECK_SECS")? as u64;
        }
        if let Some(v) = lookup("BIOSIM_ALLOW_PARTIAL_COVERAGE") {
            self.coverage.allow_partial = parse_bool(&v);
        }
        Ok(())
    }

    /// Checks every setting, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` listing each issue.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues: Vec<String> = Vec::new();

        if self.data_root.as_os_str().is_empty() {
            issues.push("data_root must not be empty".into());
        }
        if self.limits.max_coordinates_normals == 0 {
            issues.push("limits.max_coordinates_normals must be > 0".into());
        }
        if self.limits.max_coordinates_generation == 0 {
            issues.push("limits.max_coordinates_generation must be > 0".into());
        }
        if self.limits.cache_capacity == 0 {
            issues.push("limits.cache_capacity must be > 0".into());
        }
        if self.limits.max_replicates == 0 {
            issues.push("limits.max_replicates must be > 0".into());
        }
        if self.rotation.check_interval_secs == 0 {
            issues.push("rotation.check_interval_secs must be > 0".into());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }

    /// Data layout rooted at `data_root`.
    #[must_use]
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(self.data_root.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_reference_limits() {
        let config = BioSimConfig::default();
        assert_eq!(config.limits.max_coordinates_normals, 50);
        assert_eq!(config.limits.max_coordinates_generation, 10);
        assert_eq!(config.limits.cache_capacity, 100_000);
        assert_eq!(config.rotation.check_interval(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn worker_sizing() {
        let dev = WorkerSettings {
            multiprocess: true,
            production: false,
            lazy_start: false,
        };
        let prod = WorkerSettings {
            production: true,
            ..dev.clone()
        };
        let single = WorkerSettings::default();

        assert_eq!(single.generation_workers(), 1);
        assert_eq!(dev.generation_workers(), 2);
        assert_eq!(prod.generation_workers(), 3);

        assert_eq!(single.model_workers(9), 1);
        assert_eq!(dev.model_workers(9), 2);
        assert_eq!(prod.model_workers(9), 4);
        assert_eq!(prod.model_workers(1), 1);
        assert_eq!(dev.model_workers(3), 1);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BioSimConfig::from_toml_str(
            r#"
            data_root = "/srv/biosim"

            [limits]
            max_coordinates_generation = 4

            [coverage]
            allow_partial = true
            "#,
        )
        .unwrap();
        assert_eq!(config.data_root, PathBuf::from("/srv/biosim"));
        assert_eq!(config.limits.max_coordinates_generation, 4);
        assert_eq!(config.limits.max_coordinates_normals, 50);
        assert!(config.coverage.allow_partial);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = BioSimConfig::from_toml_str("limits = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BIOSIM_MULTIPROCESS_MODE", "true"),
            ("BIOSIM_PRODUCTION_MODE", "1"),
            ("BIOSIM_NB_MAX_COORDINATES_WG", "25"),
            ("BIOSIM_UPDATER_ENABLED", "off"),
        ]);
        let mut config = BioSimConfig::default();
        config
            .apply_overrides_from(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert!(config.workers.multiprocess);
        assert!(config.workers.production);
        assert!(!config.rotation.enabled);
        assert_eq!(config.limits.max_coordinates_generation, 25);
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = BioSimConfig::default();
        let err = config
            .apply_overrides_from(|k| (k == "BIOSIM_CACHE_CAPACITY").then(|| "-3".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref env_name, .. } if env_name == "BIOSIM_CACHE_CAPACITY"));
    }

    #[test]
    fn validation_collects_every_issue() {
        let mut config = BioSimConfig::default();
        config.limits.cache_capacity = 0;
        config.limits.max_coordinates_normals = 0;
        config.rotation.check_interval_secs = 0;
        let ConfigError::Invalid { issues } = config.validate().unwrap_err() else {
            panic!("expected Invalid");
        };
        assert_eq!(issues.len(), 3);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("biosim.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[limits]\ncache_capacity = 12").unwrap();

        let config = BioSimConfig::load(Some(&path)).unwrap();
        assert_eq!(config.limits.cache_capacity, 12);

        let missing = BioSimConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
