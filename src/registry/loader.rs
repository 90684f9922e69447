//! Policy loader
//!
//! Reads a policy file, parses it, verifies it, and builds the dataset
//! type registry. A policy that fails verification is rejected whole;
//! the returned error carries the full validation log so the caller can
//! show exactly what does not hold.

use crate::config::Config;
use crate::error::{PolicyError, Result};
use crate::policy::{KeySet, Policy, PolicyVerifier, ValidationReport};
use crate::registry::descriptor::PolicyRegistry;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// A successfully loaded and verified policy.
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub name: String,
    pub path: Option<PathBuf>,
    pub checksum: String,
    pub loaded_at: DateTime<Utc>,
    pub policy: Policy,
    pub registry: PolicyRegistry,
    pub report: ValidationReport,
}

/// Policy loader for reading and verifying policy files
pub struct PolicyLoader {
    base_keys: KeySet,
    strict: bool,
}

impl PolicyLoader {
    pub fn new() -> Self {
        Self {
            base_keys: KeySet::builtin(),
            strict: false,
        }
    }

    /// Build a loader honoring the environment configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_keys: KeySet::builtin().with_extra(config.extra_keys.iter().cloned()),
            strict: config.strict,
        }
    }

    /// Replace the base substitution key set.
    pub fn with_keys(mut self, keys: KeySet) -> Self {
        self.base_keys = keys;
        self
    }

    /// Promote validation warnings to rejection.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Load a policy from a file. The policy name is the file stem.
    pub fn load_file(&self, path: &Path) -> Result<LoadedPolicy> {
        let source = fs::read_to_string(path).map_err(|e| PolicyError::ReadFailed {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;

        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("policy")
            .to_string();

        self.load(name, Some(path.to_path_buf()), &source)
    }

    /// Load a policy from an in-memory string.
    pub fn load_str(&self, name: &str, source: &str) -> Result<LoadedPolicy> {
        self.load(name.to_string(), None, source)
    }

    fn load(&self, name: String, path: Option<PathBuf>, source: &str) -> Result<LoadedPolicy> {
        let origin = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| name.clone());

        let checksum = compute_checksum(source.as_bytes());
        let policy = parse_policy(source, &origin)?;

        let verifier = PolicyVerifier::with_keys(self.base_keys.clone()).with_strict(self.strict);
        let report = verifier.verify(&policy);
        if !report.passed {
            return Err(PolicyError::ValidationFailed {
                errors: report.error_count(),
                warnings: report.warning_count(),
                log: report.error_log(),
            });
        }

        let registry = PolicyRegistry::with_keys(&policy, self.base_keys.clone())?;

        info!(
            "Loaded policy '{}' ({} dataset types, checksum {})",
            name,
            registry.len(),
            &checksum[..12]
        );

        Ok(LoadedPolicy {
            name,
            path,
            checksum,
            loaded_at: Utc::now(),
            policy,
            registry,
            report,
        })
    }
}

impl Default for PolicyLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a policy document without verifying it.
pub fn parse_policy(source: &str, origin: &str) -> Result<Policy> {
    serde_yaml::from_str(source).map_err(|e| PolicyError::ParseFailed {
        origin: origin.to_string(),
        cause: e.to_string(),
    })
}

/// Serialize a policy back to YAML.
pub fn to_yaml_string(policy: &Policy) -> Result<String> {
    serde_yaml::to_string(policy).map_err(|e| PolicyError::SerializeFailed {
        cause: e.to_string(),
    })
}

/// Compute SHA256 checksum of data
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
camera: "../camera"
defaultLevel: visit
exposures:
  raw:
    template: "raw/raw_v%(visit)d_f%(filter)s.fits.gz"
    python: obs.image.DecoratedImageU
    persistable: DecoratedImageU
    storage: FitsStorage
datasets:
  ccdExposureId:
    template: ignored
    python: int
    persistable: ignored
    storage: ignored
"#;

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("testcam.yaml");
        fs::write(&path, MINIMAL).unwrap();

        let loaded = PolicyLoader::new().load_file(&path).unwrap();

        assert_eq!(loaded.name, "testcam");
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.checksum.len(), 64);
        assert!(loaded.loaded_at <= Utc::now());
        assert!(loaded.report.passed);
        assert!(loaded.registry.contains("raw"));
        assert!(loaded.registry.contains("ccdExposureId"));
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = PolicyLoader::new()
            .load_file(&temp_dir.path().join("absent.yaml"))
            .unwrap_err();
        assert!(matches!(err, PolicyError::ReadFailed { .. }));
    }

    #[test]
    fn test_unparseable_policy() {
        let err = PolicyLoader::new()
            .load_str("broken", "datasets: [not, a, map]\n")
            .unwrap_err();
        assert!(matches!(err, PolicyError::ParseFailed { .. }));
    }

    #[test]
    fn test_invalid_policy_rejected_with_log() {
        let source = "datasets:\n  incomplete:\n    template: \"a/%(visit)d.fits\"\n";
        let err = PolicyLoader::new().load_str("broken", source).unwrap_err();
        match err {
            PolicyError::ValidationFailed { errors, log, .. } => {
                assert!(errors > 0);
                assert!(log.contains("MISSING REQUIRED FIELDS"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_strict_mode_promotes_warnings() {
        let source = r#"
datasets:
  catalog:
    template: "cat/v%(visit)d.hdf"
    python: obs.table.BaseCatalog
    persistable: BaseCatalog
    storage: HdfStorage
"#;
        let loaded = PolicyLoader::new().load_str("lenient", source).unwrap();
        assert_eq!(loaded.report.warning_count(), 1);

        let err = PolicyLoader::new()
            .with_strict(true)
            .load_str("strict", source)
            .unwrap_err();
        assert!(matches!(err, PolicyError::ValidationFailed { .. }));
    }

    #[test]
    fn test_loader_from_config_extends_keys() {
        let source = r#"
datasets:
  spectrum:
    template: "spectra/%(arm)s_v%(visit)d.fits"
    python: obs.image.ExposureF
    persistable: ExposureF
    storage: FitsStorage
"#;
        let config = Config {
            policy_dir: PathBuf::from("./policy"),
            extra_keys: vec!["arm".to_string()],
            strict: true,
        };

        let loaded = PolicyLoader::from_config(&config)
            .load_str("spectro", source)
            .unwrap();
        assert!(loaded.registry.known_keys().contains("arm"));
        assert_eq!(loaded.report.warning_count(), 0);
    }

    #[test]
    fn test_round_trip_is_idempotent() {
        let policy = parse_policy(MINIMAL, "inline").unwrap();

        let first = to_yaml_string(&policy).unwrap();
        let reparsed = parse_policy(&first, "inline").unwrap();
        assert_eq!(policy, reparsed);

        let second = to_yaml_string(&reparsed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_shipped_test_camera_policy() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("policy/testcam.yaml");

        let loaded = PolicyLoader::new().load_file(&path).unwrap();
        assert_eq!(loaded.name, "testcam");
        assert!(loaded.registry.len() >= 15);
        assert!(loaded.registry.contains("raw"));
        assert!(loaded.registry.contains("deepCoadd_calexp"));
        assert_eq!(loaded.registry.default_level(), Some("visit"));
        assert_eq!(loaded.registry.composites().count(), 1);

        // The shipped policy is clean even under strict verification.
        PolicyLoader::new()
            .with_strict(true)
            .load_file(&path)
            .unwrap();
    }
}
